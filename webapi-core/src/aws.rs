use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use aws_config::SdkConfig;

/// Default AWS options bound from the `aws` configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsOptions {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    /// Overrides the service endpoint, e.g. for localstack.
    #[serde(default)]
    pub service_url: Option<String>,
}

impl AwsOptions {
    pub async fn load_sdk_config(&self) -> SdkConfig {
        let region_provider = RegionProviderChain::first_try(self.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new("us-east-1"));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(url) = &self.service_url {
            loader = loader.endpoint_url(url);
        }

        let config = loader.load().await;
        info!(
            "AWS options loaded: region={}",
            config
                .region()
                .map(|r| r.as_ref().to_string())
                .unwrap_or_else(|| "unset".to_string())
        );
        config
    }
}
