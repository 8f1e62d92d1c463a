//! Service discovery through a discovery adapter.
//!
//! Discoverable services are announced to the adapter over HTTP when the host
//! starts, re-announced on a fixed interval and withdrawn on shutdown.

use crate::hosting::{HostedService, HostedServiceError};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use validator::Validate;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Invalid discovery options: {0}")]
    InvalidOptions(#[from] validator::ValidationErrors),
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Discovery adapter {0} requires transport security but is not https")]
    InsecureAdapter(String),
    #[error("Discovery adapter request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    None,
    #[default]
    Transport,
    Message,
    TransportWithMessageCredential,
}

impl SecurityMode {
    pub fn requires_transport(&self) -> bool {
        matches!(self, Self::Transport | Self::TransportWithMessageCredential)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BindingOptions {
    pub security_mode: SecurityMode,
}

impl BindingOptions {
    pub fn scheme(&self) -> &'static str {
        if self.security_mode.requires_transport() {
            "https"
        } else {
            "http"
        }
    }
}

fn default_announcement_interval_secs() -> u64 {
    30
}

fn default_service_base_url() -> String {
    "http://localhost:5000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DiscoveryOptions {
    #[validate(url)]
    pub adapter_url: String,
    #[serde(default = "default_announcement_interval_secs")]
    #[validate(range(min = 1))]
    pub announcement_interval_secs: u64,
    #[serde(default = "default_service_base_url")]
    #[validate(url)]
    pub service_base_url: String,
    #[serde(skip)]
    pub discovery_adapter_binding: BindingOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverableService {
    pub contract: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub contract: String,
    pub endpoint: String,
    pub binding: BindingOptions,
}

type BindingCustomization = Box<dyn Fn(&mut BindingOptions) + Send + Sync>;

pub struct ServiceDiscovery {
    options: DiscoveryOptions,
    binding_customizations: Vec<BindingCustomization>,
    services: Vec<DiscoverableService>,
}

impl ServiceDiscovery {
    pub fn configure_service_discovery(options: DiscoveryOptions) -> Self {
        Self {
            options,
            binding_customizations: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut DiscoveryOptions),
    {
        configure(&mut self.options);
        self
    }

    /// Customizations run in registration order against the binding of every
    /// discoverable service.
    pub fn add_binding_customization<F>(mut self, customization: F) -> Self
    where
        F: Fn(&mut BindingOptions) + Send + Sync + 'static,
    {
        self.binding_customizations.push(Box::new(customization));
        self
    }

    pub fn discover_service_using_adapter(mut self, contract: &str, path: &str) -> Self {
        self.services.push(DiscoverableService {
            contract: contract.to_string(),
            path: path.to_string(),
        });
        self
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    pub fn services(&self) -> &[DiscoverableService] {
        &self.services
    }

    pub fn service_binding(&self) -> BindingOptions {
        let mut binding = BindingOptions::default();
        for customize in &self.binding_customizations {
            customize(&mut binding);
        }
        binding
    }

    /// Endpoints are announced exactly as configured; a base URL whose scheme
    /// disagrees with the service binding is logged, not rewritten.
    pub fn announcements(&self) -> Result<Vec<Announcement>, DiscoveryError> {
        let binding = self.service_binding();
        let base = parse_url(&self.options.service_base_url)?;
        if base.scheme() != binding.scheme() {
            warn!(
                "Service base URL {} does not match the {:?} binding, which expects {}",
                base,
                binding.security_mode,
                binding.scheme()
            );
        }

        self.services
            .iter()
            .map(|service| {
                let endpoint = base.join(&service.path).map_err(|e| DiscoveryError::InvalidUrl {
                    url: service.path.clone(),
                    reason: e.to_string(),
                })?;
                Ok(Announcement {
                    contract: service.contract.clone(),
                    endpoint: endpoint.to_string(),
                    binding,
                })
            })
            .collect()
    }

    pub fn add_service_discovery_adapter(self) -> Result<DiscoveryAdapterService, DiscoveryError> {
        self.options.validate()?;

        let adapter = parse_url(&self.options.adapter_url)?;
        if self.options.discovery_adapter_binding.security_mode.requires_transport()
            && adapter.scheme() != "https"
        {
            return Err(DiscoveryError::InsecureAdapter(self.options.adapter_url.clone()));
        }

        let announcements = self.announcements()?;
        Ok(DiscoveryAdapterService {
            client: Client::new(),
            adapter,
            interval: Duration::from_secs(self.options.announcement_interval_secs),
            announcements: Arc::new(announcements),
            worker: Mutex::new(None),
        })
    }
}

fn parse_url(url: &str) -> Result<Url, DiscoveryError> {
    Url::parse(url).map_err(|e| DiscoveryError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// `{adapter}/announcements`, or `{adapter}/announcements/{contract}` with the
/// contract percent-encoded as a single path segment.
fn announcements_url(adapter: &Url, contract: Option<&str>) -> Result<Url, DiscoveryError> {
    let mut url = adapter.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| DiscoveryError::InvalidUrl {
            url: adapter.to_string(),
            reason: "cannot be a base URL".to_string(),
        })?;
        segments.pop_if_empty().push("announcements");
        if let Some(contract) = contract {
            segments.push(contract);
        }
    }
    Ok(url)
}

async fn announce(
    client: &Client,
    adapter: &Url,
    announcement: &Announcement,
) -> Result<(), DiscoveryError> {
    client
        .post(announcements_url(adapter, None)?)
        .json(announcement)
        .send()
        .await?
        .error_for_status()?;
    debug!("Announced {} at {}", announcement.contract, announcement.endpoint);
    Ok(())
}

async fn withdraw(
    client: &Client,
    adapter: &Url,
    announcement: &Announcement,
) -> Result<(), DiscoveryError> {
    client
        .delete(announcements_url(adapter, Some(&announcement.contract))?)
        .send()
        .await?
        .error_for_status()?;
    debug!("Withdrew {}", announcement.contract);
    Ok(())
}

async fn announce_all(client: &Client, adapter: &Url, announcements: &[Announcement]) {
    for announcement in announcements {
        if let Err(e) = announce(client, adapter, announcement).await {
            warn!("Announcement of {} failed: {}", announcement.contract, e);
        }
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct DiscoveryAdapterService {
    client: Client,
    adapter: Url,
    interval: Duration,
    announcements: Arc<Vec<Announcement>>,
    worker: Mutex<Option<Worker>>,
}

impl DiscoveryAdapterService {
    pub fn announcements(&self) -> &[Announcement] {
        &self.announcements
    }

    async fn first_announcement(&self) {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        for announcement in self.announcements.iter() {
            let result = backoff::future::retry(policy.clone(), || async move {
                announce(&self.client, &self.adapter, announcement)
                    .await
                    .map_err(backoff::Error::transient)
            })
            .await;
            if let Err(e) = result {
                warn!(
                    "Discovery adapter unreachable, {} will be announced later: {}",
                    announcement.contract, e
                );
            }
        }
    }
}

#[async_trait]
impl HostedService for DiscoveryAdapterService {
    fn name(&self) -> String {
        "discovery-adapter".to_string()
    }

    async fn start(&self) -> Result<(), HostedServiceError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Ok(());
        }
        if self.announcements.is_empty() {
            info!("No discoverable services registered");
        }

        self.first_announcement().await;

        let (shutdown, mut signal) = watch::channel(false);
        let client = self.client.clone();
        let adapter = self.adapter.clone();
        let announcements = self.announcements.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => announce_all(&client, &adapter, &announcements).await,
                    _ = signal.changed() => break,
                }
            }
        });

        *worker = Some(Worker { shutdown, task });
        info!("Discovery adapter started: {}", self.adapter);
        Ok(())
    }

    async fn stop(&self) -> Result<(), HostedServiceError> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.task.await {
            warn!("Discovery announcer ended abnormally: {}", e);
        }

        for announcement in self.announcements.iter() {
            if let Err(e) = withdraw(&self.client, &self.adapter, announcement).await {
                warn!("Withdrawal of {} failed: {}", announcement.contract, e);
            }
        }
        Ok(())
    }
}
