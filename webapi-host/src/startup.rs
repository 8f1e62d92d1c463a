//! Composition root.
//!
//! [`Startup::configure_services`] builds the service container and
//! [`Startup::configure`] turns it into the HTTP pipeline. Optional
//! integrations are selected with Cargo features:
//!
//! - `nybus`: message bus over RabbitMQ
//! - `discovery-adapter`: announcements to a service discovery adapter
//! - `aws`: default AWS options
//! - `nybus-bridge`: bus bridge publishing to SNS (implies `aws`)

use crate::auth::middleware::{
    authentication_middleware, require_authenticated_user, token_routes,
};
use crate::auth::{ConfiguredClientAuthenticator, JwtAuthentication, JwtOptions};
use crate::config::{ConfigError, Settings};
use crate::controllers;
use crate::middleware::exception_page::exception_layer;
use crate::middleware::hsts::{hsts_middleware, HstsOptions};
use crate::middleware::https_redirection::{https_redirection_middleware, HttpsRedirection};
use axum::{middleware, Router};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;
use validator::Validate;
use webapi_core::health::{create_health_router, HealthCheckOptions, HealthChecks};
use webapi_core::hosting::{HostEnvironment, HostedServices};

#[cfg(feature = "aws")]
use webapi_core::aws::{AwsOptions, SdkConfig};
#[cfg(feature = "nybus-bridge")]
use webapi_core::bridge::{NybusBridge, SnsBridgeOptions, SnsNybusBridge};
#[cfg(feature = "nybus")]
use webapi_core::bus::{BusHealthCheck, Nybus, NybusBuilder, NybusHostedService, NybusOptions};
#[cfg(feature = "discovery-adapter")]
use webapi_core::discovery::{
    DiscoverableService, DiscoveryAdapterService, DiscoveryError, DiscoveryOptions, SecurityMode,
    ServiceDiscovery,
};

pub const HEALTH_PATH: &str = "/health";

#[cfg(feature = "nybus")]
pub const UNACKED_MESSAGE_COUNT_LIMIT: u16 = 10;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[cfg(feature = "discovery-adapter")]
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Everything registered by [`Startup::configure_services`].
pub struct AppServices {
    pub jwt: Option<Arc<JwtAuthentication>>,
    pub health_checks: HealthChecks,
    pub hosted_services: HostedServices,
    #[cfg(feature = "nybus")]
    pub nybus: Arc<Nybus>,
    #[cfg(feature = "discovery-adapter")]
    pub discovery: Option<Arc<DiscoveryAdapterService>>,
    #[cfg(feature = "aws")]
    pub aws: SdkConfig,
    #[cfg(feature = "nybus-bridge")]
    pub bridge: Arc<dyn NybusBridge>,
}

pub struct Startup {
    settings: Settings,
    environment: HostEnvironment,
    jwt_enabled: bool,
}

impl Startup {
    /// Fails when `jwt.enabled` is missing or not a boolean.
    pub fn new(settings: Settings, environment: HostEnvironment) -> Result<Self, ConfigError> {
        let jwt_enabled = settings.get_required_bool("jwt.enabled")?;
        Ok(Self {
            settings,
            environment,
            jwt_enabled,
        })
    }

    pub fn jwt_enabled(&self) -> bool {
        self.jwt_enabled
    }

    pub async fn configure_services(&self) -> Result<AppServices, StartupError> {
        let jwt = if self.jwt_enabled {
            Some(Arc::new(self.configure_jwt()?))
        } else {
            None
        };

        #[allow(unused_mut)]
        let mut health_checks = HealthChecks::new();
        #[allow(unused_mut)]
        let mut hosted_services = HostedServices::new();

        #[cfg(feature = "nybus")]
        let nybus = {
            let options: NybusOptions = self.settings.section_or_default("nybus")?;
            let register_health_check = options.register_health_check;
            let nybus = Arc::new(
                NybusBuilder::new()
                    .use_configuration(options)
                    .use_rabbitmq_bus_engine(|rabbit| {
                        rabbit.unacked_message_count_limit = UNACKED_MESSAGE_COUNT_LIMIT
                    })
                    .build(),
            );
            hosted_services.add(Arc::new(NybusHostedService::new(nybus.clone())));
            if register_health_check {
                health_checks.add_check(Arc::new(BusHealthCheck::new(nybus.clone())));
            }
            nybus
        };

        #[cfg(feature = "discovery-adapter")]
        let discovery = self.configure_discovery(&mut hosted_services)?;

        #[cfg(feature = "aws")]
        let aws = {
            let options: AwsOptions = self.settings.section_or_default("aws")?;
            options.load_sdk_config().await
        };

        #[cfg(feature = "nybus-bridge")]
        let bridge: Arc<dyn NybusBridge> = {
            let options: SnsBridgeOptions = self.settings.section_or_default("bridge")?;
            Arc::new(SnsNybusBridge::from_sdk_config(&aws, options))
        };

        info!(
            "Services configured: jwt_enabled={}, hosted_services={:?}",
            self.jwt_enabled,
            hosted_services.names()
        );

        Ok(AppServices {
            jwt,
            health_checks,
            hosted_services,
            #[cfg(feature = "nybus")]
            nybus,
            #[cfg(feature = "discovery-adapter")]
            discovery,
            #[cfg(feature = "aws")]
            aws,
            #[cfg(feature = "nybus-bridge")]
            bridge,
        })
    }

    /// Only the configured client may obtain a token; the rest of the `jwt`
    /// section is bound onto the options.
    fn configure_jwt(&self) -> Result<JwtAuthentication, StartupError> {
        let authenticator = ConfiguredClientAuthenticator::new(
            self.settings.get("jwt.client.user"),
            self.settings.get("jwt.client.password"),
        );

        let options: JwtOptions = self.settings.section("jwt")?;
        options.validate().map_err(|errors| ConfigError::Validation {
            section: "jwt".to_string(),
            errors,
        })?;

        Ok(JwtAuthentication::new(options, Arc::new(authenticator)))
    }

    #[cfg(feature = "discovery-adapter")]
    fn configure_discovery(
        &self,
        hosted_services: &mut HostedServices,
    ) -> Result<Option<Arc<DiscoveryAdapterService>>, StartupError> {
        if !self.settings.has_section("discovery") {
            tracing::warn!("No discovery section configured, discovery adapter disabled");
            return Ok(None);
        }

        let options: DiscoveryOptions = self.settings.section("discovery")?;
        let services: Vec<DiscoverableService> =
            self.settings.section_or_default("discovery.services")?;

        let mut discovery = ServiceDiscovery::configure_service_discovery(options)
            .configure(|o| o.discovery_adapter_binding.security_mode = SecurityMode::None)
            .add_binding_customization(|binding| binding.security_mode = SecurityMode::None);
        for service in &services {
            discovery = discovery.discover_service_using_adapter(&service.contract, &service.path);
        }

        let adapter = Arc::new(discovery.add_service_discovery_adapter()?);
        hosted_services.add(adapter.clone());
        Ok(Some(adapter))
    }

    /// Pipeline order, outermost first: exception page, HSTS (outside
    /// development), `/health`, authentication, HTTPS redirection, controllers.
    pub fn configure(&self, services: &AppServices) -> Result<Router, StartupError> {
        let server = self.settings.server()?;

        let mut mvc = controllers::routes();
        if let Some(jwt) = &services.jwt {
            mvc = mvc
                .route_layer(middleware::from_fn(require_authenticated_user))
                .merge(token_routes(jwt.clone()));
        }

        let mut app = mvc.layer(middleware::from_fn_with_state(
            Arc::new(HttpsRedirection::new(server.https_port)),
            https_redirection_middleware,
        ));
        if let Some(jwt) = &services.jwt {
            app = app.layer(middleware::from_fn_with_state(
                jwt.clone(),
                authentication_middleware,
            ));
        }

        let health = create_health_router(
            HEALTH_PATH,
            services.health_checks.clone(),
            HealthCheckOptions {
                allow_caching_responses: false,
                ..Default::default()
            },
        );
        let mut app = health.merge(app);

        if !self.environment.is_development() {
            app = app.layer(middleware::from_fn_with_state(
                Arc::new(HstsOptions::default()),
                hsts_middleware,
            ));
        }

        Ok(app
            .layer(exception_layer(&self.environment))
            .layer(TraceLayer::new_for_http()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenResponse;
    use crate::config::settings_from_toml;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use tower::ServiceExt;

    const JWT_ENABLED: &str = r#"
        [jwt]
        enabled = "True"
        secret_key = "a-test-secret-of-sufficient-length"
        issuer = "webapi-host"

        [jwt.client]
        user = "client"
        password = "s3cret"

        [aws]
        region = "eu-west-1"
    "#;

    const JWT_DISABLED: &str = r#"
        [jwt]
        enabled = false

        [aws]
        region = "eu-west-1"
    "#;

    async fn router(toml: &str, environment: &str) -> Router {
        let startup =
            Startup::new(settings_from_toml(toml), HostEnvironment::new(environment)).unwrap();
        let services = startup.configure_services().await.unwrap();
        startup.configure(&services).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::HOST, "api.example.com")
            .body(Body::empty())
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn missing_jwt_enabled_fails_fast() {
        let result = Startup::new(
            settings_from_toml("[server]\nhttp_port = 5000\n"),
            HostEnvironment::default(),
        );
        assert!(matches!(result, Err(ConfigError::Missing(_))));

        let result = Startup::new(
            settings_from_toml("[jwt]\nenabled = \"yes\"\n"),
            HostEnvironment::default(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidBool { .. })));
    }

    #[tokio::test]
    async fn jwt_enabled_without_secret_is_rejected() {
        let startup = Startup::new(
            settings_from_toml("[jwt]\nenabled = true\n[aws]\nregion = \"eu-west-1\"\n"),
            HostEnvironment::default(),
        )
        .unwrap();

        assert!(startup.configure_services().await.is_err());
    }

    #[tokio::test]
    async fn health_is_anonymous_and_uncached() {
        let response = router(JWT_ENABLED, "Production")
            .await
            .oneshot(get("/health"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store, no-cache");
        assert_eq!(body_string(response).await, "Healthy");
    }

    #[tokio::test]
    async fn controllers_require_a_token_when_jwt_is_enabled() {
        let app = router(JWT_ENABLED, "Production").await;

        let response = app.clone().oneshot(get("/api/values")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::post("/token")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"username":"client","password":"s3cret"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let token: TokenResponse = serde_json::from_str(&body_string(response).await).unwrap();

        let response = app
            .oneshot(
                Request::get("/api/identity")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token.access_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["name"], "client");
        assert_eq!(body["authenticated"], true);
    }

    #[tokio::test]
    async fn controllers_are_anonymous_when_jwt_is_disabled() {
        let app = router(JWT_DISABLED, "Production").await;

        let response = app.clone().oneshot(get("/api/values/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "\"value2\"");

        let response = app
            .oneshot(Request::post("/token").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn plain_http_is_redirected_except_for_health() {
        let toml = format!("{}\n[server]\nhttps_port = 5001\n", JWT_DISABLED);
        let app = router(&toml, "Production").await;

        let response = app.clone().oneshot(get("/api/values")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://api.example.com:5001/api/values"
        );

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn hsts_is_only_sent_outside_development() {
        let https_get = || {
            Request::get("/health")
                .header(header::HOST, "api.example.com")
                .header("x-forwarded-proto", "https")
                .body(Body::empty())
                .unwrap()
        };

        let response = router(JWT_DISABLED, "Production").await.oneshot(https_get()).await.unwrap();
        assert!(response.headers().contains_key(header::STRICT_TRANSPORT_SECURITY));

        let response = router(JWT_DISABLED, "Development")
            .await
            .oneshot(https_get())
            .await
            .unwrap();
        assert!(!response.headers().contains_key(header::STRICT_TRANSPORT_SECURITY));
    }

    #[cfg(feature = "nybus")]
    #[tokio::test]
    async fn bus_is_limited_to_ten_unacked_messages() {
        let toml = format!(
            "{}\n[nybus.rabbit_mq]\nunacked_message_count_limit = 50\n",
            JWT_DISABLED
        );
        let startup = Startup::new(settings_from_toml(&toml), HostEnvironment::default()).unwrap();

        let services = startup.configure_services().await.unwrap();

        assert_eq!(services.nybus.options().rabbit_mq.unacked_message_count_limit, 10);
        assert!(services.hosted_services.names().contains(&"nybus".to_string()));
        assert!(services.health_checks.is_empty());
    }

    #[cfg(feature = "discovery-adapter")]
    #[tokio::test]
    async fn discovery_announces_with_security_mode_none() {
        let toml = format!(
            "{}\n{}",
            JWT_DISABLED,
            r#"
            [discovery]
            adapter_url = "http://discovery.internal:8080"
            service_base_url = "http://orders.internal:8080"

            [[discovery.services]]
            contract = "IOrderService"
            path = "/soap/orders"
            "#
        );
        let startup = Startup::new(settings_from_toml(&toml), HostEnvironment::default()).unwrap();

        let services = startup.configure_services().await.unwrap();

        let discovery = services.discovery.expect("discovery adapter registered");
        let announcements = discovery.announcements();
        assert_eq!(announcements.len(), 1);
        assert_eq!(announcements[0].binding.security_mode, SecurityMode::None);
        assert_eq!(announcements[0].endpoint, "http://orders.internal:8080/soap/orders");
        assert!(services
            .hosted_services
            .names()
            .contains(&"discovery-adapter".to_string()));
    }

    #[cfg(feature = "discovery-adapter")]
    #[tokio::test]
    async fn discovery_is_skipped_without_a_section() {
        let startup =
            Startup::new(settings_from_toml(JWT_DISABLED), HostEnvironment::default()).unwrap();

        let services = startup.configure_services().await.unwrap();

        assert!(services.discovery.is_none());
    }
}
