use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

pub const DEVELOPMENT: &str = "Development";
pub const PRODUCTION: &str = "Production";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    pub name: String,
}

impl HostEnvironment {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Reads the environment name from `var`, falling back to `Production`.
    pub fn from_env_var(var: &str) -> Self {
        match std::env::var(var) {
            Ok(name) if !name.trim().is_empty() => Self::new(name.trim()),
            _ => Self::default(),
        }
    }

    pub fn is_environment(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn is_development(&self) -> bool {
        self.is_environment(DEVELOPMENT)
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new(PRODUCTION)
    }
}

#[derive(Error, Debug)]
pub enum HostedServiceError {
    #[error("Hosted service {service} failed to start: {reason}")]
    Start { service: String, reason: String },
    #[error("Hosted service {service} failed to stop: {reason}")]
    Stop { service: String, reason: String },
}

/// A background service whose lifetime follows the web host.
#[async_trait]
pub trait HostedService: Send + Sync {
    fn name(&self) -> String;

    async fn start(&self) -> Result<(), HostedServiceError>;

    async fn stop(&self) -> Result<(), HostedServiceError>;
}

#[derive(Default, Clone)]
pub struct HostedServices {
    services: Vec<Arc<dyn HostedService>>,
}

impl HostedServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, service: Arc<dyn HostedService>) {
        info!("Hosted service registered: {}", service.name());
        self.services.push(service);
    }

    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Starts services in registration order. Services already started are
    /// stopped again when a later one fails.
    pub async fn start_all(&self) -> Result<(), HostedServiceError> {
        for (index, service) in self.services.iter().enumerate() {
            if let Err(e) = service.start().await {
                error!("{}", e);
                for started in self.services[..index].iter().rev() {
                    if let Err(stop_err) = started.stop().await {
                        error!("{}", stop_err);
                    }
                }
                return Err(e);
            }
            info!("Hosted service started: {}", service.name());
        }
        Ok(())
    }

    /// Stops services in reverse registration order.
    pub async fn stop_all(&self) {
        for service in self.services.iter().rev() {
            match service.stop().await {
                Ok(()) => info!("Hosted service stopped: {}", service.name()),
                Err(e) => error!("{}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    #[async_trait]
    impl HostedService for Recorder {
        fn name(&self) -> String {
            self.name.to_string()
        }

        async fn start(&self) -> Result<(), HostedServiceError> {
            if self.fail_start {
                return Err(HostedServiceError::Start {
                    service: self.name(),
                    reason: "boom".to_string(),
                });
            }
            self.log.lock().await.push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self) -> Result<(), HostedServiceError> {
            self.log.lock().await.push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    ) -> Arc<dyn HostedService> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            fail_start,
        })
    }

    #[test]
    fn environment_names_compare_case_insensitively() {
        assert!(HostEnvironment::new("development").is_development());
        assert!(HostEnvironment::new("DEVELOPMENT").is_development());
        assert!(!HostEnvironment::new("Staging").is_development());
        assert!(HostEnvironment::default().is_environment(PRODUCTION));
    }

    #[tokio::test]
    async fn starts_in_order_and_stops_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut services = HostedServices::new();
        services.add(recorder("bus", &log, false));
        services.add(recorder("discovery", &log, false));

        services.start_all().await.unwrap();
        services.stop_all().await;

        assert_eq!(
            *log.lock().await,
            vec!["start:bus", "start:discovery", "stop:discovery", "stop:bus"]
        );
    }

    #[tokio::test]
    async fn failed_start_rolls_back_started_services() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut services = HostedServices::new();
        services.add(recorder("bus", &log, false));
        services.add(recorder("discovery", &log, true));

        let result = services.start_all().await;

        assert!(matches!(result, Err(HostedServiceError::Start { .. })));
        assert_eq!(*log.lock().await, vec!["start:bus", "stop:bus"]);
    }
}
