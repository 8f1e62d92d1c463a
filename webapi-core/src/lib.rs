pub mod health;
pub mod hosting;

#[cfg(feature = "aws")]
pub mod aws;
#[cfg(feature = "nybus-bridge")]
pub mod bridge;
#[cfg(feature = "nybus")]
pub mod bus;
#[cfg(feature = "discovery-adapter")]
pub mod discovery;
