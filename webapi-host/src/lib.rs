pub mod auth;
pub mod config;
pub mod controllers;
pub mod errors;
pub mod logging;
pub mod middleware;
pub mod startup;
