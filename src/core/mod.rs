//! Core building blocks shared across the gateway: the error taxonomy and the
//! configuration surface consumed by every other component.

pub mod config;
pub mod error;

pub use config::{GatewayConfig, ServiceConfig};
pub use error::{GatewayError, GatewayResult};
