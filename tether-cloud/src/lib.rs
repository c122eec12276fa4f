//! Cloud gateway for Tether.
//!
//! - [`CloudGateway`]: async trait the sync engine talks to
//! - [`HttpCloudGateway`]: JSON REST implementation over reqwest
//! - [`GatewayError`]: transient vs permanent failure classification

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;

pub use config::CloudConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{CloudGateway, ListFilter, check_canonical};
pub use http::HttpCloudGateway;
