mod error;
pub use error::{PoolBalancerError, Result};

pub mod config;
pub use config::Config;

pub mod network;
pub mod cloud;
pub mod cluster;
pub mod backendpool;

mod provider;
pub use provider::Cloud;

pub mod controller;
