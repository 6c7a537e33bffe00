//! Monitor Common - shared configuration and logging for the stock monitor.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - Configuration validation
//! - Logging setup and run-id helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod validation;

pub use config::{
    Config, MarketConfig, ObservabilityConfig, ProviderConfig, SchedulerConfig,
    ScreenerSettings, ServerConfig, StorageConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};
