//! Core library for the weather chat bot.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The forecast provider client and the single-lane pipeline in front of it
//! - Forecast storage and aggregate statistics
//! - Transport-independent chat command dispatch
//!
//! It is used by `weatherbot-cli`, but any chat transport can drive [`Dispatcher`].

pub mod config;
pub mod dispatcher;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod store;

pub use config::{Config, DatabaseConfig, ProviderConfig};
pub use dispatcher::{Command, Dispatcher};
pub use model::{
    Forecast, ForecastRecord, ForecastStatistics, Metric, RecordHolder, ValidationError,
};
pub use pipeline::ForecastPipeline;
pub use provider::{ForecastError, ForecastProvider, OpenWeatherClient};
pub use store::{ForecastStore, StoreError};
