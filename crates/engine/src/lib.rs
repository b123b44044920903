//! Runs data selectors: loading, include resolution, security, compilation
//! through a cache, execution and response shaping.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod service;
pub mod shape;
pub mod store;

pub use config::EngineConfig;
pub use error::SelectorError;
pub use service::{SelectorRequest, SelectorResponse, SelectorService, SelectorSource};
