//! LogDoctor - log diagnosis engine with remotely synced analysis plugins

pub mod aggregate;
pub mod ai;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod manifest;
pub mod plugins;
pub mod remedy;
pub mod sync;

pub use aggregate::Analyzer;
pub use config::Config;
pub use error::{DoctorError, Result};
