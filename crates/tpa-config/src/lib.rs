//! Configuration loading and validation (`config.toml`).

pub mod config;
mod config_merge;
pub mod paths;

pub use config::{
    DedupConfig, ImplicitConfig, LoggingConfig, StoreConfig, TaskPickerConfig, default_config_toml,
};
