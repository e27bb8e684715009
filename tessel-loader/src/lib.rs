//! Tessel loader: model `config.json` parsing.

pub mod config;

pub use config::ConfigFile;
