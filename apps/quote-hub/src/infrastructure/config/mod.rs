//! Startup configuration loaded from the environment.

mod settings;

pub use settings::{ConfigError, HubConfig, MirrorSettings};
