//! Configuration loading and management.
//!
//! - [`types`]: boot configuration loaded from TOML (Config, ServerConfig, ListenConfig)
//! - [`store`]: key/value settings stores (`user.*`, `system.*`)
//! - [`storage`]: where user stores and logs live
//! - [`validation`]: start-up checks

mod defaults;
mod storage;
mod store;
mod types;
mod validation;

pub use storage::{DirStorage, MemoryStorage, Storage, UserRecord};
pub use store::{ConfigStore, FileStore, MemoryStore, StoreError};
pub use types::{
    AdminBootstrap, Config, ConfigError, ListenConfig, ModulesConfig, ServerConfig, StorageConfig,
};
pub use validation::{ValidationError, validate};
