//! Default value functions for configuration.

use std::path::PathBuf;

pub fn default_server_name() -> String {
    "bnc.local".to_string()
}

pub fn default_pseudo_nick() -> String {
    "-slbnc".to_string()
}

pub fn default_upstream_port() -> u16 {
    6667
}

pub fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
