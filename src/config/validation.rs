//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use crate::hooks::ModuleCatalog;
use crate::state::is_valid_username;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name must be a non-empty word without spaces")]
    InvalidServerName,
    #[error("server.pseudo_nick must be a non-empty nick without spaces, got '{0}'")]
    InvalidPseudoNick(String),
    #[error("modules.load names an unknown module: {0}")]
    UnknownModule(String),
    #[error("admin.name is not a valid username: '{0}'")]
    InvalidAdminName(String),
    #[error("admin.password must be at least 6 characters")]
    WeakAdminPassword,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let name = &config.server.name;
    if name.is_empty() || name.contains(char::is_whitespace) {
        errors.push(ValidationError::InvalidServerName);
    }

    let pseudo = &config.server.pseudo_nick;
    if pseudo.is_empty()
        || pseudo.contains(char::is_whitespace)
        || pseudo.starts_with(['#', '&', ':'])
    {
        errors.push(ValidationError::InvalidPseudoNick(pseudo.clone()));
    }

    let catalog = ModuleCatalog::builtin();
    for module in &config.modules.load {
        if !catalog.contains(module) {
            errors.push(ValidationError::UnknownModule(module.clone()));
        }
    }

    if let Some(admin) = &config.admin {
        if !is_valid_username(&admin.name) {
            errors.push(ValidationError::InvalidAdminName(admin.name.clone()));
        }
        if admin.password.len() < 6 {
            errors.push(ValidationError::WeakAdminPassword);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
