//! MeshSyncConfig — настройки синхронизации (код или TOML)
//!
//! ```toml
//! log_level = "info"
//! material = "res://materials/room_mesh.tres"
//!
//! [removal]
//! mode = "remove"
//! grace_secs = 0.5
//! ```

use crate::host::MaterialRef;
use crate::logger::LogLevel;
use bevy::prelude::*;
use serde::Deserialize;
use thiserror::Error;

/// Что делать с tracked mesh, который пропал из sensor feed
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Entry и render object живут вечно (поведение оригинального компонента)
    #[default]
    Retain,
    /// Удалить после `grace_secs` секунд непрерывного отсутствия (0 — в том же tick)
    Remove {
        #[serde(default)]
        grace_secs: f32,
    },
}

#[derive(Resource, Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct MeshSyncConfig {
    pub removal: RemovalPolicy,
    /// Material для всех созданных render objects (None — host default)
    pub material: Option<MaterialRef>,
    pub log_level: LogLevel,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse mesh sync config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("removal grace period must be finite and >= 0, got {0}")]
    InvalidGracePeriod(f32),
}

impl MeshSyncConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let RemovalPolicy::Remove { grace_secs } = self.removal {
            if !grace_secs.is_finite() || grace_secs < 0.0 {
                return Err(ConfigError::InvalidGracePeriod(grace_secs));
            }
        }
        Ok(())
    }

    pub fn with_removal(mut self, removal: RemovalPolicy) -> Self {
        self.removal = removal;
        self
    }

    pub fn with_material(mut self, material: MaterialRef) -> Self {
        self.material = Some(material);
        self
    }
}
