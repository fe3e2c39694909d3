//! Error taxonomy for configuration loading and trial execution.
//!
//! Ineligible casts and resource underflow are *not* errors: the cast
//! pipeline reports them as [`crate::cast::CastAttempt::Ineligible`] and
//! [`crate::resource::ResourcePool::spend`] returns `false`.

use thiserror::Error;

use crate::ability::AbilityId;
use crate::actor::ActorId;

/// Raised while loading or validating a scenario. Always surfaced before
/// any trial runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{owner}: invalid {field}: {reason}")]
    Invalid {
        owner: String,
        field: &'static str,
        reason: String,
    },

    #[error("{owner}: unknown {kind} '{name}'")]
    UnknownReference {
        owner: String,
        kind: &'static str,
        name: String,
    },

    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },
}

impl ConfigError {
    pub(crate) fn invalid(owner: impl Into<String>, field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            owner: owner.into(),
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown(owner: impl Into<String>, kind: &'static str, name: impl Into<String>) -> Self {
        ConfigError::UnknownReference {
            owner: owner.into(),
            kind,
            name: name.into(),
        }
    }
}

/// Fatal failure inside a single trial. The trial is abandoned and its
/// metrics are discarded; the rest of the batch carries on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("scheduling conflict: {0}")]
    SchedulingConflict(String),

    #[error("orphaned event: {0}")]
    OrphanedEvent(String),

    #[error("unknown actor {0:?}")]
    UnknownActor(ActorId),

    #[error("unknown ability {0:?}")]
    UnknownAbility(AbilityId),

    #[error("unknown {kind} '{name}'")]
    UnknownDefinition { kind: &'static str, name: String },
}

pub type Result<T> = std::result::Result<T, SimError>;
