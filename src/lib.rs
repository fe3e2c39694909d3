//! Deterministic discrete-event combat simulation kernel.
//!
//! A [`simulation::Trial`] owns an [`clock::EventClock`] and every actor's
//! state; casts, auras, periodic effects and cooldowns all advance by
//! scheduling events on that clock. The [`orchestrator`] runs many
//! independently seeded trials and merges their metrics.

pub mod ability;
pub mod actor;
pub mod attack_table;
pub mod aura;
pub mod cast;
pub mod clock;
pub mod config;
pub mod content;
pub mod cooldown;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod periodic;
pub mod resource;
pub mod simulation;
pub mod stats;

#[cfg(feature = "python")]
mod python;

pub use config::{Scenario, SimConfig};
pub use error::{ConfigError, SimError};
pub use orchestrator::{run_and_aggregate, BatchReport};
