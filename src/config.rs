//! Configuration structures for loading scenario YAML/JSON files

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::ability::{AbilityConfig, AbilityId, Registry};
use crate::actor::{Actor, ActorId, Loadout, Stat};
use crate::attack_table::{AttackKind, AttackTable};
use crate::aura::AuraConfig;
use crate::content::Preset;
use crate::error::ConfigError;
use crate::periodic::DotConfig;
use crate::resource::ResourceKind;
use crate::simulation::DEFAULT_MAX_EVENTS;

/// Convert configured seconds into a `Duration`, rejecting negative and
/// non-finite values.
pub(crate) fn seconds(owner: &str, field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigError::invalid(owner, field, format!("{secs} is not a valid duration")))
}

fn default_num_trials() -> usize {
    1000
}

fn default_duration() -> f64 {
    180.0
}

fn default_parallel() -> bool {
    true
}

fn default_max_events() -> u64 {
    DEFAULT_MAX_EVENTS
}

fn default_level() -> u32 {
    80
}

/// Batch settings: how many trials, how long each runs, how they are
/// seeded and spread over workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    #[serde(default = "default_num_trials")]
    pub num_trials: usize,
    /// Trial duration ceiling in seconds
    #[serde(default = "default_duration")]
    pub duration: f64,
    /// Base seed; trial `i` runs with a seed derived from it. Drawn at
    /// random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Worker threads; defaults to the number of logical cores
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Per-trial event budget; a trial exceeding it is aborted
    #[serde(default = "default_max_events")]
    pub max_events: u64,
    /// Wall-clock budget for the whole batch, in seconds
    #[serde(default)]
    pub time_budget: Option<f64>,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            num_trials: default_num_trials(),
            duration: default_duration(),
            seed: None,
            workers: None,
            parallel: default_parallel(),
            max_events: default_max_events(),
            time_budget: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub kind: ResourceKind,
    pub max: f64,
    /// Starting amount; full when absent
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub regen_per_second: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    pub id: ActorId,
    pub name: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub stats: HashMap<Stat, f64>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub loadout: Loadout,
    /// Abilities in priority order
    #[serde(default)]
    pub rotation: Vec<AbilityId>,
    #[serde(default)]
    pub target: Option<ActorId>,
}

/// Incapacitate `actor` at `at` seconds for `duration` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedEvent {
    pub at: f64,
    pub actor: ActorId,
    pub duration: f64,
}

/// Fixed attack table for one pair, bypassing stat-derived chances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOverride {
    pub attacker: ActorId,
    pub defender: ActorId,
    pub kind: AttackKind,
    #[serde(default)]
    pub miss: f64,
    #[serde(default)]
    pub partial_resist: f64,
    #[serde(default)]
    pub crit: f64,
}

/// Full scenario configuration loaded from YAML/JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub trials: TrialConfig,
    pub actors: Vec<ActorConfig>,
    #[serde(default)]
    pub presets: Vec<Preset>,
    #[serde(default)]
    pub auras: Vec<AuraConfig>,
    #[serde(default)]
    pub dots: Vec<DotConfig>,
    #[serde(default)]
    pub abilities: Vec<AbilityConfig>,
    #[serde(default)]
    pub script: Vec<ScriptedEvent>,
    #[serde(default)]
    pub attack_tables: Vec<TableOverride>,
}

/// Validated, ready-to-run form of a [`SimConfig`].
#[derive(Debug, Clone)]
pub struct Scenario {
    pub registry: Arc<Registry>,
    pub actors: Vec<ActorConfig>,
    pub duration: Duration,
    pub max_events: u64,
    pub pinned: Vec<PinnedTable>,
    pub script: Vec<ScriptedIncapacitate>,
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinnedTable {
    pub attacker: ActorId,
    pub defender: ActorId,
    pub kind: AttackKind,
    pub table: AttackTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedIncapacitate {
    pub at: Duration,
    pub actor: ActorId,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub num_trials: usize,
    pub seed: Option<u64>,
    pub workers: Option<usize>,
    pub parallel: bool,
    pub time_budget: Option<Duration>,
}

impl Scenario {
    /// Attack table `attacker` starts the trial with against `defender`;
    /// pinned tables win over stat-derived ones.
    pub fn opening_table(&self, attacker: ActorId, defender: ActorId, kind: AttackKind) -> Option<AttackTable> {
        if let Some(pin) = self
            .pinned
            .iter()
            .find(|p| p.attacker == attacker && p.defender == defender && p.kind == kind)
        {
            return Some(pin.table);
        }
        let a = Actor::from_config(self.actors.get(attacker.index())?);
        let d = Actor::from_config(self.actors.get(defender.index())?);
        Some(AttackTable::for_pair(&a, &d, kind))
    }
}

impl SimConfig {
    /// Load from a file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path)?;
        let path_str = path.as_ref().to_string_lossy().to_lowercase();

        if path_str.ends_with(".json") {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate everything and build the shared registry. Every structural
    /// problem surfaces here, before any trial runs.
    pub fn build(&self) -> Result<Scenario, ConfigError> {
        let batch = self.batch_settings()?;
        let duration = seconds("trials", "duration", self.trials.duration)?;
        if self.trials.max_events == 0 {
            return Err(ConfigError::invalid("trials", "max_events", "must be at least 1"));
        }
        self.check_actors()?;

        let mut registry = Registry::new();
        for preset in &self.presets {
            let loadout = &self.actor(preset.actor(), "preset")?.loadout;
            preset.bundle(loadout).register(&mut registry)?;
        }
        for aura in &self.auras {
            registry.register_aura(aura)?;
        }
        for dot in &self.dots {
            registry.register_dot(dot)?;
        }
        for ability in &self.abilities {
            registry.register_ability(ability)?;
        }

        for actor in &self.actors {
            let owner = format!("actor '{}'", actor.name);
            for id in &actor.rotation {
                if !registry.has_ability(*id) {
                    return Err(ConfigError::unknown(owner, "ability", id.to_string()));
                }
            }
            if let Some(target) = actor.target {
                self.actor(target, "target")?;
            }
            for res in &actor.resources {
                for (field, value) in [
                    ("max", res.max),
                    ("start", res.start.unwrap_or(0.0)),
                    ("regen_per_second", res.regen_per_second),
                ] {
                    if !value.is_finite() || value < 0.0 {
                        return Err(ConfigError::invalid(owner, field, format!("{value} must be >= 0")));
                    }
                }
            }
        }

        let script = self
            .script
            .iter()
            .map(|s| {
                self.actor(s.actor, "script")?;
                Ok(ScriptedIncapacitate {
                    at: seconds("script", "at", s.at)?,
                    actor: s.actor,
                    duration: seconds("script", "duration", s.duration)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let pinned = self
            .attack_tables
            .iter()
            .map(|t| {
                self.actor(t.attacker, "attack table")?;
                self.actor(t.defender, "attack table")?;
                for (field, value) in [("miss", t.miss), ("partial_resist", t.partial_resist), ("crit", t.crit)] {
                    if !(0.0..=1.0).contains(&value) {
                        return Err(ConfigError::invalid("attack table", field, format!("{value} is not in [0, 1]")));
                    }
                }
                Ok(PinnedTable {
                    attacker: t.attacker,
                    defender: t.defender,
                    kind: t.kind,
                    table: AttackTable::from_chances(t.miss, t.partial_resist, t.crit),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Scenario {
            registry: Arc::new(registry),
            actors: self.actors.clone(),
            duration,
            max_events: self.trials.max_events,
            pinned,
            script,
            batch,
        })
    }

    fn batch_settings(&self) -> Result<BatchSettings, ConfigError> {
        if self.trials.workers == Some(0) {
            return Err(ConfigError::invalid("trials", "workers", "must be at least 1"));
        }
        Ok(BatchSettings {
            num_trials: self.trials.num_trials,
            seed: self.trials.seed,
            workers: self.trials.workers,
            parallel: self.trials.parallel,
            time_budget: self
                .trials
                .time_budget
                .map(|s| seconds("trials", "time_budget", s))
                .transpose()?,
        })
    }

    /// Actor ids must run `0..n` in declaration order.
    fn check_actors(&self) -> Result<(), ConfigError> {
        if self.actors.is_empty() {
            return Err(ConfigError::invalid("scenario", "actors", "at least one actor is required"));
        }
        let mut seen = HashSet::new();
        for (i, actor) in self.actors.iter().enumerate() {
            if !seen.insert(actor.id) {
                return Err(ConfigError::Duplicate {
                    kind: "actor",
                    name: actor.id.to_string(),
                });
            }
            if actor.id.index() != i {
                return Err(ConfigError::invalid(
                    format!("actor '{}'", actor.name),
                    "id",
                    format!("expected {i}: ids must be sequential from 0"),
                ));
            }
        }
        Ok(())
    }

    fn actor(&self, id: ActorId, owner: &str) -> Result<&ActorConfig, ConfigError> {
        self.actors
            .get(id.index())
            .ok_or_else(|| ConfigError::unknown(owner, "actor", id.to_string()))
    }
}
