//! Actors and the stat sheet auras modify while active.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::ability::AbilityId;
use crate::aura::AuraSet;
use crate::cast::InFlightCast;
use crate::clock::EventHandle;
use crate::config::ActorConfig;
use crate::cooldown::CooldownRegistry;
use crate::resource::{ResourcePool, ResourcePools};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u32);

impl ActorId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Every stat the kernel's formulas and attack tables read.
/// Chances are fractions (0.05 = 5%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    AttackPower,
    SpellPower,
    BlockValue,
    MeleeHit,
    SpellHit,
    MeleeCrit,
    SpellCrit,
    Haste,
    Dodge,
    Parry,
    /// Defender's chance to partially resist a spell
    ResistChance,
    /// Multiplier on all damage this actor deals
    DamageDone,
    /// Multiplier on all damage this actor takes
    DamageTaken,
}

impl Stat {
    pub fn default_base(self) -> f64 {
        match self {
            Stat::DamageDone | Stat::DamageTaken => 1.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatOp {
    Add(f64),
    Multiply(f64),
}

/// Base stats plus the modifiers currently enabled by auras.
///
/// Modifiers are keyed by their source, so enabling the same source twice
/// replaces rather than stacks. Effective value is
/// `(base + sum(adds)) * product(multiplies)`, folded in source order.
#[derive(Debug, Clone, Default)]
pub struct StatSheet {
    base: HashMap<Stat, f64>,
    modifiers: BTreeMap<String, Vec<(Stat, StatOp)>>,
    revision: u64,
}

impl StatSheet {
    pub fn new(base: HashMap<Stat, f64>) -> Self {
        Self {
            base,
            modifiers: BTreeMap::new(),
            revision: 0,
        }
    }

    pub fn base(&self, stat: Stat) -> f64 {
        self.base.get(&stat).copied().unwrap_or_else(|| stat.default_base())
    }

    pub fn get(&self, stat: Stat) -> f64 {
        let mut add = 0.0;
        let mut mul = 1.0;
        for mods in self.modifiers.values() {
            for (s, op) in mods {
                if *s != stat {
                    continue;
                }
                match op {
                    StatOp::Add(v) => add += v,
                    StatOp::Multiply(v) => mul *= v,
                }
            }
        }
        (self.base(stat) + add) * mul
    }

    pub fn set_base(&mut self, stat: Stat, value: f64) {
        self.base.insert(stat, value);
        self.revision += 1;
    }

    /// Enable (or replace) the modifiers contributed by `source`.
    pub fn enable(&mut self, source: &str, mods: Vec<(Stat, StatOp)>) {
        if self.modifiers.get(source) == Some(&mods) {
            return;
        }
        self.modifiers.insert(source.to_string(), mods);
        self.revision += 1;
    }

    /// Returns `true` if `source` had modifiers enabled.
    pub fn disable(&mut self, source: &str) -> bool {
        let removed = self.modifiers.remove(source).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    pub fn has_source(&self, source: &str) -> bool {
        self.modifiers.contains_key(source)
    }

    /// Bumped on every change; attack tables use it to invalidate.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Read-only equipment / talent queries. The kernel never mutates a
/// loadout; effect formulas and conditions treat answers as opaque inputs.
pub trait LoadoutLookup: fmt::Debug + Send + Sync {
    /// `item == None` asks whether the slot holds anything at all.
    fn is_equipped(&self, slot: &str, item: Option<u32>) -> bool;
    fn talent_points(&self, talent: &str) -> u32;
    fn has_glyph(&self, glyph: &str) -> bool;
    fn set_pieces(&self, set: &str) -> u32;

    fn has_set_bonus(&self, set: &str, pieces: u32) -> bool {
        self.set_pieces(set) >= pieces
    }
}

/// Loadout as read from a scenario file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Loadout {
    #[serde(default)]
    pub equipment: HashMap<String, u32>,
    #[serde(default)]
    pub talents: HashMap<String, u32>,
    #[serde(default)]
    pub glyphs: Vec<String>,
    #[serde(default)]
    pub set_bonuses: HashMap<String, u32>,
}

impl LoadoutLookup for Loadout {
    fn is_equipped(&self, slot: &str, item: Option<u32>) -> bool {
        match (self.equipment.get(slot), item) {
            (Some(_), None) => true,
            (Some(equipped), Some(wanted)) => *equipped == wanted,
            (None, _) => false,
        }
    }

    fn talent_points(&self, talent: &str) -> u32 {
        self.talents.get(talent).copied().unwrap_or(0)
    }

    fn has_glyph(&self, glyph: &str) -> bool {
        self.glyphs.iter().any(|g| g == glyph)
    }

    fn set_pieces(&self, set: &str) -> u32 {
        self.set_bonuses.get(set).copied().unwrap_or(0)
    }
}

/// Per-trial actor state. Built fresh from configuration at trial start.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub level: u32,
    pub stats: StatSheet,
    pub pools: ResourcePools,
    pub auras: AuraSet,
    pub cooldowns: CooldownRegistry,
    pub loadout: Arc<dyn LoadoutLookup>,
    pub casting: Option<InFlightCast>,
    pub incapacitated: bool,
    pub rotation: Vec<AbilityId>,
    pub target: Option<ActorId>,
    /// Pending decision-point event for the rotation driver
    pub(crate) wake: Option<EventHandle>,
}

impl Actor {
    pub fn new(id: ActorId, name: impl Into<String>, level: u32) -> Self {
        Self {
            id,
            name: name.into(),
            level,
            stats: StatSheet::default(),
            pools: ResourcePools::new(),
            auras: AuraSet::default(),
            cooldowns: CooldownRegistry::new(),
            loadout: Arc::new(Loadout::default()),
            casting: None,
            incapacitated: false,
            rotation: Vec::new(),
            target: None,
            wake: None,
        }
    }

    /// Canonical trial-start state for a configured actor.
    pub fn from_config(config: &ActorConfig) -> Self {
        let mut actor = Self::new(config.id, config.name.clone(), config.level);
        actor.stats = StatSheet::new(config.stats.clone());
        for res in &config.resources {
            let start = res.start.unwrap_or(res.max);
            actor
                .pools
                .insert(ResourcePool::new(res.kind, start, res.max).with_regen(res.regen_per_second));
        }
        actor.loadout = Arc::new(config.loadout.clone());
        actor.rotation = config.rotation.clone();
        actor.target = config.target;
        actor
    }

    pub fn with_stat(mut self, stat: Stat, value: f64) -> Self {
        self.stats.set_base(stat, value);
        self
    }

    pub fn with_pool(mut self, pool: ResourcePool) -> Self {
        self.pools.insert(pool);
        self
    }

    pub fn with_loadout(mut self, loadout: Arc<dyn LoadoutLookup>) -> Self {
        self.loadout = loadout;
        self
    }

    pub fn stat(&self, stat: Stat) -> f64 {
        self.stats.get(stat)
    }

    pub fn is_casting(&self) -> bool {
        self.casting.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifiers_add_then_multiply() {
        let mut sheet = StatSheet::new(HashMap::from([(Stat::BlockValue, 1000.0)]));
        sheet.enable("glyph", vec![(Stat::BlockValue, StatOp::Multiply(1.1))]);
        sheet.enable("trinket", vec![(Stat::BlockValue, StatOp::Add(200.0))]);
        assert!((sheet.get(Stat::BlockValue) - 1320.0).abs() < 1e-9);
        assert_eq!(sheet.base(Stat::BlockValue), 1000.0);
    }

    #[test]
    fn test_enable_same_source_is_idempotent() {
        let mut sheet = StatSheet::new(HashMap::from([(Stat::SpellPower, 100.0)]));
        sheet.enable("aura", vec![(Stat::SpellPower, StatOp::Multiply(2.0))]);
        let rev = sheet.revision();
        sheet.enable("aura", vec![(Stat::SpellPower, StatOp::Multiply(2.0))]);
        assert_eq!(sheet.get(Stat::SpellPower), 200.0);
        assert_eq!(sheet.revision(), rev);

        assert!(sheet.disable("aura"));
        assert!(!sheet.disable("aura"));
        assert_eq!(sheet.get(Stat::SpellPower), 100.0);
    }

    #[test]
    fn test_multiplier_stats_default_to_one() {
        let sheet = StatSheet::default();
        assert_eq!(sheet.get(Stat::DamageDone), 1.0);
        assert_eq!(sheet.get(Stat::DamageTaken), 1.0);
        assert_eq!(sheet.get(Stat::SpellCrit), 0.0);
    }

    #[test]
    fn test_loadout_lookups() {
        let loadout = Loadout {
            equipment: HashMap::from([("off_hand".to_string(), 51452)]),
            talents: HashMap::from([("focused_rage".to_string(), 3)]),
            glyphs: vec!["glyph_of_blocking".to_string()],
            set_bonuses: HashMap::from([("onslaught_armor".to_string(), 4)]),
        };
        assert!(loadout.is_equipped("off_hand", None));
        assert!(loadout.is_equipped("off_hand", Some(51452)));
        assert!(!loadout.is_equipped("off_hand", Some(1)));
        assert!(!loadout.is_equipped("ranged", None));
        assert_eq!(loadout.talent_points("focused_rage"), 3);
        assert_eq!(loadout.talent_points("gag_order"), 0);
        assert!(loadout.has_glyph("glyph_of_blocking"));
        assert!(loadout.has_set_bonus("onslaught_armor", 4));
        assert!(!loadout.has_set_bonus("onslaught_armor", 5));
    }
}
