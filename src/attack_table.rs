//! Attack tables and single-roll outcome resolution.
//!
//! A table splits the roll range `[0, 1)` into four disjoint, contiguous
//! bands in a fixed order:
//!
//! ```text
//! 0 ── Miss ── PartialResist ── Hit ── Crit ── 1
//! ```
//!
//! Each band is half-open `[lo, hi)`: a roll that lands exactly on a
//! boundary belongs to the band above it. Widths always sum to one; when
//! the requested chances overflow the table, crit is pushed off first,
//! then partial resist.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;

use crate::actor::{Actor, ActorId, Stat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    Melee,
    Spell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Miss,
    PartialResist,
    Hit,
    Crit,
}

impl Outcome {
    /// Anything but a miss
    #[inline]
    pub fn landed(self) -> bool {
        self != Outcome::Miss
    }
}

/// Fraction of damage removed by a partial resist.
pub const PARTIAL_RESIST_MITIGATION: f64 = 0.5;

/// Spell miss floor: nothing is ever fully hit-capped against spells.
const SPELL_MISS_FLOOR: f64 = 0.01;

// Indexed by defender level advantage, clamped to 0..=3.
const SPELL_BASE_MISS: [f64; 4] = [0.04, 0.05, 0.06, 0.17];
const MELEE_BASE_MISS: [f64; 4] = [0.05, 0.055, 0.06, 0.08];
const MELEE_BASE_DODGE: [f64; 4] = [0.05, 0.055, 0.06, 0.065];
const CRIT_SUPPRESSION: [f64; 4] = [0.0, 0.01, 0.02, 0.048];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackTable {
    miss: f64,
    partial_resist: f64,
    crit: f64,
    /// Crit chance before truncation, kept so bonuses re-clamp correctly
    requested_crit: f64,
    requested_partial: f64,
}

impl AttackTable {
    /// Build a table from raw chances; each is clamped into what is left of
    /// the roll range.
    pub fn from_chances(miss: f64, partial_resist: f64, crit: f64) -> Self {
        let miss = clamp01(miss);
        let partial = clamp01(partial_resist).min(1.0 - miss);
        let crit_width = clamp01(crit).min(1.0 - miss - partial);
        Self {
            miss,
            partial_resist: partial,
            crit: crit_width.max(0.0),
            requested_crit: crit,
            requested_partial: partial_resist,
        }
    }

    /// Table for `attacker` striking `defender` with the current stats of
    /// both.
    pub fn for_pair(attacker: &Actor, defender: &Actor, kind: AttackKind) -> Self {
        let diff = defender.level.saturating_sub(attacker.level).min(3) as usize;
        match kind {
            AttackKind::Melee => {
                let miss = (MELEE_BASE_MISS[diff] - attacker.stat(Stat::MeleeHit)).max(0.0);
                let avoid = MELEE_BASE_DODGE[diff] + defender.stat(Stat::Dodge) + defender.stat(Stat::Parry);
                let crit = attacker.stat(Stat::MeleeCrit) - CRIT_SUPPRESSION[diff];
                Self::from_chances(miss + avoid, 0.0, crit)
            }
            AttackKind::Spell => {
                let miss = (SPELL_BASE_MISS[diff] - attacker.stat(Stat::SpellHit)).max(SPELL_MISS_FLOOR);
                let partial = defender.stat(Stat::ResistChance);
                let crit = attacker.stat(Stat::SpellCrit);
                Self::from_chances(miss, partial, crit)
            }
        }
    }

    /// Same pair, with per-effect hit and crit bonuses layered on top.
    pub fn with_bonus(&self, bonus_hit: f64, bonus_crit: f64) -> Self {
        if bonus_hit == 0.0 && bonus_crit == 0.0 {
            return *self;
        }
        Self::from_chances(
            self.miss - bonus_hit,
            self.requested_partial,
            self.requested_crit + bonus_crit,
        )
    }

    pub fn miss_chance(&self) -> f64 {
        self.miss
    }

    pub fn partial_resist_chance(&self) -> f64 {
        self.partial_resist
    }

    pub fn crit_chance(&self) -> f64 {
        self.crit
    }

    pub fn hit_chance(&self) -> f64 {
        let (_, hit_start, crit_start) = self.thresholds();
        crit_start - hit_start
    }

    /// Lower edges of the partial, hit and crit bands. The crit band is
    /// anchored at the top so the last edge is exactly 1.
    fn thresholds(&self) -> (f64, f64, f64) {
        let partial_start = self.miss;
        let hit_start = (partial_start + self.partial_resist).min(1.0);
        let crit_start = (1.0 - self.crit).max(hit_start);
        (partial_start, hit_start, crit_start)
    }

    /// The four bands in roll order. Adjacent bands share an edge; the
    /// last ends at exactly 1.
    pub fn bands(&self) -> [(Outcome, Range<f64>); 4] {
        let (partial_start, hit_start, crit_start) = self.thresholds();
        [
            (Outcome::Miss, 0.0..partial_start),
            (Outcome::PartialResist, partial_start..hit_start),
            (Outcome::Hit, hit_start..crit_start),
            (Outcome::Crit, crit_start..1.0),
        ]
    }

    /// Classify a uniform roll in `[0, 1)`.
    pub fn resolve(&self, roll: f64) -> Outcome {
        let (partial_start, hit_start, crit_start) = self.thresholds();
        if roll < partial_start {
            Outcome::Miss
        } else if roll < hit_start {
            Outcome::PartialResist
        } else if roll < crit_start {
            Outcome::Hit
        } else {
            Outcome::Crit
        }
    }
}

#[inline]
fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedTable {
    table: AttackTable,
    attacker_rev: u64,
    defender_rev: u64,
}

type PairKey = (ActorId, ActorId, AttackKind);

/// Per-trial cache of pair tables. Entries are rebuilt when either actor's
/// stat sheet changes; pinned tables never are.
#[derive(Debug, Clone, Default)]
pub struct AttackTables {
    cache: HashMap<PairKey, CachedTable>,
    pinned: HashMap<PairKey, AttackTable>,
}

impl AttackTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the table for a pair regardless of stats.
    pub fn pin(&mut self, attacker: ActorId, defender: ActorId, kind: AttackKind, table: AttackTable) {
        self.pinned.insert((attacker, defender, kind), table);
    }

    pub fn get(&mut self, attacker: &Actor, defender: &Actor, kind: AttackKind) -> AttackTable {
        let key = (attacker.id, defender.id, kind);
        if let Some(table) = self.pinned.get(&key) {
            return *table;
        }
        let (a_rev, d_rev) = (attacker.stats.revision(), defender.stats.revision());
        match self.cache.get(&key) {
            Some(c) if c.attacker_rev == a_rev && c.defender_rev == d_rev => c.table,
            _ => {
                let table = AttackTable::for_pair(attacker, defender, kind);
                self.cache.insert(
                    key,
                    CachedTable {
                        table,
                        attacker_rev: a_rev,
                        defender_rev: d_rev,
                    },
                );
                table
            }
        }
    }
}
