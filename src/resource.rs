//! Depletable / regenerating resource pools.
//!
//! Amounts are kept in thousandths so that spend/refund sequences are exact
//! and trials replay bit-for-bit.

use serde::{Deserialize, Serialize};

const UNITS_PER_POINT: f64 = 1000.0;

#[inline]
fn to_units(amount: f64) -> i64 {
    (amount * UNITS_PER_POINT).round() as i64
}

#[inline]
fn to_points(units: i64) -> f64 {
    units as f64 / UNITS_PER_POINT
}

/// Round to 3 decimal places, the resolution every pool works at.
#[inline]
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Mana,
    Rage,
    Energy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePool {
    kind: ResourceKind,
    current: i64,
    max: i64,
    regen_per_tick: i64,
}

impl ResourcePool {
    pub fn new(kind: ResourceKind, start: f64, max: f64) -> Self {
        let max = to_units(max.max(0.0));
        Self {
            kind,
            current: to_units(start.max(0.0)).min(max),
            max,
            regen_per_tick: 0,
        }
    }

    pub fn with_regen(mut self, per_tick: f64) -> Self {
        self.regen_per_tick = to_units(per_tick.max(0.0));
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn current(&self) -> f64 {
        to_points(self.current)
    }

    pub fn max(&self) -> f64 {
        to_points(self.max)
    }

    pub fn regenerates(&self) -> bool {
        self.regen_per_tick > 0
    }

    /// Regenerates and has room to fill.
    pub fn is_refilling(&self) -> bool {
        self.regenerates() && self.current < self.max
    }

    pub fn can_afford(&self, amount: f64) -> bool {
        amount >= 0.0 && to_units(amount) <= self.current
    }

    /// Deduct `amount`. Fails, leaving the pool untouched, if that would
    /// take the pool below zero.
    pub fn spend(&mut self, amount: f64) -> bool {
        if !self.can_afford(amount) {
            return false;
        }
        self.current -= to_units(amount);
        true
    }

    /// Return a previously spent amount. Not capped at `max`: a refund
    /// only gives back what a spend took, so `refund(x)` followed by
    /// `spend(x)` always restores the prior balance.
    pub fn refund(&mut self, amount: f64) {
        if amount > 0.0 {
            self.current += to_units(amount);
        }
    }

    /// Gain from an external source, capped at `max`. Returns the amount
    /// actually gained.
    pub fn gain(&mut self, amount: f64) -> f64 {
        if amount <= 0.0 {
            return 0.0;
        }
        let before = self.current;
        self.current = (self.current + to_units(amount)).min(self.max.max(before));
        to_points(self.current - before)
    }

    /// One regeneration tick.
    pub fn regen(&mut self) -> f64 {
        self.gain(to_points(self.regen_per_tick))
    }
}

/// All pools owned by one actor, at most one per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePools {
    pools: Vec<ResourcePool>,
}

impl ResourcePools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the pool of the same kind.
    pub fn insert(&mut self, pool: ResourcePool) {
        match self.pools.iter_mut().find(|p| p.kind == pool.kind) {
            Some(existing) => *existing = pool,
            None => self.pools.push(pool),
        }
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&ResourcePool> {
        self.pools.iter().find(|p| p.kind == kind)
    }

    pub fn get_mut(&mut self, kind: ResourceKind) -> Option<&mut ResourcePool> {
        self.pools.iter_mut().find(|p| p.kind == kind)
    }

    pub fn current(&self, kind: ResourceKind) -> f64 {
        self.get(kind).map(|p| p.current()).unwrap_or(0.0)
    }

    pub fn any_regenerates(&self) -> bool {
        self.pools.iter().any(|p| p.regenerates())
    }

    pub fn any_refilling(&self) -> bool {
        self.pools.iter().any(|p| p.is_refilling())
    }

    pub fn regen_all(&mut self) {
        for pool in &mut self.pools {
            pool.regen();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spend_never_goes_negative() {
        let mut pool = ResourcePool::new(ResourceKind::Rage, 15.0, 100.0);
        assert!(!pool.spend(20.0));
        assert_eq!(pool.current(), 15.0);
        assert!(pool.spend(15.0));
        assert_eq!(pool.current(), 0.0);
        assert!(!pool.spend(0.001));
    }

    #[test]
    fn test_negative_spend_rejected() {
        let mut pool = ResourcePool::new(ResourceKind::Mana, 10.0, 10.0);
        assert!(!pool.spend(-5.0));
        assert_eq!(pool.current(), 10.0);
    }

    #[test]
    fn test_refund_then_spend_round_trips() {
        for start in [0.0, 0.1, 7.3, 33.333, 99.9, 100.0] {
            for amount in [0.2, 1.0, 12.8, 16.0, 0.3333] {
                let mut pool = ResourcePool::new(ResourceKind::Rage, start, 100.0);
                let before = pool.clone();
                pool.refund(amount);
                assert!(pool.spend(amount));
                assert_eq!(pool, before, "start={start} amount={amount}");
            }
        }
    }

    #[test]
    fn test_gain_caps_at_max() {
        let mut pool = ResourcePool::new(ResourceKind::Rage, 95.0, 100.0);
        assert_eq!(pool.gain(10.0), 5.0);
        assert_eq!(pool.current(), 100.0);
        assert_eq!(pool.gain(10.0), 0.0);
    }

    #[test]
    fn test_regen_tick() {
        let mut pool = ResourcePool::new(ResourceKind::Mana, 0.0, 50.0).with_regen(12.5);
        assert!(pool.regenerates());
        pool.regen();
        pool.regen();
        assert_eq!(pool.current(), 25.0);
        assert!(pool.is_refilling());
        pool.regen();
        pool.regen();
        assert!(!pool.is_refilling());
        assert!(!ResourcePool::new(ResourceKind::Rage, 0.0, 100.0).is_refilling());
    }

    #[test]
    fn test_pools_lookup_by_kind() {
        let mut pools = ResourcePools::new();
        pools.insert(ResourcePool::new(ResourceKind::Mana, 100.0, 100.0));
        pools.insert(ResourcePool::new(ResourceKind::Rage, 10.0, 100.0));
        pools.insert(ResourcePool::new(ResourceKind::Rage, 20.0, 100.0));
        assert_eq!(pools.current(ResourceKind::Rage), 20.0);
        assert_eq!(pools.current(ResourceKind::Energy), 0.0);
        assert!(pools.get_mut(ResourceKind::Mana).is_some_and(|p| p.spend(40.0)));
        assert_eq!(pools.current(ResourceKind::Mana), 60.0);
    }
}
