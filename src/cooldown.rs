//! Per-actor cooldown / timer registry.
//!
//! A timer is "running" from the moment it starts until its ready event
//! fires on the clock. Eligibility only asks whether the key is present.

use std::collections::HashMap;
use std::time::Duration;

use crate::ability::AbilityId;
use crate::actor::ActorId;
use crate::clock::{EventClock, EventHandle};
use crate::error::{Result, SimError};
use crate::simulation::Event;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    /// Global cooldown shared by every ability that declares one
    Gcd,
    Ability(AbilityId),
    Shared(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownEntry {
    pub duration: Duration,
    pub started_at: Duration,
    handle: EventHandle,
}

impl CooldownEntry {
    pub fn ready_at(&self) -> Duration {
        self.started_at + self.duration
    }
}

#[derive(Debug, Clone, Default)]
pub struct CooldownRegistry {
    entries: HashMap<TimerKey, CooldownEntry>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self, key: &TimerKey) -> bool {
        !self.entries.contains_key(key)
    }

    pub fn get(&self, key: &TimerKey) -> Option<&CooldownEntry> {
        self.entries.get(key)
    }

    pub fn ready_at(&self, key: &TimerKey) -> Option<Duration> {
        self.entries.get(key).map(CooldownEntry::ready_at)
    }

    pub fn active(&self) -> usize {
        self.entries.len()
    }

    /// Start `key` for `duration`, scheduling its ready event. A zero
    /// duration is a no-op. Starting a timer that is already running is an
    /// internal consistency failure: eligibility must have rejected it.
    pub fn start(
        &mut self,
        owner: ActorId,
        key: TimerKey,
        duration: Duration,
        clock: &mut EventClock<Event>,
    ) -> Result<()> {
        if duration.is_zero() {
            return Ok(());
        }
        if let Some(existing) = self.entries.get(&key) {
            return Err(SimError::SchedulingConflict(format!(
                "{owner:?} timer {key:?} started while running (ready at {:?})",
                existing.ready_at()
            )));
        }
        let event = Event::CooldownReady {
            actor: owner,
            timer: key.clone(),
        };
        let handle = clock.schedule_with_priority(duration, event.priority(), event);
        self.entries.insert(
            key,
            CooldownEntry {
                duration,
                started_at: clock.now(),
                handle,
            },
        );
        Ok(())
    }

    /// Ready event for `key` fired.
    pub fn complete(&mut self, owner: ActorId, key: &TimerKey, fired: EventHandle) -> Result<()> {
        match self.entries.get(key) {
            Some(entry) if entry.handle == fired => {
                self.entries.remove(key);
                Ok(())
            }
            _ => Err(SimError::OrphanedEvent(format!(
                "{owner:?} ready event for timer {key:?} has no matching entry"
            ))),
        }
    }

    /// Cancel a running timer (cast rollback). Returns `true` if one was
    /// running.
    pub fn reset(&mut self, key: &TimerKey, clock: &mut EventClock<Event>) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                clock.cancel(entry.handle);
                true
            }
            None => false,
        }
    }
}
