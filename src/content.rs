//! Built-in ability presets.
//!
//! A preset reads the caster's loadout once, at scenario build time, and
//! produces plain ability, aura and periodic-effect configuration. Talent
//! points and item ids are folded into numbers here; the kernel never
//! looks at them again except through declared conditions.

use serde::{Deserialize, Serialize};

use crate::ability::{
    AbilityConfig, AbilityId, CastEffect, CastModifier, Condition, CooldownConfig, DamageEffect, DamageModifier,
    Effect, Hook, HookAction, ModifierEffect, Registry, ScalingTerm, Segment, SpellSchool, Subject, Trigger,
};
use crate::actor::{ActorId, LoadoutLookup, Stat, StatOp};
use crate::attack_table::AttackKind;
use crate::aura::{AuraConfig, StackingPolicy, StatEffect};
use crate::error::ConfigError;
use crate::periodic::{DotConfig, ReapplyPolicy, SnapshotMode, TickOutcome};
use crate::resource::ResourceKind;

pub const SHIELD_SLAM: AbilityId = AbilityId(47488);
pub const LAVA_BURST: AbilityId = AbilityId(60043);
pub const FLAME_SHOCK: AbilityId = AbilityId(49233);
/// Metrics id of the set-bonus periodic effect lava burst leaves behind
pub const LAVA_BURSTED: AbilityId = AbilityId(71824);

pub const SWORD_AND_BOARD: &str = "Sword and Board";
pub const GLYPH_OF_BLOCKING: &str = "Glyph of Blocking";
pub const ELEMENTAL_MASTERY: &str = "Elemental Mastery";
pub const NATURES_SWIFTNESS: &str = "Nature's Swiftness";
pub const CLEARCASTING: &str = "Clearcasting";
pub const FLAME_SHOCK_DOT: &str = "Flame Shock";
pub const LAVA_BURSTED_DOT: &str = "LavaBursted";

/// Level 80 shaman base mana; spell costs are a share of it.
const SHAMAN_BASE_MANA: f64 = 4396.0;

const VENTURE_CO_LIGHTNING_ROD: u32 = 38361;
const THUNDERFALL_TOTEM: u32 = 45255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "preset", rename_all = "snake_case")]
pub enum Preset {
    ShieldSlam { actor: ActorId },
    LavaBurst { actor: ActorId },
}

impl Preset {
    /// Actor whose loadout parameterizes the preset.
    pub fn actor(&self) -> ActorId {
        match self {
            Preset::ShieldSlam { actor } | Preset::LavaBurst { actor } => *actor,
        }
    }

    pub fn bundle(&self, loadout: &dyn LoadoutLookup) -> ContentBundle {
        match self {
            Preset::ShieldSlam { .. } => shield_slam(loadout),
            Preset::LavaBurst { .. } => lava_burst(loadout),
        }
    }
}

/// Definitions a preset contributes, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ContentBundle {
    pub auras: Vec<AuraConfig>,
    pub dots: Vec<DotConfig>,
    pub abilities: Vec<AbilityConfig>,
}

impl ContentBundle {
    pub fn register(&self, registry: &mut Registry) -> Result<(), ConfigError> {
        for aura in &self.auras {
            registry.register_aura(aura)?;
        }
        for dot in &self.dots {
            registry.register_dot(dot)?;
        }
        for ability in &self.abilities {
            registry.register_ability(ability)?;
        }
        Ok(())
    }
}

fn aura(label: &str, action_id: Option<u32>, duration: Option<f64>, effects: Vec<StatEffect>) -> AuraConfig {
    AuraConfig {
        label: label.to_string(),
        action_id,
        duration,
        stacking: StackingPolicy::Refresh,
        effects,
    }
}

fn caster_aura(label: &str) -> Condition {
    Condition::AuraActive {
        label: label.to_string(),
        on: Subject::Caster,
    }
}

fn modifier(effect: ModifierEffect) -> DamageModifier {
    DamageModifier { when: None, effect }
}

/// Block value to bonus damage: linear up to 1960, tapering to a cap of
/// 2072 at 3160.
fn block_value_scaling() -> ScalingTerm {
    ScalingTerm::Piecewise {
        stat: Stat::BlockValue,
        segments: vec![
            Segment {
                up_to: Some(1960.0),
                slope: 1.0,
                intercept: 0.0,
            },
            Segment {
                up_to: Some(3160.0),
                slope: 0.09333333333,
                intercept: 1777.06666667,
            },
            Segment {
                up_to: None,
                slope: 0.0,
                intercept: 2072.0,
            },
        ],
    }
}

/// Protection warrior shield slam.
///
/// Requires a shield in the off hand. Sword and Board makes the next slam
/// free and is consumed by it. A miss gives back 80% of the slam's rage
/// cost, even when the proc made it free.
/// With the glyph, a landed slam raises block value by 10% for 10s.
pub fn shield_slam(loadout: &dyn LoadoutLookup) -> ContentBundle {
    let focused_rage = loadout.talent_points("focused_rage") as f64;
    let critical_block = loadout.talent_points("critical_block") as f64;
    let gag_order = loadout.talent_points("gag_order") as f64;
    let glyph = loadout.has_glyph("glyph_of_blocking");

    let mut auras = vec![aura(SWORD_AND_BOARD, Some(50227), Some(5.0), Vec::new())];
    if glyph {
        auras.push(aura(
            GLYPH_OF_BLOCKING,
            Some(58397),
            Some(10.0),
            vec![StatEffect {
                stat: Stat::BlockValue,
                op: StatOp::Multiply(1.1),
                per_stack: false,
            }],
        ));
    }

    let mut multiplier = 1.0 + 0.05 * gag_order;
    if loadout.has_set_bonus("onslaught_armor", 4) {
        multiplier *= 1.1;
    }
    let mut modifiers = Vec::new();
    if critical_block > 0.0 {
        modifiers.push(modifier(ModifierEffect::BonusCrit {
            chance: 0.05 * critical_block,
        }));
    }
    if multiplier != 1.0 {
        modifiers.push(modifier(ModifierEffect::Multiplier { factor: multiplier }));
    }

    let cost = (20.0 - focused_rage).max(0.0);
    let mut hooks = vec![Hook {
        on: Trigger::Miss,
        when: None,
        action: HookAction::Refund {
            resource: None,
            amount: cost * 0.8,
        },
    }];
    if glyph {
        hooks.push(Hook {
            on: Trigger::Landed,
            when: None,
            action: HookAction::ActivateAura {
                aura: GLYPH_OF_BLOCKING.to_string(),
                on: Subject::Caster,
            },
        });
    }

    let ability = AbilityConfig {
        id: SHIELD_SLAM,
        name: "Shield Slam".to_string(),
        school: SpellSchool::Physical,
        resource: Some(ResourceKind::Rage),
        cost,
        cast_time: 0.0,
        gcd: 1.5,
        ignore_haste: true,
        cooldown: Some(CooldownConfig {
            duration: 6.0,
            shared_timer: None,
        }),
        cost_timing: Default::default(),
        cooldown_timing: Default::default(),
        interrupt: Default::default(),
        gates: vec![Condition::Equipped {
            slot: "off_hand".to_string(),
            item: None,
        }],
        cast_modifiers: vec![CastModifier {
            when: Some(caster_aura(SWORD_AND_BOARD)),
            effect: CastEffect::ZeroCost,
            consumes: Some(SWORD_AND_BOARD.to_string()),
        }],
        effects: vec![Effect::DirectDamage(DamageEffect {
            kind: AttackKind::Melee,
            min: 990.0,
            max: 1040.0,
            scaling: vec![block_value_scaling()],
            crit_multiplier: 2.0,
            modifiers,
        })],
        hooks,
    };

    ContentBundle {
        auras,
        dots: Vec::new(),
        abilities: vec![ability],
    }
}

/// Elemental Focus: a spell crit grants two charges of Clearcasting, each
/// taking 40% off the next spell's cost.
fn clearcasting_aura() -> AuraConfig {
    AuraConfig {
        stacking: StackingPolicy::Charges { charges: 2 },
        ..aura(CLEARCASTING, Some(16246), Some(15.0), Vec::new())
    }
}

fn clearcasting_discount() -> CastModifier {
    CastModifier {
        when: Some(caster_aura(CLEARCASTING)),
        effect: CastEffect::CostMultiplier { factor: 0.6 },
        consumes: Some(CLEARCASTING.to_string()),
    }
}

fn clearcasting_proc() -> Hook {
    Hook {
        on: Trigger::Crit,
        when: None,
        action: HookAction::ActivateAura {
            aura: CLEARCASTING.to_string(),
            on: Subject::Caster,
        },
    }
}

/// Flame Shock's periodic part: 6 ticks over 18s.
fn flame_shock_dot() -> DotConfig {
    DotConfig {
        label: FLAME_SHOCK_DOT.to_string(),
        ability_id: FLAME_SHOCK,
        tick_interval: 3.0,
        tick_count: 6,
        base_tick_damage: 139.0,
        scaling: vec![ScalingTerm::Coefficient {
            stat: Stat::SpellPower,
            coefficient: 0.1,
        }],
        policy: ReapplyPolicy::Replace,
        mode: SnapshotMode::Snapshot,
        outcome: TickOutcome::Roll,
        kind: AttackKind::Spell,
        crit_multiplier: 1.5,
    }
}

fn flame_shock(loadout: &dyn LoadoutLookup, crit_multiplier: f64) -> AbilityConfig {
    let convection = loadout.talent_points("convection") as f64;
    let focus = loadout.talent_points("elemental_focus") > 0;
    AbilityConfig {
        id: FLAME_SHOCK,
        name: "Flame Shock".to_string(),
        school: SpellSchool::Fire,
        resource: Some(ResourceKind::Mana),
        cost: SHAMAN_BASE_MANA * 0.17 * (1.0 - 0.02 * convection),
        cast_time: 0.0,
        gcd: 1.5,
        ignore_haste: false,
        cooldown: Some(CooldownConfig {
            duration: 6.0,
            shared_timer: Some("shock".to_string()),
        }),
        cost_timing: Default::default(),
        cooldown_timing: Default::default(),
        interrupt: Default::default(),
        gates: Vec::new(),
        cast_modifiers: if focus { vec![clearcasting_discount()] } else { Vec::new() },
        effects: vec![
            Effect::DirectDamage(DamageEffect {
                kind: AttackKind::Spell,
                min: 500.0,
                max: 500.0,
                scaling: vec![ScalingTerm::Coefficient {
                    stat: Stat::SpellPower,
                    coefficient: 0.2142,
                }],
                crit_multiplier,
                modifiers: Vec::new(),
            }),
            Effect::ApplyDot {
                dot: FLAME_SHOCK_DOT.to_string(),
            },
        ],
        hooks: if focus { vec![clearcasting_proc()] } else { Vec::new() },
    }
}

/// Elemental shaman lava burst, plus the flame shock it keys off.
///
/// Always crits when it lands on a target carrying the caster's flame
/// shock. Instant while Elemental Mastery or Nature's Swiftness is up.
/// With Elemental Focus, crits grant Clearcasting charges that cheapen
/// both spells. With the 4-piece tier 9 bonus (Thrall's or Nobundo's
/// regalia) each landed burst leaves a 3-tick periodic effect worth 10%
/// of the hit.
pub fn lava_burst(loadout: &dyn LoadoutLookup) -> ContentBundle {
    let convection = loadout.talent_points("convection") as f64;
    let lightning_mastery = loadout.talent_points("lightning_mastery") as f64;
    let concussion = loadout.talent_points("concussion") as f64;
    let call_of_flame = loadout.talent_points("call_of_flame") as f64;
    let precision = loadout.talent_points("elemental_precision") as f64;
    let lava_flows = loadout.talent_points("lava_flows").min(3) as usize;

    let base_crit_multiplier = if loadout.talent_points("elemental_fury") > 0 {
        2.0
    } else {
        1.5
    };
    let mut crit_bonus = [0.0, 0.06, 0.12, 0.24][lava_flows];
    if loadout.has_set_bonus("earthshatter_garb", 4) {
        crit_bonus += 0.1;
    }

    let mut bonus_damage = 0.0;
    if loadout.is_equipped("ranged", Some(VENTURE_CO_LIGHTNING_ROD)) {
        bonus_damage += 121.0;
    }
    if loadout.is_equipped("ranged", Some(THUNDERFALL_TOTEM)) {
        bonus_damage += 215.0;
    }
    let mut coefficient = 0.5714;
    if loadout.has_glyph("glyph_of_lava") {
        coefficient += 0.1;
    }

    let mut modifiers = vec![
        modifier(ModifierEffect::Multiplier {
            factor: (1.0 + 0.01 * concussion) * (1.0 + 0.02 * call_of_flame),
        }),
        DamageModifier {
            when: Some(Condition::DotActive {
                label: FLAME_SHOCK_DOT.to_string(),
            }),
            effect: ModifierEffect::CritOnHit,
        },
    ];
    if precision > 0.0 {
        modifiers.push(modifier(ModifierEffect::BonusHit { chance: 0.01 * precision }));
    }
    if crit_bonus > 0.0 {
        modifiers.push(modifier(ModifierEffect::CritMultiplierBonus { amount: crit_bonus }));
    }

    let focus = loadout.talent_points("elemental_focus") > 0;
    let t9 = loadout.has_set_bonus("thralls_regalia", 4) || loadout.has_set_bonus("nobundos_regalia", 4);
    let mut dots = vec![flame_shock_dot()];
    let mut hooks = Vec::new();
    if focus {
        hooks.push(clearcasting_proc());
    }
    if t9 {
        dots.push(DotConfig {
            label: LAVA_BURSTED_DOT.to_string(),
            ability_id: LAVA_BURSTED,
            tick_interval: 2.0,
            tick_count: 3,
            base_tick_damage: 0.0,
            scaling: Vec::new(),
            policy: ReapplyPolicy::Replace,
            mode: SnapshotMode::Snapshot,
            outcome: TickOutcome::AlwaysHit,
            kind: AttackKind::Spell,
            crit_multiplier: 1.0,
        });
        hooks.push(Hook {
            on: Trigger::Landed,
            when: None,
            action: HookAction::ApplyDot {
                dot: LAVA_BURSTED_DOT.to_string(),
                fraction_of_damage: Some(0.1),
            },
        });
    }

    let mut cost = SHAMAN_BASE_MANA * 0.1;
    if lightning_mastery > 0.0 {
        cost *= 1.0 - 0.02 * convection;
    }

    let mut cast_modifiers = Vec::new();
    if focus {
        cast_modifiers.push(clearcasting_discount());
    }
    for label in [ELEMENTAL_MASTERY, NATURES_SWIFTNESS] {
        cast_modifiers.push(CastModifier {
            when: Some(caster_aura(label)),
            effect: CastEffect::InstantCast,
            consumes: None,
        });
    }

    let burst = AbilityConfig {
        id: LAVA_BURST,
        name: "Lava Burst".to_string(),
        school: SpellSchool::Fire,
        resource: Some(ResourceKind::Mana),
        cost,
        cast_time: 2.0 - 0.1 * lightning_mastery,
        gcd: 1.5,
        ignore_haste: false,
        cooldown: Some(CooldownConfig {
            duration: 8.0,
            shared_timer: None,
        }),
        cost_timing: Default::default(),
        cooldown_timing: Default::default(),
        interrupt: Default::default(),
        gates: Vec::new(),
        cast_modifiers,
        effects: vec![Effect::DirectDamage(DamageEffect {
            kind: AttackKind::Spell,
            min: 1192.0 + bonus_damage,
            max: 1518.0 + bonus_damage,
            scaling: vec![ScalingTerm::Coefficient {
                stat: Stat::SpellPower,
                coefficient,
            }],
            crit_multiplier: base_crit_multiplier,
            modifiers,
        })],
        hooks,
    };

    let mut auras = vec![
        aura(ELEMENTAL_MASTERY, Some(16166), Some(30.0), Vec::new()),
        aura(NATURES_SWIFTNESS, Some(16188), None, Vec::new()),
    ];
    if focus {
        auras.push(clearcasting_aura());
    }

    ContentBundle {
        auras,
        dots,
        abilities: vec![flame_shock(loadout, base_crit_multiplier), burst],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, Loadout};
    use crate::attack_table::AttackTable;
    use crate::aura;
    use crate::cast::CastAttempt;
    use crate::metrics::MetricKey;
    use crate::resource::ResourcePool;
    use crate::simulation::Trial;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    const ME: ActorId = ActorId(0);
    const BOSS: ActorId = ActorId(1);

    /// Trial with one preset registered for actor 0 and every attack
    /// against the boss resolving as `miss` (or a plain hit).
    fn preset_trial(bundle: ContentBundle, loadout: Loadout, pool: ResourcePool, miss: f64) -> Trial {
        let mut registry = Registry::new();
        bundle.register(&mut registry).unwrap();
        let me = Actor::new(ME, "me", 80).with_pool(pool).with_loadout(Arc::new(loadout));
        let boss = Actor::new(BOSS, "boss", 83);
        let mut trial = Trial::new(Arc::new(registry), vec![me, boss], 11, None).unwrap();
        for kind in [AttackKind::Melee, AttackKind::Spell] {
            trial.pin_table(ME, BOSS, kind, AttackTable::from_chances(miss, 0.0, 0.0));
        }
        trial
    }

    fn grant(trial: &mut Trial, label: &str) {
        let registry = Arc::clone(&trial.registry);
        let def = registry.aura(label).unwrap();
        aura::activate(&mut trial.actors[0], def, &mut trial.clock).unwrap();
    }

    fn warrior() -> Loadout {
        Loadout {
            equipment: HashMap::from([("off_hand".to_string(), 51452)]),
            talents: HashMap::from([
                ("focused_rage".to_string(), 3),
                ("critical_block".to_string(), 2),
                ("gag_order".to_string(), 2),
            ]),
            glyphs: vec!["glyph_of_blocking".to_string()],
            set_bonuses: HashMap::from([("onslaught_armor".to_string(), 4)]),
        }
    }

    fn damage(ability: &AbilityConfig) -> &DamageEffect {
        match &ability.effects[0] {
            Effect::DirectDamage(d) => d,
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn test_shield_slam_reads_talents() {
        let bundle = shield_slam(&warrior());
        let slam = &bundle.abilities[0];
        assert_eq!(slam.cost, 17.0);
        assert_eq!(bundle.auras.len(), 2);
        assert_eq!(slam.hooks.len(), 2);

        let dmg = damage(slam);
        assert_eq!(dmg.kind, AttackKind::Melee);
        assert!(dmg
            .modifiers
            .iter()
            .any(|m| m.effect == ModifierEffect::BonusCrit { chance: 0.1 }));
        let factor = dmg.modifiers.iter().find_map(|m| match m.effect {
            ModifierEffect::Multiplier { factor } => Some(factor),
            _ => None,
        });
        assert!((factor.unwrap() - 1.1 * 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_shield_slam_without_glyph_skips_aura() {
        let mut loadout = warrior();
        loadout.glyphs.clear();
        let bundle = shield_slam(&loadout);
        assert_eq!(bundle.auras.len(), 1);
        assert_eq!(bundle.abilities[0].hooks.len(), 1);
    }

    #[test]
    fn test_block_value_scaling_segments() {
        let term = block_value_scaling();
        let actor = |bv: f64| crate::actor::Actor::new(ActorId(0), "t", 80).with_stat(Stat::BlockValue, bv);
        assert_eq!(term.value(&actor(1500.0)), 1500.0);
        assert!((term.value(&actor(3160.0)) - 2072.0).abs() < 1e-3);
        assert_eq!(term.value(&actor(5000.0)), 2072.0);
    }

    #[test]
    fn test_lava_burst_loadout_bonuses() {
        let loadout = Loadout {
            equipment: HashMap::from([("ranged".to_string(), THUNDERFALL_TOTEM)]),
            talents: HashMap::from([("lava_flows".to_string(), 3), ("elemental_fury".to_string(), 5)]),
            glyphs: vec!["glyph_of_lava".to_string()],
            set_bonuses: HashMap::from([("thralls_regalia".to_string(), 4)]),
        };
        let bundle = lava_burst(&loadout);
        let burst = bundle.abilities.iter().find(|a| a.id == LAVA_BURST).unwrap();
        let dmg = damage(burst);
        assert_eq!(dmg.min, 1407.0);
        assert_eq!(dmg.crit_multiplier, 2.0);
        assert!(dmg
            .modifiers
            .iter()
            .any(|m| m.effect == ModifierEffect::CritMultiplierBonus { amount: 0.24 }));
        assert_eq!(burst.hooks.len(), 1);
        assert!(bundle.dots.iter().any(|d| d.label == LAVA_BURSTED_DOT));
    }

    #[test]
    fn test_free_slam_miss_still_refunds_base_cost() {
        let loadout = Loadout {
            equipment: HashMap::from([("off_hand".to_string(), 51452)]),
            ..Loadout::default()
        };
        let bundle = shield_slam(&loadout);
        let pool = ResourcePool::new(ResourceKind::Rage, 50.0, 100.0);
        let mut trial = preset_trial(bundle, loadout, pool, 1.0);
        grant(&mut trial, SWORD_AND_BOARD);

        let attempt = trial.try_cast(ME, SHIELD_SLAM, Some(BOSS)).unwrap();
        assert!(matches!(attempt, CastAttempt::Completed { .. }));
        let tank = trial.actor(ME).unwrap();
        assert_eq!(tank.pools.current(ResourceKind::Rage), 66.0);
        assert!(!tank.auras.is_active(SWORD_AND_BOARD));
        let m = trial.metrics().get(&MetricKey::new(SHIELD_SLAM, BOSS)).unwrap();
        assert_eq!((m.misses, m.resource_spent, m.resource_refunded), (1, 0.0, 16.0));
    }

    #[test]
    fn test_slam_refund_is_capped_at_max_rage() {
        let loadout = Loadout {
            equipment: HashMap::from([("off_hand".to_string(), 51452)]),
            ..Loadout::default()
        };
        let bundle = shield_slam(&loadout);
        let pool = ResourcePool::new(ResourceKind::Rage, 100.0, 100.0);
        let mut trial = preset_trial(bundle, loadout, pool, 1.0);
        grant(&mut trial, SWORD_AND_BOARD);

        trial.try_cast(ME, SHIELD_SLAM, Some(BOSS)).unwrap();
        assert_eq!(trial.actor(ME).unwrap().pools.current(ResourceKind::Rage), 100.0);
        let m = trial.metrics().get(&MetricKey::new(SHIELD_SLAM, BOSS)).unwrap();
        assert_eq!(m.resource_refunded, 0.0);
    }

    #[test]
    fn test_tier9_dot_needs_thralls_or_nobundos_regalia() {
        let with_set = |set: &str| Loadout {
            set_bonuses: HashMap::from([(set.to_string(), 4)]),
            ..Loadout::default()
        };
        let has_dot = |bundle: &ContentBundle| bundle.dots.iter().any(|d| d.label == LAVA_BURSTED_DOT);
        assert!(has_dot(&lava_burst(&with_set("thralls_regalia"))));
        assert!(has_dot(&lava_burst(&with_set("nobundos_regalia"))));
        assert!(!has_dot(&lava_burst(&with_set("frost_witch_regalia"))));
        assert!(!has_dot(&lava_burst(&Loadout::default())));
    }

    #[test]
    fn test_clearcasting_charges_discount_both_spells() {
        let loadout = Loadout {
            talents: HashMap::from([("elemental_focus".to_string(), 1)]),
            ..Loadout::default()
        };
        let bundle = lava_burst(&loadout);
        assert!(bundle.auras.iter().any(|a| a.label == CLEARCASTING));
        let pool = ResourcePool::new(ResourceKind::Mana, 10000.0, 10000.0);
        let mut trial = preset_trial(bundle, loadout, pool, 1.0);
        grant(&mut trial, CLEARCASTING);
        let mana = |trial: &Trial| trial.actor(ME).unwrap().pools.current(ResourceKind::Mana);

        trial.try_cast(ME, FLAME_SHOCK, Some(BOSS)).unwrap();
        assert!((mana(&trial) - (10000.0 - 747.32 * 0.6)).abs() < 1e-6);
        assert_eq!(trial.actor(ME).unwrap().auras.stacks(CLEARCASTING), 1);

        trial.run_until(Duration::from_millis(1500)).unwrap();
        let attempt = trial.try_cast(ME, LAVA_BURST, Some(BOSS)).unwrap();
        assert!(matches!(attempt, CastAttempt::Started { .. }));
        assert!((mana(&trial) - (10000.0 - 747.32 * 0.6 - 439.6 * 0.6)).abs() < 1e-6);
        assert!(!trial.actor(ME).unwrap().auras.is_active(CLEARCASTING));
    }

    #[test]
    fn test_without_elemental_focus_no_clearcasting() {
        let bundle = lava_burst(&Loadout::default());
        assert!(bundle.auras.iter().all(|a| a.label != CLEARCASTING));
        assert!(bundle.abilities.iter().all(|a| a.cast_modifiers.iter().all(|m| m.consumes.is_none())));
    }

    #[test]
    fn test_bundles_register_cleanly() {
        let mut registry = Registry::new();
        shield_slam(&warrior()).register(&mut registry).unwrap();
        lava_burst(&Loadout::default()).register(&mut registry).unwrap();
        assert!(registry.has_ability(SHIELD_SLAM));
        assert!(registry.has_ability(LAVA_BURST));
        assert!(registry.has_ability(FLAME_SHOCK));
        assert!(matches!(
            shield_slam(&warrior()).register(&mut registry),
            Err(ConfigError::Duplicate { .. })
        ));
    }
}
