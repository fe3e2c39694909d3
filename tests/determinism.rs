//! Batch reproducibility: same seed, same report, whatever the worker
//! count.

use spellsim::config::{Scenario, SimConfig};
use spellsim::content::{FLAME_SHOCK, LAVA_BURST, LAVA_BURSTED, SHIELD_SLAM};
use spellsim::orchestrator::{merge_outcomes, run_and_aggregate, run_trials_parallel, run_trials_sequential};

const RAID: &str = r#"
trials:
  num_trials: 12
  duration: 90
  seed: 20240611
  parallel: false
actors:
  - id: 0
    name: warrior
    stats: { block_value: 2400, melee_crit: 0.25, melee_hit: 0.08 }
    resources:
      - { kind: rage, max: 100, start: 40, regen_per_second: 8 }
    loadout:
      equipment: { off_hand: 51452 }
      talents: { focused_rage: 3, critical_block: 3, gag_order: 2 }
      glyphs: [glyph_of_blocking]
    rotation: [47488]
    target: 2
  - id: 1
    name: shaman
    stats: { spell_power: 2800, spell_crit: 0.3, spell_hit: 0.17, haste: 0.2 }
    resources:
      - { kind: mana, max: 25000, regen_per_second: 150 }
    loadout:
      equipment: { ranged: 45255 }
      talents: { lava_flows: 3, elemental_fury: 5, elemental_focus: 1, concussion: 5, call_of_flame: 3 }
      glyphs: [glyph_of_lava]
      set_bonuses: { thralls_regalia: 4 }
    rotation: [49233, 60043]
    target: 2
  - id: 2
    name: boss
    level: 83
presets:
  - { preset: shield_slam, actor: 0 }
  - { preset: lava_burst, actor: 1 }
script:
  - { at: 20.5, actor: 1, duration: 3 }
"#;

fn scenario() -> Scenario {
    SimConfig::from_yaml(RAID).unwrap().build().unwrap()
}

#[test]
fn test_same_seed_same_report() {
    let scenario = scenario();
    let a = run_and_aggregate(&scenario);
    let b = run_and_aggregate(&scenario);
    assert_eq!(a.merged, b.merged);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn test_worker_count_does_not_change_merged_metrics() {
    let scenario = scenario();
    let one = merge_outcomes(&scenario, 77, run_trials_parallel(&scenario, 77, 12, Some(1), None));
    let four = merge_outcomes(&scenario, 77, run_trials_parallel(&scenario, 77, 12, Some(4), None));
    let seq = merge_outcomes(&scenario, 77, run_trials_sequential(&scenario, 77, 12, None));
    assert_eq!(one.merged, four.merged);
    assert_eq!(one.merged, seq.merged);
    assert_eq!(one.stats, four.stats);
}

#[test]
fn test_different_seeds_diverge() {
    let scenario = scenario();
    let a = merge_outcomes(&scenario, 1, run_trials_sequential(&scenario, 1, 4, None));
    let b = merge_outcomes(&scenario, 2, run_trials_sequential(&scenario, 2, 4, None));
    assert_ne!(a.merged, b.merged);
}

#[test]
fn test_presets_run_end_to_end() {
    let scenario = scenario();
    let report = run_and_aggregate(&scenario);
    assert_eq!(report.completed, 12);
    assert_eq!(report.failed, 0, "{:?}", report.failures);
    assert_eq!(report.aborted, 0);

    let casts = |id| {
        report
            .metrics
            .rows
            .iter()
            .filter(|r| r.ability == id)
            .map(|r| r.metrics.casts)
            .sum::<u64>()
    };
    let ticks = |id| {
        report
            .metrics
            .rows
            .iter()
            .filter(|r| r.ability == id)
            .map(|r| r.metrics.ticks)
            .sum::<u64>()
    };
    assert!(casts(SHIELD_SLAM) > 0);
    assert!(casts(FLAME_SHOCK) > 0);
    assert!(casts(LAVA_BURST) > 0);
    assert!(ticks(FLAME_SHOCK) > 0);
    assert!(ticks(LAVA_BURSTED) > 0);
    assert!(report.stats.avg_dps > 0.0);
}
