//! Debug script to print attack table band edges and registered abilities
//! for a scenario

use spellsim::ability::Effect;
use spellsim::attack_table::AttackKind;
use spellsim::config::SimConfig;
use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("usage: debug_tables <scenario.yaml|json>");
        std::process::exit(2);
    };

    let scenario = match SimConfig::from_file(path).and_then(|c| c.build()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    for actor in &scenario.actors {
        let Some(target) = actor.target else {
            continue;
        };
        println!("\n=== {} ({}) -> {} ===", actor.name, actor.id, target);
        for kind in [AttackKind::Melee, AttackKind::Spell] {
            let Some(table) = scenario.opening_table(actor.id, target, kind) else {
                continue;
            };
            println!("{:?}:", kind);
            for (outcome, band) in table.bands() {
                println!("  {:<14} [{:.4}, {:.4})", format!("{outcome:?}"), band.start, band.end);
            }
        }
    }

    println!("\n=== ABILITIES ===");
    for ability in scenario.registry.abilities() {
        let direct = ability.effects.iter().find_map(|e| match e {
            Effect::DirectDamage(d) => Some(d),
            _ => None,
        });
        print!(
            "{:<8} {:<20} cost {:>8.1}  cast {:>5.2}s  cd {:>5.1}s",
            ability.id.0,
            ability.name,
            ability.cost,
            ability.cast_time.as_secs_f64(),
            ability.cooldown.map_or(0.0, |d| d.as_secs_f64()),
        );
        if let Some(d) = direct {
            print!("  {:?} {:.0}-{:.0} x{:.2}", d.kind, d.min, d.max, d.crit_multiplier);
        }
        println!();
    }
}
