//! `confctl history`

use anyhow::{Result, bail};
use colored::Colorize;
use configuration::{ConfigurationSet, ConfigurationUnit, HistoryStore, UnitState};

use super::history_store;
use crate::Context;
use crate::cli::HistoryCommand;
use crate::config::Settings;
use crate::ui;

pub fn run(ctx: &Context, cmd: HistoryCommand) -> Result<()> {
    let store = history_store(&Settings::load()?)?;
    match cmd {
        HistoryCommand::List => list(ctx, &store),
        HistoryCommand::Show { id } => show(&store, &id),
        HistoryCommand::Remove { id } => {
            let set = resolve(&store, &id)?;
            store.remove(set.instance_id)?;
            ui::success(&format!("Removed {} ({})", set.instance_id, set.name));
            Ok(())
        }
    }
}

fn list(ctx: &Context, store: &HistoryStore) -> Result<()> {
    let sets = store.list()?;
    if sets.is_empty() {
        if !ctx.quiet {
            ui::info("No applies recorded");
        }
        return Ok(());
    }

    for set in &sets {
        let when = set
            .apply_begun
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let failed = count_state(&set.units, UnitState::Failed);
        let status = if failed == 0 {
            "ok".green()
        } else {
            format!("{failed} failed").red()
        };
        println!("{}  {}  {}  {}", set.instance_id.to_string().dimmed(), when, set.name.bold(), status);
    }
    Ok(())
}

fn show(store: &HistoryStore, id: &str) -> Result<()> {
    let set = resolve(store, id)?;

    ui::header(&set.name);
    ui::kv("Id", &set.instance_id.to_string());
    ui::kv("Path", &set.path);
    if let Some(first) = set.first_apply {
        ui::kv("First applied", &first.to_rfc3339());
    }
    if let (Some(begun), Some(ended)) = (set.apply_begun, set.apply_ended) {
        ui::kv("Last applied", &begun.to_rfc3339());
        ui::kv("Duration", &format!("{} ms", (ended - begun).num_milliseconds()));
    }
    println!();
    print_units(&set.units, 1);
    Ok(())
}

fn print_units(units: &[ConfigurationUnit], depth: usize) {
    for unit in units.iter().filter(|u| u.is_active) {
        let reason = ui::result_reason(&unit.result).unwrap_or_default();
        println!(
            "{}{} {} {}",
            "  ".repeat(depth),
            ui::state_symbol(unit.state),
            ui::unit_label(&unit.to_ref()),
            reason.dimmed()
        );
        print_units(&unit.units, depth + 1);
    }
}

fn count_state(units: &[ConfigurationUnit], state: UnitState) -> usize {
    units
        .iter()
        .map(|u| usize::from(u.state == state) + count_state(&u.units, state))
        .sum()
}

/// Find the recorded set whose id starts with `prefix`
fn resolve(store: &HistoryStore, prefix: &str) -> Result<ConfigurationSet> {
    let prefix = prefix.to_ascii_lowercase();
    let mut matches: Vec<ConfigurationSet> = store
        .list()?
        .into_iter()
        .filter(|s| s.instance_id.to_string().starts_with(&prefix))
        .collect();

    match matches.len() {
        0 => bail!("No recorded apply matches '{prefix}'"),
        1 => Ok(matches.remove(0)),
        n => bail!("'{prefix}' matches {n} recorded applies; use a longer prefix"),
    }
}
