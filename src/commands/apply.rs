//! `confctl apply`

use anyhow::{Result, bail};
use colored::Colorize;
use configuration::{ApplyFlags, ApplySetResult, ConfigurationUnit, UnitState};
use std::sync::Arc;

use super::{active_unit_count, engine, history_store, load_set};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::config::Settings;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let settings = Settings::load()?;
    let mut set = load_set(&args.file)?;
    let mut engine = engine(&settings, args.jobs);

    if args.check_only {
        let result = engine.apply_set(
            &mut set,
            ApplyFlags {
                consistency_check_only: true,
            },
        )?;
        return report_check(ctx, &result);
    }

    let total = active_unit_count(&set.units);
    if !ctx.quiet {
        ui::header(&format!("Applying {}", set.name));
        print_plan(&set.units, 0);
        println!();
    }

    if settings.confirm && !args.yes && !confirm_proceed()? {
        ui::info("Cancelled");
        return Ok(());
    }

    if settings.record_history && !args.no_history {
        engine = engine.with_history(history_store(&settings)?);
    }

    let progress = Arc::new(if ctx.quiet {
        ui::ApplyProgress::hidden()
    } else {
        ui::ApplyProgress::new(total)
    });
    engine.add_observer(progress.clone());

    log::debug!("Applying {total} units with up to {} jobs", engine.jobs());
    let result = engine.apply_set(&mut set, ApplyFlags::default())?;
    progress.finish();

    print_summary(&result);
    match result.result_code {
        None => Ok(()),
        Some(code) => bail!("Configuration was not fully applied: {code}"),
    }
}

fn print_plan(units: &[ConfigurationUnit], depth: usize) {
    for unit in units.iter().filter(|u| u.is_active) {
        let indent = "  ".repeat(depth + 1);
        let mut line = format!("{indent}{} {}", "•".cyan(), ui::unit_label(&unit.to_ref()));
        if unit.intent != configuration::Intent::Apply {
            line.push_str(&format!(" ({})", unit.intent).dimmed().to_string());
        }
        println!("{line}");
        print_plan(&unit.units, depth + 1);
    }
}

fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

fn print_summary(result: &ApplySetResult) {
    let unchanged = result
        .unit_results
        .iter()
        .filter(|r| r.state == UnitState::Completed && r.previously_in_desired_state)
        .count();
    let changed = result.count(UnitState::Completed) - unchanged;
    let reboot = result.unit_results.iter().any(|r| r.reboot_required);

    println!();
    println!(
        "  {} changed, {} unchanged, {} skipped, {} failed",
        changed.to_string().green(),
        unchanged,
        result.count(UnitState::Skipped).to_string().yellow(),
        result.count(UnitState::Failed).to_string().red(),
    );
    if reboot {
        ui::warn("A reboot is required to finish applying this configuration");
    }
    if result.is_success() {
        ui::success("Configuration applied");
    }
}

fn report_check(ctx: &Context, result: &ApplySetResult) -> Result<()> {
    for unit_result in result.unit_results.iter().filter(|r| r.state == UnitState::Failed) {
        ui::error(&format!(
            "{} {}",
            ui::unit_label(&unit_result.unit),
            ui::result_reason(&unit_result.result).unwrap_or_default()
        ));
    }
    match result.result_code {
        None => {
            if !ctx.quiet {
                ui::success(&format!("{} units are consistent", result.unit_results.len()));
            }
            Ok(())
        }
        Some(code) => bail!("Configuration is not consistent: {code}"),
    }
}
