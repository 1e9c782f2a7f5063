//! Read-only commands: validate, show, test, get, export

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use configuration::{ApplyFlags, ConfigurationUnit, TestOutcome};
use std::path::Path;

use super::{engine, find_unit, load_set};
use crate::Context;
use crate::config::Settings;
use crate::ui;

pub fn validate(ctx: &Context, file: &Path) -> Result<()> {
    let mut set = load_set(file)?;
    let result = engine(&Settings::load()?, None).apply_set(
        &mut set,
        ApplyFlags {
            consistency_check_only: true,
        },
    )?;

    for failed in result.unit_results.iter().filter(|r| r.result.code.is_some()) {
        ui::error(&format!(
            "{} {}",
            ui::unit_label(&failed.unit),
            ui::result_reason(&failed.result).unwrap_or_default()
        ));
    }
    if let Some(code) = result.result_code {
        bail!("{} is not valid: {code}", file.display());
    }
    if !ctx.quiet {
        ui::success(&format!("{} is valid ({} units)", file.display(), result.unit_results.len()));
    }
    Ok(())
}

pub fn show(ctx: &Context, file: &Path) -> Result<()> {
    let set = load_set(file)?;

    ui::header(&set.name);
    ui::kv("Schema", &set.schema_version);
    ui::kv("Path", &set.path);
    if set.environment.context != configuration::SecurityContext::Current {
        ui::kv("Security context", set.environment.context.as_str());
    }
    println!();
    print_units(&set.units, 1, ctx.verbose > 0);
    Ok(())
}

fn print_units(units: &[ConfigurationUnit], depth: usize, with_settings: bool) {
    for unit in units {
        let indent = "  ".repeat(depth);
        let mut line = format!("{indent}{}", ui::unit_label(&unit.to_ref()).bold());
        line.push_str(&format!(" {}", unit.intent.to_string().cyan()));
        if !unit.is_active {
            line.push_str(&format!(" {}", "inactive".yellow()));
        }
        if !unit.dependencies.is_empty() {
            line.push_str(&format!(" {}", format!("after {}", unit.dependencies.join(", ")).dimmed()));
        }
        println!("{line}");
        if let Some(description) = unit.description() {
            ui::dim(&format!("{indent}{description}"));
        }
        if with_settings {
            for (key, value) in &unit.settings {
                ui::dim(&format!("{indent}{key}: {value}"));
            }
        }
        print_units(&unit.units, depth + 1, with_settings);
    }
}

pub fn test(ctx: &Context, file: &Path) -> Result<()> {
    let set = load_set(file)?;
    let result = engine(&Settings::load()?, None).test_set(&set)?;

    if !ctx.quiet {
        for unit_result in &result.unit_results {
            let symbol = match unit_result.outcome {
                TestOutcome::Positive => "✓".green(),
                TestOutcome::Negative => "✗".yellow(),
                TestOutcome::Failed => "✗".red(),
                TestOutcome::NotRun => "○".dimmed(),
            };
            let reason = ui::result_reason(&unit_result.result).unwrap_or_default();
            println!("  {symbol} {} {}", ui::unit_label(&unit_result.unit), reason.dimmed());
        }
    }

    match result.outcome {
        TestOutcome::Positive => {
            ui::success("The system is in the described state");
            Ok(())
        }
        TestOutcome::Negative => bail!("The system is not in the described state"),
        TestOutcome::Failed => bail!("Testing the configuration failed"),
        TestOutcome::NotRun => {
            ui::info("No units were tested");
            Ok(())
        }
    }
}

pub fn get(_ctx: &Context, file: &Path, identifier: &str) -> Result<()> {
    let set = load_set(file)?;
    let unit = find_unit(&set.units, identifier)
        .with_context(|| format!("No unit named '{identifier}' in {}", file.display()))?;

    let result = engine(&Settings::load()?, None).get_unit_settings(&set, unit)?;
    match result.settings {
        Some(settings) => {
            print!("{}", serde_yaml::to_string(&settings)?);
            Ok(())
        }
        None => bail!(
            "Failed to get settings for {}: {}",
            ui::unit_label(&result.unit),
            ui::result_reason(&result.result).unwrap_or_default()
        ),
    }
}

pub fn export(_ctx: &Context, file: &Path, identifier: &str) -> Result<()> {
    let set = load_set(file)?;
    let unit = find_unit(&set.units, identifier)
        .with_context(|| format!("No unit named '{identifier}' in {}", file.display()))?;

    let result = engine(&Settings::load()?, None).get_all_unit_settings(&set, unit)?;
    if let Some(reason) = ui::result_reason(&result.result) {
        bail!("Failed to export {}: {reason}", ui::unit_label(&result.unit));
    }
    print!("{}", serde_yaml::to_string(&result.settings)?);
    Ok(())
}
