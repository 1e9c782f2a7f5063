use colored::{ColoredString, Colorize};
use configuration::{ChangeEvent, ProgressObserver, ResultInfo, UnitRef, UnitState};
use indicatif::{ProgressBar, ProgressStyle};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Unit formatting
// ============================================================================

pub fn state_symbol(state: UnitState) -> ColoredString {
    match state {
        UnitState::Completed => "✓".green(),
        UnitState::Skipped => "○".yellow(),
        UnitState::Failed => "✗".red(),
        UnitState::InProgress => "…".cyan(),
        UnitState::Pending | UnitState::Unknown => "·".dimmed(),
    }
}

/// `identifier [type]`, or just the type for anonymous units
pub fn unit_label(unit: &UnitRef) -> String {
    if unit.identifier.is_empty() {
        format!("[{}]", unit.unit_type)
    } else {
        format!("{} [{}]", unit.identifier, unit.unit_type)
    }
}

/// One-line reason for a non-successful result
pub fn result_reason(result: &ResultInfo) -> Option<String> {
    let code = result.code?;
    let mut reason = if result.description.is_empty() || result.description == code.message() {
        code.to_string()
    } else {
        format!("{code}: {}", result.description)
    };
    if !result.details.is_empty() {
        reason.push_str(&format!(" ({})", result.details));
    }
    Some(reason)
}

// ============================================================================
// Apply progress
// ============================================================================

/// Renders unit transitions as a progress bar with one line per finished unit
pub struct ApplyProgress {
    bar: ProgressBar,
}

impl ApplyProgress {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressObserver for ApplyProgress {
    fn on_change(&self, event: &ChangeEvent) {
        let ChangeEvent::UnitStateChanged {
            unit, state, result, ..
        } = event
        else {
            return;
        };

        if *state == UnitState::InProgress {
            self.bar.set_message(unit_label(unit));
            return;
        }
        if !state.is_terminal() {
            return;
        }

        self.bar.inc(1);
        let line = match result_reason(result) {
            Some(reason) => format!("  {} {} {}", state_symbol(*state), unit_label(unit), reason.dimmed()),
            None => format!("  {} {}", state_symbol(*state), unit_label(unit)),
        };
        self.bar.suspend(|| println!("{line}"));
    }
}
