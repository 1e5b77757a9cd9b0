//! Batch progress for the terminal.
//!
//! Implements the engine observer with an indicatif bar counting finished
//! monitors, and prints each step and result above it.

use colored::Colorize;
use fleet::{Observer, Outcome, Step};
use indicatif::{ProgressBar, ProgressStyle};

pub struct BatchProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl BatchProgress {
    pub fn new(total: usize, operation: &str, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|s| s.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(operation.to_string());
        Self { bar, quiet }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn print(&self, line: String) {
        if !self.quiet {
            self.bar.println(line);
        }
    }
}

impl Observer for BatchProgress {
    fn on_step(&self, monitor: &str, step: &Step) {
        self.print(crate::ui::monitor_line(
            &"→".blue().to_string(),
            monitor,
            &step.to_string().dimmed().to_string(),
        ));
    }

    fn on_unit_complete(&self, monitor: &str, result: &fleet::Result<Outcome>) {
        let (symbol, message) = match result {
            Ok(outcome) => ("✓".green(), outcome.to_string()),
            Err(err) => ("✗".red(), err.to_string()),
        };
        let line = crate::ui::monitor_line(&symbol.to_string(), monitor, &message);
        self.print(line);
        self.bar.inc(1);
    }
}
