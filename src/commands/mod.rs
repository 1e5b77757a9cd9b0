pub mod build;
pub mod deploy;
pub mod logs;
pub mod remove;
pub mod results;
pub mod start;
pub mod stop;

use anyhow::{Context as _, Result};
use colored::Colorize;
use fleet::provider::IdentityApi;
use fleet::{
    BatchReport, CallerIdentity, Clients, ErrorCategory, MonitorSpec, Operation, SandboxConfig,
    SandboxPlatform, Settings, executor,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::Context;
use crate::cli::SelectArgs;
use crate::progress::BatchProgress;
use crate::settings::ToolSettings;
use crate::{config, select};

/// Platform connection and settings shared by one invocation
pub struct Session {
    pub platform: Arc<SandboxPlatform>,
    pub clients: Clients,
    pub caller: CallerIdentity,
    pub settings: Settings,
    pub tool: ToolSettings,
    quiet: bool,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let tool = ToolSettings::load()?;
        let state = tool.state_path(ctx.state_file.as_deref(), ctx.profile.as_deref())?;
        log::debug!("using sandbox state {}", state.display());

        let sandbox = SandboxConfig {
            region: ctx.region.clone(),
            ..SandboxConfig::default()
        };
        let platform = Arc::new(
            SandboxPlatform::open(&state, sandbox)
                .with_context(|| format!("Could not open {}", state.display()))?,
        );
        let clients = Clients::from_platform(&platform);
        let caller = platform
            .caller()
            .context("Could not resolve the caller identity")?;

        Ok(Self {
            platform,
            clients,
            caller,
            settings: tool.engine_settings(),
            tool,
            quiet: ctx.quiet,
        })
    }

    /// Load descriptors and apply the selection flags
    pub fn select(&self, ctx: &Context, args: &SelectArgs) -> Result<Vec<MonitorSpec>> {
        let specs = config::load_all(&args.paths, &ctx.config_file, ctx.config_parser)?;
        select::monitors(specs, args)
    }

    pub fn select_one(&self, ctx: &Context, args: &SelectArgs) -> Result<MonitorSpec> {
        let specs = config::load_all(&args.paths, &ctx.config_file, ctx.config_parser)?;
        select::monitor(specs, args)
    }

    /// Run one batch with progress output, then persist the platform state.
    ///
    /// Per-monitor failures stay in the report; call
    /// [`BatchReport::into_result`] to turn them into an error.
    pub fn run_batch(
        &self,
        operation: &Operation,
        monitors: &[MonitorSpec],
    ) -> Result<BatchReport> {
        let progress = BatchProgress::new(monitors.len(), operation.name(), self.quiet);
        let ctx = fleet::Context::new(&self.clients, &self.settings, &self.caller, &progress);
        let report = executor::run(&ctx, operation, monitors);
        progress.finish();
        self.save()?;

        let report = report?;
        if !self.quiet {
            print_summary(&report);
        }
        Ok(report)
    }

    pub fn save(&self) -> Result<()> {
        self.platform
            .save()
            .context("Could not save sandbox state")
    }
}

/// Print final summary
fn print_summary(report: &BatchReport) {
    println!();
    if report.is_success() {
        println!(
            "  {} {} finished for {} monitors",
            "✓".green().bold(),
            report.operation,
            report.total()
        );
    } else {
        println!(
            "  {} {} finished with errors",
            "⚠".yellow().bold(),
            report.operation
        );
    }

    let changed = report
        .units
        .iter()
        .filter(|u| u.result.as_ref().is_ok_and(fleet::Outcome::is_change))
        .count();
    let skipped = report.succeeded() - changed;
    if changed > 0 {
        println!("    • {changed} monitors changed");
    }
    if skipped > 0 {
        println!("    • {skipped} monitors already in place");
    }
    if report.failed() > 0 {
        println!("    • {} {} failed", report.failed(), "monitors".red());
        for (category, failures) in failures_by_category(report) {
            println!("      {}", category.description().bold());
            for (monitor, err) in failures {
                println!("        {} {monitor}: {err}", "✗".red());
            }
        }
    }
}

/// Failed units grouped by error category, in category order
fn failures_by_category(
    report: &BatchReport,
) -> BTreeMap<ErrorCategory, Vec<(&str, &fleet::Error)>> {
    let mut groups: BTreeMap<ErrorCategory, Vec<_>> = BTreeMap::new();
    for unit in &report.units {
        if let Err(err) = &unit.result {
            groups
                .entry(err.category())
                .or_default()
                .push((unit.monitor.as_str(), err));
        }
    }
    groups
}
