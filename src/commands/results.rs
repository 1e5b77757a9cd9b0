use anyhow::Result;
use colored::Colorize;
use fleet::{Run, RunState, runs};

use super::Session;
use crate::Context;
use crate::cli::RunArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &RunArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let spec = session.select_one(ctx, &args.select)?;
    let history = runs::list_runs(session.clients.monitors.as_ref(), &spec.name)?;

    if history.is_empty() {
        ui::info(&format!("{} has no runs yet", spec.name));
        return Ok(());
    }

    if args.last {
        print_details(&spec.name, &history[0]);
        return Ok(());
    }

    ui::header(&format!("Runs of {}", spec.name));
    for run in &history {
        println!(
            "  {} {:<20} {:>8}  {}",
            state_symbol(run.state),
            format_time(run),
            format_duration(run),
            ui::truncate(run.reason.as_deref().unwrap_or_default(), 60).dimmed()
        );
    }
    println!();
    ui::dim(&format!("{} runs", history.len()));
    Ok(())
}

fn print_details(monitor: &str, run: &Run) {
    ui::header(&format!("Last run of {monitor}"));
    ui::kv("Id", &run.id);
    ui::kv("State", &run.state.to_string());
    ui::kv("Started", &format_time(run));
    ui::kv("Duration", &format_duration(run));
    if let Some(reason) = &run.reason {
        ui::kv("Reason", reason);
    }
    ui::kv("Artifacts", &run.artifact_location);
}

fn state_symbol(state: RunState) -> String {
    match state {
        RunState::Passed => "✓".green().to_string(),
        RunState::Failed => "✗".red().to_string(),
        RunState::Running => "…".yellow().to_string(),
    }
}

fn format_time(run: &Run) -> String {
    run.started_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_duration(run: &Run) -> String {
    match (run.started_at, run.completed_at) {
        (Some(start), Some(end)) => {
            let millis = (end - start).num_milliseconds().max(0);
            format!("{:.1}s", millis as f64 / 1000.0)
        }
        _ => "-".to_string(),
    }
}
