//! Monitor and run selection.

use anyhow::{Result, bail};
use colored::Colorize;
use dialoguer::{MultiSelect, Select};
use fleet::pattern;
use fleet::{MonitorSpec, Run};

use crate::cli::SelectArgs;

/// Result of applying the selection flags
#[derive(Debug)]
pub enum Selection {
    /// Decided by the flags alone
    Chosen(Vec<MonitorSpec>),
    /// Several candidates left for the user to pick from
    Prompt(Vec<MonitorSpec>),
}

pub fn preselect(specs: Vec<MonitorSpec>, args: &SelectArgs) -> Result<Selection> {
    if specs.is_empty() {
        bail!("no monitors found");
    }

    if !args.names.is_empty() {
        let patterns = pattern::compile_all(&args.names)?;
        let matched: Vec<_> = specs
            .into_iter()
            .filter(|s| pattern::any_match(&patterns, &s.name))
            .collect();
        if matched.is_empty() {
            bail!("no monitor matches {}", args.names.join(", "));
        }
        return Ok(Selection::Chosen(matched));
    }

    if args.all || specs.len() == 1 {
        Ok(Selection::Chosen(specs))
    } else {
        Ok(Selection::Prompt(specs))
    }
}

/// Label shown for a monitor in prompts
fn label(spec: &MonitorSpec) -> String {
    let tags = spec.flat_tags(", ");
    if tags.is_empty() {
        spec.name.clone()
    } else {
        format!("{}  {}", spec.name, tags.dimmed())
    }
}

/// Monitors to operate on, prompting when the flags leave a choice
pub fn monitors(specs: Vec<MonitorSpec>, args: &SelectArgs) -> Result<Vec<MonitorSpec>> {
    let candidates = match preselect(specs, args)? {
        Selection::Chosen(selected) => return Ok(selected),
        Selection::Prompt(candidates) => candidates,
    };

    let items: Vec<String> = candidates.iter().map(label).collect();
    let picked = MultiSelect::new()
        .with_prompt("Select monitors (space to toggle, enter to confirm)")
        .items(&items)
        .interact()?;
    if picked.is_empty() {
        bail!("no monitors selected");
    }

    Ok(candidates
        .into_iter()
        .enumerate()
        .filter(|(i, _)| picked.contains(i))
        .map(|(_, spec)| spec)
        .collect())
}

/// One monitor, prompting when the flags leave a choice
pub fn monitor(specs: Vec<MonitorSpec>, args: &SelectArgs) -> Result<MonitorSpec> {
    let mut candidates = match preselect(specs, args)? {
        Selection::Chosen(selected) | Selection::Prompt(selected) => selected,
    };
    if candidates.len() == 1 {
        return Ok(candidates.swap_remove(0));
    }

    let items: Vec<String> = candidates.iter().map(label).collect();
    let index = Select::new()
        .with_prompt("Select a monitor")
        .items(&items)
        .default(0)
        .interact()?;
    Ok(candidates.swap_remove(index))
}

/// Run to inspect: the latest one, or one picked interactively
pub fn run(runs: &[Run], last: bool) -> Result<&Run> {
    let Some(latest) = runs.first() else {
        bail!("monitor has no runs yet");
    };
    if last || runs.len() == 1 {
        return Ok(latest);
    }

    let items: Vec<String> = runs
        .iter()
        .map(|r| {
            let started = r
                .started_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            format!("{started}  {}  {}", r.state, r.id)
        })
        .collect();
    let index = Select::new()
        .with_prompt("Select a run")
        .items(&items)
        .default(0)
        .interact()?;
    Ok(&runs[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet::MonitorConfig;
    use std::path::Path;

    fn spec(name: &str) -> MonitorSpec {
        MonitorSpec::from_config(MonitorConfig::default(), name, Path::new(".")).unwrap()
    }

    fn names(selection: Selection) -> (bool, Vec<String>) {
        match selection {
            Selection::Chosen(s) => (true, s.into_iter().map(|s| s.name).collect()),
            Selection::Prompt(s) => (false, s.into_iter().map(|s| s.name).collect()),
        }
    }

    #[test]
    fn test_single_monitor_auto_selected() {
        let (chosen, picked) = names(preselect(vec![spec("web")], &SelectArgs::default()).unwrap());
        assert!(chosen);
        assert_eq!(picked, vec!["web"]);
    }

    #[test]
    fn test_patterns_filter() {
        let args = SelectArgs {
            names: vec!["api-*".into(), "web".into()],
            ..SelectArgs::default()
        };
        let specs = vec![spec("api-a"), spec("api-b"), spec("web"), spec("website")];
        let (chosen, picked) = names(preselect(specs, &args).unwrap());
        assert!(chosen);
        assert_eq!(picked, vec!["api-a", "api-b", "web"]);
    }

    #[test]
    fn test_pattern_without_match_is_error() {
        let args = SelectArgs {
            names: vec!["nope-*".into()],
            ..SelectArgs::default()
        };
        assert!(preselect(vec![spec("web")], &args).is_err());
    }

    #[test]
    fn test_several_without_flags_prompts() {
        let specs = vec![spec("a"), spec("b")];
        let (chosen, _) = names(preselect(specs.clone(), &SelectArgs::default()).unwrap());
        assert!(!chosen);

        let all = SelectArgs {
            all: true,
            ..SelectArgs::default()
        };
        let (chosen, picked) = names(preselect(specs, &all).unwrap());
        assert!(chosen);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_last_run_needs_no_prompt() {
        assert!(run(&[], true).is_err());
    }
}
