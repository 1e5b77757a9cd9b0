//! Batch executor - runs one pipeline per monitor concurrently
//!
//! Every selected monitor gets its own scoped thread. Each pipeline sends
//! exactly one [`WorkUnit`] over a channel sized to the batch, so no send
//! ever blocks; the coordinating thread receives all of them, reporting
//! each one to the observer as it arrives.

use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use crate::build;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::lifecycle::{self, DeployOptions};
use crate::monitor::{MonitorSpec, Outcome};

/// Operation applied to every monitor of a batch
#[derive(Debug, Clone)]
pub enum Operation {
    Deploy(DeployOptions),
    Start,
    Stop,
    Remove,
    /// Install code dependencies only
    Build,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deploy(_) => "deploy",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "remove",
            Self::Build => "build",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one pipeline
#[derive(Debug)]
pub struct WorkUnit {
    pub monitor: String,
    pub result: Result<Outcome>,
}

/// All units of a batch, in completion order
#[derive(Debug)]
pub struct BatchReport {
    pub operation: String,
    pub units: Vec<WorkUnit>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.units.len()
    }

    pub fn failed(&self) -> usize {
        self.units.iter().filter(|u| u.result.is_err()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.total() - self.failed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Outcome of a monitor, if it succeeded
    pub fn outcome(&self, monitor: &str) -> Option<&Outcome> {
        self.units
            .iter()
            .find(|u| u.monitor == monitor)
            .and_then(|u| u.result.as_ref().ok())
    }

    /// Turn any failure into one aggregate error
    pub fn into_result(self) -> Result<Self> {
        let failed = self.failed();
        if failed == 0 {
            Ok(self)
        } else {
            Err(Error::PartialBatchFailure {
                failed,
                total: self.total(),
                operation: self.operation,
            })
        }
    }
}

/// Run `operation` on every monitor and collect one unit per monitor.
///
/// Fails before spawning anything on an empty selection or duplicate names.
pub fn run(
    ctx: &Context<'_>,
    operation: &Operation,
    monitors: &[MonitorSpec],
) -> Result<BatchReport> {
    if monitors.is_empty() {
        return Err(Error::config("no monitors selected"));
    }
    let mut seen = HashSet::new();
    for spec in monitors {
        if !seen.insert(spec.name.as_str()) {
            return Err(Error::config(format!(
                "monitor {} selected more than once",
                spec.name
            )));
        }
    }

    let total = monitors.len();
    log::info!("running {operation} on {total} monitors");

    let (tx, rx) = mpsc::sync_channel::<WorkUnit>(total);
    let mut units = Vec::with_capacity(total);

    thread::scope(|scope| {
        for spec in monitors {
            let unit_tx = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{operation}-{}", spec.name))
                .spawn_scoped(scope, move || {
                    let result = run_pipeline(ctx, operation, spec);
                    // Capacity equals the batch size, so this never blocks
                    let _ = unit_tx.send(WorkUnit {
                        monitor: spec.name.clone(),
                        result,
                    });
                });
            if let Err(e) = spawned {
                let _ = tx.send(WorkUnit {
                    monitor: spec.name.clone(),
                    result: Err(Error::Io(e)),
                });
            }
        }
        drop(tx);

        while units.len() < total {
            let Ok(unit) = rx.recv() else { break };
            if let Err(err) = &unit.result {
                log::debug!("[{}] {operation} failed: {err}", unit.monitor);
            }
            ctx.observer.on_unit_complete(&unit.monitor, &unit.result);
            units.push(unit);
        }
    });

    Ok(BatchReport {
        operation: operation.name().to_string(),
        units,
    })
}

/// Run the batch and fold failures into [`Error::PartialBatchFailure`]
pub fn execute(
    ctx: &Context<'_>,
    operation: &Operation,
    monitors: &[MonitorSpec],
) -> Result<BatchReport> {
    run(ctx, operation, monitors)?.into_result()
}

fn run_pipeline(ctx: &Context<'_>, operation: &Operation, spec: &MonitorSpec) -> Result<Outcome> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match operation {
        Operation::Deploy(options) => lifecycle::deploy(ctx, spec, options),
        Operation::Start => lifecycle::start(ctx, spec),
        Operation::Stop => lifecycle::stop(ctx, spec),
        Operation::Remove => lifecycle::remove(ctx, spec),
        Operation::Build => build::install_dependencies(&spec.code, spec.runtime)
            .map(|output| Outcome::Built { output }),
    }));

    outcome.unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(Error::Other(format!("{operation} pipeline panicked: {message}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::Bucket;
    use crate::context::{Observer, Step};
    use crate::monitor::MonitorState;
    use crate::role::Role;
    use crate::sandbox::{Fault, Op};
    use crate::testing::{Harness, monitor};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        steps: Mutex<Vec<(String, Step)>>,
        completed: Mutex<Vec<(String, bool)>>,
    }

    impl Observer for Recorder {
        fn on_step(&self, monitor: &str, step: &Step) {
            self.steps.lock().unwrap().push((monitor.to_string(), step.clone()));
        }

        fn on_unit_complete(&self, monitor: &str, result: &Result<Outcome>) {
            self.completed
                .lock()
                .unwrap()
                .push((monitor.to_string(), result.is_ok()));
        }
    }

    fn deploy_op() -> Operation {
        Operation::Deploy(DeployOptions::new(Bucket::new("artifacts")))
    }

    #[test]
    fn test_empty_selection_is_configuration_error() {
        let harness = Harness::new();
        let err = run(&harness.context(), &Operation::Start, &[]).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(harness.platform.ops().is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let harness = Harness::new();
        let specs = vec![
            monitor("a", harness.code_dir()),
            monitor("a", harness.code_dir()),
        ];
        let err = run(&harness.context(), &Operation::Start, &specs).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(harness.platform.ops().is_empty());
    }

    #[test]
    fn test_one_unit_per_monitor() {
        let harness = Harness::new();
        let specs: Vec<_> = (0..6)
            .map(|i| monitor(&format!("m{i}"), harness.code_dir()))
            .collect();

        let report = execute(&harness.context(), &deploy_op(), &specs).unwrap();
        assert_eq!(report.total(), 6);
        assert_eq!(report.failed(), 0);
        for spec in &specs {
            assert_eq!(report.outcome(&spec.name), Some(&Outcome::Created));
            assert_eq!(harness.state_of(&spec.name), Some(MonitorState::Ready));
        }
        // Concurrent ensures of the shared bucket all succeed
        assert!(harness.platform.public_access_block("artifacts").is_some());
    }

    #[test]
    fn test_partial_failure_reports_each_unit() {
        let harness = Harness::new();
        let failing_role = Role::generated("b", &harness.caller).name;
        harness
            .platform
            .inject(Fault::fail(Op::CreateRole, &failing_role, "AccessDenied"));
        let specs = vec![
            monitor("a", harness.code_dir()),
            monitor("b", harness.code_dir()),
            monitor("c", harness.code_dir()),
        ];
        let recorder = Recorder::default();

        let report = run(&harness.context_with(&recorder), &deploy_op(), &specs).unwrap();
        assert_eq!(report.total(), 3);
        assert_eq!(report.failed(), 1);
        let failed = report.units.iter().find(|u| u.result.is_err()).unwrap();
        assert_eq!(failed.monitor, "b");
        assert!(matches!(failed.result, Err(Error::Dependency { .. })));

        let completed = recorder.completed.lock().unwrap().clone();
        assert_eq!(completed.len(), 3);
        assert!(completed.contains(&("b".to_string(), false)));

        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("1 of 3"));

        assert_eq!(harness.state_of("a"), Some(MonitorState::Ready));
        assert_eq!(harness.state_of("c"), Some(MonitorState::Ready));
        assert_eq!(harness.state_of("b"), None);
        assert!(harness.archive_dir_is_empty());
    }

    #[test]
    fn test_execute_aggregates_failures() {
        let harness = Harness::new();
        let specs = vec![monitor("x", harness.code_dir()), monitor("y", harness.code_dir())];
        // Neither is deployed, so both starts fail
        let err = execute(&harness.context(), &Operation::Start, &specs).unwrap_err();
        assert_eq!(err.to_string(), "2 of 2 monitors failed start");
    }

    #[test]
    fn test_steps_reported_per_monitor() {
        let harness = Harness::new();
        let specs = vec![monitor("a", harness.code_dir()), monitor("b", harness.code_dir())];
        let recorder = Recorder::default();
        execute(&harness.context_with(&recorder), &deploy_op(), &specs).unwrap();

        let steps = recorder.steps.lock().unwrap();
        for name in ["a", "b"] {
            let mine: Vec<&Step> = steps
                .iter()
                .filter(|(m, _)| m == name)
                .map(|(_, s)| s)
                .collect();
            assert_eq!(mine.first(), Some(&&Step::Packaging));
            assert!(mine.contains(&&Step::DeployingRole));
            assert!(mine.contains(&&Step::Waiting));
            assert_eq!(mine.last(), Some(&&Step::Cleaning));
        }
    }

    #[test]
    fn test_panicking_pipeline_still_reports() {
        struct Panicking;
        impl Observer for Panicking {
            fn on_step(&self, monitor: &str, _step: &Step) {
                assert_ne!(monitor, "boom", "observer exploded");
            }
            fn on_unit_complete(&self, _monitor: &str, _result: &Result<Outcome>) {}
        }

        let harness = Harness::new();
        let specs = vec![monitor("ok", harness.code_dir()), monitor("boom", harness.code_dir())];
        let report = run(&harness.context_with(&Panicking), &deploy_op(), &specs).unwrap();
        assert_eq!(report.total(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.outcome("ok").is_some());
    }

    #[test]
    fn test_build_operation() {
        let harness = Harness::new();
        let specs = vec![monitor("a", harness.code_dir())];
        let report = execute(&harness.context(), &Operation::Build, &specs).unwrap();
        assert_eq!(
            report.outcome("a"),
            Some(&Outcome::Built {
                output: String::new()
            })
        );
    }
}
