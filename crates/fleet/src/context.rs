//! Pipeline context and observer trait
//!
//! The observer lets the engine report progress without depending on a
//! particular terminal UI.

use std::fmt;

use crate::error::Result;
use crate::monitor::Outcome;
use crate::provider::{CallerIdentity, Clients};
use crate::settings::Settings;

/// Step of a pipeline, reported before it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    InstallingDependencies,
    Packaging,
    EnsuringBucket(String),
    BuildingPolicy,
    DeployingRole,
    Uploading,
    Deploying,
    Waiting,
    Starting,
    Stopping,
    Removing,
    RemovingArtifacts,
    RemovingRole,
    Cleaning,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallingDependencies => write!(f, "Installing dependencies.."),
            Self::Packaging => write!(f, "Creating code archive.."),
            Self::EnsuringBucket(name) => write!(f, "Checking bucket {name}.."),
            Self::BuildingPolicy => write!(f, "Building policy.."),
            Self::DeployingRole => write!(f, "Deploying role.."),
            Self::Uploading => write!(f, "Uploading code.."),
            Self::Deploying => write!(f, "Deploying.."),
            Self::Waiting => write!(f, "Waiting.."),
            Self::Starting => write!(f, "Starting.."),
            Self::Stopping => write!(f, "Stopping.."),
            Self::Removing => write!(f, "Removing.."),
            Self::RemovingArtifacts => write!(f, "Removing runtime artifacts.."),
            Self::RemovingRole => write!(f, "Removing role.."),
            Self::Cleaning => write!(f, "Cleaning temporary resources.."),
        }
    }
}

/// Receives progress from concurrently running pipelines
pub trait Observer: Sync {
    /// Called from a pipeline thread before each step
    fn on_step(&self, monitor: &str, step: &Step);

    /// Called from the coordinating thread as each unit finishes
    fn on_unit_complete(&self, monitor: &str, result: &Result<Outcome>);
}

/// Observer that ignores everything
pub struct NoObserver;

impl Observer for NoObserver {
    fn on_step(&self, _monitor: &str, _step: &Step) {}

    fn on_unit_complete(&self, _monitor: &str, _result: &Result<Outcome>) {}
}

/// Everything a pipeline needs, shared read-only across a batch
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub clients: &'a Clients,
    pub settings: &'a Settings,
    pub caller: &'a CallerIdentity,
    pub observer: &'a dyn Observer,
}

impl<'a> Context<'a> {
    pub fn new(
        clients: &'a Clients,
        settings: &'a Settings,
        caller: &'a CallerIdentity,
        observer: &'a dyn Observer,
    ) -> Self {
        Self {
            clients,
            settings,
            caller,
            observer,
        }
    }

    pub(crate) fn step(&self, monitor: &str, step: Step) {
        log::debug!("[{monitor}] {step}");
        self.observer.on_step(monitor, &step);
    }
}
