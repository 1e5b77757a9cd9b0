//! # Fleet
//!
//! Concurrent reconciliation of a fleet of scheduled monitors.
//!
//! This crate takes a selection of monitors and one operation, runs an
//! independent pipeline per monitor in parallel, polls each remote monitor
//! until it settles and aggregates the per-monitor results into a batch.
//!
//! ## Core Concepts
//!
//! - **MonitorSpec**: A validated monitor descriptor
//! - **Clients**: The collaborator APIs a pipeline talks to
//! - **Poller**: Waits for a remote monitor to leave its transient states
//! - **Operation**: Deploy, Start, Stop, Remove or Build, applied per monitor
//! - **BatchReport**: One result per monitor, in completion order
//!
//! ## Example
//!
//! ```ignore
//! use fleet::{
//!     Bucket, Clients, Context, DeployOptions, NoObserver, Operation,
//!     SandboxConfig, SandboxPlatform, Settings, executor,
//! };
//! use std::sync::Arc;
//!
//! let platform = Arc::new(SandboxPlatform::new(SandboxConfig::default()));
//! let clients = Clients::from_platform(&platform);
//! let caller = clients.identity.caller()?;
//! let settings = Settings::default();
//! let ctx = Context::new(&clients, &settings, &caller, &NoObserver);
//!
//! let bucket = Bucket::named_or_default(None, fleet::bucket::ARTIFACT_BUCKET_PREFIX, &caller);
//! let deploy = Operation::Deploy(DeployOptions::new(bucket));
//! let report = executor::execute(&ctx, &deploy, &monitors)?;
//! println!("{} deployed", report.succeeded());
//! ```

pub mod bucket;
pub mod build;
pub mod context;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod monitor;
pub mod package;
pub mod pattern;
pub mod policy;
pub mod poller;
pub mod provider;
pub mod role;
pub mod runs;
pub mod sandbox;
pub mod settings;

pub use bucket::Bucket;
pub use context::{Context, NoObserver, Observer, Step};
pub use error::{Error, ErrorCategory, ProviderError, Result};
pub use executor::{BatchReport, Operation, WorkUnit};
pub use lifecycle::DeployOptions;
pub use monitor::{
    ExecutionIdentity, MonitorConfig, MonitorSpec, MonitorState, Outcome, Run, RunState, Runtime,
};
pub use pattern::Pattern;
pub use poller::PollConfig;
pub use provider::{CallerIdentity, Clients};
pub use role::Role;
pub use sandbox::{SandboxConfig, SandboxPlatform};
pub use settings::Settings;

#[cfg(test)]
pub(crate) mod testing {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::context::{Context, NoObserver, Observer};
    use crate::monitor::{CodeConfig, MonitorConfig, MonitorSpec, MonitorState};
    use crate::provider::{CallerIdentity, Clients, IdentityApi};
    use crate::sandbox::{SandboxConfig, SandboxPlatform};
    use crate::settings::Settings;

    /// Sandbox platform with zero delays and a code directory to deploy
    pub struct Harness {
        pub platform: Arc<SandboxPlatform>,
        pub clients: Clients,
        pub settings: Settings,
        pub caller: CallerIdentity,
        archive_dir: TempDir,
        code_dir: TempDir,
    }

    impl Harness {
        pub fn new() -> Self {
            let platform = Arc::new(SandboxPlatform::new(SandboxConfig::default()));
            let clients = Clients::from_platform(&platform);
            let caller = platform.caller().unwrap();

            let archive_dir = TempDir::new().unwrap();
            let code_dir = TempDir::new().unwrap();
            fs::write(
                code_dir.path().join("index.js"),
                "exports.handler = async () => 'ok';\n",
            )
            .unwrap();

            Self {
                settings: Settings::immediate(archive_dir.path()),
                platform,
                clients,
                caller,
                archive_dir,
                code_dir,
            }
        }

        pub fn context(&self) -> Context<'_> {
            self.context_with(&NoObserver)
        }

        pub fn context_with<'a>(&'a self, observer: &'a dyn Observer) -> Context<'a> {
            Context::new(&self.clients, &self.settings, &self.caller, observer)
        }

        pub fn code_dir(&self) -> &Path {
            self.code_dir.path()
        }

        /// State without counting as a status query
        pub fn state_of(&self, name: &str) -> Option<MonitorState> {
            self.platform.peek_state(name)
        }

        pub fn archive_dir_is_empty(&self) -> bool {
            fs::read_dir(self.archive_dir.path())
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(true)
        }
    }

    /// Monitor with default settings whose code lives in `code_dir`
    pub fn monitor(name: &str, code_dir: &Path) -> MonitorSpec {
        let config = MonitorConfig {
            name: name.to_string(),
            code: CodeConfig {
                src: code_dir.display().to_string(),
                ..CodeConfig::default()
            },
            ..MonitorConfig::default()
        };
        MonitorSpec::from_config(config, name, code_dir).unwrap()
    }
}
