//! Monitor descriptors and remote status types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::policy::Statement;

pub const DEFAULT_RUNTIME_VERSION: &str = "syn-nodejs-puppeteer-3.1";
pub const DEFAULT_HANDLER: &str = "index.handler";
pub const DEFAULT_SCHEDULE: &str = "rate(0 hour)";

/// Script runtime family, resolved once from the runtime version string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Runtime {
    Node,
    Python,
}

impl Runtime {
    /// Resolve a runtime version such as `syn-nodejs-puppeteer-3.1`
    pub fn from_version(version: &str) -> Result<Self> {
        if version.contains("nodejs") {
            Ok(Self::Node)
        } else if version.contains("python") {
            Ok(Self::Python)
        } else {
            Err(Error::config(format!(
                "unsupported runtime version {version:?}"
            )))
        }
    }

    /// Directory inside the code archive the sources are placed under
    pub fn archive_prefix(self) -> &'static str {
        match self {
            Self::Node => "nodejs/node_modules",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "nodejs"),
            Self::Python => write!(f, "python"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub expression: String,
    /// Seconds the schedule stays active, 0 means forever
    pub duration: u64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            expression: DEFAULT_SCHEDULE.to_string(),
            duration: 0,
        }
    }
}

impl Schedule {
    /// Schedules like `rate(0 hour)` run once per start
    pub fn is_one_shot(&self) -> bool {
        self.expression.replace(' ', "").starts_with("rate(0")
    }
}

/// Retention of run data in days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub success: u32,
    pub failure: u32,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            success: 31,
            failure: 31,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpcConfig {
    pub subnets: Vec<String>,
    #[serde(rename = "securityGroups")]
    pub security_groups: Vec<String>,
}

impl VpcConfig {
    /// VPC access counts as configured only with at least one subnet
    pub fn is_configured(&self) -> bool {
        !self.subnets.is_empty()
    }
}

/// Code section of a descriptor file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeConfig {
    pub src: String,
    pub handler: String,
    pub exclude: Vec<String>,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            src: "./".to_string(),
            handler: DEFAULT_HANDLER.to_string(),
            exclude: Vec::new(),
        }
    }
}

/// Monitor descriptor as written in a config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub name: String,
    pub retention: Retention,
    pub runtime: String,
    pub tags: BTreeMap<String, String>,
    pub code: CodeConfig,
    pub env: BTreeMap<String, String>,
    pub tracing: bool,
    pub memory: u32,
    pub timeout: u32,
    pub schedule: Schedule,
    pub vpc: VpcConfig,
    pub role: String,
    pub policies: Vec<Statement>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            retention: Retention::default(),
            runtime: DEFAULT_RUNTIME_VERSION.to_string(),
            tags: BTreeMap::new(),
            code: CodeConfig::default(),
            env: BTreeMap::new(),
            tracing: false,
            memory: 1000,
            timeout: 840,
            schedule: Schedule::default(),
            vpc: VpcConfig::default(),
            role: String::new(),
            policies: Vec::new(),
        }
    }
}

/// Execution identity of a monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionIdentity {
    /// Caller supplied role, by name or ARN. Never created or deleted.
    External(String),
    /// Role and inline policy generated per monitor
    Generated,
}

/// Resolved code location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSource {
    pub src: PathBuf,
    pub handler: String,
    pub exclude: Vec<String>,
}

/// A validated monitor, ready to be reconciled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSpec {
    pub name: String,
    pub runtime: Runtime,
    pub runtime_version: String,
    pub schedule: Schedule,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    pub env: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub vpc: Option<VpcConfig>,
    pub retention: Retention,
    pub tracing: bool,
    pub identity: ExecutionIdentity,
    pub code: CodeSource,
    pub policies: Vec<Statement>,
}

impl MonitorSpec {
    /// Validate a descriptor.
    ///
    /// `fallback_name` is used when the descriptor has no name. A relative
    /// `code.src` is resolved against `base_dir`, the directory holding the
    /// descriptor file.
    pub fn from_config(
        config: MonitorConfig,
        fallback_name: &str,
        base_dir: &Path,
    ) -> Result<Self> {
        let name = if config.name.trim().is_empty() {
            fallback_name.trim().to_string()
        } else {
            config.name.trim().to_string()
        };
        if name.is_empty() {
            return Err(Error::config("monitor name is empty"));
        }
        if name.contains(char::is_whitespace) || name.contains('/') {
            return Err(Error::config(format!("invalid monitor name {name:?}")));
        }

        let runtime = Runtime::from_version(&config.runtime)?;

        let src = PathBuf::from(&config.code.src);
        let src = if src.is_absolute() {
            src
        } else {
            base_dir.join(src)
        };

        let identity = if config.role.trim().is_empty() {
            ExecutionIdentity::Generated
        } else {
            ExecutionIdentity::External(config.role.trim().to_string())
        };

        let vpc = config.vpc.is_configured().then_some(config.vpc);

        Ok(Self {
            name,
            runtime,
            runtime_version: config.runtime,
            schedule: config.schedule,
            memory_mb: config.memory,
            timeout_secs: config.timeout,
            env: config.env,
            tags: config.tags,
            vpc,
            retention: config.retention,
            tracing: config.tracing,
            identity,
            code: CodeSource {
                src,
                handler: config.code.handler,
                exclude: config.code.exclude,
            },
            policies: config.policies,
        })
    }

    pub fn has_vpc(&self) -> bool {
        self.vpc.is_some()
    }

    /// Non-empty tag values joined by `separator`
    pub fn flat_tags(&self, separator: &str) -> String {
        self.tags
            .values()
            .filter(|v| !v.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Remote lifecycle state of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    Creating,
    Ready,
    Starting,
    Running,
    Updating,
    Stopping,
    Stopped,
    Error,
    Deleting,
}

impl MonitorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Ready => "READY",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Updating => "UPDATING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Deleting => "DELETING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CREATING" => Some(Self::Creating),
            "READY" => Some(Self::Ready),
            "STARTING" => Some(Self::Starting),
            "RUNNING" => Some(Self::Running),
            "UPDATING" => Some(Self::Updating),
            "STOPPING" => Some(Self::Stopping),
            "STOPPED" => Some(Self::Stopped),
            "ERROR" => Some(Self::Error),
            "DELETING" => Some(Self::Deleting),
            _ => None,
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub reason: Option<String>,
}

impl MonitorStatus {
    pub fn new(state: MonitorState) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

/// Monitor as reported by the management API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMonitor {
    pub id: String,
    pub name: String,
    pub status: MonitorStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    Passed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Passed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// One execution of a monitor's script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub state: RunState,
    pub reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// `bucket/prefix` of the run artifacts, or `No data`
    pub artifact_location: String,
}

/// Outcome of one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Started { run: Option<Run> },
    Stopped,
    Removed,
    Built { output: String },
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Started { run: Some(run) } => write!(f, "started, last run {}", run.state),
            Self::Started { run: None } => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
            Self::Built { .. } => write!(f, "dependencies installed"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_resolution() {
        assert_eq!(Runtime::from_version("syn-nodejs-puppeteer-3.1").unwrap(), Runtime::Node);
        assert_eq!(Runtime::from_version("syn-python-selenium-1.0").unwrap(), Runtime::Python);
        assert!(matches!(
            Runtime::from_version("syn-ruby-1.0"),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_archive_prefix() {
        assert_eq!(Runtime::Node.archive_prefix(), "nodejs/node_modules");
        assert_eq!(Runtime::Python.archive_prefix(), "python");
    }

    #[test]
    fn test_defaults() {
        let spec =
            MonitorSpec::from_config(MonitorConfig::default(), "home", Path::new("/srv/mon"))
                .unwrap();
        assert_eq!(spec.name, "home");
        assert_eq!(spec.runtime, Runtime::Node);
        assert_eq!(spec.runtime_version, DEFAULT_RUNTIME_VERSION);
        assert_eq!(spec.memory_mb, 1000);
        assert_eq!(spec.timeout_secs, 840);
        assert_eq!(spec.retention, Retention { success: 31, failure: 31 });
        assert_eq!(spec.schedule.expression, "rate(0 hour)");
        assert!(spec.schedule.is_one_shot());
        assert_eq!(spec.code.handler, "index.handler");
        assert_eq!(spec.code.src, Path::new("/srv/mon/./"));
        assert_eq!(spec.identity, ExecutionIdentity::Generated);
        assert!(!spec.has_vpc());
    }

    #[test]
    fn test_relative_src_resolves_against_descriptor_dir() {
        let config = MonitorConfig {
            name: "api".into(),
            code: CodeConfig {
                src: "src".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let spec = MonitorSpec::from_config(config, "ignored", Path::new("/work/api")).unwrap();
        assert_eq!(spec.name, "api");
        assert_eq!(spec.code.src, Path::new("/work/api/src"));
    }

    #[test]
    fn test_absolute_src_kept() {
        let config = MonitorConfig {
            code: CodeConfig {
                src: "/opt/code".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let spec = MonitorSpec::from_config(config, "x", Path::new("/work")).unwrap();
        assert_eq!(spec.code.src, Path::new("/opt/code"));
    }

    #[test]
    fn test_external_role_and_vpc() {
        let config = MonitorConfig {
            role: "arn:aws:iam::1:role/custom".into(),
            vpc: VpcConfig {
                subnets: vec!["subnet-1".into()],
                security_groups: vec!["sg-1".into()],
            },
            ..Default::default()
        };
        let spec = MonitorSpec::from_config(config, "x", Path::new(".")).unwrap();
        assert_eq!(
            spec.identity,
            ExecutionIdentity::External("arn:aws:iam::1:role/custom".into())
        );
        assert!(spec.has_vpc());
    }

    #[test]
    fn test_vpc_without_subnets_not_configured() {
        let config = MonitorConfig {
            vpc: VpcConfig {
                subnets: vec![],
                security_groups: vec!["sg-1".into()],
            },
            ..Default::default()
        };
        let spec = MonitorSpec::from_config(config, "x", Path::new(".")).unwrap();
        assert!(!spec.has_vpc());
    }

    #[test]
    fn test_invalid_names() {
        assert!(MonitorSpec::from_config(MonitorConfig::default(), "", Path::new(".")).is_err());
        let config = MonitorConfig {
            name: "has space".into(),
            ..Default::default()
        };
        assert!(MonitorSpec::from_config(config, "x", Path::new(".")).is_err());
    }

    #[test]
    fn test_flat_tags_skips_empty_values() {
        let mut config = MonitorConfig::default();
        config.tags.insert("env".into(), "prod".into());
        config.tags.insert("empty".into(), String::new());
        config.tags.insert("team".into(), "web".into());
        let spec = MonitorSpec::from_config(config, "x", Path::new(".")).unwrap();
        assert_eq!(spec.flat_tags(", "), "prod, web");
    }

    #[test]
    fn test_descriptor_field_names() {
        let json = r#"{
            "name": "web",
            "runtime": "syn-python-selenium-1.0",
            "retention": {"failure": 7},
            "code": {"src": "code", "exclude": ["*.md"]},
            "schedule": {"expression": "rate(5 minutes)", "duration": 60},
            "vpc": {"subnets": ["s-1"], "securityGroups": ["sg-1"]},
            "policies": [{"Effect": "Allow", "Action": ["s3:GetObject"], "Resource": ["*"]}]
        }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.retention.failure, 7);
        assert_eq!(config.retention.success, 31);
        assert_eq!(config.code.handler, "index.handler");
        assert_eq!(config.code.exclude, vec!["*.md"]);
        assert_eq!(config.schedule.duration, 60);
        assert_eq!(config.vpc.security_groups, vec!["sg-1"]);
        assert_eq!(config.policies.len(), 1);
        assert_eq!(config.memory, 1000);
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            MonitorState::Creating,
            MonitorState::Ready,
            MonitorState::Running,
            MonitorState::Deleting,
        ] {
            assert_eq!(MonitorState::parse(state.as_str()), Some(state));
        }
        assert_eq!(MonitorState::parse("nope"), None);
        assert_eq!(
            serde_json::to_string(&MonitorState::Stopped).unwrap(),
            "\"STOPPED\""
        );
    }
}
