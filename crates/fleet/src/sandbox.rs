//! In-process emulation of the remote platform
//!
//! [`SandboxPlatform`] implements every collaborator API on one in-memory
//! state guarded by a mutex. Remote asynchrony is emulated by counting
//! status queries: after a mutation the monitor stays in its transient
//! state until it has been described `settle_polls` times.
//!
//! The state can be persisted to a JSON file so consecutive invocations see
//! the same platform. Faults are injected per operation and target, and
//! every call is journaled.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{ProviderError, ProviderResult, Result};
use crate::monitor::{MonitorState, MonitorStatus, RemoteMonitor, Run, RunState, Schedule};
use crate::provider::{
    CallerIdentity, CodeLocation, IdentityApi, MonitorApi, MonitorRequest, ObjectPage,
    PublicAccessBlock, RoleInfo, RuntimeApi, StorageApi,
};
use crate::runs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub account_id: String,
    pub region: String,
    /// Status queries a transient state lasts
    pub settle_polls: u32,
    /// Status queries a run lasts once the monitor is running
    pub run_polls: u32,
    /// Maximum keys per object listing page
    pub page_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            account_id: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            settle_polls: 2,
            run_polls: 2,
            page_size: 1000,
        }
    }
}

/// API operation, as recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    DescribeMonitor,
    CreateMonitor,
    UpdateMonitor,
    DeleteMonitor,
    StartMonitor,
    StopMonitor,
    ListRuns,
    ListTags,
    TagMonitor,
    UntagMonitor,
    ListLayerVersions,
    DeleteLayerVersion,
    DeleteFunction,
    BucketExists,
    CreateBucket,
    PutPublicAccessBlock,
    ListObjects,
    DeleteObjects,
    DeleteBucket,
    PutObject,
    GetObject,
    GetCaller,
    GetRole,
    CreateRole,
    DeleteRole,
    PutRolePolicy,
    GetRolePolicy,
    DeleteRolePolicy,
}

impl Op {
    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            Self::DescribeMonitor
                | Self::ListRuns
                | Self::ListTags
                | Self::ListLayerVersions
                | Self::BucketExists
                | Self::ListObjects
                | Self::GetObject
                | Self::GetCaller
                | Self::GetRole
                | Self::GetRolePolicy
        )
    }
}

/// One journaled call; `target` is the monitor, bucket, role or layer name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail every `op` call on `target` with `message`
    Fail {
        op: Op,
        target: String,
        message: String,
    },
    /// Create and update of `monitor` converge to ERROR with `reason`
    DeployError { monitor: String, reason: String },
    /// Runs of `monitor` fail with `reason`
    RunFailure { monitor: String, reason: String },
    /// `monitor` never leaves its current state
    Stall { monitor: String },
}

impl Fault {
    pub fn fail(op: Op, target: &str, message: &str) -> Self {
        Self::Fail {
            op,
            target: target.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Transition {
    /// `None` removes the monitor
    to: Option<MonitorState>,
    reason: Option<String>,
    after: u32,
    #[serde(default)]
    completes_run: bool,
}

impl Transition {
    fn to(state: MonitorState, after: u32) -> Self {
        Self {
            to: Some(state),
            reason: None,
            after,
            completes_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MonitorRecord {
    id: String,
    status: MonitorStatus,
    #[serde(default)]
    pending: VecDeque<Transition>,
    execution_role_arn: String,
    artifact_location: String,
    code_location: String,
    runtime_version: String,
    schedule: Schedule,
    handler: String,
    tags: BTreeMap<String, String>,
    /// Most recent first
    runs: Vec<Run>,
}

impl MonitorRecord {
    fn seeded(id: String, state: MonitorState) -> Self {
        Self {
            id,
            status: MonitorStatus::new(state),
            pending: VecDeque::new(),
            execution_role_arn: String::new(),
            artifact_location: String::new(),
            code_location: String::new(),
            runtime_version: String::new(),
            schedule: Schedule::default(),
            handler: String::new(),
            tags: BTreeMap::new(),
            runs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BucketRecord {
    public_access_block: Option<PublicAccessBlock>,
    objects: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RoleRecord {
    arn: String,
    trust_policy: String,
    policies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct PlatformState {
    next_id: u64,
    monitors: BTreeMap<String, MonitorRecord>,
    buckets: BTreeMap<String, BucketRecord>,
    roles: BTreeMap<String, RoleRecord>,
    layers: BTreeMap<String, Vec<u64>>,
    functions: BTreeSet<String>,
}

impl PlatformState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
struct Inner {
    state: PlatformState,
    faults: Vec<Fault>,
    journal: Vec<Call>,
}

impl Inner {
    fn deploy_error(&self, monitor: &str) -> Option<String> {
        self.faults.iter().find_map(|f| match f {
            Fault::DeployError { monitor: m, reason } if m == monitor => Some(reason.clone()),
            _ => None,
        })
    }

    fn run_failure(&self, monitor: &str) -> Option<String> {
        self.faults.iter().find_map(|f| match f {
            Fault::RunFailure { monitor: m, reason } if m == monitor => Some(reason.clone()),
            _ => None,
        })
    }

    fn stalled(&self, monitor: &str) -> bool {
        self.faults
            .iter()
            .any(|f| matches!(f, Fault::Stall { monitor: m } if m == monitor))
    }
}

pub struct SandboxPlatform {
    config: SandboxConfig,
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl SandboxPlatform {
    /// Empty platform kept in memory only
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            path: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Platform backed by a state file, loaded when it exists
    pub fn open(path: &Path, config: SandboxConfig) -> Result<Self> {
        let state = if path.exists() {
            let content = fs::read_to_string(path)?;
            log::debug!("loaded sandbox state from {}", path.display());
            serde_json::from_str(&content)?
        } else {
            PlatformState::default()
        };
        Ok(Self {
            config,
            path: Some(path.to_path_buf()),
            inner: Mutex::new(Inner {
                state,
                ..Inner::default()
            }),
        })
    }

    /// Write the state file, if any
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.lock().state)?;
        fs::write(path, content)?;
        log::debug!("saved sandbox state to {}", path.display());
        Ok(())
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().journal.clone()
    }

    pub fn calls_for(&self, target: &str) -> Vec<Call> {
        self.lock()
            .journal
            .iter()
            .filter(|c| c.target == target)
            .cloned()
            .collect()
    }

    pub fn mutating_calls(&self, target: &str) -> Vec<Call> {
        self.calls_for(target)
            .into_iter()
            .filter(|c| c.op.is_mutating())
            .collect()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.lock().journal.iter().map(|c| c.op).collect()
    }

    pub fn ops_for(&self, target: &str) -> Vec<Op> {
        self.calls_for(target).into_iter().map(|c| c.op).collect()
    }

    pub fn describe_count(&self, monitor: &str) -> usize {
        self.ops_for(monitor)
            .into_iter()
            .filter(|op| *op == Op::DescribeMonitor)
            .count()
    }

    /// Insert a monitor in a given state with nothing pending
    pub fn seed_monitor(&self, name: &str, state: MonitorState) {
        let mut inner = self.lock();
        let id = format_id(inner.state.next_id());
        inner
            .state
            .monitors
            .insert(name.to_string(), MonitorRecord::seeded(id, state));
    }

    /// Queue a transition applied after `settle_polls` status queries
    pub fn converge_to(&self, name: &str, state: MonitorState, reason: Option<String>) {
        let after = self.config.settle_polls;
        if let Some(record) = self.lock().state.monitors.get_mut(name) {
            record.pending.push_back(Transition {
                to: Some(state),
                reason,
                after,
                completes_run: false,
            });
        }
    }

    /// Set the state immediately, dropping anything pending
    pub fn force_state(&self, name: &str, state: MonitorState) {
        if let Some(record) = self.lock().state.monitors.get_mut(name) {
            record.status = MonitorStatus::new(state);
            record.pending.clear();
        }
    }

    /// Current state without counting as a status query
    pub fn peek_state(&self, name: &str) -> Option<MonitorState> {
        self.lock().state.monitors.get(name).map(|r| r.status.state)
    }

    pub fn monitor_names(&self) -> Vec<String> {
        self.lock().state.monitors.keys().cloned().collect()
    }

    pub fn monitor_role_arn(&self, name: &str) -> Option<String> {
        self.with_monitor(name, |r| r.execution_role_arn.clone())
    }

    pub fn monitor_artifact_location(&self, name: &str) -> Option<String> {
        self.with_monitor(name, |r| r.artifact_location.clone())
    }

    pub fn monitor_code_location(&self, name: &str) -> Option<String> {
        self.with_monitor(name, |r| r.code_location.clone())
    }

    /// Name of the layer and function generated for a deployed monitor
    pub fn generated_layer(&self, name: &str) -> Option<String> {
        self.with_monitor(name, |r| generated_name(name, &r.id))
    }

    pub fn layer_versions(&self, layer: &str) -> Vec<u64> {
        self.lock()
            .state
            .layers
            .get(layer)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_function(&self, function: &str) -> bool {
        self.lock().state.functions.contains(function)
    }

    pub fn seed_bucket(&self, bucket: &str) {
        self.lock()
            .state
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    pub fn public_access_block(&self, bucket: &str) -> Option<PublicAccessBlock> {
        self.lock()
            .state
            .buckets
            .get(bucket)
            .and_then(|b| b.public_access_block)
    }

    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .state
            .buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn role_policy(&self, role: &str, policy: &str) -> Option<String> {
        self.lock()
            .state
            .roles
            .get(role)
            .and_then(|r| r.policies.get(policy).cloned())
    }

    fn with_monitor<T>(&self, name: &str, f: impl FnOnce(&MonitorRecord) -> T) -> Option<T> {
        self.lock().state.monitors.get(name).map(f)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal a call and apply any matching failure fault
    fn enter(&self, op: Op, target: &str) -> ProviderResult<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        log::trace!("sandbox {op:?} {target}");
        inner.journal.push(Call {
            op,
            target: target.to_string(),
        });
        let fault = inner.faults.iter().find_map(|f| match f {
            Fault::Fail {
                op: o,
                target: t,
                message,
            } if *o == op && t == target => Some(message.clone()),
            _ => None,
        });
        match fault {
            Some(message) => Err(ProviderError::other(message)),
            None => Ok(inner),
        }
    }

    fn deploy_transition(&self, inner: &Inner, name: &str) -> Transition {
        let mut transition = Transition::to(MonitorState::Ready, self.config.settle_polls);
        if let Some(reason) = inner.deploy_error(name) {
            transition.to = Some(MonitorState::Error);
            transition.reason = Some(reason);
        }
        transition
    }
}

fn format_id(n: u64) -> String {
    format!("{n:08x}-5a4d-4b0c-8e1f-{n:012x}")
}

fn generated_name(monitor: &str, id: &str) -> String {
    format!("cwsyn-{monitor}-{id}")
}

fn not_found(kind: &str, name: &str) -> ProviderError {
    ProviderError::not_found(format!("ResourceNotFoundException: {kind} {name} not found"))
}

fn conflict(name: &str, state: MonitorState, action: &str) -> ProviderError {
    ProviderError::other(format!(
        "ConflictException: cannot {action} canary {name} in state {state}"
    ))
}

fn describe_code(location: &CodeLocation) -> String {
    match location {
        CodeLocation::Inline(bytes) => format!("inline ({} bytes)", bytes.len()),
        CodeLocation::Stored { bucket, key } => format!("{bucket}/{key}"),
    }
}

/// Advance the pending transitions of a monitor by one status query.
/// Returns `false` when the monitor was removed.
fn advance(
    name: &str,
    record: &mut MonitorRecord,
    buckets: &mut BTreeMap<String, BucketRecord>,
    run_failure: Option<String>,
    run_polls: u32,
) -> bool {
    let Some(front) = record.pending.front_mut() else {
        return true;
    };
    front.after = front.after.saturating_sub(1);
    if front.after > 0 {
        return true;
    }
    let Some(transition) = record.pending.pop_front() else {
        return true;
    };
    let Some(state) = transition.to else {
        return false;
    };
    record.status = MonitorStatus {
        state,
        reason: transition.reason,
    };

    if transition.completes_run {
        complete_run(name, record, buckets, run_failure);
        if !record.schedule.is_one_shot() {
            begin_run(record);
            record.pending.push_back(Transition {
                to: Some(MonitorState::Running),
                reason: None,
                after: run_polls,
                completes_run: true,
            });
        }
    }
    true
}

fn begin_run(record: &mut MonitorRecord) {
    let id = format!("{}-run-{}", record.id, record.runs.len() + 1);
    let base = record
        .artifact_location
        .trim_start_matches("s3://")
        .trim_end_matches('/');
    let artifact_location = if base.is_empty() {
        runs::NO_DATA.to_string()
    } else {
        format!("{base}/{id}")
    };
    record.runs.insert(
        0,
        Run {
            id,
            state: RunState::Running,
            reason: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            artifact_location,
        },
    );
}

fn complete_run(
    name: &str,
    record: &mut MonitorRecord,
    buckets: &mut BTreeMap<String, BucketRecord>,
    failure: Option<String>,
) {
    let Some(run) = record.runs.first_mut() else {
        return;
    };
    if run.state != RunState::Running {
        return;
    }
    let now = Utc::now();
    run.completed_at = Some(now);
    match failure {
        Some(reason) => {
            run.state = RunState::Failed;
            run.reason = Some(reason);
        }
        None => run.state = RunState::Passed,
    }

    let (bucket, prefix) = runs::split_location(&run.artifact_location);
    if let Some(bucket) = buckets.get_mut(bucket) {
        let started = run.started_at.unwrap_or(now);
        let mut log = format!(
            "{} INFO: Start canary {name}\n{} INFO: Run {} {}\n",
            started.to_rfc3339(),
            now.to_rfc3339(),
            run.id,
            run.state
        );
        if let Some(reason) = &run.reason {
            log.push_str(&format!("{} ERROR: {reason}\n", now.to_rfc3339()));
        }
        bucket
            .objects
            .insert(format!("{prefix}/log.txt"), log.into_bytes());
    }
}

impl MonitorApi for SandboxPlatform {
    fn describe(&self, name: &str) -> ProviderResult<Option<RemoteMonitor>> {
        let mut guard = self.enter(Op::DescribeMonitor, name)?;
        let stalled = guard.stalled(name);
        let run_failure = guard.run_failure(name);
        let run_polls = self.config.run_polls;

        let PlatformState {
            monitors, buckets, ..
        } = &mut guard.state;
        let Some(record) = monitors.get_mut(name) else {
            return Ok(None);
        };
        if !stalled && !advance(name, record, buckets, run_failure, run_polls) {
            monitors.remove(name);
            return Ok(None);
        }
        Ok(Some(RemoteMonitor {
            id: record.id.clone(),
            name: name.to_string(),
            status: record.status.clone(),
        }))
    }

    fn create(&self, request: &MonitorRequest) -> ProviderResult<()> {
        let name = request.name.as_str();
        let mut guard = self.enter(Op::CreateMonitor, name)?;
        if guard.state.monitors.contains_key(name) {
            return Err(ProviderError::already_exists(format!(
                "ConflictException: canary {name} already exists"
            )));
        }
        if !request.artifact_location.starts_with("s3://") {
            return Err(ProviderError::other(format!(
                "ValidationException: invalid artifact location {}",
                request.artifact_location
            )));
        }
        if let CodeLocation::Stored { bucket, key } = &request.code.location {
            let stored = guard
                .state
                .buckets
                .get(bucket)
                .is_some_and(|b| b.objects.contains_key(key));
            if !stored {
                return Err(ProviderError::other(format!(
                    "ValidationException: code object {bucket}/{key} not found"
                )));
            }
        }

        let transition = self.deploy_transition(&guard, name);
        let id = format_id(guard.state.next_id());
        let generated = generated_name(name, &id);
        let mut record = MonitorRecord::seeded(id, MonitorState::Creating);
        record.pending.push_back(transition);
        record.execution_role_arn = request.execution_role_arn.clone();
        record.artifact_location = request.artifact_location.clone();
        record.code_location = describe_code(&request.code.location);
        record.runtime_version = request.runtime_version.clone();
        record.schedule = request.schedule.clone();
        record.handler = request.code.handler.clone();
        record.tags = request.tags.clone();

        guard.state.monitors.insert(name.to_string(), record);
        guard.state.layers.insert(generated.clone(), vec![1]);
        guard.state.functions.insert(generated);
        Ok(())
    }

    fn update(&self, request: &MonitorRequest) -> ProviderResult<()> {
        let name = request.name.as_str();
        let mut guard = self.enter(Op::UpdateMonitor, name)?;
        let transition = self.deploy_transition(&guard, name);
        let inner = &mut *guard;

        let Some(record) = inner.state.monitors.get_mut(name) else {
            return Err(not_found("canary", name));
        };
        if matches!(
            record.status.state,
            MonitorState::Creating
                | MonitorState::Updating
                | MonitorState::Starting
                | MonitorState::Stopping
                | MonitorState::Deleting
        ) {
            return Err(conflict(name, record.status.state, "update"));
        }

        record.status = MonitorStatus::new(MonitorState::Updating);
        record.pending.clear();
        record.pending.push_back(transition);
        record.execution_role_arn = request.execution_role_arn.clone();
        record.code_location = describe_code(&request.code.location);
        record.runtime_version = request.runtime_version.clone();
        record.schedule = request.schedule.clone();
        record.handler = request.code.handler.clone();

        let generated = generated_name(name, &record.id);
        let versions = inner.state.layers.entry(generated).or_default();
        let next = versions.iter().max().copied().unwrap_or(0) + 1;
        versions.push(next);
        Ok(())
    }

    fn delete(&self, name: &str) -> ProviderResult<()> {
        let after = self.config.settle_polls;
        let mut guard = self.enter(Op::DeleteMonitor, name)?;
        let Some(record) = guard.state.monitors.get_mut(name) else {
            return Err(not_found("canary", name));
        };
        if !matches!(
            record.status.state,
            MonitorState::Ready | MonitorState::Stopped | MonitorState::Error
        ) {
            return Err(conflict(name, record.status.state, "delete"));
        }
        record.status = MonitorStatus::new(MonitorState::Deleting);
        record.pending.clear();
        record.pending.push_back(Transition {
            to: None,
            reason: None,
            after,
            completes_run: false,
        });
        Ok(())
    }

    fn start(&self, name: &str) -> ProviderResult<()> {
        let settle = self.config.settle_polls;
        let run_polls = self.config.run_polls;
        let mut guard = self.enter(Op::StartMonitor, name)?;
        let Some(record) = guard.state.monitors.get_mut(name) else {
            return Err(not_found("canary", name));
        };
        if !matches!(
            record.status.state,
            MonitorState::Ready | MonitorState::Stopped | MonitorState::Error
        ) {
            return Err(conflict(name, record.status.state, "start"));
        }

        begin_run(record);
        let after_run = if record.schedule.is_one_shot() {
            MonitorState::Stopped
        } else {
            MonitorState::Running
        };
        record.status = MonitorStatus::new(MonitorState::Starting);
        record.pending.clear();
        record
            .pending
            .push_back(Transition::to(MonitorState::Running, settle));
        record.pending.push_back(Transition {
            to: Some(after_run),
            reason: None,
            after: run_polls,
            completes_run: true,
        });
        Ok(())
    }

    fn stop(&self, name: &str) -> ProviderResult<()> {
        let settle = self.config.settle_polls;
        let mut guard = self.enter(Op::StopMonitor, name)?;
        let Some(record) = guard.state.monitors.get_mut(name) else {
            return Err(not_found("canary", name));
        };
        if !matches!(
            record.status.state,
            MonitorState::Running | MonitorState::Starting
        ) {
            return Err(conflict(name, record.status.state, "stop"));
        }

        if let Some(run) = record.runs.first_mut()
            && run.state == RunState::Running
        {
            run.state = RunState::Failed;
            run.reason = Some("Canary stopped before the run completed".to_string());
            run.completed_at = Some(Utc::now());
        }
        record.status = MonitorStatus::new(MonitorState::Stopping);
        record.pending.clear();
        record
            .pending
            .push_back(Transition::to(MonitorState::Stopped, settle));
        Ok(())
    }

    fn list_runs(&self, name: &str) -> ProviderResult<Vec<Run>> {
        let guard = self.enter(Op::ListRuns, name)?;
        guard
            .state
            .monitors
            .get(name)
            .map(|r| r.runs.clone())
            .ok_or_else(|| not_found("canary", name))
    }

    fn list_tags(&self, name: &str) -> ProviderResult<BTreeMap<String, String>> {
        let guard = self.enter(Op::ListTags, name)?;
        guard
            .state
            .monitors
            .get(name)
            .map(|r| r.tags.clone())
            .ok_or_else(|| not_found("canary", name))
    }

    fn tag(&self, name: &str, tags: &BTreeMap<String, String>) -> ProviderResult<()> {
        let mut guard = self.enter(Op::TagMonitor, name)?;
        let record = guard
            .state
            .monitors
            .get_mut(name)
            .ok_or_else(|| not_found("canary", name))?;
        record
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn untag(&self, name: &str, keys: &[String]) -> ProviderResult<()> {
        let mut guard = self.enter(Op::UntagMonitor, name)?;
        let record = guard
            .state
            .monitors
            .get_mut(name)
            .ok_or_else(|| not_found("canary", name))?;
        for key in keys {
            record.tags.remove(key);
        }
        Ok(())
    }
}

impl RuntimeApi for SandboxPlatform {
    fn list_layer_versions(&self, layer: &str) -> ProviderResult<Vec<u64>> {
        let guard = self.enter(Op::ListLayerVersions, layer)?;
        guard
            .state
            .layers
            .get(layer)
            .cloned()
            .ok_or_else(|| not_found("layer", layer))
    }

    fn delete_layer_version(&self, layer: &str, version: u64) -> ProviderResult<()> {
        let mut guard = self.enter(Op::DeleteLayerVersion, layer)?;
        let versions = guard
            .state
            .layers
            .get_mut(layer)
            .ok_or_else(|| not_found("layer", layer))?;
        let before = versions.len();
        versions.retain(|v| *v != version);
        if versions.len() == before {
            return Err(not_found("layer version", &format!("{layer}:{version}")));
        }
        if versions.is_empty() {
            guard.state.layers.remove(layer);
        }
        Ok(())
    }

    fn delete_function(&self, function: &str) -> ProviderResult<()> {
        let mut guard = self.enter(Op::DeleteFunction, function)?;
        if guard.state.functions.remove(function) {
            Ok(())
        } else {
            Err(not_found("function", function))
        }
    }
}

impl StorageApi for SandboxPlatform {
    fn exists(&self, bucket: &str) -> ProviderResult<bool> {
        let guard = self.enter(Op::BucketExists, bucket)?;
        Ok(guard.state.buckets.contains_key(bucket))
    }

    fn create(&self, bucket: &str) -> ProviderResult<()> {
        let mut guard = self.enter(Op::CreateBucket, bucket)?;
        if guard.state.buckets.contains_key(bucket) {
            return Err(ProviderError::already_exists(format!(
                "BucketAlreadyOwnedByYou: {bucket}"
            )));
        }
        guard
            .state
            .buckets
            .insert(bucket.to_string(), BucketRecord::default());
        Ok(())
    }

    fn put_public_access_block(
        &self,
        bucket: &str,
        block: PublicAccessBlock,
    ) -> ProviderResult<()> {
        let mut guard = self.enter(Op::PutPublicAccessBlock, bucket)?;
        let record = guard
            .state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| not_found("bucket", bucket))?;
        record.public_access_block = Some(block);
        Ok(())
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&str>,
    ) -> ProviderResult<ObjectPage> {
        let guard = self.enter(Op::ListObjects, bucket)?;
        let record = guard
            .state
            .buckets
            .get(bucket)
            .ok_or_else(|| not_found("bucket", bucket))?;

        let prefix = prefix.unwrap_or_default();
        let mut matching = record
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| token.is_none_or(|t| k.as_str() > t));
        let keys: Vec<String> = matching
            .by_ref()
            .take(self.config.page_size.max(1))
            .cloned()
            .collect();
        let next_token = if matching.next().is_some() {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ObjectPage { keys, next_token })
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> ProviderResult<()> {
        let mut guard = self.enter(Op::DeleteObjects, bucket)?;
        let record = guard
            .state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| not_found("bucket", bucket))?;
        for key in keys {
            record.objects.remove(key);
        }
        Ok(())
    }

    fn delete(&self, bucket: &str) -> ProviderResult<()> {
        let mut guard = self.enter(Op::DeleteBucket, bucket)?;
        let record = guard
            .state
            .buckets
            .get(bucket)
            .ok_or_else(|| not_found("bucket", bucket))?;
        if !record.objects.is_empty() {
            return Err(ProviderError::other(format!(
                "BucketNotEmpty: bucket {bucket} is not empty"
            )));
        }
        guard.state.buckets.remove(bucket);
        Ok(())
    }

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> ProviderResult<()> {
        let mut guard = self.enter(Op::PutObject, bucket)?;
        let record = guard
            .state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| not_found("bucket", bucket))?;
        record.objects.insert(key.to_string(), body.to_vec());
        Ok(())
    }

    fn get_object(&self, bucket: &str, key: &str) -> ProviderResult<Vec<u8>> {
        let guard = self.enter(Op::GetObject, bucket)?;
        guard
            .state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key).cloned())
            .ok_or_else(|| not_found("object", &format!("{bucket}/{key}")))
    }
}

impl IdentityApi for SandboxPlatform {
    fn caller(&self) -> ProviderResult<CallerIdentity> {
        let _guard = self.enter(Op::GetCaller, "")?;
        Ok(CallerIdentity {
            account_id: self.config.account_id.clone(),
            region: self.config.region.clone(),
        })
    }

    fn get_role(&self, name: &str) -> ProviderResult<Option<RoleInfo>> {
        let guard = self.enter(Op::GetRole, name)?;
        Ok(guard.state.roles.get(name).map(|r| RoleInfo {
            name: name.to_string(),
            arn: r.arn.clone(),
        }))
    }

    fn create_role(&self, name: &str, trust_policy: &str) -> ProviderResult<RoleInfo> {
        let arn = format!("arn:aws:iam::{}:role/{name}", self.config.account_id);
        let mut guard = self.enter(Op::CreateRole, name)?;
        if guard.state.roles.contains_key(name) {
            return Err(ProviderError::already_exists(format!(
                "EntityAlreadyExists: role {name} already exists"
            )));
        }
        guard.state.roles.insert(
            name.to_string(),
            RoleRecord {
                arn: arn.clone(),
                trust_policy: trust_policy.to_string(),
                policies: BTreeMap::new(),
            },
        );
        Ok(RoleInfo {
            name: name.to_string(),
            arn,
        })
    }

    fn delete_role(&self, name: &str) -> ProviderResult<()> {
        let mut guard = self.enter(Op::DeleteRole, name)?;
        let record = guard
            .state
            .roles
            .get(name)
            .ok_or_else(|| not_found("role", name))?;
        if !record.policies.is_empty() {
            return Err(ProviderError::other(format!(
                "DeleteConflict: role {name} still has inline policies"
            )));
        }
        guard.state.roles.remove(name);
        Ok(())
    }

    fn put_role_policy(&self, role: &str, policy: &str, document: &str) -> ProviderResult<()> {
        let mut guard = self.enter(Op::PutRolePolicy, role)?;
        let record = guard
            .state
            .roles
            .get_mut(role)
            .ok_or_else(|| not_found("role", role))?;
        record
            .policies
            .insert(policy.to_string(), document.to_string());
        Ok(())
    }

    fn get_role_policy(&self, role: &str, policy: &str) -> ProviderResult<Option<String>> {
        let guard = self.enter(Op::GetRolePolicy, role)?;
        let record = guard
            .state
            .roles
            .get(role)
            .ok_or_else(|| not_found("role", role))?;
        Ok(record.policies.get(policy).cloned())
    }

    fn delete_role_policy(&self, role: &str, policy: &str) -> ProviderResult<()> {
        let mut guard = self.enter(Op::DeleteRolePolicy, role)?;
        let record = guard
            .state
            .roles
            .get_mut(role)
            .ok_or_else(|| not_found("role", role))?;
        record
            .policies
            .remove(policy)
            .map(|_| ())
            .ok_or_else(|| not_found("policy", policy))
    }
}
