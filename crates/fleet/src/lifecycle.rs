//! Monitor lifecycle operations
//!
//! Each operation is one sequential pipeline for a single monitor:
//!
//! - **deploy**: package code, ensure buckets and role, create or update,
//!   wait until stable, optionally start
//! - **start**: start unless running, wait for the run, report its result
//! - **stop**: stop unless already stopped, wait until stopped
//! - **remove**: stop if running, delete, wait until gone, clean up the
//!   platform artifacts and the generated role
//!
//! Start and stop are idempotent: a monitor already in the requested state
//! is skipped without any mutating call.

use std::collections::BTreeMap;
use std::thread;

use crate::bucket::Bucket;
use crate::build;
use crate::context::{Context, Step};
use crate::error::{Error, ProviderResultExt, Result};
use crate::monitor::{
    ExecutionIdentity, MonitorSpec, MonitorState, MonitorStatus, Outcome, RunState,
};
use crate::package::CodeArchive;
use crate::policy::{PolicyBuilder, PolicyContext};
use crate::poller::Poller;
use crate::provider::{CodeInput, CodeLocation, MonitorRequest, RunConfig};
use crate::role::Role;
use crate::runs;

/// Options of the deploy operation, shared by every monitor of a batch
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub artifact_bucket: Bucket,
    /// Upload code here instead of sending it inline
    pub source_bucket: Option<Bucket>,
    /// Install code dependencies before packaging
    pub build: bool,
    /// Start the monitor once deployed
    pub start: bool,
}

impl DeployOptions {
    pub fn new(artifact_bucket: Bucket) -> Self {
        Self {
            artifact_bucket,
            source_bucket: None,
            build: false,
            start: false,
        }
    }
}

pub fn deploy(ctx: &Context<'_>, spec: &MonitorSpec, options: &DeployOptions) -> Result<Outcome> {
    let name = spec.name.as_str();

    if options.build {
        ctx.step(name, Step::InstallingDependencies);
        build::install_dependencies(&spec.code, spec.runtime)?;
    }

    ctx.step(name, Step::Packaging);
    let archive = CodeArchive::create(&ctx.settings.archive_dir, name, &spec.code, spec.runtime)?;

    let result = deploy_archive(ctx, spec, options, &archive);

    ctx.step(name, Step::Cleaning);
    drop(archive);

    let outcome = result?;
    if options.start {
        start(ctx, spec)?;
    }
    Ok(outcome)
}

fn deploy_archive(
    ctx: &Context<'_>,
    spec: &MonitorSpec,
    options: &DeployOptions,
    archive: &CodeArchive,
) -> Result<Outcome> {
    let name = spec.name.as_str();
    let storage = ctx.clients.storage.as_ref();
    let monitors = ctx.clients.monitors.as_ref();

    ctx.step(name, Step::EnsuringBucket(options.artifact_bucket.name.clone()));
    options.artifact_bucket.ensure(storage)?;
    if let Some(source) = &options.source_bucket {
        ctx.step(name, Step::EnsuringBucket(source.name.clone()));
        source.ensure(storage)?;
    }

    let role = ensure_identity(ctx, spec, &options.artifact_bucket)?;

    let location = match &options.source_bucket {
        Some(source) => {
            ctx.step(name, Step::Uploading);
            let key = format!("{}/{}", ctx.caller.region, archive.file_name());
            storage
                .put_object(&source.name, &key, &archive.read()?)
                .during(|| format!("upload {key} to {}", source.name))?;
            CodeLocation::Stored {
                bucket: source.name.clone(),
                key,
            }
        }
        None => CodeLocation::Inline(archive.read()?),
    };

    let request = monitor_request(
        spec,
        role.arn,
        options.artifact_bucket.artifact_location(name),
        location,
    );

    ctx.step(name, Step::Deploying);
    let existing = monitors
        .describe(name)
        .during(|| format!("get monitor {name}"))?;
    let outcome = if existing.is_some() {
        monitors
            .update(&request)
            .during(|| format!("update monitor {name}"))?;
        sync_tags(ctx, spec)?;
        Outcome::Updated
    } else {
        monitors
            .create(&request)
            .during(|| format!("create monitor {name}"))?;
        Outcome::Created
    };

    ctx.step(name, Step::Waiting);
    Poller::new(monitors, &ctx.settings.poll).wait_until_stable(
        name,
        &[MonitorState::Creating, MonitorState::Updating],
        Some(MonitorState::Error),
    )?;

    log::info!("[{name}] {outcome}");
    Ok(outcome)
}

/// Resolve the execution role, creating the generated one with its policy
fn ensure_identity(
    ctx: &Context<'_>,
    spec: &MonitorSpec,
    artifact_bucket: &Bucket,
) -> Result<Role> {
    let name = spec.name.as_str();
    match &spec.identity {
        ExecutionIdentity::External(role) => Ok(Role::external(role, ctx.caller)),
        ExecutionIdentity::Generated => {
            ctx.step(name, Step::BuildingPolicy);
            let document = PolicyBuilder::new(PolicyContext {
                artifact_bucket: artifact_bucket.name.clone(),
                region: ctx.caller.region.clone(),
                account_id: ctx.caller.account_id.clone(),
                vpc: spec.has_vpc(),
            })
            .build(&spec.policies);

            ctx.step(name, Step::DeployingRole);
            let mut role = Role::generated(name, ctx.caller);
            role.ensure(
                ctx.clients.identity.as_ref(),
                Some(&document),
                ctx.settings.role_settle,
            )?;
            Ok(role)
        }
    }
}

pub fn monitor_request(
    spec: &MonitorSpec,
    execution_role_arn: String,
    artifact_location: String,
    location: CodeLocation,
) -> MonitorRequest {
    MonitorRequest {
        name: spec.name.clone(),
        artifact_location,
        execution_role_arn,
        retention: spec.retention,
        run_config: RunConfig {
            tracing: spec.tracing,
            env: spec.env.clone(),
            memory_mb: spec.memory_mb,
            timeout_secs: spec.timeout_secs,
        },
        runtime_version: spec.runtime_version.clone(),
        schedule: spec.schedule.clone(),
        code: CodeInput {
            handler: spec.code.handler.clone(),
            location,
        },
        vpc: spec.vpc.clone(),
        tags: spec.tags.clone(),
    }
}

/// Add missing or changed tags and drop stale ones
fn sync_tags(ctx: &Context<'_>, spec: &MonitorSpec) -> Result<()> {
    let name = spec.name.as_str();
    let monitors = ctx.clients.monitors.as_ref();
    let current = monitors
        .list_tags(name)
        .during(|| format!("list tags of {name}"))?;

    let to_add: BTreeMap<String, String> = spec
        .tags
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !to_add.is_empty() {
        monitors
            .tag(name, &to_add)
            .during(|| format!("tag monitor {name}"))?;
    }

    let to_remove: Vec<String> = current
        .keys()
        .filter(|key| !spec.tags.contains_key(*key))
        .cloned()
        .collect();
    if !to_remove.is_empty() {
        monitors
            .untag(name, &to_remove)
            .during(|| format!("untag monitor {name}"))?;
    }
    Ok(())
}

fn current_status(ctx: &Context<'_>, name: &str) -> Result<MonitorStatus> {
    ctx.clients
        .monitors
        .describe(name)
        .during(|| format!("get monitor {name}"))?
        .map(|remote| remote.status)
        .ok_or_else(|| Error::NotDeployed {
            monitor: name.to_string(),
        })
}

pub fn start(ctx: &Context<'_>, spec: &MonitorSpec) -> Result<Outcome> {
    let name = spec.name.as_str();
    let monitors = ctx.clients.monitors.as_ref();

    let status = current_status(ctx, name)?;
    if status.state == MonitorState::Running {
        return Ok(Outcome::Skipped {
            reason: "already running".to_string(),
        });
    }

    ctx.step(name, Step::Starting);
    monitors
        .start(name)
        .during(|| format!("start monitor {name}"))?;

    ctx.step(name, Step::Waiting);
    Poller::new(monitors, &ctx.settings.poll).wait_until_stable(
        name,
        &[MonitorState::Starting, MonitorState::Running],
        Some(MonitorState::Error),
    )?;

    if !ctx.settings.run_settle.is_zero() {
        thread::sleep(ctx.settings.run_settle);
    }

    let run = runs::latest_run(monitors, name)?;
    if let Some(run) = &run
        && run.state == RunState::Failed
    {
        return Err(Error::TerminalState {
            monitor: name.to_string(),
            state: run.state.to_string(),
            reason: run.reason.clone().unwrap_or_default(),
        });
    }
    Ok(Outcome::Started { run })
}

pub fn stop(ctx: &Context<'_>, spec: &MonitorSpec) -> Result<Outcome> {
    let name = spec.name.as_str();
    let monitors = ctx.clients.monitors.as_ref();

    let status = current_status(ctx, name)?;
    if matches!(
        status.state,
        MonitorState::Stopped | MonitorState::Ready | MonitorState::Error
    ) {
        return Ok(Outcome::Skipped {
            reason: format!("not running ({})", status.state),
        });
    }

    ctx.step(name, Step::Stopping);
    monitors
        .stop(name)
        .during(|| format!("stop monitor {name}"))?;

    ctx.step(name, Step::Waiting);
    Poller::new(monitors, &ctx.settings.poll).wait_for(
        name,
        MonitorState::Stopped,
        Some(MonitorState::Error),
    )?;
    Ok(Outcome::Stopped)
}

pub fn remove(ctx: &Context<'_>, spec: &MonitorSpec) -> Result<Outcome> {
    let name = spec.name.as_str();
    let monitors = ctx.clients.monitors.as_ref();
    let mut removed = false;

    let remote = monitors
        .describe(name)
        .during(|| format!("get monitor {name}"))?;
    if let Some(remote) = remote {
        if matches!(
            remote.status.state,
            MonitorState::Starting | MonitorState::Running
        ) {
            stop(ctx, spec)?;
        }

        ctx.step(name, Step::Removing);
        monitors
            .delete(name)
            .during(|| format!("delete monitor {name}"))?;

        ctx.step(name, Step::Waiting);
        Poller::new(monitors, &ctx.settings.poll).wait_until_absent(name)?;

        ctx.step(name, Step::RemovingArtifacts);
        remove_runtime_artifacts(ctx, name, &remote.id)?;
        removed = true;
    }

    if spec.identity == ExecutionIdentity::Generated {
        ctx.step(name, Step::RemovingRole);
        removed |= Role::generated(name, ctx.caller).remove(ctx.clients.identity.as_ref())?;
    }

    if removed {
        Ok(Outcome::Removed)
    } else {
        Ok(Outcome::Skipped {
            reason: "not deployed".to_string(),
        })
    }
}

/// Delete the layer versions and function the platform generated for a monitor
fn remove_runtime_artifacts(ctx: &Context<'_>, name: &str, id: &str) -> Result<()> {
    let runtime = ctx.clients.runtime.as_ref();
    let generated = format!("cwsyn-{name}-{id}");

    let versions = match runtime.list_layer_versions(&generated) {
        Ok(versions) => versions,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(Error::provider(format!("list layer versions of {generated}"), e)),
    };
    for version in versions {
        match runtime.delete_layer_version(&generated, version) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(Error::provider(
                    format!("delete layer {generated} version {version}"),
                    e,
                ));
            }
        }
    }

    match runtime.delete_function(&generated) {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(Error::provider(format!("delete function {generated}"), e)),
    }
}
