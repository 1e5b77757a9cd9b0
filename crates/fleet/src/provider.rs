//! External collaborator contracts
//!
//! The engine never talks to a cloud SDK directly. Each remote service is a
//! trait; a [`Clients`] bundle of trait objects is built once per
//! invocation and passed by reference into every pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ProviderResult;
use crate::monitor::{RemoteMonitor, Retention, Run, Schedule, VpcConfig};

/// Where the monitor code comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeLocation {
    /// Zip archive bytes sent inline
    Inline(Vec<u8>),
    /// Archive previously uploaded to a bucket
    Stored { bucket: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeInput {
    pub handler: String,
    pub location: CodeLocation,
}

/// Run settings of a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub tracing: bool,
    pub env: BTreeMap<String, String>,
    pub memory_mb: u32,
    pub timeout_secs: u32,
}

/// Create/update payload for the management API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRequest {
    pub name: String,
    pub artifact_location: String,
    pub execution_role_arn: String,
    pub retention: Retention,
    pub run_config: RunConfig,
    pub runtime_version: String,
    pub schedule: Schedule,
    pub code: CodeInput,
    pub vpc: Option<VpcConfig>,
    /// Applied on create only; updates converge tags separately
    pub tags: BTreeMap<String, String>,
}

/// Account and region the clients operate in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account_id: String,
    pub region: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAccessBlock {
    pub block_public_acls: bool,
    pub block_public_policy: bool,
    pub ignore_public_acls: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlock {
    pub fn all_blocked() -> Self {
        Self {
            block_public_acls: true,
            block_public_policy: true,
            ignore_public_acls: true,
            restrict_public_buckets: true,
        }
    }
}

/// One page of an object listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Continuation token, `None` on the last page
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub name: String,
    pub arn: String,
}

/// Monitor management API
pub trait MonitorApi: Send + Sync {
    /// Current monitor, `None` when it does not exist
    fn describe(&self, name: &str) -> ProviderResult<Option<RemoteMonitor>>;

    fn create(&self, request: &MonitorRequest) -> ProviderResult<()>;

    fn update(&self, request: &MonitorRequest) -> ProviderResult<()>;

    fn delete(&self, name: &str) -> ProviderResult<()>;

    fn start(&self, name: &str) -> ProviderResult<()>;

    fn stop(&self, name: &str) -> ProviderResult<()>;

    /// Runs of a monitor, most recent first
    fn list_runs(&self, name: &str) -> ProviderResult<Vec<Run>>;

    fn list_tags(&self, name: &str) -> ProviderResult<BTreeMap<String, String>>;

    fn tag(&self, name: &str, tags: &BTreeMap<String, String>) -> ProviderResult<()>;

    fn untag(&self, name: &str, keys: &[String]) -> ProviderResult<()>;
}

/// Function runtime API, for artifacts the platform generates per monitor
pub trait RuntimeApi: Send + Sync {
    fn list_layer_versions(&self, layer: &str) -> ProviderResult<Vec<u64>>;

    fn delete_layer_version(&self, layer: &str, version: u64) -> ProviderResult<()>;

    fn delete_function(&self, function: &str) -> ProviderResult<()>;
}

/// Object storage API
pub trait StorageApi: Send + Sync {
    fn exists(&self, bucket: &str) -> ProviderResult<bool>;

    fn create(&self, bucket: &str) -> ProviderResult<()>;

    fn put_public_access_block(&self, bucket: &str, block: PublicAccessBlock) -> ProviderResult<()>;

    fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&str>,
    ) -> ProviderResult<ObjectPage>;

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> ProviderResult<()>;

    fn delete(&self, bucket: &str) -> ProviderResult<()>;

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> ProviderResult<()>;

    fn get_object(&self, bucket: &str, key: &str) -> ProviderResult<Vec<u8>>;
}

/// Identity and access API
pub trait IdentityApi: Send + Sync {
    fn caller(&self) -> ProviderResult<CallerIdentity>;

    fn get_role(&self, name: &str) -> ProviderResult<Option<RoleInfo>>;

    fn create_role(&self, name: &str, trust_policy: &str) -> ProviderResult<RoleInfo>;

    fn delete_role(&self, name: &str) -> ProviderResult<()>;

    /// Attach or replace an inline policy
    fn put_role_policy(&self, role: &str, policy: &str, document: &str) -> ProviderResult<()>;

    fn get_role_policy(&self, role: &str, policy: &str) -> ProviderResult<Option<String>>;

    fn delete_role_policy(&self, role: &str, policy: &str) -> ProviderResult<()>;
}

/// Explicit bundle of API clients
#[derive(Clone)]
pub struct Clients {
    pub monitors: Arc<dyn MonitorApi>,
    pub runtime: Arc<dyn RuntimeApi>,
    pub storage: Arc<dyn StorageApi>,
    pub identity: Arc<dyn IdentityApi>,
}

impl Clients {
    /// Bundle a single platform implementing every API
    pub fn from_platform<P>(platform: &Arc<P>) -> Self
    where
        P: MonitorApi + RuntimeApi + StorageApi + IdentityApi + 'static,
    {
        Self {
            monitors: platform.clone(),
            runtime: platform.clone(),
            storage: platform.clone(),
            identity: platform.clone(),
        }
    }
}

impl std::fmt::Debug for Clients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clients").finish_non_exhaustive()
    }
}
