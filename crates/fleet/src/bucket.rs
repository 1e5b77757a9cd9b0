//! Storage buckets for run artifacts and uploaded code

use crate::error::{ProviderResultExt, Result};
use crate::provider::{CallerIdentity, PublicAccessBlock, StorageApi};

pub const ARTIFACT_BUCKET_PREFIX: &str = "cw-syn-results";
pub const SOURCE_BUCKET_PREFIX: &str = "cw-syn-sources";

/// Result of an idempotent ensure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Existing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    /// `s3://{name}`
    pub location: String,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let location = format!("s3://{name}");
        Self { name, location }
    }

    /// `{prefix}-{account}-{region}`
    pub fn default_name(prefix: &str, caller: &CallerIdentity) -> String {
        format!("{prefix}-{}-{}", caller.account_id, caller.region)
    }

    /// Named bucket, or the default one for `prefix` when no name is given
    pub fn named_or_default(name: Option<&str>, prefix: &str, caller: &CallerIdentity) -> Self {
        match name.filter(|n| !n.trim().is_empty()) {
            Some(name) => Self::new(name.trim()),
            None => Self::new(Self::default_name(prefix, caller)),
        }
    }

    /// Artifact location of a monitor inside this bucket
    pub fn artifact_location(&self, monitor: &str) -> String {
        format!("{}/canary/{monitor}", self.location)
    }

    /// Create the bucket unless it exists.
    ///
    /// A new bucket gets all public access blocked right away. An existing
    /// bucket, including one created concurrently by another pipeline, is
    /// left untouched.
    pub fn ensure(&self, storage: &dyn StorageApi) -> Result<EnsureOutcome> {
        let object = || format!("bucket {}", self.name);

        if storage.exists(&self.name).deploying(object)? {
            log::debug!("bucket {} already exists", self.name);
            return Ok(EnsureOutcome::Existing);
        }

        match storage.create(&self.name) {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                log::debug!("bucket {} created concurrently", self.name);
                return Ok(EnsureOutcome::Existing);
            }
            Err(e) => return Err(crate::Error::dependency(object(), e)),
        }

        storage
            .put_public_access_block(&self.name, PublicAccessBlock::all_blocked())
            .deploying(object)?;

        log::info!("created bucket {}", self.name);
        Ok(EnsureOutcome::Created)
    }

    /// Delete every object, page by page. Returns the number of deleted objects.
    pub fn empty(&self, storage: &dyn StorageApi) -> Result<usize> {
        if !storage
            .exists(&self.name)
            .during(|| format!("check bucket {}", self.name))?
        {
            return Ok(0);
        }

        let mut deleted = 0;
        let mut token: Option<String> = None;
        loop {
            let page = storage
                .list_objects(&self.name, None, token.as_deref())
                .during(|| format!("list objects in {}", self.name))?;

            if !page.keys.is_empty() {
                storage
                    .delete_objects(&self.name, &page.keys)
                    .during(|| format!("delete objects in {}", self.name))?;
                deleted += page.keys.len();
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        log::debug!("deleted {deleted} objects from {}", self.name);
        Ok(deleted)
    }

    /// Delete the bucket. Returns `false` when it did not exist.
    pub fn remove(&self, storage: &dyn StorageApi) -> Result<bool> {
        if !storage
            .exists(&self.name)
            .during(|| format!("check bucket {}", self.name))?
        {
            return Ok(false);
        }
        storage
            .delete(&self.name)
            .during(|| format!("delete bucket {}", self.name))?;
        Ok(true)
    }
}
