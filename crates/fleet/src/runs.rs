//! Run history and run logs

use std::path::Path;

use crate::error::{Error, ProviderResultExt, Result};
use crate::monitor::Run;
use crate::provider::{MonitorApi, StorageApi};

/// Artifact location reported for runs that produced nothing
pub const NO_DATA: &str = "No data";

/// Runs of a monitor, most recent first
pub fn list_runs(monitors: &dyn MonitorApi, name: &str) -> Result<Vec<Run>> {
    monitors
        .list_runs(name)
        .during(|| format!("list runs of {name}"))
}

pub fn latest_run(monitors: &dyn MonitorApi, name: &str) -> Result<Option<Run>> {
    Ok(list_runs(monitors, name)?.into_iter().next())
}

/// Split `s3://bucket/prefix` or `bucket/prefix` into bucket and prefix
pub fn split_location(location: &str) -> (&str, &str) {
    let location = location.strip_prefix("s3://").unwrap_or(location);
    match location.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix),
        None => (location, ""),
    }
}

/// Text log of a run, read from its artifact location
pub fn fetch_run_log(storage: &dyn StorageApi, run: &Run) -> Result<String> {
    if run.artifact_location == NO_DATA {
        return Ok(NO_DATA.to_string());
    }

    let (bucket, prefix) = split_location(&run.artifact_location);
    let missing = || Error::MissingLog {
        location: format!("s3://{}", run.artifact_location.trim_start_matches("s3://")),
    };
    if bucket.is_empty() {
        return Err(missing());
    }

    let mut token: Option<String> = None;
    let key = loop {
        let page = storage
            .list_objects(bucket, Some(prefix), token.as_deref())
            .during(|| format!("list artifacts in {bucket}"))?;
        if let Some(key) = page
            .keys
            .into_iter()
            .find(|k| Path::new(k).extension().is_some_and(|ext| ext == "txt"))
        {
            break key;
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => return Err(missing()),
        }
    };

    let body = storage
        .get_object(bucket, &key)
        .during(|| format!("get {bucket}/{key}"))?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}
