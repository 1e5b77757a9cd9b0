use anyhow::{Result, bail};
use dialoguer::Confirm;
use fleet::bucket::{ARTIFACT_BUCKET_PREFIX, SOURCE_BUCKET_PREFIX};
use fleet::provider::StorageApi;
use fleet::{Bucket, DeployOptions, Operation};

use super::Session;
use crate::Context;
use crate::cli::DeployArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &DeployArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let monitors = session.select(ctx, &args.select)?;

    let artifact_bucket = Bucket::named_or_default(
        args.artifact_bucket
            .as_deref()
            .or(session.tool.artifact_bucket.as_deref()),
        ARTIFACT_BUCKET_PREFIX,
        &session.caller,
    );
    if !args.upload && args.source_bucket.is_some() {
        ui::warn("--source-bucket has no effect without --upload");
    }
    let source_bucket = args.upload.then(|| {
        Bucket::named_or_default(
            args.source_bucket
                .as_deref()
                .or(session.tool.source_bucket.as_deref()),
            SOURCE_BUCKET_PREFIX,
            &session.caller,
        )
    });

    for bucket in std::iter::once(&artifact_bucket).chain(source_bucket.as_ref()) {
        confirm_bucket(&session, bucket, args.yes)?;
    }

    let options = DeployOptions {
        artifact_bucket,
        source_bucket,
        build: args.build,
        start: args.start,
    };
    ui::info(&format!("Deploying {} monitors", monitors.len()));
    session
        .run_batch(&Operation::Deploy(options), &monitors)?
        .into_result()?;
    Ok(())
}

/// Ask before a missing bucket gets created
fn confirm_bucket(session: &Session, bucket: &Bucket, yes: bool) -> Result<()> {
    if yes || StorageApi::exists(session.clients.storage.as_ref(), &bucket.name)? {
        return Ok(());
    }
    let confirmed = Confirm::new()
        .with_prompt(format!("Bucket {} does not exist. Create it?", bucket.name))
        .default(true)
        .interact()?;
    if !confirmed {
        bail!("deployment cancelled, bucket {} is required", bucket.name);
    }
    Ok(())
}
