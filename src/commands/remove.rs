use anyhow::{Result, bail};
use dialoguer::Confirm;
use fleet::bucket::{ARTIFACT_BUCKET_PREFIX, SOURCE_BUCKET_PREFIX};
use fleet::{Bucket, Operation};

use super::Session;
use crate::Context;
use crate::cli::RemoveArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &RemoveArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let monitors = session.select(ctx, &args.select)?;

    if !args.yes {
        ui::header("Monitors to remove");
        for spec in &monitors {
            ui::dim(&spec.name);
        }
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove {} monitors?", monitors.len()))
            .default(false)
            .interact()?;
        if !confirmed {
            bail!("removal cancelled");
        }
    }

    session
        .run_batch(&Operation::Remove, &monitors)?
        .into_result()?;

    // Shared buckets are torn down only after the whole batch
    if args.delete_artifact_bucket {
        let bucket = Bucket::named_or_default(
            args.artifact_bucket
                .as_deref()
                .or(session.tool.artifact_bucket.as_deref()),
            ARTIFACT_BUCKET_PREFIX,
            &session.caller,
        );
        delete_bucket(&session, &bucket)?;
    }
    if args.delete_source_bucket {
        let bucket = Bucket::named_or_default(
            args.source_bucket
                .as_deref()
                .or(session.tool.source_bucket.as_deref()),
            SOURCE_BUCKET_PREFIX,
            &session.caller,
        );
        delete_bucket(&session, &bucket)?;
    }
    session.save()
}

fn delete_bucket(session: &Session, bucket: &Bucket) -> Result<()> {
    let storage = session.clients.storage.as_ref();
    let deleted = bucket.empty(storage)?;
    if bucket.remove(storage)? {
        ui::success(&format!(
            "Removed bucket {} ({deleted} objects deleted)",
            bucket.name
        ));
    } else {
        ui::dim(&format!("bucket {} does not exist", bucket.name));
    }
    Ok(())
}
