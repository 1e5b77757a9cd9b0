use anyhow::Result;
use fleet::Operation;

use super::Session;
use crate::Context;
use crate::cli::SelectArgs;

pub fn run(ctx: &Context, args: &SelectArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let monitors = session.select(ctx, args)?;
    session.run_batch(&Operation::Start, &monitors)?.into_result()?;
    Ok(())
}
