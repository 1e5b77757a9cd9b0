use anyhow::Result;
use fleet::{Operation, Outcome};

use super::Session;
use crate::Context;
use crate::cli::BuildArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &BuildArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let monitors = session.select(ctx, &args.select)?;
    let report = session.run_batch(&Operation::Build, &monitors)?;

    if args.output || ctx.verbose > 0 {
        for unit in &report.units {
            if let Ok(Outcome::Built { output }) = &unit.result {
                ui::header(&unit.monitor);
                if output.trim().is_empty() {
                    ui::dim("no dependency manifest");
                } else {
                    println!("{}", output.trim_end());
                }
            }
        }
    }

    report.into_result()?;
    Ok(())
}
