use anyhow::Result;
use declarative::{ApplyContext, TargetState, reconcile};
use hmckit::Properties;

use crate::Context;
use crate::cli::TargetArgs;
use crate::commands::{address, open_inventory};
use crate::resource;

/// Print the current properties of a resource as JSON
pub fn run(ctx: &Context, target: &TargetArgs) -> Result<()> {
    let console = open_inventory(&ctx.inventory)?;
    let handler = resource::handler(target.kind, &address(target, &ctx.config))?;
    let apply_ctx = ApplyContext::new(&console, true).with_options(ctx.config.options(None));
    let outcome = reconcile(handler.as_ref(), TargetState::Facts, &Properties::new(), &apply_ctx)?;
    println!("{}", serde_json::to_string_pretty(&outcome.properties)?);
    Ok(())
}
