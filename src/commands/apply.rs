//! `hmcctl apply`: preview, confirm, reconcile, save.

use anyhow::{Context as _, Result, bail};
use declarative::{ApplyContext, ManagedResource, Outcome, TargetState, reconcile};
use hmckit::{LogCallback, MemoryConsole, Properties, RetryConfig, Retrying};
use serde_json::Value;
use std::io::IsTerminal;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::commands::{address, open_inventory};
use crate::progress::Spinner;
use crate::{props, resource, ui};

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let console = open_inventory(&ctx.inventory)?;
    let client = Retrying::new(console, RetryConfig::default()).with_callback(LogCallback);
    let handler = resource::handler(args.target.kind, &address(&args.target, &ctx.config))?;

    let mut desired = match &args.props {
        Some(path) => props::load(path)?,
        None => Properties::new(),
    };
    props::apply_assignments(&mut desired, &args.set)?;
    let options = ctx.config.options(args.timeout);

    if args.state == TargetState::Facts {
        let preview = ApplyContext::new(&client, true).with_options(options);
        let outcome = reconcile(handler.as_ref(), TargetState::Facts, &desired, &preview)?;
        println!("{}", serde_json::to_string_pretty(&outcome.properties)?);
        return Ok(());
    }

    let preview_ctx = ApplyContext::new(&client, true).with_options(options.clone());
    let before = current(handler.as_ref(), &preview_ctx);
    let preview = reconcile(handler.as_ref(), args.state, &desired, &preview_ctx)?;

    if !ctx.quiet {
        ui::header(&format!("{} → {}", handler.describe(), args.state));
    }
    if !preview.changed {
        ui::success("Already in the requested state");
        return Ok(());
    }
    if !ctx.quiet {
        ui::print_diff(&Value::Object(before), &Value::Object(preview.properties.clone()));
        println!();
    }

    if args.check {
        ui::info("Check mode: nothing was changed");
        return Ok(());
    }

    if !(args.yes || ctx.config.assume_yes) {
        if !std::io::stdin().is_terminal() {
            bail!("Refusing to apply without confirmation; pass --yes");
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Apply these changes?")
            .default(true)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            ui::info("Cancelled");
            return Ok(());
        }
    }

    let outcome = execute(ctx, handler.as_ref(), &args, &desired, &client)?;
    if outcome.changed {
        ui::success(&format!("{}: changed", handler.describe()));
    } else {
        ui::success(&format!("{}: unchanged", handler.describe()));
    }
    if ctx.verbose > 0 && !outcome.properties.is_empty() {
        println!("{}", serde_json::to_string_pretty(&outcome.properties)?);
    }
    Ok(())
}

/// Current properties, empty when the resource does not exist yet
fn current(handler: &dyn ManagedResource, ctx: &ApplyContext<'_>) -> Properties {
    if !handler.supported_states().contains(&TargetState::Facts) {
        return Properties::new();
    }
    match reconcile(handler, TargetState::Facts, &Properties::new(), ctx) {
        Ok(outcome) => outcome.properties,
        Err(e) => {
            log::debug!("no current state for {}: {e}", handler.describe());
            Properties::new()
        }
    }
}

/// Run the real reconciliation and persist the console afterwards, also when
/// it failed halfway
fn execute(
    ctx: &Context,
    handler: &dyn ManagedResource,
    args: &ApplyArgs,
    desired: &Properties,
    client: &Retrying<MemoryConsole>,
) -> Result<Outcome> {
    let spinner = Spinner::new(&format!("Applying {}", handler.describe()), ctx.quiet);
    let apply_ctx = ApplyContext::new(client, false)
        .with_options(ctx.config.options(args.timeout))
        .with_progress(&spinner);
    let result = reconcile(handler, args.state, desired, &apply_ctx);
    spinner.finish();

    client
        .inner()
        .save(&ctx.inventory)
        .with_context(|| format!("Could not save inventory {}", ctx.inventory.display()))?;
    Ok(result?)
}
