//! Action dispatcher
//!
//! Maps a requested [`TargetState`] onto a handler of a
//! [`ManagedResource`] and provides [`Converger`], the shared
//! create-or-update flow handlers build on.

use crate::apply;
use crate::context::ApplyContext;
use crate::diff::{ChangeSet, diff};
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::property::PropertyTable;
use crate::resolve::{ArtificialProperty, ResolveContext, resolve_all};
use hmckit::{Kind, Properties, Resource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State a caller asks a resource to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    /// Does not exist
    Absent,
    /// Exists with the desired properties
    Present,
    /// Exists (is never created) with the desired properties
    Set,
    /// Exists, has the desired properties and is running
    Active,
    /// Exists, has the desired properties and is stopped
    Stopped,
    /// Read-only: report current properties
    Facts,
}

impl TargetState {
    /// All states, in display order.
    pub const ALL: [Self; 6] = [
        Self::Absent,
        Self::Present,
        Self::Set,
        Self::Active,
        Self::Stopped,
        Self::Facts,
    ];

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Present => "present",
            Self::Set => "set",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Facts => "facts",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::parameter(format!("invalid state {s:?}")))
    }
}

/// Result of a reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    /// Whether anything was (or in dry-run mode, would be) changed
    pub changed: bool,
    /// Properties of the resource afterwards; empty for `absent`
    pub properties: Properties,
}

impl Outcome {
    /// Outcome with properties.
    pub fn new(changed: bool, properties: Properties) -> Self {
        Self {
            changed,
            properties,
        }
    }

    /// Outcome of an `absent` handler.
    pub fn absent(changed: bool) -> Self {
        Self {
            changed,
            properties: Properties::new(),
        }
    }
}

/// A resource type that can be reconciled.
pub trait ManagedResource {
    /// Kind being managed.
    fn kind(&self) -> Kind;

    /// Human-readable target, e.g. `partition 'lp01' in cpc 'CPC1'`.
    fn describe(&self) -> String;

    /// Target states this resource type accepts.
    fn supported_states(&self) -> &'static [TargetState];

    /// Make sure the resource does not exist.
    fn ensure_absent(&self, ctx: &ApplyContext<'_>) -> Result<Outcome>;

    /// Make sure the resource exists in `target` with `desired` properties.
    fn ensure_state(
        &self,
        target: TargetState,
        desired: &Properties,
        ctx: &ApplyContext<'_>,
    ) -> Result<Outcome>;

    /// Report the current properties.
    fn facts(&self, ctx: &ApplyContext<'_>) -> Result<Outcome>;
}

/// Reconcile one resource to a target state.
pub fn reconcile(
    resource: &dyn ManagedResource,
    target: TargetState,
    desired: &Properties,
    ctx: &ApplyContext<'_>,
) -> Result<Outcome> {
    if !resource.supported_states().contains(&target) {
        let supported: Vec<&str> = resource
            .supported_states()
            .iter()
            .map(TargetState::as_str)
            .collect();
        return Err(Error::parameter(format!(
            "state \"{target}\" is not supported for {} resources (supported: {})",
            resource.kind().as_str(),
            supported.join(", ")
        )));
    }

    log::debug!(
        "reconciling {} to {target}{}",
        resource.describe(),
        if ctx.dry_run { " (dry run)" } else { "" }
    );

    let outcome = match target {
        TargetState::Absent => {
            let outcome = resource.ensure_absent(ctx)?;
            Outcome::absent(outcome.changed)
        }
        TargetState::Present | TargetState::Set | TargetState::Active | TargetState::Stopped => {
            resource.ensure_state(target, desired, ctx)?
        }
        TargetState::Facts => {
            if !desired.is_empty() {
                log::warn!("ignoring {} desired properties for facts", desired.len());
            }
            resource.facts(ctx)?
        }
    };

    log::info!(
        "{}: {}",
        resource.describe(),
        if outcome.changed { "changed" } else { "unchanged" }
    );
    Ok(outcome)
}

// ============================================================================
// Shared create-or-update flow
// ============================================================================

/// Result of [`Converger::update_quiesced`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Converged {
    /// Something changed
    pub changed: bool,
    /// The resource was stopped to apply the update
    pub quiesced: bool,
}

/// Property table plus artificial rules of one resource kind.
pub struct Converger<'r> {
    table: &'r PropertyTable,
    rules: Vec<&'r dyn ArtificialProperty>,
}

impl<'r> Converger<'r> {
    /// Converger without artificial fields.
    pub fn new(table: &'r PropertyTable) -> Self {
        Self {
            table,
            rules: Vec::new(),
        }
    }

    /// Add an artificial rule.
    pub fn rule(mut self, rule: &'r dyn ArtificialProperty) -> Self {
        self.rules.push(rule);
        self
    }

    /// Kind this converger manages.
    pub fn kind(&self) -> Kind {
        self.table.kind()
    }

    /// Resolve artificial fields, then diff the rest.
    pub fn changes(
        &self,
        ctx: &ApplyContext<'_>,
        desired: &Properties,
        live: Option<&Resource>,
    ) -> Result<ChangeSet> {
        let rctx = ResolveContext {
            table: self.table,
            live,
            lookup: &ctx.client,
        };
        let (generic, mut changes) = resolve_all(desired, &self.rules, &rctx)?;
        changes.merge(diff(&generic, self.table, live)?);
        Ok(changes)
    }

    /// Create the resource, then invoke side operations on it.
    pub fn create(
        &self,
        ctx: &ApplyContext<'_>,
        parent: Option<&str>,
        name: &str,
        desired: &Properties,
    ) -> Result<Resource> {
        let changes = self.changes(ctx, desired, None)?;
        let mut resource = apply::create(ctx, self.kind(), parent, name, &changes)?;
        apply::invoke_all(ctx, &mut resource, &changes.side_ops)?;
        Ok(resource)
    }

    /// Update a resource that has no operational status of its own.
    pub fn update(
        &self,
        ctx: &ApplyContext<'_>,
        resource: &mut Resource,
        desired: &Properties,
    ) -> Result<bool> {
        let changes = self.changes(ctx, desired, Some(resource))?;
        let mut changed = apply::update(ctx, resource, &changes.update)?;
        changed |= apply::invoke_all(ctx, resource, &changes.side_ops)?;
        Ok(changed)
    }

    /// Update a stateful resource, stopping it first when a changed
    /// property cannot be written while it is active.
    ///
    /// After stopping, the resource is re-read and the changes recomputed
    /// so the update is based on the latest state.
    pub fn update_quiesced(
        &self,
        ctx: &ApplyContext<'_>,
        machine: &Lifecycle<'_, '_>,
        resource: &mut Resource,
        desired: &Properties,
    ) -> Result<Converged> {
        let mut changes = self.changes(ctx, desired, Some(resource))?;
        let mut result = Converged::default();

        if !changes.update.is_empty() {
            if changes.requires_quiesce {
                log::debug!("{resource}: update needs the resource to be stopped");
                if machine.ensure_quiescent(resource)? {
                    result.changed = true;
                    result.quiesced = true;
                }
                if !ctx.dry_run {
                    apply::refresh(ctx, resource)?;
                    changes = self.changes(ctx, desired, Some(resource))?;
                }
            } else {
                machine.wait_for_transition_completion(resource)?;
            }
            result.changed |= apply::update(ctx, resource, &changes.update)?;
        }

        result.changed |= apply::invoke_all(ctx, resource, &changes.side_ops)?;
        Ok(result)
    }
}
