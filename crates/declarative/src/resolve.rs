//! Artificial-property resolver
//!
//! Some desired-state fields are not remote properties: they name other
//! resources ("attach to the HBA called X") or request a transition that the
//! console models as an operation ("change the adapter type"). Each such
//! field is owned by an [`ArtificialProperty`] rule. Rules are evaluated
//! before the generic diff, and the fields they own are removed from its
//! input.

use crate::diff::ChangeSet;
use crate::error::{Error, Result};
use crate::property::PropertyTable;
use hmckit::{Kind, Operation, Properties, Resource, ResourceClient};
use serde_json::Value;

/// Name lookups the resolver needs.
pub trait ResourceLookup {
    /// Find a named resource of `kind`, scoped to a parent when given.
    fn find_by_name(&self, kind: Kind, parent: Option<&str>, name: &str) -> Result<Option<Resource>>;

    /// List resources of `kind` below `parent`.
    fn children(&self, kind: Kind, parent: &str) -> Result<Vec<Resource>>;
}

impl<C: ResourceClient + ?Sized> ResourceLookup for C {
    fn find_by_name(&self, kind: Kind, parent: Option<&str>, name: &str) -> Result<Option<Resource>> {
        let mut selector = hmckit::Selector::named(kind, name);
        if let Some(parent) = parent {
            selector = selector.within(parent);
        }
        Ok(self.find_optional(&selector)?)
    }

    fn children(&self, kind: Kind, parent: &str) -> Result<Vec<Resource>> {
        Ok(self.list(&hmckit::Selector::new(kind).within(parent))?)
    }
}

/// Everything a rule may consult.
pub struct ResolveContext<'a> {
    /// Property table of the resource kind being reconciled
    pub table: &'a PropertyTable,
    /// Live resource, `None` if it does not exist yet
    pub live: Option<&'a Resource>,
    /// Name lookups
    pub lookup: &'a dyn ResourceLookup,
}

impl ResolveContext<'_> {
    /// Write an internal property through its table entry.
    pub fn place(&self, changes: &mut ChangeSet, property: &str, value: Value) -> Result<()> {
        let spec = self.table.get(property).ok_or_else(|| Error::InvalidProperty {
            kind: self.table.kind(),
            name: property.to_string(),
            reason: "not defined",
        })?;
        changes.place(spec, value, self.live)
    }
}

/// A rule that owns one or more desired-state fields.
pub trait ArtificialProperty: Send + Sync {
    /// Fields owned by this rule. The first one names the rule in errors.
    fn fields(&self) -> &[&'static str];

    /// Resolve the owned fields present in `desired` into changes.
    fn resolve(&self, desired: &Properties, ctx: &ResolveContext<'_>) -> Result<ChangeSet>;
}

/// Fail unless `a` and `b` are both present or both absent.
pub fn require_together(desired: &Properties, a: &str, b: &str) -> Result<()> {
    if desired.contains_key(a) != desired.contains_key(b) {
        return Err(Error::parameter(format!(
            "{a:?} and {b:?} must be specified together"
        )));
    }
    Ok(())
}

/// Fail if both `a` and `b` are present.
pub fn mutually_exclusive(desired: &Properties, a: &str, b: &str) -> Result<()> {
    if desired.contains_key(a) && desired.contains_key(b) {
        return Err(Error::parameter(format!(
            "{a:?} and {b:?} are mutually exclusive"
        )));
    }
    Ok(())
}

/// Read a string field.
pub fn str_field<'v>(desired: &'v Properties, field: &str) -> Result<Option<&'v str>> {
    match desired.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(Error::parameter(format!(
            "{field:?} must be a string, got {other}"
        ))),
    }
}

/// Where a by-name reference is looked up.
#[derive(Debug, Clone)]
pub enum Scope {
    /// Below a fixed parent URI
    Within(String),
    /// Below the resource being reconciled
    Children,
    /// Anywhere; for resources owned by the console itself
    Global,
}

/// Reference-by-name rule: a name is resolved to the URI of another
/// resource and written to an internal property.
#[derive(Debug, Clone)]
pub struct ByName {
    fields: [&'static str; 1],
    /// Kind of the referenced resource
    pub target: Kind,
    /// Internal property receiving the URI (desired-state spelling)
    pub property: &'static str,
    /// Where to look
    pub scope: Scope,
}

impl ByName {
    /// Create a rule for `field`.
    pub fn new(field: &'static str, target: Kind, property: &'static str, scope: Scope) -> Self {
        Self {
            fields: [field],
            target,
            property,
            scope,
        }
    }
}

impl ArtificialProperty for ByName {
    fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    fn resolve(&self, desired: &Properties, ctx: &ResolveContext<'_>) -> Result<ChangeSet> {
        let field = self.fields[0];
        let mut changes = ChangeSet::default();
        if !desired.contains_key(field) {
            return Ok(changes);
        }
        let Some(name) = str_field(desired, field)? else {
            // null clears the reference
            if ctx.live.is_some() {
                ctx.place(&mut changes, self.property, Value::Null)?;
            }
            return Ok(changes);
        };

        let parent = match &self.scope {
            Scope::Within(uri) => Some(uri.clone()),
            Scope::Global => None,
            Scope::Children => match ctx.live {
                Some(live) => Some(live.uri.clone()),
                None => {
                    return Err(Error::parameter(format!(
                        "{field:?} can only be specified when the {} already exists",
                        ctx.table.kind()
                    )));
                }
            },
        };

        let target = ctx
            .lookup
            .find_by_name(self.target, parent.as_deref(), name)?
            .ok_or_else(|| Error::ReferenceNotFound {
                field: field.to_string(),
                kind: self.target,
                name: name.to_string(),
                scope: ctx.live.map(ToString::to_string),
            })?;

        ctx.place(&mut changes, self.property, Value::String(target.uri))?;
        Ok(changes)
    }
}

/// Transition-trigger rule: a differing discriminant produces an operation.
pub struct Transition {
    fields: [&'static str; 1],
    /// Remote property holding the current discriminant
    pub discriminant: &'static str,
    /// Maps the desired value to the remote representation
    pub translate: fn(&str) -> Result<String>,
    /// Builds the operation for the translated value
    pub operation: fn(String) -> Operation,
}

impl Transition {
    /// Create a rule for `field`.
    pub fn new(
        field: &'static str,
        discriminant: &'static str,
        translate: fn(&str) -> Result<String>,
        operation: fn(String) -> Operation,
    ) -> Self {
        Self {
            fields: [field],
            discriminant,
            translate,
            operation,
        }
    }
}

/// Identity translation for [`Transition`].
pub fn verbatim(value: &str) -> Result<String> {
    Ok(value.to_string())
}

impl ArtificialProperty for Transition {
    fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    fn resolve(&self, desired: &Properties, ctx: &ResolveContext<'_>) -> Result<ChangeSet> {
        let field = self.fields[0];
        let mut changes = ChangeSet::default();
        let Some(value) = str_field(desired, field)? else {
            return Ok(changes);
        };
        let Some(live) = ctx.live else {
            return Err(Error::parameter(format!(
                "{field:?} can only be changed on an existing {}",
                ctx.table.kind()
            )));
        };

        let wanted = (self.translate)(value)?;
        if live.get_str(self.discriminant) != Some(wanted.as_str()) {
            log::debug!(
                "{live}: {} changes from {:?} to {wanted:?}",
                self.discriminant,
                live.get_str(self.discriminant)
            );
            changes.side_ops.push((self.operation)(wanted));
        }
        Ok(changes)
    }
}

/// Run all rules over `desired`.
///
/// Returns the desired state with every owned field removed, ready for the
/// generic diff, and the changes the rules produced.
pub fn resolve_all(
    desired: &Properties,
    rules: &[&dyn ArtificialProperty],
    ctx: &ResolveContext<'_>,
) -> Result<(Properties, ChangeSet)> {
    let mut remaining = desired.clone();
    let mut changes = ChangeSet::default();
    for rule in rules {
        let owned = rule.fields();
        if !owned.iter().any(|f| desired.contains_key(*f)) {
            continue;
        }
        changes.merge(rule.resolve(desired, ctx)?);
        for field in owned {
            remaining.remove(*field);
        }
    }
    Ok((remaining, changes))
}
