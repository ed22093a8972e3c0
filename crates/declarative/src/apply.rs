//! Applying computed changes
//!
//! Every mutating call goes through here so that dry-run mode is handled in
//! one place: instead of calling the console, the would-be values are
//! echoed into the local copy of the resource. After a real mutation the
//! resource is re-read in full.

use crate::context::ApplyContext;
use crate::diff::ChangeSet;
use crate::error::Result;
use crate::reconfigure::SubConfig;
use hmckit::{CryptoConfiguration, Kind, Operation, Properties, Resource};
use serde_json::Value;

/// Create a resource from a change set.
///
/// Update-only properties are written with one follow-up update. In dry-run
/// mode a local stand-in carrying all properties is returned.
pub fn create(
    ctx: &ApplyContext<'_>,
    kind: Kind,
    parent: Option<&str>,
    name: &str,
    changes: &ChangeSet,
) -> Result<Resource> {
    let mut props = changes.create.clone();
    props.insert("name".to_string(), Value::from(name));
    let deferred = changes.deferred_update();

    if ctx.dry_run {
        log::info!("would create {kind} '{name}'");
        let mut local = Resource::local(kind, parent, props);
        local.merge(&deferred);
        return Ok(local);
    }

    log::info!("creating {kind} '{name}'");
    let mut resource = ctx.client.create(kind, parent, &props)?;
    if !deferred.is_empty() {
        log::debug!("{resource}: writing {} update-only properties", deferred.len());
        ctx.client.update(&resource, &deferred)?;
    }
    ctx.client.pull_full_properties(&mut resource)?;
    Ok(resource)
}

/// Write properties to an existing resource. Returns whether anything was
/// written.
pub fn update(ctx: &ApplyContext<'_>, resource: &mut Resource, props: &Properties) -> Result<bool> {
    if props.is_empty() {
        return Ok(false);
    }
    if ctx.dry_run || resource.is_local() {
        log::info!("would update {resource}: {}", keys(props));
        resource.merge(props);
        return Ok(true);
    }

    log::info!("updating {resource}: {}", keys(props));
    ctx.client.update(resource, props)?;
    ctx.client.pull_full_properties(resource)?;
    Ok(true)
}

/// Invoke side operations in order. Returns whether any were invoked.
pub fn invoke_all(ctx: &ApplyContext<'_>, resource: &mut Resource, operations: &[Operation]) -> Result<bool> {
    if operations.is_empty() {
        return Ok(false);
    }
    let label = resource.to_string();
    for operation in operations {
        ctx.progress().on_operation(&label, operation.name());
        if ctx.dry_run || resource.is_local() {
            log::info!("would {operation} on {label}");
            simulate(resource, operation)?;
        } else {
            log::info!("{operation} on {label}");
            ctx.client.invoke(resource, operation)?;
        }
    }
    if !ctx.dry_run && !resource.is_local() {
        ctx.client.pull_full_properties(resource)?;
    }
    Ok(true)
}

/// Delete a resource.
pub fn delete(ctx: &ApplyContext<'_>, resource: &Resource) -> Result<()> {
    if ctx.dry_run {
        log::info!("would delete {resource}");
        return Ok(());
    }
    log::info!("deleting {resource}");
    ctx.client.delete(resource)?;
    Ok(())
}

/// Re-read a resource unless it only exists locally.
pub fn refresh(ctx: &ApplyContext<'_>, resource: &mut Resource) -> Result<()> {
    if !resource.is_local() {
        ctx.client.pull_full_properties(resource)?;
    }
    Ok(())
}

/// Echo the effect of an operation into the local copy.
fn simulate(resource: &mut Resource, operation: &Operation) -> Result<()> {
    match operation {
        Operation::ChangeAdapterType { adapter_type } => {
            resource.set("type", Value::from(adapter_type.as_str()));
        }
        Operation::ChangeCryptoType { crypto_type } => {
            resource.set("crypto-type", Value::from(crypto_type.as_str()));
        }
        Operation::IncreaseCryptoConfig { .. }
        | Operation::DecreaseCryptoConfig { .. }
        | Operation::ChangeCryptoDomainConfig { .. } => {
            let mut config = SubConfig::of(resource)?;
            config.simulate(operation);
            resource.set(
                "crypto-configuration",
                CryptoConfiguration::from(&config).to_value(),
            );
        }
        Operation::AddUserRole { user_role_uri } | Operation::RemoveUserRole { user_role_uri } => {
            let mut roles: Vec<Value> = resource
                .get("user-roles")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            roles.retain(|r| r.as_str() != Some(user_role_uri.as_str()));
            if matches!(operation, Operation::AddUserRole { .. }) {
                roles.push(Value::from(user_role_uri.as_str()));
            }
            resource.set("user-roles", Value::Array(roles));
        }
        Operation::Start | Operation::Stop => {}
    }
    Ok(())
}

fn keys(props: &Properties) -> String {
    props.keys().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmckit::{MemoryConsole, ResourceClient};
    use serde_json::json;

    fn changes() -> ChangeSet {
        let mut changes = ChangeSet::default();
        changes.create.insert("description".to_string(), json!("web"));
        changes.update.insert("boot-timeout".to_string(), json!(60));
        changes
    }

    #[test]
    fn test_create_writes_deferred_update() {
        let console = MemoryConsole::new();
        let cpc = console.add_cpc("CPC1");
        let ctx = ApplyContext::new(&console, false);

        let part = create(&ctx, Kind::Partition, Some(&cpc.uri), "lp01", &changes()).unwrap();
        assert_eq!(part.get("boot-timeout"), Some(&json!(60)));
        let methods: Vec<String> = console.mutating_calls().into_iter().map(|c| c.method).collect();
        assert_eq!(methods, vec!["create", "update"]);
    }

    #[test]
    fn test_create_dry_run_is_local() {
        let console = MemoryConsole::new();
        let cpc = console.add_cpc("CPC1");
        let ctx = ApplyContext::new(&console, true);

        let part = create(&ctx, Kind::Partition, Some(&cpc.uri), "lp01", &changes()).unwrap();
        assert!(part.is_local());
        assert_eq!(part.name(), "lp01");
        assert_eq!(part.get("description"), Some(&json!("web")));
        assert_eq!(part.get("boot-timeout"), Some(&json!(60)));
        assert!(console.mutating_calls().is_empty());
    }

    #[test]
    fn test_update_skips_empty() {
        let console = MemoryConsole::new();
        let mut cpc = console.add_cpc("CPC1");
        let ctx = ApplyContext::new(&console, false);
        assert!(!update(&ctx, &mut cpc, &Properties::new()).unwrap());
        assert!(console.calls().is_empty());
    }

    #[test]
    fn test_invoke_all_simulates_in_dry_run() {
        let console = MemoryConsole::new();
        let cpc = console.add_cpc("CPC1");
        let mut adapter = console.add_adapter(&cpc.uri, "OSA1", "osa", "osd");
        let ctx = ApplyContext::new(&console, true);

        let ops = [Operation::ChangeAdapterType {
            adapter_type: "fc".to_string(),
        }];
        assert!(invoke_all(&ctx, &mut adapter, &ops).unwrap());
        assert_eq!(adapter.get_str("type"), Some("fc"));
        assert!(console.mutating_calls().is_empty());
    }

    #[test]
    fn test_user_role_simulation() {
        let mut user = Resource::local(Kind::User, None, Properties::new());
        simulate(
            &mut user,
            &Operation::AddUserRole {
                user_role_uri: "/api/user-roles/1".to_string(),
            },
        )
        .unwrap();
        simulate(
            &mut user,
            &Operation::AddUserRole {
                user_role_uri: "/api/user-roles/1".to_string(),
            },
        )
        .unwrap();
        assert_eq!(user.get("user-roles"), Some(&json!(["/api/user-roles/1"])));
        simulate(
            &mut user,
            &Operation::RemoveUserRole {
                user_role_uri: "/api/user-roles/1".to_string(),
            },
        )
        .unwrap();
        assert_eq!(user.get("user-roles"), Some(&json!([])));
    }

    #[test]
    fn test_delete_dry_run() {
        let console = MemoryConsole::new();
        let cpc = console.add_cpc("CPC1");
        let ctx = ApplyContext::new(&console, true);
        delete(&ctx, &cpc).unwrap();
        assert!(console.get(&cpc.uri).is_some());

        let ctx = ApplyContext::new(&console, false);
        delete(&ctx, &cpc).unwrap();
        assert!(console.find_optional(&hmckit::Selector::named(Kind::Cpc, "CPC1")).unwrap().is_none());
    }
}
