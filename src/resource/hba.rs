//! HBA resource - FCP host bus adapters of a partition

use declarative::diff::ChangeSet;
use declarative::property::{eq_hex, to_string};
use declarative::{
    ApplyContext, ArtificialProperty, Converger, Error, Lifecycle, ManagedResource, Outcome,
    PropertySpec, PropertyTable, ResolveContext, Result, TargetState, apply,
};
use hmckit::{Kind, Properties, Resource};
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;

use super::partition::PARTITION;
use super::{adapter_port, find_child, find_cpc};

const PARENT_WAIT: Duration = Duration::from_secs(60);

static PROPERTIES: LazyLock<PropertyTable> = LazyLock::new(|| {
    PropertyTable::new(
        Kind::Hba,
        [
            PropertySpec::create_update("description").cast(to_string),
            PropertySpec::create_update("device_number").compare_with(eq_hex),
            PropertySpec::internal("adapter_port_uri", true, false),
            PropertySpec::read_only("name"),
            PropertySpec::read_only("element_uri"),
            PropertySpec::read_only("element_id"),
            PropertySpec::read_only("parent"),
            PropertySpec::read_only("class"),
            PropertySpec::read_only("wwpn"),
        ],
    )
});

/// `adapter_name` + `adapter_port`: the storage port backing the HBA.
/// Fixed once the HBA exists.
struct StoragePort {
    cpc_uri: String,
}

impl ArtificialProperty for StoragePort {
    fn fields(&self) -> &[&'static str] {
        &["adapter_name", "adapter_port"]
    }

    fn resolve(&self, desired: &Properties, ctx: &ResolveContext<'_>) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        if let Some((_, port)) = adapter_port(ctx.lookup, &self.cpc_uri, desired)? {
            ctx.place(&mut changes, "adapter_port_uri", Value::String(port.uri))?;
        }
        Ok(changes)
    }
}

/// HBA handler
#[derive(Debug, Clone)]
pub struct Hba {
    cpc: String,
    partition: String,
    name: String,
}

impl Hba {
    pub fn new(cpc: String, partition: String, name: String) -> Self {
        Self {
            cpc,
            partition,
            name,
        }
    }

    fn locate(&self, ctx: &ApplyContext<'_>) -> Result<(Resource, Option<Resource>, Option<Resource>)> {
        let cpc = find_cpc(ctx.client, &self.cpc)?;
        let partition = find_child(ctx.client, Kind::Partition, &cpc.uri, &self.partition)?;
        let hba = match &partition {
            Some(partition) => find_child(ctx.client, Kind::Hba, &partition.uri, &self.name)?,
            None => None,
        };
        Ok((cpc, partition, hba))
    }
}

impl ManagedResource for Hba {
    fn kind(&self) -> Kind {
        Kind::Hba
    }

    fn describe(&self) -> String {
        format!(
            "HBA '{}' in partition '{}' of CPC '{}'",
            self.name, self.partition, self.cpc
        )
    }

    fn supported_states(&self) -> &'static [TargetState] {
        &[TargetState::Absent, TargetState::Present, TargetState::Facts]
    }

    fn ensure_absent(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, _, hba) = self.locate(ctx)?;
        match hba {
            Some(hba) => {
                apply::delete(ctx, &hba)?;
                Ok(Outcome::absent(true))
            }
            None => Ok(Outcome::absent(false)),
        }
    }

    fn ensure_state(
        &self,
        _target: TargetState,
        desired: &Properties,
        ctx: &ApplyContext<'_>,
    ) -> Result<Outcome> {
        let (cpc, partition, hba) = self.locate(ctx)?;
        let Some(mut partition) = partition else {
            if ctx.dry_run {
                return Ok(Outcome::new(true, Properties::new()));
            }
            return Err(Error::parameter(format!(
                "partition '{}' does not exist",
                self.partition
            )));
        };

        let port = StoragePort { cpc_uri: cpc.uri };
        let converger = Converger::new(&PROPERTIES).rule(&port);

        let (changed, hba) = match hba {
            None => (true, converger.create(ctx, Some(&partition.uri), &self.name, desired)?),
            Some(mut hba) => {
                apply::refresh(ctx, &mut hba)?;
                let changes = converger.changes(ctx, desired, Some(&hba))?;
                if !changes.update.is_empty() {
                    let limited = ctx.limit_timeout(PARENT_WAIT);
                    Lifecycle::new(&limited, &PARTITION).wait_for_transition_completion(&mut partition)?;
                }
                (apply::update(ctx, &mut hba, &changes.update)?, hba)
            }
        };
        Ok(Outcome::new(changed, hba.properties))
    }

    fn facts(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, _, hba) = self.locate(ctx)?;
        let mut hba = hba.ok_or_else(|| Error::parameter(format!("{} does not exist", self.describe())))?;
        apply::refresh(ctx, &mut hba)?;
        Ok(Outcome::new(false, hba.properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::{methods, props};
    use declarative::{ErrorKind, reconcile};
    use hmckit::MemoryConsole;
    use serde_json::json;

    fn setup() -> (MemoryConsole, Resource, Hba) {
        let console = MemoryConsole::new();
        let cpc = console.add_cpc("CPC1");
        let partition = console.add_partition(&cpc.uri, "lp01", "stopped");
        let fcp = console.add_adapter(&cpc.uri, "FCP1", "ficon", "fcp");
        console.add_port(&fcp.uri, 0);
        let fcp2 = console.add_adapter(&cpc.uri, "FCP2", "ficon", "fcp");
        console.add_port(&fcp2.uri, 0);
        let handler = Hba::new("CPC1".to_string(), "lp01".to_string(), "hba1".to_string());
        (console, partition, handler)
    }

    #[test]
    fn test_create_with_port() {
        let (console, partition, handler) = setup();
        let ctx = ApplyContext::new(&console, false);
        let desired = props(json!({"adapter_name": "FCP1", "adapter_port": 0, "device_number": "1000"}));
        let outcome = reconcile(&handler, TargetState::Present, &desired, &ctx).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.properties["parent"], json!(partition.uri));
        assert!(outcome.properties["adapter-port-uri"].as_str().unwrap().contains("/ports/"));
        assert_eq!(methods(&console), vec!["create"]);

        console.clear_calls();
        assert!(!reconcile(&handler, TargetState::Present, &desired, &ctx).unwrap().changed);
        assert!(console.mutating_calls().is_empty());
    }

    #[test]
    fn test_facts() {
        let (console, partition, handler) = setup();
        let ctx = ApplyContext::new(&console, false);
        let err = reconcile(&handler, TargetState::Facts, &Properties::new(), &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);

        console.add(Kind::Hba, Some(&partition.uri), props(json!({"name": "hba1"})));
        let facts = reconcile(&handler, TargetState::Facts, &Properties::new(), &ctx).unwrap();
        assert!(!facts.changed);
        assert_eq!(facts.properties["name"], json!("hba1"));
    }

    #[test]
    fn test_port_cannot_change() {
        let (console, _, handler) = setup();
        let ctx = ApplyContext::new(&console, false);
        reconcile(
            &handler,
            TargetState::Present,
            &props(json!({"adapter_name": "FCP1", "adapter_port": 0})),
            &ctx,
        )
        .unwrap();

        let err = reconcile(
            &handler,
            TargetState::Present,
            &props(json!({"adapter_name": "FCP2", "adapter_port": 0})),
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableProperty);
    }

    #[test]
    fn test_unknown_port() {
        let (console, _, handler) = setup();
        let ctx = ApplyContext::new(&console, false);
        let err = reconcile(
            &handler,
            TargetState::Present,
            &props(json!({"adapter_name": "FCP1", "adapter_port": 3})),
            &ctx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
        assert!(console.mutating_calls().is_empty());
    }

    #[test]
    fn test_dry_run_create() {
        let (console, _, handler) = setup();
        let ctx = ApplyContext::new(&console, true);
        let outcome = reconcile(
            &handler,
            TargetState::Present,
            &props(json!({"adapter_name": "FCP1", "adapter_port": 0})),
            &ctx,
        )
        .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.properties["name"], json!("hba1"));
        assert!(console.mutating_calls().is_empty());
    }
}
