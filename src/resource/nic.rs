//! NIC resource - network interfaces of a partition

use declarative::diff::ChangeSet;
use declarative::property::{eq_hex, eq_mac, to_int, to_string};
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

/// Longest wait for the parent partition to finish a transition.
const PARENT_WAIT: Duration = Duration::from_secs(60);

static PROPERTIES: LazyLock<PropertyTable> = LazyLock::new(|| {
    PropertyTable::new(
        Kind::Nic,
        [
            PropertySpec::create_update("description").cast(to_string),
            PropertySpec::create_update("device_number").compare_with(eq_hex),
            PropertySpec::internal("network_adapter_port_uri", true, true),
            PropertySpec::internal("virtual_switch_uri", true, true),
            PropertySpec::create_update("ssc_management_nic"),
            PropertySpec::create_update("ssc_ip_address_type"),
            PropertySpec::create_update("ssc_ip_address"),
            PropertySpec::create_update("ssc_mask_prefix"),
            PropertySpec::create_update("vlan_id").cast(to_int),
            PropertySpec::create_update("vlan_type"),
            PropertySpec::create_update("mac_address").compare_with(eq_mac),
            PropertySpec::create_update("function_number").cast(to_int),
            PropertySpec::create_update("function_range").cast(to_int),
            PropertySpec::read_only("name"),
            PropertySpec::read_only("element_uri"),
            PropertySpec::read_only("element_id"),
            PropertySpec::read_only("parent"),
            PropertySpec::read_only("class"),
            PropertySpec::read_only("type"),
        ],
    )
});

/// `adapter_name` + `adapter_port`: the backing of the NIC. RoCE and CNA
/// ports are referenced directly, OSA and HiperSockets ports through the
/// virtual switch of that port.
struct Backing {
    cpc_uri: String,
}

impl ArtificialProperty for Backing {
    fn fields(&self) -> &[&'static str] {
        &["adapter_name", "adapter_port"]
    }

    fn resolve(&self, desired: &Properties, ctx: &ResolveContext<'_>) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        let Some((adapter, port)) = adapter_port(ctx.lookup, &self.cpc_uri, desired)? else {
            return Ok(changes);
        };

        match adapter.get_str("adapter-family") {
            Some("roce" | "cna") => {
                ctx.place(&mut changes, "network_adapter_port_uri", Value::String(port.uri))?;
            }
            Some("osa" | "hipersockets") => {
                let index = port.get("index").cloned().unwrap_or(Value::Null);
                let vswitch = ctx
                    .lookup
                    .children(Kind::VirtualSwitch, &self.cpc_uri)?
                    .into_iter()
                    .find(|v| {
                        v.get_str("backing-adapter-uri") == Some(adapter.uri.as_str())
                            && v.get("port") == Some(&index)
                    })
                    .ok_or_else(|| {
                        Error::parameter(format!(
                            "no virtual switch is backed by port {index} of {adapter}"
                        ))
                    })?;
                ctx.place(&mut changes, "virtual_switch_uri", Value::String(vswitch.uri))?;
            }
            family => {
                return Err(Error::parameter(format!(
                    "\"adapter_name\" names {adapter}, which is not a network adapter (family {})",
                    family.unwrap_or("unknown")
                )));
            }
        }
        Ok(changes)
    }
}

/// NIC handler
#[derive(Debug, Clone)]
pub struct Nic {
    cpc: String,
    partition: String,
    name: String,
}

impl Nic {
    pub fn new(cpc: String, partition: String, name: String) -> Self {
        Self {
            cpc,
            partition,
            name,
        }
    }

    /// CPC, partition (if it exists) and NIC (if it exists).
    fn locate(&self, ctx: &ApplyContext<'_>) -> Result<(Resource, Option<Resource>, Option<Resource>)> {
        let cpc = find_cpc(ctx.client, &self.cpc)?;
        let partition = find_child(ctx.client, Kind::Partition, &cpc.uri, &self.partition)?;
        let nic = match &partition {
            Some(partition) => find_child(ctx.client, Kind::Nic, &partition.uri, &self.name)?,
            None => None,
        };
        Ok((cpc, partition, nic))
    }

    fn missing_partition(&self) -> Error {
        Error::parameter(format!(
            "partition '{}' of {} does not exist",
            self.partition,
            self.describe()
        ))
    }
}

impl ManagedResource for Nic {
    fn kind(&self) -> Kind {
        Kind::Nic
    }

    fn describe(&self) -> String {
        format!(
            "NIC '{}' in partition '{}' of CPC '{}'",
            self.name, self.partition, self.cpc
        )
    }

    fn supported_states(&self) -> &'static [TargetState] {
        &[TargetState::Absent, TargetState::Present, TargetState::Facts]
    }

    fn ensure_absent(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, _, nic) = self.locate(ctx)?;
        let Some(nic) = nic else {
            return Ok(Outcome::absent(false));
        };
        apply::delete(ctx, &nic)?;
        Ok(Outcome::absent(true))
    }

    fn ensure_state(
        &self,
        _target: TargetState,
        desired: &Properties,
        ctx: &ApplyContext<'_>,
    ) -> Result<Outcome> {
        let (cpc, partition, nic) = self.locate(ctx)?;
        let Some(mut partition) = partition else {
            if ctx.dry_run {
                // Creating the partition first would also create the NIC.
                return Ok(Outcome::new(true, Properties::new()));
            }
            return Err(self.missing_partition());
        };

        let backing = Backing { cpc_uri: cpc.uri };
        let converger = Converger::new(&PROPERTIES).rule(&backing);

        let (changed, nic) = match nic {
            None => {
                let created = converger.create(ctx, Some(&partition.uri), &self.name, desired)?;
                (true, created)
            }
            Some(mut nic) => {
                apply::refresh(ctx, &mut nic)?;
                let changes = converger.changes(ctx, desired, Some(&nic))?;
                if !changes.update.is_empty() {
                    let limited = ctx.limit_timeout(PARENT_WAIT);
                    Lifecycle::new(&limited, &PARTITION).wait_for_transition_completion(&mut partition)?;
                }
                (apply::update(ctx, &mut nic, &changes.update)?, nic)
            }
        };
        Ok(Outcome::new(changed, nic.properties))
    }

    fn facts(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, partition, nic) = self.locate(ctx)?;
        if partition.is_none() {
            return Err(self.missing_partition());
        }
        let mut nic = nic.ok_or_else(|| Error::parameter(format!("{} does not exist", self.describe())))?;
        apply::refresh(ctx, &mut nic)?;
        Ok(Outcome::new(false, nic.properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::{methods, options, props};
    use declarative::{ErrorKind, reconcile};
    use hmckit::MemoryConsole;
    use serde_json::json;

    struct Fixture {
        console: MemoryConsole,
        partition: Resource,
        handler: Nic,
    }

    fn setup(status: &str) -> Fixture {
        let console = MemoryConsole::new();
        let cpc = console.add_cpc("CPC1");
        let partition = console.add_partition(&cpc.uri, "lp01", status);

        let osa = console.add_adapter(&cpc.uri, "OSA1", "osa", "osd");
        console.add_port(&osa.uri, 0);
        console.add_port(&osa.uri, 1);
        console.add_virtual_switch(&cpc.uri, "OSA1_0", &osa.uri, 0);
        console.add_virtual_switch(&cpc.uri, "OSA1_1", &osa.uri, 1);

        let roce = console.add_adapter(&cpc.uri, "ROCE1", "roce", "roce");
        console.add_port(&roce.uri, 0);

        let fcp = console.add_adapter(&cpc.uri, "FCP1", "ficon", "fcp");
        console.add_port(&fcp.uri, 0);

        Fixture {
            console,
            partition,
            handler: Nic::new("CPC1".to_string(), "lp01".to_string(), "eth0".to_string()),
        }
    }

    #[test]
    fn test_create_on_osa_uses_virtual_switch() {
        let f = setup("stopped");
        let ctx = ApplyContext::new(&f.console, false);
        let desired = props(json!({"adapter_name": "OSA1", "adapter_port": 1, "device_number": "0100"}));
        let outcome = reconcile(&f.handler, TargetState::Present, &desired, &ctx).unwrap();

        assert!(outcome.changed);
        let vswitch = f
            .console
            .calls()
            .into_iter()
            .find(|c| c.method == "create")
            .and_then(|c| c.detail)
            .unwrap();
        assert!(vswitch["virtual-switch-uri"].as_str().unwrap().starts_with("/api/virtual-switches/"));
        assert_eq!(outcome.properties["parent"], json!(f.partition.uri));
        assert_eq!(methods(&f.console), vec!["create"]);
    }

    #[test]
    fn test_create_on_roce_uses_port() {
        let f = setup("stopped");
        let ctx = ApplyContext::new(&f.console, false);
        let desired = props(json!({"adapter_name": "ROCE1", "adapter_port": "0"}));
        let outcome = reconcile(&f.handler, TargetState::Present, &desired, &ctx).unwrap();
        let uri = outcome.properties["network-adapter-port-uri"].as_str().unwrap();
        assert!(uri.starts_with("/api/adapters/") && uri.contains("/ports/"));
    }

    #[test]
    fn test_storage_adapter_is_rejected() {
        let f = setup("stopped");
        let ctx = ApplyContext::new(&f.console, false);
        let desired = props(json!({"adapter_name": "FCP1", "adapter_port": 0}));
        let err = reconcile(&f.handler, TargetState::Present, &desired, &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
        assert!(f.console.mutating_calls().is_empty());
    }

    #[test]
    fn test_adapter_fields_come_together() {
        let f = setup("stopped");
        let ctx = ApplyContext::new(&f.console, false);
        let err = reconcile(&f.handler, TargetState::Present, &props(json!({"adapter_name": "OSA1"})), &ctx)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
    }

    #[test]
    fn test_update_waits_for_partition_transition() {
        let f = setup("starting");
        f.console.settle_status_after(&f.partition.uri, "active", 1);
        f.console.add(Kind::Nic, Some(&f.partition.uri), props(json!({"name": "eth0", "device-number": "0100"})));
        let ctx = ApplyContext::new(&f.console, false).with_options(options());

        let outcome = reconcile(
            &f.handler,
            TargetState::Present,
            &props(json!({"device_number": "200", "description": "prod"})),
            &ctx,
        )
        .unwrap();
        assert!(outcome.changed);
        assert_eq!(methods(&f.console), vec!["update"]);
        assert_eq!(f.console.get(&f.partition.uri).unwrap().status(), Some("active"));

        f.console.clear_calls();
        let again = reconcile(
            &f.handler,
            TargetState::Present,
            &props(json!({"device_number": "0200"})),
            &ctx,
        )
        .unwrap();
        assert!(!again.changed);
        assert!(f.console.mutating_calls().is_empty());
    }

    #[test]
    fn test_missing_partition() {
        let f = setup("stopped");
        let handler = Nic::new("CPC1".to_string(), "lp99".to_string(), "eth0".to_string());

        let dry = ApplyContext::new(&f.console, true);
        assert!(reconcile(&handler, TargetState::Present, &Properties::new(), &dry).unwrap().changed);

        let ctx = ApplyContext::new(&f.console, false);
        let err = reconcile(&handler, TargetState::Present, &Properties::new(), &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
    }

    #[test]
    fn test_absent() {
        let f = setup("active");
        f.console.add(Kind::Nic, Some(&f.partition.uri), props(json!({"name": "eth0"})));
        let ctx = ApplyContext::new(&f.console, false);
        assert!(reconcile(&f.handler, TargetState::Absent, &Properties::new(), &ctx).unwrap().changed);
        assert!(!reconcile(&f.handler, TargetState::Absent, &Properties::new(), &ctx).unwrap().changed);
        assert_eq!(methods(&f.console), vec!["delete"]);
    }
}
