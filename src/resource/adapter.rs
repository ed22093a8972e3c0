//! Adapter resource - physical adapters of a CPC and HiperSockets adapters
//!
//! Physical adapters can only be configured: their properties are updated
//! and their adapter type or crypto type changed through operations. The
//! only adapters that can be created or deleted are HiperSockets adapters.

use declarative::property::{eq_hex, to_int, to_string};
use declarative::resolve::verbatim;
use declarative::{
    ApplyContext, Converger, Error, ManagedResource, Outcome, PropertySpec, PropertyTable, Result,
    TargetState, Transition, apply,
};
use hmckit::{Kind, Operation, Properties, Resource};
use serde_json::{Value, json};
use std::sync::LazyLock;

use super::{find_child, find_cpc, with_children};

const HIPERSOCKETS: &str = "hipersockets";

static PROPERTIES: LazyLock<PropertyTable> = LazyLock::new(|| {
    PropertyTable::new(
        Kind::Adapter,
        [
            PropertySpec::update_only("allowed_capacity").cast(to_int),
            PropertySpec::update_only("channel_path_id").compare_with(eq_hex),
            PropertySpec::update_only("crypto_number").cast(to_int),
            PropertySpec::update_only("tke_commands_enabled"),
            PropertySpec::create_update("description").cast(to_string),
            PropertySpec::create_update("maximum_transmission_unit_size").cast(to_int),
            PropertySpec::read_only("name"),
            PropertySpec::read_only("object_uri"),
            PropertySpec::read_only("object_id"),
            PropertySpec::read_only("parent"),
            PropertySpec::read_only("class"),
            PropertySpec::read_only("status"),
            PropertySpec::read_only("adapter_id"),
            PropertySpec::read_only("adapter_family"),
            PropertySpec::read_only("detected_card_type"),
            PropertySpec::read_only("card_location"),
            PropertySpec::read_only("port_count"),
            PropertySpec::read_only("network_port_uris"),
            PropertySpec::read_only("storage_port_uris"),
            PropertySpec::read_only("state"),
            PropertySpec::read_only("configured_capacity"),
            PropertySpec::read_only("used_capacity"),
            PropertySpec::read_only("maximum_total_capacity"),
            PropertySpec::read_only("physical_channel_status"),
            PropertySpec::read_only("udx_loaded"),
        ],
    )
});

fn change_adapter_type(adapter_type: String) -> Operation {
    Operation::ChangeAdapterType { adapter_type }
}

fn change_crypto_type(crypto_type: String) -> Operation {
    Operation::ChangeCryptoType { crypto_type }
}

/// Translate a short crypto type to the console's spelling.
pub(crate) fn crypto_type(value: &str) -> Result<String> {
    let hmc = match value {
        "acc" => "accelerator",
        "cca" => "cca-coprocessor",
        "ep11" => "ep11-coprocessor",
        other => {
            return Err(Error::parameter(format!(
                "invalid crypto type {other:?}: must be one of acc, cca, ep11"
            )));
        }
    };
    Ok(hmc.to_string())
}

/// Adapter handler
#[derive(Debug, Clone)]
pub struct Adapter {
    cpc: String,
    name: String,
}

impl Adapter {
    pub fn new(cpc: String, name: String) -> Self {
        Self { cpc, name }
    }

    fn locate(&self, ctx: &ApplyContext<'_>) -> Result<(Resource, Option<Resource>)> {
        let cpc = find_cpc(ctx.client, &self.cpc)?;
        let adapter = find_child(ctx.client, Kind::Adapter, &cpc.uri, &self.name)?;
        Ok((cpc, adapter))
    }

    fn result(&self, ctx: &ApplyContext<'_>, changed: bool, adapter: &Resource) -> Result<Outcome> {
        let properties = with_children(ctx.client, adapter, &[("ports", Kind::Port)])?;
        Ok(Outcome::new(changed, properties))
    }

    /// Reconfigure an existing adapter.
    fn configure(&self, ctx: &ApplyContext<'_>, adapter: &mut Resource, desired: &Properties) -> Result<bool> {
        let adapter_type = Transition::new("type", "type", verbatim, change_adapter_type);
        let crypto = Transition::new("crypto_type", "crypto-type", crypto_type, change_crypto_type);
        apply::refresh(ctx, adapter)?;
        Converger::new(&PROPERTIES)
            .rule(&adapter_type)
            .rule(&crypto)
            .update(ctx, adapter, desired)
    }

    /// Create a HiperSockets adapter.
    fn create(&self, ctx: &ApplyContext<'_>, cpc: &Resource, desired: &Properties) -> Result<Resource> {
        match desired.get("type").and_then(Value::as_str) {
            Some(HIPERSOCKETS) => {}
            Some(other) => {
                return Err(Error::parameter(format!(
                    "\"type\" is {other:?} when creating adapter '{}'; only {HIPERSOCKETS} adapters can be created",
                    self.name
                )));
            }
            None => {
                return Err(Error::parameter(format!(
                    "\"type\" must be {HIPERSOCKETS:?} to create adapter '{}'",
                    self.name
                )));
            }
        }

        let mut rest = desired.clone();
        rest.remove("type");
        let converger = Converger::new(&PROPERTIES);
        let changes = converger.changes(ctx, &rest, None)?;
        let deferred = changes.deferred_update();
        if !deferred.is_empty() {
            let names: Vec<&str> = deferred.keys().map(String::as_str).collect();
            return Err(Error::parameter(format!(
                "properties cannot be set when creating a {HIPERSOCKETS} adapter: {}",
                names.join(", ")
            )));
        }

        let mut adapter = apply::create(ctx, Kind::Adapter, Some(&cpc.uri), &self.name, &changes)?;
        if adapter.is_local() {
            for (key, value) in [
                ("type", json!(HIPERSOCKETS)),
                ("adapter-family", json!(HIPERSOCKETS)),
                ("detected-card-type", json!(HIPERSOCKETS)),
                ("port-count", json!(1)),
                ("maximum-transmission-unit-size", json!(8)),
                ("description", json!("")),
            ] {
                if !adapter.properties.contains_key(key) {
                    adapter.set(key, value);
                }
            }
        }
        Ok(adapter)
    }
}

impl ManagedResource for Adapter {
    fn kind(&self) -> Kind {
        Kind::Adapter
    }

    fn describe(&self) -> String {
        format!("adapter '{}' in CPC '{}'", self.name, self.cpc)
    }

    fn supported_states(&self) -> &'static [TargetState] {
        &[
            TargetState::Set,
            TargetState::Present,
            TargetState::Absent,
            TargetState::Facts,
        ]
    }

    fn ensure_absent(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, adapter) = self.locate(ctx)?;
        let Some(adapter) = adapter else {
            return Ok(Outcome::absent(false));
        };
        if adapter.get_str("type") != Some(HIPERSOCKETS) {
            return Err(Error::parameter(format!(
                "{} is a physical adapter and cannot be deleted",
                self.describe()
            )));
        }
        apply::delete(ctx, &adapter)?;
        Ok(Outcome::absent(true))
    }

    fn ensure_state(
        &self,
        target: TargetState,
        desired: &Properties,
        ctx: &ApplyContext<'_>,
    ) -> Result<Outcome> {
        let (cpc, adapter) = self.locate(ctx)?;
        match (target, adapter) {
            (_, Some(mut adapter)) => {
                let changed = self.configure(ctx, &mut adapter, desired)?;
                self.result(ctx, changed, &adapter)
            }
            (TargetState::Present, None) => {
                let adapter = self.create(ctx, &cpc, desired)?;
                self.result(ctx, true, &adapter)
            }
            (_, None) => Err(Error::parameter(format!("{} does not exist", self.describe()))),
        }
    }

    fn facts(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, adapter) = self.locate(ctx)?;
        let mut adapter =
            adapter.ok_or_else(|| Error::parameter(format!("{} does not exist", self.describe())))?;
        apply::refresh(ctx, &mut adapter)?;
        self.result(ctx, false, &adapter)
    }
}
