//! Partition resource - properties, boot device references, crypto
//! configuration and start/stop lifecycle

use declarative::diff::ChangeSet;
use declarative::property::{eq_hex, to_bool, to_float, to_int, to_string};
use declarative::reconfigure::{self, SubConfig};
use declarative::resolve::{mutually_exclusive, require_together, str_field};
use declarative::{
    ApplyContext, ArtificialProperty, ByName, Converger, Error, Lifecycle, ManagedResource,
    Outcome, PropertySpec, PropertyTable, ResolveContext, Result, Scope, StatusModel, TargetState,
    apply,
};
use hmckit::{AccessMode, Kind, Properties, Resource, ResourceClient, Selector};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use super::{find_child, find_cpc, with_children};

/// Operational statuses of a DPM partition.
pub static PARTITION: StatusModel = StatusModel {
    quiescent: &["stopped", "reservation-error"],
    running: &["active", "degraded"],
    halted: &["terminated", "paused"],
    starting: &["starting"],
    stopping: &["stopping"],
    error: &["communications-not-active", "status-check"],
    start_end: &["active", "degraded", "reservation-error", "terminated"],
    stop_end: &["stopped", "terminated"],
};

/// Properties that must be given when a partition is created.
const REQUIRED_FOR_CREATE: &[&str] = &["initial_memory", "maximum_memory"];

/// Properties a boot device needs on create.
fn boot_device_requires(boot_device: &str) -> &'static [&'static str] {
    match boot_device {
        "ftp" => &[
            "boot_ftp_host",
            "boot_ftp_username",
            "boot_ftp_password",
            "boot_ftp_insfile",
        ],
        "removable-media" => &["boot_removable_media", "boot_removable_media_type"],
        "storage-adapter" => &["boot_logical_unit_number", "boot_world_wide_port_name"],
        _ => &[],
    }
}

fn given(desired: &Properties, name: &str) -> bool {
    desired.get(name).is_some_and(|v| !v.is_null())
}

/// A processor count that is absent or zero.
fn no_processors(desired: &Properties, name: &str) -> bool {
    match desired.get(name) {
        None | Some(Value::Null) => true,
        Some(value) => to_int(value, name).is_ok_and(|v| v.as_i64() == Some(0)),
    }
}

/// Properties a create of `desired` is missing. Which ones are required
/// depends on the boot device, the partition type and the processor counts.
fn missing_for_create(desired: &Properties) -> Vec<&'static str> {
    let mut required = REQUIRED_FOR_CREATE.to_vec();
    let autogenerate = desired
        .get("autogenerate_partition_id")
        .and_then(|v| to_bool(v, "autogenerate_partition_id").ok());
    if autogenerate == Some(Value::Bool(false)) {
        required.push("partition_id");
    }
    if no_processors(desired, "cp_processors") {
        required.push("ifl_processors");
    }
    if no_processors(desired, "ifl_processors") {
        required.push("cp_processors");
    }
    if let Some(boot_device) = desired.get("boot_device").and_then(Value::as_str) {
        required.extend_from_slice(boot_device_requires(boot_device));
    }
    if desired.get("type").and_then(Value::as_str) == Some("ssc") {
        required.extend_from_slice(&["ssc_host_name", "ssc_master_userid", "ssc_master_pw"]);
    }
    required.retain(|name| !given(desired, name));
    required
}

static PROPERTIES: LazyLock<PropertyTable> = LazyLock::new(|| {
    PropertyTable::new(
        Kind::Partition,
        [
            PropertySpec::create_only("type"),
            PropertySpec::create_update("description").cast(to_string),
            PropertySpec::create_update("short_name").quiesce(),
            PropertySpec::create_update("partition_id").quiesce(),
            PropertySpec::create_update("autogenerate_partition_id").quiesce(),
            PropertySpec::create_update("ifl_processors").cast(to_int),
            PropertySpec::create_update("cp_processors").cast(to_int),
            PropertySpec::create_update("processor_mode").quiesce(),
            PropertySpec::create_update("initial_memory").cast(to_int),
            PropertySpec::create_update("maximum_memory").cast(to_int).quiesce(),
            PropertySpec::create_update("reserve_resources"),
            PropertySpec::create_update("boot_device"),
            PropertySpec::create_update("boot_timeout").cast(to_int),
            PropertySpec::create_update("boot_ftp_host").cast(to_string),
            PropertySpec::create_update("boot_ftp_username").cast(to_string),
            PropertySpec::create_update("boot_ftp_password").cast(to_string),
            PropertySpec::create_update("boot_ftp_insfile").cast(to_string),
            PropertySpec::create_update("boot_removable_media").cast(to_string),
            PropertySpec::create_update("boot_removable_media_type"),
            PropertySpec::create_update("boot_record_lba"),
            PropertySpec::create_update("boot_configuration_selector").cast(to_int),
            PropertySpec::create_update("access_global_performance_data"),
            PropertySpec::create_update("permit_cross_partition_commands"),
            PropertySpec::create_update("access_basic_counter_set"),
            PropertySpec::create_update("permit_des_key_import_functions").quiesce(),
            PropertySpec::create_update("permit_aes_key_import_functions").quiesce(),
            PropertySpec::create_update("permit_ecc_key_import_functions"),
            PropertySpec::create_update("ssc_host_name").cast(to_string),
            PropertySpec::create_update("ssc_ipv4_gateway").cast(to_string),
            PropertySpec::create_update("ssc_ipv6_gateway").cast(to_string),
            PropertySpec::create_update("ssc_dns_servers"),
            PropertySpec::create_update("ssc_master_userid").cast(to_string),
            PropertySpec::create_update("ssc_master_pw").cast(to_string),
            PropertySpec::update_only("ssc_boot_selection"),
            PropertySpec::update_only("acceptable_status"),
            PropertySpec::update_only("processor_management_enabled"),
            PropertySpec::update_only("ifl_absolute_processor_capping"),
            PropertySpec::update_only("ifl_absolute_processor_capping_value").cast(to_float),
            PropertySpec::update_only("initial_ifl_processing_weight").cast(to_int),
            PropertySpec::update_only("minimum_ifl_processing_weight").cast(to_int),
            PropertySpec::update_only("maximum_ifl_processing_weight").cast(to_int),
            PropertySpec::update_only("cp_absolute_processor_capping"),
            PropertySpec::update_only("cp_absolute_processor_capping_value").cast(to_float),
            PropertySpec::update_only("initial_cp_processing_weight").cast(to_int),
            PropertySpec::update_only("boot_storage_volume"),
            PropertySpec::update_only("boot_logical_unit_number").compare_with(eq_hex),
            PropertySpec::update_only("boot_world_wide_port_name").compare_with(eq_hex),
            PropertySpec::update_only("boot_load_parameters").cast(to_string),
            PropertySpec::update_only("boot_os_specific_parameters").cast(to_string),
            PropertySpec::internal("boot_storage_device", false, true),
            PropertySpec::internal("boot_network_device", false, true),
            PropertySpec::read_only("name"),
            PropertySpec::read_only("object_uri"),
            PropertySpec::read_only("object_id"),
            PropertySpec::read_only("parent"),
            PropertySpec::read_only("class"),
            PropertySpec::read_only("status"),
            PropertySpec::read_only("has_unacceptable_status"),
            PropertySpec::read_only("os_name"),
            PropertySpec::read_only("os_type"),
            PropertySpec::read_only("os_version"),
            PropertySpec::read_only("crypto_configuration"),
        ],
    )
});

/// `boot_storage_group_name` + `boot_storage_volume_name`: the boot volume
/// named through its storage group.
struct BootVolume;

impl ArtificialProperty for BootVolume {
    fn fields(&self) -> &[&'static str] {
        &["boot_storage_group_name", "boot_storage_volume_name"]
    }

    fn resolve(&self, desired: &Properties, ctx: &ResolveContext<'_>) -> Result<ChangeSet> {
        require_together(desired, "boot_storage_group_name", "boot_storage_volume_name")?;
        mutually_exclusive(desired, "boot_storage_volume_name", "boot_storage_volume")?;
        let mut changes = ChangeSet::default();
        let (Some(group_name), Some(volume_name)) = (
            str_field(desired, "boot_storage_group_name")?,
            str_field(desired, "boot_storage_volume_name")?,
        ) else {
            return Ok(changes);
        };
        let Some(live) = ctx.live else {
            return Err(Error::parameter(
                "\"boot_storage_volume_name\" can only be specified when the partition already exists",
            ));
        };

        let group = ctx
            .lookup
            .find_by_name(Kind::StorageGroup, None, group_name)?
            .ok_or_else(|| Error::ReferenceNotFound {
                field: "boot_storage_group_name".to_string(),
                kind: Kind::StorageGroup,
                name: group_name.to_string(),
                scope: None,
            })?;
        let volume = ctx
            .lookup
            .find_by_name(Kind::StorageVolume, Some(&group.uri), volume_name)?
            .ok_or_else(|| Error::ReferenceNotFound {
                field: "boot_storage_volume_name".to_string(),
                kind: Kind::StorageVolume,
                name: volume_name.to_string(),
                scope: Some(group.to_string()),
            })?;

        log::debug!("{live}: boot volume {volume_name:?} is {}", volume.uri);
        ctx.place(&mut changes, "boot_storage_volume", Value::String(volume.uri))?;
        Ok(changes)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CryptoRequest {
    /// `None` selects every crypto adapter of the CPC
    #[serde(default)]
    crypto_adapter_names: Option<Vec<String>>,
    crypto_domain_configurations: Vec<DomainRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DomainRequest {
    domain_index: Value,
    access_mode: AccessMode,
}

/// `crypto_configuration`: the complete desired crypto configuration,
/// converged through ordered add/change/remove operations.
struct CryptoConfig {
    cpc_uri: String,
}

impl CryptoConfig {
    fn desired(&self, request: &CryptoRequest, ctx: &ResolveContext<'_>) -> Result<SubConfig> {
        let adapters = match &request.crypto_adapter_names {
            None => ctx
                .lookup
                .children(Kind::Adapter, &self.cpc_uri)?
                .into_iter()
                .filter(|a| a.get_str("type") == Some("crypto"))
                .map(|a| a.uri)
                .collect(),
            Some(names) => {
                let mut uris = BTreeSet::new();
                for name in names {
                    let adapter = ctx
                        .lookup
                        .find_by_name(Kind::Adapter, Some(&self.cpc_uri), name)?
                        .filter(|a| a.get_str("type") == Some("crypto"))
                        .ok_or_else(|| Error::ReferenceNotFound {
                            field: "crypto_configuration.crypto_adapter_names".to_string(),
                            kind: Kind::Adapter,
                            name: name.clone(),
                            scope: None,
                        })?;
                    uris.insert(adapter.uri);
                }
                uris
            }
        };

        let mut domains = std::collections::BTreeMap::new();
        for domain in &request.crypto_domain_configurations {
            let index = to_int(&domain.domain_index, "domain_index")?;
            let index = index
                .as_u64()
                .and_then(|i| u32::try_from(i).ok())
                .ok_or_else(|| Error::parameter(format!("invalid domain index {index}")))?;
            domains.insert(index, domain.access_mode);
        }
        Ok(SubConfig { adapters, domains })
    }
}

impl ArtificialProperty for CryptoConfig {
    fn fields(&self) -> &[&'static str] {
        &["crypto_configuration"]
    }

    fn resolve(&self, desired: &Properties, ctx: &ResolveContext<'_>) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        let Some(value) = desired.get("crypto_configuration") else {
            return Ok(changes);
        };
        let request: CryptoRequest = serde_json::from_value(value.clone()).map_err(|e| {
            Error::parameter(format!("\"crypto_configuration\" is malformed: {e}"))
        })?;

        let target = self.desired(&request, ctx)?;
        if !target.is_consistent() {
            return Err(Error::parameter(format!(
                "\"crypto_configuration\" needs at least one adapter and one domain in {} mode",
                AccessMode::ControlUsage
            )));
        }
        let current = match ctx.live {
            Some(live) => SubConfig::of(live)?,
            None => SubConfig::default(),
        };
        changes.side_ops = reconfigure::plan(&current, &target);
        Ok(changes)
    }
}

fn find_by_uri(client: &dyn ResourceClient, kind: Kind, uri: &str) -> Result<Option<Resource>> {
    Ok(client.find_optional(&Selector::uri(kind, uri))?)
}

fn uris(resource: &Resource, property: &str) -> Vec<String> {
    resource
        .get(property)
        .and_then(Value::as_array)
        .map(|uris| uris.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Adapter behind a NIC and the port index the NIC uses. OSA and
/// HiperSockets NICs go through a virtual switch, RoCE and CNA NICs name
/// the adapter port directly.
fn nic_backing(client: &dyn ResourceClient, nic: &Resource) -> Result<Option<(Resource, Value)>> {
    if let Some(vswitch_uri) = nic.get_str("virtual-switch-uri") {
        let Some(vswitch) = find_by_uri(client, Kind::VirtualSwitch, vswitch_uri)? else {
            return Ok(None);
        };
        let adapter = match vswitch.get_str("backing-adapter-uri") {
            Some(uri) => find_by_uri(client, Kind::Adapter, uri)?,
            None => None,
        };
        let port = vswitch.get("port").cloned().unwrap_or(Value::Null);
        return Ok(adapter.map(|adapter| (adapter, port)));
    }

    let Some(port_uri) = nic.get_str("network-adapter-port-uri") else {
        return Ok(None);
    };
    let Some(port) = find_by_uri(client, Kind::Port, port_uri)? else {
        return Ok(None);
    };
    let adapter = match &port.parent {
        Some(uri) => find_by_uri(client, Kind::Adapter, uri)?,
        None => None,
    };
    let index = port.get("index").cloned().unwrap_or(Value::Null);
    Ok(adapter.map(|adapter| (adapter, index)))
}

/// NICs of the partition with `adapter-name`, `adapter-port` and
/// `adapter-id` of their backing adapter.
fn nic_listing(client: &dyn ResourceClient, partition: &Resource) -> Result<Value> {
    if partition.is_local() {
        return Ok(Value::Array(Vec::new()));
    }
    let nics = client.list(&Selector::new(Kind::Nic).within(&partition.uri))?;
    let mut listing = Vec::with_capacity(nics.len());
    for nic in nics {
        let backing = nic_backing(client, &nic)?;
        let mut properties = nic.properties;
        let (name, port, id) = match backing {
            Some((adapter, port)) => (
                Value::String(adapter.name().to_string()),
                port,
                adapter.get("adapter-id").cloned().unwrap_or(Value::Null),
            ),
            None => (Value::Null, Value::Null, Value::Null),
        };
        properties.insert("adapter-name".to_string(), name);
        properties.insert("adapter-port".to_string(), port);
        properties.insert("adapter-id".to_string(), id);
        listing.push(Value::Object(properties));
    }
    Ok(Value::Array(listing))
}

/// Storage group and volume names of the boot volume, null without one.
fn boot_volume_names(client: &dyn ResourceClient, partition: &Resource) -> Result<(Value, Value)> {
    let Some(uri) = partition.get_str("boot-storage-volume") else {
        return Ok((Value::Null, Value::Null));
    };
    let Some(volume) = find_by_uri(client, Kind::StorageVolume, uri)? else {
        log::debug!("{partition}: boot volume {uri} not found");
        return Ok((Value::Null, Value::Null));
    };
    let group = match &volume.parent {
        Some(group_uri) => find_by_uri(client, Kind::StorageGroup, group_uri)?,
        None => None,
    };
    Ok((
        group.map_or(Value::Null, |g| Value::String(g.name().to_string())),
        Value::String(volume.name().to_string()),
    ))
}

/// Attached storage groups with their volumes and candidate adapter ports,
/// each port carrying its adapter as `parent-adapter`.
fn storage_groups(client: &dyn ResourceClient, partition: &Resource) -> Result<Value> {
    let mut groups = Vec::new();
    for uri in uris(partition, "storage-group-uris") {
        let Some(group) = find_by_uri(client, Kind::StorageGroup, &uri)? else {
            log::debug!("{partition}: storage group {uri} not found");
            continue;
        };
        let volumes = client.list(&Selector::new(Kind::StorageVolume).within(&group.uri))?;

        let mut ports = Vec::new();
        for port_uri in uris(&group, "candidate-adapter-port-uris") {
            let Some(port) = find_by_uri(client, Kind::Port, &port_uri)? else {
                continue;
            };
            let adapter = match &port.parent {
                Some(adapter_uri) => find_by_uri(client, Kind::Adapter, adapter_uri)?,
                None => None,
            };
            let mut properties = port.properties;
            properties.insert(
                "parent-adapter".to_string(),
                adapter.map_or(Value::Null, |a| Value::Object(a.properties)),
            );
            ports.push(Value::Object(properties));
        }

        let mut properties = group.properties;
        properties.insert(
            "storage-volumes".to_string(),
            Value::Array(volumes.into_iter().map(|v| Value::Object(v.properties)).collect()),
        );
        properties.insert("candidate-adapter-ports".to_string(), Value::Array(ports));
        groups.push(Value::Object(properties));
    }
    Ok(Value::Array(groups))
}

/// The crypto configuration with the attached adapters' properties under
/// `crypto-adapters`; `None` when the partition has no configuration.
fn crypto_adapters(client: &dyn ResourceClient, partition: &Resource) -> Result<Option<Value>> {
    let Some(Value::Object(config)) = partition.get("crypto-configuration") else {
        return Ok(None);
    };
    let adapter_uris: Vec<String> = config
        .get("crypto-adapter-uris")
        .and_then(Value::as_array)
        .map(|uris| uris.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let mut adapters = Vec::with_capacity(adapter_uris.len());
    for uri in &adapter_uris {
        if let Some(adapter) = find_by_uri(client, Kind::Adapter, uri)? {
            adapters.push(Value::Object(adapter.properties));
        }
    }
    let mut config = config.clone();
    config.insert("crypto-adapters".to_string(), Value::Array(adapters));
    Ok(Some(Value::Object(config)))
}

/// Partition handler
#[derive(Debug, Clone)]
pub struct Partition {
    cpc: String,
    name: String,
    expand_storage_groups: bool,
    expand_crypto_adapters: bool,
}

impl Partition {
    pub fn new(cpc: String, name: String) -> Self {
        Self {
            cpc,
            name,
            expand_storage_groups: false,
            expand_crypto_adapters: false,
        }
    }

    /// Report attached storage groups under `storage-groups`.
    pub fn expand_storage_groups(mut self, expand: bool) -> Self {
        self.expand_storage_groups = expand;
        self
    }

    /// Report the attached crypto adapters inside `crypto-configuration`.
    pub fn expand_crypto_adapters(mut self, expand: bool) -> Self {
        self.expand_crypto_adapters = expand;
        self
    }

    fn locate(&self, ctx: &ApplyContext<'_>) -> Result<(Resource, Option<Resource>)> {
        let cpc = find_cpc(ctx.client, &self.cpc)?;
        let partition = find_child(ctx.client, Kind::Partition, &cpc.uri, &self.name)?;
        Ok((cpc, partition))
    }

    fn result(&self, ctx: &ApplyContext<'_>, changed: bool, partition: &Resource) -> Result<Outcome> {
        let client = ctx.client;
        let mut properties = with_children(
            client,
            partition,
            &[("hbas", Kind::Hba), ("virtual-functions", Kind::VirtualFunction)],
        )?;
        properties.insert("nics".to_string(), nic_listing(client, partition)?);

        let (group, volume) = boot_volume_names(client, partition)?;
        properties.insert("boot-storage-group-name".to_string(), group);
        properties.insert("boot-storage-volume-name".to_string(), volume);

        if self.expand_storage_groups {
            properties.insert("storage-groups".to_string(), storage_groups(client, partition)?);
        }
        if self.expand_crypto_adapters
            && let Some(config) = crypto_adapters(client, partition)?
        {
            properties.insert("crypto-configuration".to_string(), config);
        }
        Ok(Outcome::new(changed, properties))
    }
}

impl ManagedResource for Partition {
    fn kind(&self) -> Kind {
        Kind::Partition
    }

    fn describe(&self) -> String {
        format!("partition '{}' in CPC '{}'", self.name, self.cpc)
    }

    fn supported_states(&self) -> &'static [TargetState] {
        &[
            TargetState::Absent,
            TargetState::Present,
            TargetState::Active,
            TargetState::Stopped,
            TargetState::Facts,
        ]
    }

    fn ensure_absent(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, partition) = self.locate(ctx)?;
        let Some(mut partition) = partition else {
            return Ok(Outcome::absent(false));
        };
        Lifecycle::new(ctx, &PARTITION).ensure_quiescent(&mut partition)?;
        apply::delete(ctx, &partition)?;
        Ok(Outcome::absent(true))
    }

    fn ensure_state(
        &self,
        target: TargetState,
        desired: &Properties,
        ctx: &ApplyContext<'_>,
    ) -> Result<Outcome> {
        let (cpc, partition) = self.locate(ctx)?;
        let hba_rule = ByName::new("boot_storage_hba_name", Kind::Hba, "boot_storage_device", Scope::Children);
        let nic_rule = ByName::new("boot_network_nic_name", Kind::Nic, "boot_network_device", Scope::Children);
        let crypto_rule = CryptoConfig { cpc_uri: cpc.uri.clone() };
        let converger = Converger::new(&PROPERTIES)
            .rule(&hba_rule)
            .rule(&nic_rule)
            .rule(&BootVolume)
            .rule(&crypto_rule);
        let machine = Lifecycle::new(ctx, &PARTITION);

        let (mut changed, quiesced, mut partition) = match partition {
            None => {
                let missing = missing_for_create(desired);
                if !missing.is_empty() {
                    return Err(Error::parameter(format!(
                        "properties required to create {} are missing: {}",
                        self.describe(),
                        missing.join(", ")
                    )));
                }
                let created = converger.create(ctx, Some(&cpc.uri), &self.name, desired)?;
                (true, false, created)
            }
            Some(mut partition) => {
                apply::refresh(ctx, &mut partition)?;
                // a partition headed for stopped is stopped before it is updated
                let stopped = target == TargetState::Stopped && machine.ensure_quiescent(&mut partition)?;
                if stopped && !ctx.dry_run {
                    apply::refresh(ctx, &mut partition)?;
                }
                let result = converger.update_quiesced(ctx, &machine, &mut partition, desired)?;
                (stopped || result.changed, result.quiesced, partition)
            }
        };

        match target {
            TargetState::Active => changed |= machine.ensure_running(&mut partition)?,
            TargetState::Stopped => changed |= machine.ensure_quiescent(&mut partition)?,
            _ if quiesced => {
                log::debug!("{partition}: restarting after update");
                machine.ensure_running(&mut partition)?;
            }
            _ => {}
        }
        self.result(ctx, changed, &partition)
    }

    fn facts(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, partition) = self.locate(ctx)?;
        let mut partition = partition.ok_or_else(|| {
            Error::parameter(format!("{} does not exist", self.describe()))
        })?;
        apply::refresh(ctx, &mut partition)?;
        self.result(ctx, false, &partition)
    }
}
