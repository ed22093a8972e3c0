//! In-memory console.
//!
//! Holds resources in a map keyed by URI, records every call made through
//! [`ResourceClient`], and enforces the server-side rules the engine has to
//! respect: partitions must be stopped to be deleted or started, and a
//! crypto configuration must never be left without an adapter or a
//! control-usage domain. Snapshots round-trip through JSON files.

use super::{ResourceClient, single};
use crate::error::{Error, Result};
use crate::types::{
    AccessMode, CryptoConfiguration, Kind, Operation, Properties, Resource, Selector,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One call received by the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Method name (`find`, `create`, `invoke:start`, ...)
    pub method: String,
    /// Target URI (or kind for lookups)
    pub uri: String,
    /// Whether the call changes console state
    pub mutating: bool,
    /// Request payload, when there is one
    pub detail: Option<Value>,
}

#[derive(Debug, Clone)]
struct PendingStatus {
    status: String,
    reads_left: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConsoleState {
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    resources: BTreeMap<String, Resource>,
    /// Status a partition lands in when started (default `active`)
    #[serde(default)]
    start_results: BTreeMap<String, String>,
    #[serde(skip)]
    pending: BTreeMap<String, PendingStatus>,
    #[serde(skip)]
    calls: Vec<Call>,
    #[serde(skip)]
    network_failures: u32,
}

impl ConsoleState {
    fn record(&mut self, method: &str, uri: &str, mutating: bool, detail: Option<Value>) -> Result<()> {
        self.calls.push(Call {
            method: method.to_string(),
            uri: uri.to_string(),
            mutating,
            detail,
        });
        if self.network_failures > 0 {
            self.network_failures -= 1;
            return Err(Error::Network {
                message: format!("injected failure during {method}"),
            });
        }
        Ok(())
    }

    fn resource_mut(&mut self, kind: Kind, uri: &str) -> Result<&mut Resource> {
        self.resources.get_mut(uri).ok_or_else(|| Error::NotFound {
            kind,
            selector: uri.to_string(),
        })
    }

    fn insert(&mut self, kind: Kind, parent: Option<&str>, props: &Properties) -> Resource {
        self.next_id += 1;
        let id = format!("{:08x}", self.next_id);
        let uri = match parent {
            Some(parent) if kind.is_element() => format!("{parent}/{}/{id}", kind.uri_segment()),
            _ => format!("/api/{}/{id}", kind.uri_segment()),
        };
        let id_property = if kind.is_element() {
            "element-id"
        } else {
            "object-id"
        };

        let mut properties = props.clone();
        properties.insert(kind.uri_property().to_string(), json!(uri));
        properties.insert(id_property.to_string(), json!(id));
        properties.insert("class".to_string(), json!(kind.as_str()));
        if let Some(parent) = parent {
            properties.insert("parent".to_string(), json!(parent));
        }
        if kind == Kind::Partition {
            properties
                .entry("status".to_string())
                .or_insert_with(|| json!("stopped"));
        }

        let resource = Resource {
            kind,
            uri: uri.clone(),
            parent: parent.map(ToString::to_string),
            properties,
        };
        self.resources.insert(uri, resource.clone());
        resource
    }

    fn advance_pending(&mut self, uri: &str) {
        let Some(pending) = self.pending.get_mut(uri) else {
            return;
        };
        if pending.reads_left > 0 {
            pending.reads_left -= 1;
            return;
        }
        let status = pending.status.clone();
        self.pending.remove(uri);
        if let Some(resource) = self.resources.get_mut(uri) {
            resource.set("status", json!(status));
        }
    }
}

/// Console that keeps all resources in memory.
#[derive(Debug, Default)]
pub struct MemoryConsole {
    state: Mutex<ConsoleState>,
}

impl MemoryConsole {
    /// Create an empty console.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a console snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: ConsoleState = serde_json::from_str(&content)?;
        log::debug!(
            "loaded {} resources from {}",
            state.resources.len(),
            path.display()
        );
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Save the console state as a JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        state.saved_at = Some(Utc::now());
        let content = serde_json::to_string_pretty(&*state)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        log::debug!("saved console snapshot to {}", path.display());
        Ok(())
    }

    /// When the snapshot was last saved.
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.state().saved_at
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    /// Add a resource without recording a call.
    pub fn add(&self, kind: Kind, parent: Option<&str>, props: Properties) -> Resource {
        self.state().insert(kind, parent, &props)
    }

    /// Add a DPM-enabled CPC.
    pub fn add_cpc(&self, name: &str) -> Resource {
        self.add(Kind::Cpc, None, props(&[("name", json!(name)), ("dpm-enabled", json!(true))]))
    }

    /// Add a partition in the given status.
    pub fn add_partition(&self, cpc_uri: &str, name: &str, status: &str) -> Resource {
        self.add(
            Kind::Partition,
            Some(cpc_uri),
            props(&[
                ("name", json!(name)),
                ("status", json!(status)),
                ("type", json!("linux")),
                ("crypto-configuration", Value::Null),
            ]),
        )
    }

    /// Add an adapter of the given family.
    pub fn add_adapter(&self, cpc_uri: &str, name: &str, family: &str, adapter_type: &str) -> Resource {
        self.add(
            Kind::Adapter,
            Some(cpc_uri),
            props(&[
                ("name", json!(name)),
                ("adapter-family", json!(family)),
                ("type", json!(adapter_type)),
                ("status", json!("active")),
            ]),
        )
    }

    /// Add a port to an adapter.
    pub fn add_port(&self, adapter_uri: &str, index: u64) -> Resource {
        self.add(
            Kind::Port,
            Some(adapter_uri),
            props(&[("name", json!(format!("Port {index}"))), ("index", json!(index))]),
        )
    }

    /// Add a virtual switch backed by an adapter port.
    pub fn add_virtual_switch(&self, cpc_uri: &str, name: &str, adapter_uri: &str, port: u64) -> Resource {
        self.add(
            Kind::VirtualSwitch,
            Some(cpc_uri),
            props(&[
                ("name", json!(name)),
                ("backing-adapter-uri", json!(adapter_uri)),
                ("port", json!(port)),
            ]),
        )
    }

    /// Change properties of a stored resource without recording a call.
    pub fn patch(&self, uri: &str, props: &Properties) -> Result<()> {
        let mut state = self.state();
        let kind = state
            .resources
            .get(uri)
            .map(|r| r.kind)
            .unwrap_or(Kind::Console);
        state.resource_mut(kind, uri)?.merge(props);
        Ok(())
    }

    /// Make the status of `uri` become `status` after `reads` more status reads.
    pub fn settle_status_after(&self, uri: &str, status: &str, reads: u32) {
        self.state().pending.insert(
            uri.to_string(),
            PendingStatus {
                status: status.to_string(),
                reads_left: reads,
            },
        );
    }

    /// Status a partition lands in when it is started.
    pub fn set_start_result(&self, uri: &str, status: &str) {
        self.state()
            .start_results
            .insert(uri.to_string(), status.to_string());
    }

    /// Fail the next `count` calls with a network error.
    pub fn inject_network_failures(&self, count: u32) {
        self.state().network_failures = count;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// All calls received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Calls that changed console state.
    pub fn mutating_calls(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.mutating)
            .cloned()
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Current stored copy of a resource.
    pub fn get(&self, uri: &str) -> Option<Resource> {
        self.state().resources.get(uri).cloned()
    }

    /// Number of stored resources.
    pub fn len(&self) -> usize {
        self.state().resources.len()
    }

    /// Whether the console holds no resources.
    pub fn is_empty(&self) -> bool {
        self.state().resources.is_empty()
    }
}

fn props(pairs: &[(&str, Value)]) -> Properties {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}

fn conflict(message: impl Into<String>) -> Error {
    Error::api(409, 1, message)
}

fn apply_crypto(resource: &mut Resource, operation: &Operation) -> Result<()> {
    let mut config = CryptoConfiguration::from_value(resource.get("crypto-configuration"))?;
    match operation {
        Operation::IncreaseCryptoConfig {
            adapter_uris,
            domain_configs,
        } => {
            for uri in adapter_uris {
                if !config.crypto_adapter_uris.contains(uri) {
                    config.crypto_adapter_uris.push(uri.clone());
                }
            }
            for domain in domain_configs {
                if config
                    .crypto_domain_configurations
                    .iter()
                    .any(|d| d.domain_index == domain.domain_index)
                {
                    return Err(conflict(format!(
                        "domain {} is already in the crypto configuration",
                        domain.domain_index
                    )));
                }
                config.crypto_domain_configurations.push(*domain);
            }
        }
        Operation::DecreaseCryptoConfig {
            adapter_uris,
            domain_indexes,
        } => {
            config.crypto_adapter_uris.retain(|u| !adapter_uris.contains(u));
            config
                .crypto_domain_configurations
                .retain(|d| !domain_indexes.contains(&d.domain_index));
        }
        Operation::ChangeCryptoDomainConfig {
            domain_index,
            access_mode,
        } => {
            let domain = config
                .crypto_domain_configurations
                .iter_mut()
                .find(|d| d.domain_index == *domain_index)
                .ok_or_else(|| {
                    conflict(format!(
                        "domain {domain_index} is not in the crypto configuration"
                    ))
                })?;
            domain.access_mode = *access_mode;
        }
        _ => return Ok(()),
    }

    if !config.is_consistent() {
        return Err(Error::api(
            409,
            111,
            format!(
                "crypto configuration of {resource} needs at least one adapter and one {} domain",
                AccessMode::ControlUsage
            ),
        ));
    }
    resource.set("crypto-configuration", config.to_value());
    Ok(())
}

impl ResourceClient for MemoryConsole {
    fn find(&self, selector: &Selector) -> Result<Resource> {
        let matches = self.list(selector)?;
        single(selector, matches)
    }

    fn list(&self, selector: &Selector) -> Result<Vec<Resource>> {
        let mut state = self.state();
        state.record("list", selector.kind.as_str(), false, None)?;
        Ok(state
            .resources
            .values()
            .filter(|r| selector.matches(r))
            .cloned()
            .collect())
    }

    fn create(&self, kind: Kind, parent: Option<&str>, props: &Properties) -> Result<Resource> {
        let mut state = self.state();
        state.record(
            "create",
            parent.unwrap_or(kind.as_str()),
            true,
            Some(Value::Object(props.clone())),
        )?;

        if let Some(parent) = parent
            && !state.resources.contains_key(parent)
        {
            return Err(Error::api(404, 1, format!("parent {parent} does not exist")));
        }
        if let Some(name) = props.get("name")
            && state
                .resources
                .values()
                .any(|r| r.kind == kind && r.parent.as_deref() == parent && r.get("name") == Some(name))
        {
            return Err(Error::api(400, 8, format!("a {kind} named {name} already exists")));
        }

        // The only adapters a console can create are HiperSockets adapters.
        let mut props = props.clone();
        if kind == Kind::Adapter {
            for key in ["type", "adapter-family"] {
                props.entry(key).or_insert_with(|| json!("hipersockets"));
            }
            props.entry("status").or_insert_with(|| json!("active"));
        }
        let resource = state.insert(kind, parent, &props);
        log::debug!("created {resource} at {}", resource.uri);
        Ok(resource)
    }

    fn update(&self, resource: &Resource, props: &Properties) -> Result<()> {
        let mut state = self.state();
        state.record(
            "update",
            &resource.uri,
            true,
            Some(Value::Object(props.clone())),
        )?;
        state.resource_mut(resource.kind, &resource.uri)?.merge(props);
        Ok(())
    }

    fn delete(&self, resource: &Resource) -> Result<()> {
        let mut state = self.state();
        state.record("delete", &resource.uri, true, None)?;
        let stored = state.resource_mut(resource.kind, &resource.uri)?;
        if stored.kind == Kind::Partition
            && !matches!(stored.status(), Some("stopped" | "reservation-error"))
        {
            return Err(conflict(format!("{stored} is not stopped")));
        }

        let prefix = format!("{}/", resource.uri);
        state
            .resources
            .retain(|uri, r| uri != &resource.uri && !uri.starts_with(&prefix) && r.parent.as_deref() != Some(resource.uri.as_str()));
        state.pending.remove(&resource.uri);
        Ok(())
    }

    fn pull_full_properties(&self, resource: &mut Resource) -> Result<()> {
        let mut state = self.state();
        state.record("pull", &resource.uri, false, None)?;
        let stored = state.resource_mut(resource.kind, &resource.uri)?;
        resource.properties = stored.properties.clone();
        resource.parent = stored.parent.clone();
        Ok(())
    }

    fn invoke(&self, resource: &Resource, operation: &Operation) -> Result<()> {
        let mut state = self.state();
        state.record(
            &format!("invoke:{}", operation.name()),
            &resource.uri,
            true,
            serde_json::to_value(operation).ok(),
        )?;
        let start_result = state
            .start_results
            .get(&resource.uri)
            .cloned()
            .unwrap_or_else(|| "active".to_string());
        let stored = state.resource_mut(resource.kind, &resource.uri)?;

        match operation {
            Operation::Start => {
                if !matches!(stored.status(), Some("stopped" | "reservation-error")) {
                    return Err(conflict(format!(
                        "cannot start {stored} in status {}",
                        stored.status().unwrap_or("unknown")
                    )));
                }
                stored.set("status", json!(start_result));
            }
            Operation::Stop => {
                if matches!(stored.status(), Some("stopped" | "starting" | "stopping")) {
                    return Err(conflict(format!(
                        "cannot stop {stored} in status {}",
                        stored.status().unwrap_or("unknown")
                    )));
                }
                stored.set("status", json!("stopped"));
            }
            Operation::ChangeAdapterType { adapter_type } => {
                stored.set("type", json!(adapter_type));
            }
            Operation::ChangeCryptoType { crypto_type } => {
                stored.set("crypto-type", json!(crypto_type));
            }
            Operation::IncreaseCryptoConfig { .. }
            | Operation::DecreaseCryptoConfig { .. }
            | Operation::ChangeCryptoDomainConfig { .. } => apply_crypto(stored, operation)?,
            Operation::AddUserRole { user_role_uri } => {
                let mut roles = stored
                    .get("user-roles")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if !roles.iter().any(|r| r == user_role_uri) {
                    roles.push(json!(user_role_uri));
                }
                stored.set("user-roles", Value::Array(roles));
            }
            Operation::RemoveUserRole { user_role_uri } => {
                let mut roles = stored
                    .get("user-roles")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                roles.retain(|r| r != user_role_uri);
                stored.set("user-roles", Value::Array(roles));
            }
        }
        log::debug!("invoked {operation} on {}", resource.uri);
        Ok(())
    }

    fn get_property(&self, resource: &Resource, name: &str) -> Result<Option<Value>> {
        let mut state = self.state();
        state.record("get", &resource.uri, false, Some(json!(name)))?;
        if name == "status" {
            state.advance_pending(&resource.uri);
        }
        let stored = state.resource_mut(resource.kind, &resource.uri)?;
        Ok(stored.get(name).cloned())
    }
}
