//! Managed HMC resource types
//!
//! Each submodule holds the property table of one resource kind and a
//! [`ManagedResource`] handler implementing its target states on top of the
//! reconciliation engine.

pub mod adapter;
pub mod crypto_attachment;
pub mod hba;
pub mod nic;
pub mod partition;
pub mod user;

use anyhow::{Result, bail};
use clap::ValueEnum;
use declarative::ManagedResource;
use declarative::property::to_int;
use declarative::resolve::{ResourceLookup, require_together, str_field};
use hmckit::{Kind, Properties, Resource, ResourceClient, Selector};
use serde_json::Value;
use std::fmt;

/// Resource types the CLI can reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceKind {
    Partition,
    Nic,
    Hba,
    Adapter,
    CryptoAttachment,
    User,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Partition => "partition",
            Self::Nic => "nic",
            Self::Hba => "hba",
            Self::Adapter => "adapter",
            Self::CryptoAttachment => "crypto-attachment",
            Self::User => "user",
        };
        write!(f, "{name}")
    }
}

/// Where a resource lives.
#[derive(Debug, Clone, Default)]
pub struct Address {
    pub cpc: Option<String>,
    pub partition: Option<String>,
    pub name: String,
    /// Partition results list attached storage groups
    pub expand_storage_groups: bool,
    /// Partition results list attached crypto adapters
    pub expand_crypto_adapters: bool,
}

impl Address {
    fn cpc(&self, kind: ResourceKind) -> Result<String> {
        match &self.cpc {
            Some(cpc) => Ok(cpc.clone()),
            None => bail!("{kind} resources need --cpc (or default_cpc in the config file)"),
        }
    }

    fn partition(&self, kind: ResourceKind) -> Result<String> {
        match &self.partition {
            Some(partition) => Ok(partition.clone()),
            None => bail!("{kind} resources need --partition"),
        }
    }
}

/// Build the handler for a resource.
pub fn handler(kind: ResourceKind, address: &Address) -> Result<Box<dyn ManagedResource>> {
    let name = address.name.clone();
    Ok(match kind {
        ResourceKind::Partition => Box::new(
            partition::Partition::new(address.cpc(kind)?, name)
                .expand_storage_groups(address.expand_storage_groups)
                .expand_crypto_adapters(address.expand_crypto_adapters),
        ),
        ResourceKind::Nic => Box::new(nic::Nic::new(
            address.cpc(kind)?,
            address.partition(kind)?,
            name,
        )),
        ResourceKind::Hba => Box::new(hba::Hba::new(
            address.cpc(kind)?,
            address.partition(kind)?,
            name,
        )),
        ResourceKind::Adapter => Box::new(adapter::Adapter::new(address.cpc(kind)?, name)),
        ResourceKind::CryptoAttachment => {
            // The attachment is named after the partition it belongs to.
            let partition = address.partition.clone().unwrap_or(name);
            Box::new(crypto_attachment::CryptoAttachment::new(
                address.cpc(kind)?,
                partition,
            ))
        }
        ResourceKind::User => Box::new(user::User::new(name)),
    })
}

// ============================================================================
// Shared lookups
// ============================================================================

/// Find a CPC by name.
pub(crate) fn find_cpc(client: &dyn ResourceClient, name: &str) -> declarative::Result<Resource> {
    Ok(client.find(&Selector::named(Kind::Cpc, name))?)
}

/// Find a named resource below `parent`, if it exists.
pub(crate) fn find_child(
    client: &dyn ResourceClient,
    kind: Kind,
    parent: &str,
    name: &str,
) -> declarative::Result<Option<Resource>> {
    Ok(client.find_optional(&Selector::named(kind, name).within(parent))?)
}

/// Resolve the `adapter_name` + `adapter_port` pair to the adapter and its
/// port. Returns `None` when neither field is given.
pub(crate) fn adapter_port(
    lookup: &dyn ResourceLookup,
    cpc_uri: &str,
    desired: &Properties,
) -> declarative::Result<Option<(Resource, Resource)>> {
    require_together(desired, "adapter_name", "adapter_port")?;
    let (Some(name), Some(port)) = (str_field(desired, "adapter_name")?, desired.get("adapter_port"))
    else {
        return Ok(None);
    };
    let index = to_int(port, "adapter_port")?;

    let adapter = lookup
        .find_by_name(Kind::Adapter, Some(cpc_uri), name)?
        .ok_or_else(|| declarative::Error::ReferenceNotFound {
            field: "adapter_name".to_string(),
            kind: Kind::Adapter,
            name: name.to_string(),
            scope: None,
        })?;
    let port = lookup
        .children(Kind::Port, &adapter.uri)?
        .into_iter()
        .find(|p| p.get("index") == Some(&index))
        .ok_or_else(|| {
            declarative::Error::parameter(format!("adapter {name:?} has no port {index}"))
        })?;
    Ok(Some((adapter, port)))
}

/// Properties of all `kind` children of `parent`, for result listings.
///
/// Local (not yet created) parents have no children.
pub(crate) fn child_listing(
    client: &dyn ResourceClient,
    parent: &Resource,
    kind: Kind,
) -> declarative::Result<Value> {
    if parent.is_local() {
        return Ok(Value::Array(Vec::new()));
    }
    let children = client.list(&Selector::new(kind).within(&parent.uri))?;
    Ok(Value::Array(
        children
            .into_iter()
            .map(|child| Value::Object(child.properties))
            .collect(),
    ))
}

/// Result properties of a resource plus named child listings.
pub(crate) fn with_children(
    client: &dyn ResourceClient,
    resource: &Resource,
    listings: &[(&str, Kind)],
) -> declarative::Result<Properties> {
    let mut properties = resource.properties.clone();
    for (key, kind) in listings {
        properties.insert((*key).to_string(), child_listing(client, resource, *kind)?);
    }
    Ok(properties)
}

#[cfg(test)]
pub(crate) mod testing {
    use declarative::ReconcileOptions;
    use hmckit::Properties;
    use std::time::Duration;

    pub fn props(value: serde_json::Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    pub fn options() -> ReconcileOptions {
        ReconcileOptions {
            status_timeout: Duration::from_secs(5),
            poll_interval: Duration::ZERO,
        }
    }

    pub fn methods(console: &hmckit::MemoryConsole) -> Vec<String> {
        console
            .mutating_calls()
            .into_iter()
            .map(|c| c.method)
            .collect()
    }
}
