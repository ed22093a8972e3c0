//! Core types for console resources.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Property map of a resource, keyed by remote (hyphenated) property name.
pub type Properties = serde_json::Map<String, Value>;

/// Kind of console resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    /// The console itself
    Console,
    /// Central processor complex
    Cpc,
    /// DPM partition
    Partition,
    /// Network interface of a partition
    Nic,
    /// Host bus adapter of a partition
    Hba,
    /// Virtual function of a partition
    VirtualFunction,
    /// Physical or virtual adapter of a CPC
    Adapter,
    /// Port of an adapter
    Port,
    /// Virtual switch backed by an adapter port
    VirtualSwitch,
    /// Storage group defined on the console
    StorageGroup,
    /// Volume of a storage group
    StorageVolume,
    /// Console user
    User,
    /// Console user role
    UserRole,
    /// Console password rule
    PasswordRule,
    /// LDAP server definition
    LdapServerDefinition,
}

impl Kind {
    /// Get the kind name as used in messages and snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Cpc => "cpc",
            Self::Partition => "partition",
            Self::Nic => "nic",
            Self::Hba => "hba",
            Self::VirtualFunction => "virtual-function",
            Self::Adapter => "adapter",
            Self::Port => "port",
            Self::VirtualSwitch => "virtual-switch",
            Self::StorageGroup => "storage-group",
            Self::StorageVolume => "storage-volume",
            Self::User => "user",
            Self::UserRole => "user-role",
            Self::PasswordRule => "password-rule",
            Self::LdapServerDefinition => "ldap-server-definition",
        }
    }

    /// URI path segment of resources of this kind.
    pub fn uri_segment(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Cpc => "cpcs",
            Self::Partition => "partitions",
            Self::Nic => "nics",
            Self::Hba => "hbas",
            Self::VirtualFunction => "virtual-functions",
            Self::Adapter => "adapters",
            Self::Port => "ports",
            Self::VirtualSwitch => "virtual-switches",
            Self::StorageGroup => "storage-groups",
            Self::StorageVolume => "storage-volumes",
            Self::User => "users",
            Self::UserRole => "user-roles",
            Self::PasswordRule => "password-rules",
            Self::LdapServerDefinition => "ldap-server-definitions",
        }
    }

    /// Element resources live below their parent's URI and are identified
    /// by `element-uri` instead of `object-uri`.
    pub fn is_element(&self) -> bool {
        matches!(
            self,
            Self::Nic | Self::Hba | Self::VirtualFunction | Self::Port | Self::StorageVolume
        )
    }

    /// Name of the property holding the canonical URI.
    pub fn uri_property(&self) -> &'static str {
        if self.is_element() {
            "element-uri"
        } else {
            "object-uri"
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resource as returned by the console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource kind
    pub kind: Kind,
    /// Canonical URI (empty for resources that only exist locally)
    pub uri: String,
    /// URI of the parent resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Last known properties
    #[serde(default)]
    pub properties: Properties,
}

impl Resource {
    /// Create a resource handle.
    pub fn new(kind: Kind, uri: impl Into<String>, properties: Properties) -> Self {
        Self {
            kind,
            uri: uri.into(),
            parent: None,
            properties,
        }
    }

    /// Create a local stand-in for a resource that would be created.
    pub fn local(kind: Kind, parent: Option<&str>, properties: Properties) -> Self {
        Self {
            kind,
            uri: String::new(),
            parent: parent.map(ToString::to_string),
            properties,
        }
    }

    /// Whether this handle exists only locally (never created remotely).
    pub fn is_local(&self) -> bool {
        self.uri.is_empty()
    }

    /// Resource name, or an empty string when unknown.
    pub fn name(&self) -> &str {
        self.get_str("name").unwrap_or_default()
    }

    /// Get a property value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Get a string property.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// Get an unsigned integer property.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.properties.get(name).and_then(Value::as_u64)
    }

    /// Current operational status, if the kind has one.
    pub fn status(&self) -> Option<&str> {
        self.get_str("status")
    }

    /// Set a property locally.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.properties.insert(name.into(), value);
    }

    /// Merge properties locally.
    pub fn merge(&mut self, props: &Properties) {
        for (key, value) in props {
            self.properties.insert(key.clone(), value.clone());
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name())
    }
}

/// Identifies resources of one kind by parent and property values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// Kind to look for
    pub kind: Kind,
    /// Restrict the search to children of this URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Property values that must all match
    #[serde(default)]
    pub criteria: Properties,
}

impl Selector {
    /// Match every resource of a kind.
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            parent: None,
            criteria: Properties::new(),
        }
    }

    /// Match by name.
    pub fn named(kind: Kind, name: &str) -> Self {
        Self::new(kind).with("name", name)
    }

    /// Match by canonical URI.
    pub fn uri(kind: Kind, uri: &str) -> Self {
        Self::new(kind).with(kind.uri_property(), uri)
    }

    /// Restrict to children of a parent URI.
    pub fn within(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    /// Add a property criterion.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.criteria.insert(key.to_string(), value.into());
        self
    }

    /// Whether a resource satisfies this selector.
    pub fn matches(&self, resource: &Resource) -> bool {
        if resource.kind != self.kind {
            return false;
        }
        if let Some(parent) = &self.parent
            && resource.parent.as_deref() != Some(parent.as_str())
        {
            return false;
        }
        self.criteria
            .iter()
            .all(|(key, value)| resource.get(key) == Some(value))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let criteria: Vec<String> = self
            .criteria
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        if criteria.is_empty() {
            write!(f, "any")?;
        } else {
            write!(f, "{}", criteria.join(", "))?;
        }
        if let Some(parent) = &self.parent {
            write!(f, " in {parent}")?;
        }
        Ok(())
    }
}

/// Access mode of a crypto domain in a partition's crypto configuration.
///
/// Variants are declared from most to least permissive, so the derived
/// ordering sorts `ControlUsage` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessMode {
    /// Domain may be used and controlled
    #[serde(rename = "control-usage", alias = "usage")]
    ControlUsage,
    /// Domain may only be controlled
    #[serde(rename = "control")]
    Control,
}

impl AccessMode {
    /// Remote representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControlUsage => "control-usage",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control-usage" | "usage" => Ok(Self::ControlUsage),
            "control" => Ok(Self::Control),
            other => Err(format!("invalid access mode: {other}")),
        }
    }
}

/// One domain entry of a crypto configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DomainConfig {
    /// Domain index on the crypto adapters
    pub domain_index: u32,
    /// Access mode granted to the partition
    pub access_mode: AccessMode,
}

/// The `crypto-configuration` property of a partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CryptoConfiguration {
    /// Attached crypto adapters
    #[serde(default)]
    pub crypto_adapter_uris: Vec<String>,
    /// Attached domains
    #[serde(default)]
    pub crypto_domain_configurations: Vec<DomainConfig>,
}

impl CryptoConfiguration {
    /// Parse from a property value; `null` or a missing value is empty.
    pub fn from_value(value: Option<&Value>) -> crate::Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }

    /// Convert to a property value; empty configurations become `null`.
    pub fn to_value(&self) -> Value {
        if self.is_empty() {
            Value::Null
        } else {
            serde_json::to_value(self).unwrap_or(Value::Null)
        }
    }

    /// Whether nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.crypto_adapter_uris.is_empty() && self.crypto_domain_configurations.is_empty()
    }

    /// A non-empty configuration must keep at least one adapter and one
    /// domain in control-usage mode.
    pub fn is_consistent(&self) -> bool {
        self.is_empty()
            || (!self.crypto_adapter_uris.is_empty()
                && self
                    .crypto_domain_configurations
                    .iter()
                    .any(|d| d.access_mode == AccessMode::ControlUsage))
    }
}

/// Operation invoked on a resource outside of plain property updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Operation {
    /// Start a partition
    Start,
    /// Stop a partition
    Stop,
    /// Change the type of a configurable adapter
    ChangeAdapterType {
        /// New adapter type
        adapter_type: String,
    },
    /// Change the crypto type of a crypto adapter
    ChangeCryptoType {
        /// New crypto type (remote representation)
        crypto_type: String,
    },
    /// Add adapters and domains to a partition's crypto configuration
    IncreaseCryptoConfig {
        /// Adapters to add
        adapter_uris: Vec<String>,
        /// Domains to add
        domain_configs: Vec<DomainConfig>,
    },
    /// Remove adapters and domains from a partition's crypto configuration
    DecreaseCryptoConfig {
        /// Adapters to remove
        adapter_uris: Vec<String>,
        /// Domains to remove
        domain_indexes: Vec<u32>,
    },
    /// Change the access mode of one attached domain
    ChangeCryptoDomainConfig {
        /// Domain to change
        domain_index: u32,
        /// New access mode
        access_mode: AccessMode,
    },
    /// Grant a user role to a user
    AddUserRole {
        /// Role to add
        user_role_uri: String,
    },
    /// Revoke a user role from a user
    RemoveUserRole {
        /// Role to remove
        user_role_uri: String,
    },
}

impl Operation {
    /// Operation name as used in logs and call records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::ChangeAdapterType { .. } => "change-adapter-type",
            Self::ChangeCryptoType { .. } => "change-crypto-type",
            Self::IncreaseCryptoConfig { .. } => "increase-crypto-configuration",
            Self::DecreaseCryptoConfig { .. } => "decrease-crypto-configuration",
            Self::ChangeCryptoDomainConfig { .. } => "change-crypto-domain-configuration",
            Self::AddUserRole { .. } => "add-user-role",
            Self::RemoveUserRole { .. } => "remove-user-role",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}
