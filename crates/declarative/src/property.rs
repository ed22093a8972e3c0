//! Property metadata tables.
//!
//! A [`PropertyTable`] tells the diff engine, per property of a resource
//! kind, whether callers may set it, when it may be written, and how desired
//! values are cast and compared. Tables are built once (usually behind a
//! `LazyLock`) and only read afterwards.
//!
//! Desired-state names use underscores; the remote name of a property is the
//! same name with hyphens.

use crate::error::{Error, Result};
use hmckit::Kind;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Compares a cast desired value against a live value.
pub type EqFn = fn(&Value, &Value, &str) -> Result<bool>;

/// Converts a desired value into the type the console expects.
pub type CastFn = fn(&Value, &str) -> Result<Value>;

/// Metadata of one property.
#[derive(Clone, Copy)]
pub struct PropertySpec {
    /// Desired-state name (underscores)
    pub name: &'static str,
    /// Callers may name this property in desired state
    pub allowed: bool,
    /// May be passed to create
    pub creatable: bool,
    /// May be changed on an existing resource
    pub updatable: bool,
    /// `Some(false)` when the resource must be quiescent to change it
    pub updatable_while_active: Option<bool>,
    /// Comparator, plain equality when `None`
    pub equals: Option<EqFn>,
    /// Input cast
    pub cast: Option<CastFn>,
}

impl PropertySpec {
    const fn base(name: &'static str, allowed: bool, creatable: bool, updatable: bool) -> Self {
        Self {
            name,
            allowed,
            creatable,
            updatable,
            updatable_while_active: if updatable { Some(true) } else { None },
            equals: None,
            cast: None,
        }
    }

    /// Reported by the console, never written.
    pub const fn read_only(name: &'static str) -> Self {
        Self::base(name, false, false, false)
    }

    /// Set at creation, fixed afterwards.
    pub const fn create_only(name: &'static str) -> Self {
        Self::base(name, true, true, false)
    }

    /// Only writable through an update.
    pub const fn update_only(name: &'static str) -> Self {
        Self::base(name, true, false, true)
    }

    /// Writable at creation and afterwards.
    pub const fn create_update(name: &'static str) -> Self {
        Self::base(name, true, true, true)
    }

    /// Written only through an artificial field; callers cannot name it.
    pub const fn internal(name: &'static str, creatable: bool, updatable: bool) -> Self {
        Self::base(name, false, creatable, updatable)
    }

    /// Changing the property requires the resource to be quiescent.
    pub const fn quiesce(mut self) -> Self {
        self.updatable_while_active = Some(false);
        self
    }

    /// Use a custom comparator.
    pub const fn compare_with(mut self, equals: EqFn) -> Self {
        self.equals = Some(equals);
        self
    }

    /// Cast desired values.
    pub const fn cast(mut self, cast: CastFn) -> Self {
        self.cast = Some(cast);
        self
    }

    /// Remote (hyphenated) property name.
    pub fn remote_name(&self) -> String {
        self.name.replace('_', "-")
    }

    /// Cast a desired value.
    pub fn cast_value(&self, value: &Value) -> Result<Value> {
        match self.cast {
            Some(cast) => cast(value, self.name),
            None => Ok(value.clone()),
        }
    }

    /// Compare a cast desired value with a live value.
    pub fn values_equal(&self, desired: &Value, live: &Value) -> Result<bool> {
        match self.equals {
            Some(equals) => equals(desired, live, self.name),
            None => Ok(desired == live),
        }
    }
}

impl std::fmt::Debug for PropertySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertySpec")
            .field("name", &self.name)
            .field("allowed", &self.allowed)
            .field("creatable", &self.creatable)
            .field("updatable", &self.updatable)
            .field("updatable_while_active", &self.updatable_while_active)
            .finish_non_exhaustive()
    }
}

/// Immutable registry of property specs for one resource kind.
#[derive(Debug)]
pub struct PropertyTable {
    kind: Kind,
    specs: BTreeMap<&'static str, PropertySpec>,
}

impl PropertyTable {
    /// Build a table.
    pub fn new(kind: Kind, specs: impl IntoIterator<Item = PropertySpec>) -> Self {
        Self {
            kind,
            specs: specs.into_iter().map(|s| (s.name, s)).collect(),
        }
    }

    /// Resource kind this table describes.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Look up a property by desired-state name.
    pub fn get(&self, name: &str) -> Option<&PropertySpec> {
        self.specs.get(name)
    }

    /// Iterate over all specs.
    pub fn iter(&self) -> impl Iterator<Item = &PropertySpec> {
        self.specs.values()
    }
}

// ============================================================================
// Casts
// ============================================================================

/// Cast to an integer; numeric strings are accepted.
pub fn to_int(value: &Value, name: &str) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
            _ => Err(cast_error(name, value, "an integer")),
        },
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| cast_error(name, value, "an integer")),
        _ => Err(cast_error(name, value, "an integer")),
    }
}

/// Cast to a float; numeric strings are accepted.
pub fn to_float(value: &Value, name: &str) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => n
            .as_f64()
            .map(Value::from)
            .ok_or_else(|| cast_error(name, value, "a number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| cast_error(name, value, "a number")),
        _ => Err(cast_error(name, value, "a number")),
    }
}

/// Cast to a string; numbers and booleans are rendered.
pub fn to_string(value: &Value, name: &str) -> Result<Value> {
    match value {
        Value::Null | Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        _ => Err(cast_error(name, value, "a string")),
    }
}

/// Cast to a boolean; `"true"`/`"false"` (any case) are accepted.
pub fn to_bool(value: &Value, name: &str) -> Result<Value> {
    match value {
        Value::Null | Value::Bool(_) => Ok(value.clone()),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" => Ok(Value::Bool(true)),
            "false" | "no" => Ok(Value::Bool(false)),
            _ => Err(cast_error(name, value, "a boolean")),
        },
        _ => Err(cast_error(name, value, "a boolean")),
    }
}

fn cast_error(name: &str, value: &Value, expected: &str) -> Error {
    Error::parameter(format!("property {name:?} must be {expected}, got {value}"))
}

// ============================================================================
// Comparators
// ============================================================================

/// Which side of a comparison a value came from.
#[derive(Clone, Copy)]
enum Side {
    Desired,
    Live,
}

fn malformed(name: &str, value: &Value, expected: &str, side: Side) -> Error {
    match side {
        Side::Desired => Error::parameter(format!("property {name:?} must be {expected}, got {value}")),
        Side::Live => Error::parameter(format!(
            "current value of property {name:?} on the console is not {expected}: {value}"
        )),
    }
}

fn parse_hex(value: &Value, name: &str, side: Side) -> Result<Option<u64>> {
    let expected = "a hexadecimal string";
    match value {
        Value::Null => Ok(None),
        Value::String(s) => u64::from_str_radix(s.trim().trim_start_matches("0x"), 16)
            .map(Some)
            .map_err(|_| malformed(name, value, expected, side)),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| malformed(name, value, expected, side)),
        _ => Err(malformed(name, value, expected, side)),
    }
}

/// Compare hexadecimal strings by value (`"0A00"` equals `"a00"`).
pub fn eq_hex(desired: &Value, live: &Value, name: &str) -> Result<bool> {
    Ok(parse_hex(desired, name, Side::Desired)? == parse_hex(live, name, Side::Live)?)
}

static MAC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{1,2}(?:[:-][0-9a-fA-F]{1,2}){5}$").expect("MAC pattern is valid")
});

fn parse_mac(value: &Value, name: &str, side: Side) -> Result<Option<[u8; 6]>> {
    let expected = "a MAC address";
    let s = match value {
        Value::Null => return Ok(None),
        Value::String(s) if MAC.is_match(s.trim()) => s.trim(),
        _ => return Err(malformed(name, value, expected, side)),
    };
    let mut octets = [0u8; 6];
    for (slot, part) in octets.iter_mut().zip(s.split([':', '-'])) {
        *slot = u8::from_str_radix(part, 16).map_err(|_| malformed(name, value, expected, side))?;
    }
    Ok(Some(octets))
}

/// Compare MAC addresses ignoring case and zero padding.
pub fn eq_mac(desired: &Value, live: &Value, name: &str) -> Result<bool> {
    Ok(parse_mac(desired, name, Side::Desired)? == parse_mac(live, name, Side::Live)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_constructors() {
        let ro = PropertySpec::read_only("status");
        assert!(!ro.allowed && !ro.creatable && !ro.updatable);
        assert_eq!(ro.updatable_while_active, None);

        let q = PropertySpec::create_update("maximum_memory").quiesce();
        assert!(q.creatable && q.updatable);
        assert_eq!(q.updatable_while_active, Some(false));
        assert_eq!(q.remote_name(), "maximum-memory");
    }

    #[test]
    fn test_table_lookup() {
        let table = PropertyTable::new(
            Kind::Partition,
            [
                PropertySpec::create_update("description"),
                PropertySpec::read_only("status"),
            ],
        );
        assert_eq!(table.kind(), Kind::Partition);
        assert!(table.get("description").is_some());
        assert!(table.get("nope").is_none());
        assert_eq!(table.iter().count(), 2);
    }

    #[test]
    fn test_to_int() {
        assert_eq!(to_int(&json!("42"), "x").unwrap(), json!(42));
        assert_eq!(to_int(&json!(7), "x").unwrap(), json!(7));
        assert_eq!(to_int(&json!(4.0), "x").unwrap(), json!(4));
        assert!(to_int(&json!("four"), "x").is_err());
        assert!(to_int(&json!(4.5), "x").is_err());
    }

    #[test]
    fn test_to_float_and_bool_and_string() {
        assert_eq!(to_float(&json!("1.5"), "x").unwrap(), json!(1.5));
        assert_eq!(to_bool(&json!("True"), "x").unwrap(), json!(true));
        assert!(to_bool(&json!(1), "x").is_err());
        assert_eq!(to_string(&json!(12), "x").unwrap(), json!("12"));
    }

    #[test]
    fn test_eq_hex() {
        assert!(eq_hex(&json!("0a00"), &json!("A00"), "device_number").unwrap());
        assert!(!eq_hex(&json!("0a01"), &json!("0a00"), "device_number").unwrap());
        assert!(eq_hex(&json!(null), &json!(null), "device_number").unwrap());
        assert!(eq_hex(&json!("zz"), &json!("0a00"), "device_number").is_err());
    }

    #[test]
    fn test_eq_mac() {
        assert!(eq_mac(&json!("02:0A:00:00:00:01"), &json!("2:a:0:0:0:1"), "mac_address").unwrap());
        assert!(!eq_mac(&json!("02:0a:00:00:00:01"), &json!("02:0a:00:00:00:02"), "mac_address").unwrap());
        assert!(eq_mac(&json!("not-a-mac"), &json!("02:0a:00:00:00:01"), "mac_address").is_err());
    }

    #[test]
    fn test_malformed_live_value_is_named() {
        let err = eq_hex(&json!("0a00"), &json!("xyz"), "device_number").unwrap_err();
        assert_eq!(
            err.to_string(),
            "current value of property \"device_number\" on the console is not a hexadecimal string: \"xyz\""
        );

        let err = eq_hex(&json!("xyz"), &json!("0a00"), "device_number").unwrap_err();
        assert_eq!(
            err.to_string(),
            "property \"device_number\" must be a hexadecimal string, got \"xyz\""
        );

        let err = eq_mac(&json!("02:0a:00:00:00:01"), &json!(7), "mac_address").unwrap_err();
        assert!(err.to_string().starts_with("current value of property \"mac_address\""));
    }
}
