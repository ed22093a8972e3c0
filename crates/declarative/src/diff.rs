//! Property diff engine
//!
//! Turns a desired-state map into the property sets to pass to `create` and
//! `update`, driven by a [`PropertyTable`]. Properties the caller omits are
//! left untouched.

use crate::error::{Error, Result};
use crate::property::{PropertySpec, PropertyTable};
use hmckit::{Operation, Properties, Resource};
use serde_json::Value;

/// Changes computed for one reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Properties for the create call (remote names)
    pub create: Properties,
    /// Properties for the update call (remote names)
    pub update: Properties,
    /// The resource must be quiescent before `update` is applied
    pub requires_quiesce: bool,
    /// Operations to invoke after the property update
    pub side_ops: Vec<Operation>,
}

impl ChangeSet {
    /// Nothing to do on an existing resource.
    pub fn is_empty(&self) -> bool {
        self.update.is_empty() && self.side_ops.is_empty()
    }

    /// Fold another change set into this one.
    pub fn merge(&mut self, other: ChangeSet) {
        self.create.extend(other.create);
        self.update.extend(other.update);
        self.requires_quiesce |= other.requires_quiesce;
        self.side_ops.extend(other.side_ops);
    }

    /// Update properties still to be written after a create call.
    pub fn deferred_update(&self) -> Properties {
        self.update
            .iter()
            .filter(|(key, _)| !self.create.contains_key(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Place a cast value for `spec` according to its metadata.
    ///
    /// Callers that write internal properties (artificial fields) use this
    /// directly; it does not check `allowed`.
    pub fn place(&mut self, spec: &PropertySpec, value: Value, live: Option<&Resource>) -> Result<()> {
        let remote = spec.remote_name();
        let quiesce = spec.updatable_while_active == Some(false);

        let Some(live) = live else {
            if spec.creatable {
                self.create.insert(remote, value);
            } else {
                self.update.insert(remote, value);
                self.requires_quiesce |= quiesce;
            }
            return Ok(());
        };

        let current = live.get(&remote).cloned().unwrap_or(Value::Null);
        if spec.values_equal(&value, &current)? {
            return Ok(());
        }
        if !spec.updatable {
            return Err(Error::ImmutableProperty {
                resource: live.to_string(),
                name: spec.name.to_string(),
                old: current,
                new: value,
            });
        }
        log::debug!("{live}: {remote} changes from {current} to {value}");
        self.update.insert(remote, value);
        self.requires_quiesce |= quiesce;
        Ok(())
    }
}

/// Look up a caller-supplied property, rejecting unknown and read-only names.
pub fn writable_spec<'t>(table: &'t PropertyTable, name: &str) -> Result<&'t PropertySpec> {
    match table.get(name) {
        None => Err(Error::InvalidProperty {
            kind: table.kind(),
            name: name.to_string(),
            reason: "not defined",
        }),
        Some(spec) if !spec.allowed => Err(Error::InvalidProperty {
            kind: table.kind(),
            name: name.to_string(),
            reason: "not allowed to be set",
        }),
        Some(spec) => Ok(spec),
    }
}

/// Compute create and update properties for `desired`.
///
/// `live` is `None` when the resource does not exist yet.
pub fn diff(desired: &Properties, table: &PropertyTable, live: Option<&Resource>) -> Result<ChangeSet> {
    let mut changes = ChangeSet::default();
    for (name, value) in desired {
        let spec = writable_spec(table, name)?;
        let value = spec.cast_value(value)?;
        changes.place(spec, value, live)?;
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::property::{eq_hex, to_int};
    use hmckit::Kind;
    use serde_json::json;

    fn table() -> PropertyTable {
        PropertyTable::new(
            Kind::Partition,
            [
                PropertySpec::create_update("size").cast(to_int),
                PropertySpec::create_update("description"),
                PropertySpec::create_update("maximum_memory").cast(to_int).quiesce(),
                PropertySpec::create_only("type"),
                PropertySpec::update_only("boot_timeout").cast(to_int),
                PropertySpec::update_only("acceptable_status").quiesce(),
                PropertySpec::create_update("device_number").compare_with(eq_hex),
                PropertySpec::read_only("status"),
            ],
        )
    }

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    fn live(value: Value) -> Resource {
        Resource::new(Kind::Partition, "/api/partitions/1", props(value))
    }

    #[test]
    fn test_absent_creatable_goes_to_create() {
        let changes = diff(&props(json!({"size": 2})), &table(), None).unwrap();
        assert_eq!(changes.create, props(json!({"size": 2})));
        assert!(changes.update.is_empty());
        assert!(!changes.requires_quiesce);
    }

    #[test]
    fn test_absent_update_only_goes_to_update() {
        let desired = props(json!({"boot_timeout": "60", "acceptable_status": ["active"]}));
        let changes = diff(&desired, &table(), None).unwrap();
        assert!(changes.create.is_empty());
        assert_eq!(changes.update["boot-timeout"], json!(60));
        assert!(changes.requires_quiesce);
        assert_eq!(changes.deferred_update().len(), 2);
    }

    #[test]
    fn test_present_equal_yields_nothing() {
        let current = live(json!({"name": "lp01", "size": 2, "description": "x"}));
        let desired = props(json!({"size": "2", "description": "x"}));
        let changes = diff(&desired, &table(), Some(&current)).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_present_change_requires_quiesce() {
        let current = live(json!({"name": "lp01", "maximum-memory": 1024, "description": "x"}));
        let desired = props(json!({"maximum_memory": 2048, "description": "x"}));
        let changes = diff(&desired, &table(), Some(&current)).unwrap();
        assert_eq!(changes.update, props(json!({"maximum-memory": 2048})));
        assert!(changes.requires_quiesce);
    }

    #[test]
    fn test_present_change_while_active_allowed() {
        let current = live(json!({"name": "lp01", "description": "old"}));
        let desired = props(json!({"description": "new"}));
        let changes = diff(&desired, &table(), Some(&current)).unwrap();
        assert_eq!(changes.update["description"], json!("new"));
        assert!(!changes.requires_quiesce);
    }

    #[test]
    fn test_immutable_property_rejected() {
        let current = live(json!({"name": "lp01", "type": "linux"}));
        let err = diff(&props(json!({"type": "ssc"})), &table(), Some(&current)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableProperty);
        match err {
            Error::ImmutableProperty { old, new, .. } => {
                assert_eq!(old, json!("linux"));
                assert_eq!(new, json!("ssc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unchanged_immutable_property_is_fine() {
        let current = live(json!({"name": "lp01", "type": "linux"}));
        let changes = diff(&props(json!({"type": "linux"})), &table(), Some(&current)).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_unknown_and_read_only_rejected() {
        let err = diff(&props(json!({"colour": "red"})), &table(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidProperty);
        assert!(err.to_string().contains("\"colour\""));

        let err = diff(&props(json!({"status": "active"})), &table(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidProperty);
        assert!(err.to_string().contains("\"status\""));
    }

    #[test]
    fn test_custom_comparator_suppresses_update() {
        let current = live(json!({"name": "lp01", "device-number": "0A00"}));
        let changes =
            diff(&props(json!({"device_number": "a00"})), &table(), Some(&current)).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_update_never_contains_equal_values() {
        let current = live(json!({
            "name": "lp01", "size": 4, "description": "same", "device-number": "0100"
        }));
        let desired = props(json!({"size": 5, "description": "same", "device_number": "100"}));
        let changes = diff(&desired, &table(), Some(&current)).unwrap();
        assert_eq!(changes.update.keys().collect::<Vec<_>>(), vec!["size"]);
    }

    #[test]
    fn test_merge_combines_flags_and_ops() {
        let mut a = ChangeSet::default();
        a.update.insert("x".to_string(), json!(1));
        let b = ChangeSet {
            requires_quiesce: true,
            side_ops: vec![Operation::Stop],
            ..Default::default()
        };
        a.merge(b);
        assert!(a.requires_quiesce);
        assert_eq!(a.side_ops, vec![Operation::Stop]);
        assert!(!a.is_empty());
    }
}
