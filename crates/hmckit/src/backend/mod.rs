//! Client abstraction for console operations.
//!
//! The [`ResourceClient`] trait is the only way the reconciliation engine
//! talks to a console, allowing for different implementations (a REST
//! session, the in-memory console used for rehearsal and tests).

pub mod memory;

use crate::error::{Error, Result};
use crate::types::{Kind, Operation, Properties, Resource, Selector};
use serde_json::Value;

/// Resource client trait.
///
/// Implementations own transport concerns: sessions, connection reuse and
/// retries. Errors are returned unmodified to the engine.
pub trait ResourceClient: Send + Sync {
    /// Find exactly one resource.
    ///
    /// Returns [`Error::NotFound`] when nothing matches and
    /// [`Error::NoUniqueMatch`] when several resources match.
    fn find(&self, selector: &Selector) -> Result<Resource>;

    /// List all resources matching a selector.
    fn list(&self, selector: &Selector) -> Result<Vec<Resource>>;

    /// Create a resource below `parent`.
    fn create(&self, kind: Kind, parent: Option<&str>, props: &Properties) -> Result<Resource>;

    /// Update properties of a resource.
    fn update(&self, resource: &Resource, props: &Properties) -> Result<()>;

    /// Delete a resource.
    fn delete(&self, resource: &Resource) -> Result<()>;

    /// Refresh all properties of a resource in place.
    fn pull_full_properties(&self, resource: &mut Resource) -> Result<()>;

    /// Invoke an operation on a resource.
    fn invoke(&self, resource: &Resource, operation: &Operation) -> Result<()>;

    /// Read one property fresh from the console.
    fn get_property(&self, resource: &Resource, name: &str) -> Result<Option<Value>> {
        let fresh = self.find_by_uri(resource.kind, &resource.uri)?;
        Ok(fresh.properties.get(name).cloned())
    }

    /// Find a resource, mapping "not found" to `None`.
    fn find_optional(&self, selector: &Selector) -> Result<Option<Resource>> {
        match self.find(selector) {
            Ok(resource) => Ok(Some(resource)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Find a resource by its canonical URI.
    fn find_by_uri(&self, kind: Kind, uri: &str) -> Result<Resource> {
        self.find(&Selector::uri(kind, uri))
    }

    /// Find a named resource, optionally scoped to a parent.
    fn find_named(&self, kind: Kind, parent: Option<&str>, name: &str) -> Result<Resource> {
        let mut selector = Selector::named(kind, name);
        if let Some(parent) = parent {
            selector = selector.within(parent);
        }
        self.find(&selector)
    }
}

impl<C: ResourceClient + ?Sized> ResourceClient for &C {
    fn find(&self, selector: &Selector) -> Result<Resource> {
        (**self).find(selector)
    }

    fn list(&self, selector: &Selector) -> Result<Vec<Resource>> {
        (**self).list(selector)
    }

    fn create(&self, kind: Kind, parent: Option<&str>, props: &Properties) -> Result<Resource> {
        (**self).create(kind, parent, props)
    }

    fn update(&self, resource: &Resource, props: &Properties) -> Result<()> {
        (**self).update(resource, props)
    }

    fn delete(&self, resource: &Resource) -> Result<()> {
        (**self).delete(resource)
    }

    fn pull_full_properties(&self, resource: &mut Resource) -> Result<()> {
        (**self).pull_full_properties(resource)
    }

    fn invoke(&self, resource: &Resource, operation: &Operation) -> Result<()> {
        (**self).invoke(resource, operation)
    }

    fn get_property(&self, resource: &Resource, name: &str) -> Result<Option<Value>> {
        (**self).get_property(resource, name)
    }
}

/// Pick the single match out of a list result.
pub(crate) fn single(selector: &Selector, mut matches: Vec<Resource>) -> Result<Resource> {
    match matches.len() {
        0 => Err(Error::NotFound {
            kind: selector.kind,
            selector: selector.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        count => Err(Error::NoUniqueMatch {
            kind: selector.kind,
            selector: selector.to_string(),
            count,
        }),
    }
}
