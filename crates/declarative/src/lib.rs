//! # Declarative
//!
//! Reconciliation engine for HMC resources.
//!
//! Given a desired state for a resource, the engine reads the live state,
//! computes the minimum set of changes and applies them: creating, updating
//! or deleting resources, driving them through their lifecycle and
//! reconfiguring composite properties in an order the console accepts.
//!
//! ## Core Concepts
//!
//! - **[`PropertyTable`]**: Per-kind rules for which properties may be set
//!   and when
//! - **[`diff()`]**: Turns desired properties into a [`ChangeSet`]
//! - **[`ArtificialProperty`]**: Desired-state fields that are translated
//!   into real properties or operations
//! - **[`Lifecycle`]**: Start/stop state machine over a [`StatusModel`]
//! - **[`reconfigure`]**: Ordered crypto-configuration changes
//! - **[`reconcile()`]**: Dispatch of a [`TargetState`] to a
//!   [`ManagedResource`]
//!
//! ## Example
//!
//! ```
//! use declarative::{ApplyContext, PropertySpec, PropertyTable, diff};
//! use hmckit::{Kind, MemoryConsole, Properties};
//! use serde_json::json;
//!
//! let table = PropertyTable::new(
//!     Kind::Partition,
//!     [PropertySpec::create_update("description")],
//! );
//! let mut desired = Properties::new();
//! desired.insert("description".into(), json!("web"));
//!
//! let changes = diff(&desired, &table, None).unwrap();
//! assert_eq!(changes.create["description"], json!("web"));
//!
//! let console = MemoryConsole::new();
//! let ctx = ApplyContext::new(&console, true);
//! assert!(ctx.dry_run);
//! ```
//!
//! ## Provider Traits
//!
//! - [`hmckit::ResourceClient`]: Console access
//! - [`ResourceLookup`]: Name lookups for artificial properties
//! - [`ProgressCallback`]: Receives progress updates

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apply;
pub mod context;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod property;
pub mod reconfigure;
pub mod resolve;

// Re-export main types at crate root
pub use context::{ApplyContext, NoProgress, ProgressCallback, ReconcileOptions};
pub use diff::{ChangeSet, diff};
pub use dispatch::{Converged, Converger, ManagedResource, Outcome, TargetState, reconcile};
pub use error::{Error, ErrorKind, Result};
pub use lifecycle::{Lifecycle, StatusClass, StatusModel, Target};
pub use property::{PropertySpec, PropertyTable};
pub use reconfigure::{AttachRequest, DomainConflict, DomainUsage, SubConfig};
pub use resolve::{
    ArtificialProperty, ByName, ResolveContext, ResourceLookup, Scope, Transition, resolve_all,
};
