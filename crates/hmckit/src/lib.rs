//! # hmckit
//!
//! Resource client layer for resources managed by a Hardware Management
//! Console (HMC) in DPM mode.
//!
//! This crate provides:
//! - Value types for resources, selectors and operations
//! - The [`ResourceClient`] trait consumed by the reconciliation engine
//! - [`MemoryConsole`], an in-memory console that records every call
//! - Retry with exponential backoff for transient errors
//!
//! ## Example
//!
//! ```
//! use hmckit::{Kind, MemoryConsole, ResourceClient, Selector};
//!
//! let console = MemoryConsole::new();
//! let cpc = console.add_cpc("CPC1");
//! console.add_partition(&cpc.uri, "lp01", "stopped");
//!
//! let part = console
//!     .find(&Selector::named(Kind::Partition, "lp01").within(&cpc.uri))
//!     .unwrap();
//! assert_eq!(part.status(), Some("stopped"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod retry;
pub mod types;

pub use backend::ResourceClient;
pub use backend::memory::{Call, MemoryConsole};
pub use error::{Error, ErrorCategory, Result};
pub use retry::{LogCallback, RetryCallback, Retrying};
pub use types::{
    AccessMode, CryptoConfiguration, DomainConfig, Kind, Operation, Properties, Resource,
    RetryConfig, Selector,
};
