//! znscore - Zoned NVMe Namespace Core
//!
//! Namespace geometry, zone state machine and active/open resource accounting
//! for emulated NVMe namespaces that use the Zoned Namespace command set.
//!
//! # Architecture
//!
//! ```text
//! NamespaceParams ──► NamespaceFactory::setup ──► Namespace
//!                          │                        ├── NamespaceGeometry
//!                          │                        ├── ZonedNamespace
//!                     BlockBackend                  │     ├── ZoneRegistry
//!                 (length, cluster size)            │     └── AorAccountant
//!                                                   └── identify pages
//! ```
//!
//! The core performs no data I/O. A command layer drives zone management
//! through [`zns::ZonedNamespace`] and serializes access per namespace,
//! for example through [`namespace::SharedNamespace`].
//!
//! # Modules
//!
//! - [`error`] - Error types and NVMe status mapping
//! - [`namespace`] - Parameters, geometry, backends, lifecycle and identify data
//! - [`zns`] - Zones, zone lists, resource accounting and zone management

pub mod error;
pub mod namespace;
pub mod zns;

// Re-export commonly used types
pub use error::{Error, Result, ZoneError};
pub use namespace::{
    BlockBackend, FileBackend, MemBackend, Namespace, NamespaceFactory, NamespaceGeometry,
    NamespaceParams, SharedNamespace, ZoneGeometry, ZonedParams,
};
pub use zns::{OpenMode, Zone, ZoneId, ZoneState, ZonedNamespace};
