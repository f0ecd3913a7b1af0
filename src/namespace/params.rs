//! Namespace configuration.
//!
//! Mirrors the option set of an emulated NVMe namespace device. Values can be
//! loaded from YAML and overridden field by field by the caller.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// Highest namespace id a controller can address
pub const MAX_NAMESPACES: u32 = 256;

/// Default zone size (128 MiB)
pub const DEFAULT_ZONE_SIZE: u64 = 128 * MIB;

/// Smallest accepted logical block size
pub const MIN_BLOCK_SIZE: u32 = 512;

/// Largest accepted logical block size (2 MiB)
pub const MAX_BLOCK_SIZE: u32 = 2 * 1024 * 1024;

// =============================================================================
// Zoned Parameters
// =============================================================================

/// Zoned command set options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZonedParams {
    /// Zone size in bytes
    pub zone_size: u64,

    /// Zone capacity in bytes (0 = same as zone size)
    pub zone_capacity: u64,

    /// Allow reads to cross zone boundaries
    pub cross_read: bool,

    /// Maximum active zones (0 = unlimited)
    pub max_active: u32,

    /// Maximum open zones (0 = unlimited, or max_active when that is set)
    pub max_open: u32,

    /// Zone descriptor extension size in bytes
    pub descr_ext_size: u32,
}

impl Default for ZonedParams {
    fn default() -> Self {
        Self {
            zone_size: DEFAULT_ZONE_SIZE,
            zone_capacity: 0,
            cross_read: false,
            max_active: 0,
            max_open: 0,
            descr_ext_size: 0,
        }
    }
}

// =============================================================================
// Namespace Parameters
// =============================================================================

/// Options for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamespaceParams {
    /// Namespace id (0 = assigned by the attaching controller)
    pub nsid: u32,

    /// Namespace UUID, generated when absent
    pub uuid: Option<Uuid>,

    /// IEEE extended unique identifier (0 = unset)
    pub eui64: u64,

    /// Generate an EUI-64 when none is configured
    pub eui64_default: bool,

    /// Logical block size in bytes
    pub logical_block_size: u32,

    /// Discard granularity in bytes (None = max(block size, 4 KiB))
    pub discard_granularity: Option<u64>,

    /// Metadata bytes per logical block
    pub ms: u16,

    /// Metadata transferred as part of an extended LBA
    pub mset: bool,

    /// Protection information type (0-3)
    pub pi: u8,

    /// Protection information in the first eight bytes of metadata
    pub pil: bool,

    /// Maximum single source range length (simple copy)
    pub mssrl: u16,

    /// Maximum copy length (simple copy)
    pub mcl: u32,

    /// Maximum source range count, zero-based (simple copy)
    pub msrc: u8,

    /// Attach to every controller in the subsystem
    pub shared: bool,

    /// Do not attach at creation
    pub detached: bool,

    /// Use the zoned command set
    pub zoned: bool,

    /// Zoned command set options, used when `zoned` is set
    pub zone: ZonedParams,
}

impl Default for NamespaceParams {
    fn default() -> Self {
        Self {
            nsid: 0,
            uuid: None,
            eui64: 0,
            eui64_default: true,
            logical_block_size: MIN_BLOCK_SIZE,
            discard_granularity: None,
            ms: 0,
            mset: false,
            pi: 0,
            pil: false,
            mssrl: 128,
            mcl: 128,
            msrc: 127,
            shared: true,
            detached: false,
            zoned: false,
            zone: ZonedParams::default(),
        }
    }
}

impl NamespaceParams {
    /// Zoned namespace with the given block size, zone size and capacity.
    pub fn zoned(logical_block_size: u32, zone_size: u64, zone_capacity: u64) -> Self {
        Self {
            logical_block_size,
            zoned: true,
            zone: ZonedParams {
                zone_size,
                zone_capacity,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Load parameters from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse parameters from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Discard granularity in bytes after applying the default.
    pub fn effective_discard_granularity(&self) -> u64 {
        self.discard_granularity
            .unwrap_or_else(|| u64::from(self.logical_block_size).max(4 * KIB))
    }

    /// Check the constraints that do not depend on the backend.
    pub fn validate(&self) -> Result<()> {
        let lbs = self.logical_block_size;
        if !lbs.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&lbs) {
            return Err(Error::Config(format!(
                "logical_block_size {} must be a power of 2 between {} and {}",
                lbs, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }

        if self.pi > 3 {
            return Err(Error::Config(format!(
                "invalid protection information type {}",
                self.pi
            )));
        }

        if self.pi != 0 && self.ms < 8 {
            return Err(Error::Config(
                "at least 8 bytes of metadata required to enable protection information".into(),
            ));
        }

        if self.nsid > MAX_NAMESPACES {
            return Err(Error::Config(format!(
                "invalid namespace id (must be between 0 and {})",
                MAX_NAMESPACES
            )));
        }

        if self.discard_granularity == Some(0) {
            return Err(Error::Config("discard_granularity must be > 0".into()));
        }

        Ok(())
    }
}
