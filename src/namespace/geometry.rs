//! Namespace geometry calculation.
//!
//! Turns [`NamespaceParams`] plus what the backend reports about itself into
//! an immutable [`NamespaceGeometry`]:
//!
//! ```text
//! logical block size ──► ds = log2(lbs) ──► LBA format selection
//! backing size ────────► total blocks = size / (lbs + ms)
//! discard granularity ─┐
//! cluster size ────────┴► deallocation granularity (blocks)
//! zone size/capacity ──► zone geometry (size, capacity, count, limits)
//! ```
//!
//! Nothing here has side effects beyond logging. A failed calculation leaves
//! nothing behind.

use serde::Serialize;
use tracing::{debug, warn};

use super::params::{NamespaceParams, ZonedParams};
use crate::error::{Error, Result};

/// Maximum number of LBA format entries.
pub const MAX_LBA_FORMATS: usize = 16;

/// Predefined LBA formats as (ds, ms).
pub const DEFAULT_LBA_FORMATS: [LbaFormat; 8] = [
    LbaFormat::new(9, 0),
    LbaFormat::new(9, 8),
    LbaFormat::new(9, 16),
    LbaFormat::new(9, 64),
    LbaFormat::new(12, 0),
    LbaFormat::new(12, 8),
    LbaFormat::new(12, 16),
    LbaFormat::new(12, 64),
];

// =============================================================================
// LBA Formats
// =============================================================================

/// One (data size, metadata size) pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LbaFormat {
    /// Data size as a power of two
    pub ds: u8,

    /// Metadata bytes per block
    pub ms: u16,
}

impl LbaFormat {
    pub const fn new(ds: u8, ms: u16) -> Self {
        Self { ds, ms }
    }

    pub fn data_size(&self) -> u64 {
        1u64 << self.ds
    }
}

/// The format table reported for the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LbaFormatTable {
    formats: Vec<LbaFormat>,
}

impl Default for LbaFormatTable {
    fn default() -> Self {
        Self {
            formats: DEFAULT_LBA_FORMATS.to_vec(),
        }
    }
}

impl LbaFormatTable {
    /// Index of the format matching `(ds, ms)`, appending a new entry when no
    /// predefined one matches.
    pub fn select(&mut self, ds: u8, ms: u16) -> usize {
        let wanted = LbaFormat::new(ds, ms);
        if let Some(idx) = self.formats.iter().position(|f| *f == wanted) {
            return idx;
        }

        debug_assert!(self.formats.len() < MAX_LBA_FORMATS);
        debug!(ds, ms, "adding non-standard lba format");
        self.formats.push(wanted);
        self.formats.len() - 1
    }

    pub fn formats(&self) -> &[LbaFormat] {
        &self.formats
    }

    pub fn get(&self, idx: usize) -> Option<&LbaFormat> {
        self.formats.get(idx)
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Properties reported by the storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BackendInfo {
    /// Backing size in bytes
    pub length: u64,

    /// Allocation cluster size in bytes, if the backend has one
    pub cluster_size: Option<u64>,
}

/// Zone geometry of a zoned namespace. All sizes are in logical blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoneGeometry {
    pub zone_size: u64,
    pub zone_capacity: u64,
    pub zone_count: u32,

    /// Maximum active zones (0 = unlimited)
    pub max_active: u32,

    /// Maximum open zones (0 = unlimited)
    pub max_open: u32,

    /// Zone descriptor extension size in bytes
    pub zd_extension_size: u32,

    pub cross_zone_read: bool,
}

impl ZoneGeometry {
    /// Zone descriptor extension size in 64-byte units.
    pub fn zdes(&self) -> u8 {
        (self.zd_extension_size >> 6) as u8
    }

    /// Blocks covered by zones.
    pub fn zoned_blocks(&self) -> u64 {
        u64::from(self.zone_count) * self.zone_size
    }
}

/// Immutable namespace geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceGeometry {
    /// Logical block size in bytes
    pub lba_size: u64,

    /// Metadata bytes per block
    pub ms: u16,

    pub formats: LbaFormatTable,

    /// Index of the selected format
    pub format_index: usize,

    /// Addressable blocks of the backing store
    pub total_blocks: u64,

    /// Deallocation granularity in blocks
    pub dealloc_granularity: u64,

    /// Deallocated blocks can be reported as such
    pub dulbe: bool,

    /// Zone geometry, for zoned namespaces
    pub zones: Option<ZoneGeometry>,
}

impl NamespaceGeometry {
    /// Compute the geometry for `params` on a backend.
    ///
    /// `params` must already have passed [`NamespaceParams::validate`].
    pub fn calculate(params: &NamespaceParams, backend: &BackendInfo) -> Result<Self> {
        let lbs = u64::from(params.logical_block_size);
        if !lbs.is_power_of_two() {
            return Err(Error::Config(format!(
                "logical block size {} is not a power of 2",
                lbs
            )));
        }
        let ds = lbs.trailing_zeros() as u8;

        let mut formats = LbaFormatTable::default();
        let format_index = formats.select(ds, params.ms);

        let total_blocks = backend.length / (lbs + u64::from(params.ms));
        let dealloc_granularity = dealloc_granularity(
            params.effective_discard_granularity(),
            backend.cluster_size,
            lbs,
        );

        let mut geometry = Self {
            lba_size: lbs,
            ms: params.ms,
            formats,
            format_index,
            total_blocks,
            dealloc_granularity,
            dulbe: true,
            zones: None,
        };

        if params.zoned {
            let zones = ZoneGeometry::calculate(&params.zone, lbs, total_blocks)?;
            if zones.zone_size % dealloc_granularity != 0 {
                warn!(
                    "the zone size ({} blocks) is not a multiple of the calculated \
                     deallocation granularity ({} blocks); DULBE support disabled",
                    zones.zone_size, dealloc_granularity
                );
                geometry.dulbe = false;
            }
            geometry.zones = Some(zones);
        }

        debug!(
            lba_size = geometry.lba_size,
            format_index = geometry.format_index,
            total_blocks = geometry.total_blocks,
            npdg = geometry.dealloc_granularity,
            "namespace geometry calculated"
        );

        Ok(geometry)
    }

    /// The selected LBA format.
    pub fn lba_format(&self) -> LbaFormat {
        self.formats.formats()[self.format_index]
    }

    /// Blocks reported as namespace size/capacity/utilization.
    pub fn reported_blocks(&self) -> u64 {
        match &self.zones {
            Some(z) => z.zoned_blocks(),
            None => self.total_blocks,
        }
    }

    /// Byte offset of the metadata area, which follows the data blocks.
    pub fn metadata_offset(&self) -> u64 {
        self.total_blocks * self.lba_size
    }
}

/// Deallocation granularity in blocks.
///
/// The discard granularity applies unless the backend allocates in larger
/// clusters. Never less than one block.
pub fn dealloc_granularity(discard_granularity: u64, cluster_size: Option<u64>, lbs: u64) -> u64 {
    let granularity = match cluster_size {
        Some(cluster) if cluster > discard_granularity => cluster,
        _ => discard_granularity,
    };
    (granularity / lbs).max(1)
}

impl ZoneGeometry {
    /// Derive and validate the zone geometry.
    pub fn calculate(params: &ZonedParams, lbs: u64, total_blocks: u64) -> Result<Self> {
        let zone_size = if params.zone_size != 0 {
            params.zone_size
        } else {
            super::params::DEFAULT_ZONE_SIZE
        };
        let zone_cap = if params.zone_capacity != 0 {
            params.zone_capacity
        } else {
            zone_size
        };

        if zone_cap > zone_size {
            return Err(Error::ZoneGeometry(format!(
                "zone capacity {}B exceeds zone size {}B",
                zone_cap, zone_size
            )));
        }
        if zone_size < lbs {
            return Err(Error::ZoneGeometry(format!(
                "zone size {}B too small, must be at least {}B",
                zone_size, lbs
            )));
        }
        if zone_cap < lbs {
            return Err(Error::ZoneGeometry(format!(
                "zone capacity {}B too small, must be at least {}B",
                zone_cap, lbs
            )));
        }

        let zone_size_blocks = zone_size / lbs;
        let zone_cap_blocks = zone_cap / lbs;
        let zone_count = total_blocks / zone_size_blocks;

        if zone_count == 0 {
            return Err(Error::InsufficientCapacity { zone_size });
        }
        let zone_count = u32::try_from(zone_count).map_err(|_| {
            Error::ZoneGeometry(format!("{} zones exceed the zone index range", zone_count))
        })?;

        let mut max_open = params.max_open;
        if params.max_active != 0 {
            if max_open > params.max_active {
                return Err(Error::OpenExceedsActive {
                    max_open,
                    max_active: params.max_active,
                });
            }
            if max_open == 0 {
                max_open = params.max_active;
            }
        }

        let ext = params.descr_ext_size;
        if ext != 0 {
            if ext & 0x3f != 0 {
                return Err(Error::DescriptorExtension {
                    size: ext,
                    reason: "must be a multiple of 64B".into(),
                });
            }
            if ext >> 6 > 0xff {
                return Err(Error::DescriptorExtension {
                    size: ext,
                    reason: "too large".into(),
                });
            }
        }

        Ok(Self {
            zone_size: zone_size_blocks,
            zone_capacity: zone_cap_blocks,
            zone_count,
            max_active: params.max_active,
            max_open,
            zd_extension_size: ext,
            cross_zone_read: params.cross_read,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::params::{KIB, MIB};

    fn backend(length: u64) -> BackendInfo {
        BackendInfo {
            length,
            cluster_size: None,
        }
    }

    // =========================================================================
    // LBA Format Tests
    // =========================================================================

    #[test]
    fn test_predefined_formats_selected() {
        for (idx, f) in DEFAULT_LBA_FORMATS.iter().enumerate() {
            let mut table = LbaFormatTable::default();
            assert_eq!(table.select(f.ds, f.ms), idx);
            assert_eq!(table.len(), 8);
        }
    }

    #[test]
    fn test_non_standard_format_appended() {
        let mut table = LbaFormatTable::default();
        assert_eq!(table.select(12, 32), 8);
        assert_eq!(table.len(), 9);
        assert_eq!(table.get(8), Some(&LbaFormat::new(12, 32)));

        let mut table = LbaFormatTable::default();
        assert_eq!(table.select(13, 0), 8);
        assert_eq!(table.get(8).unwrap().data_size(), 8192);
    }

    // =========================================================================
    // Block Geometry Tests
    // =========================================================================

    #[test]
    fn test_conventional_geometry() {
        let params = NamespaceParams {
            logical_block_size: 4096,
            ms: 8,
            ..Default::default()
        };
        let geo = NamespaceGeometry::calculate(&params, &backend(4104 * 1000 + 17)).unwrap();

        assert_eq!(geo.format_index, 5);
        assert_eq!(geo.lba_format(), LbaFormat::new(12, 8));
        assert_eq!(geo.total_blocks, 1000);
        assert_eq!(geo.reported_blocks(), 1000);
        assert_eq!(geo.metadata_offset(), 1000 * 4096);
        assert_eq!(geo.dealloc_granularity, 1);
        assert!(geo.dulbe);
        assert!(geo.zones.is_none());
    }

    #[test]
    fn test_dealloc_granularity() {
        // default discard granularity is max(lbs, 4 KiB)
        assert_eq!(dealloc_granularity(4 * KIB, None, 512), 8);
        // larger backend clusters win
        assert_eq!(dealloc_granularity(4 * KIB, Some(64 * KIB), 512), 128);
        // smaller clusters do not
        assert_eq!(dealloc_granularity(64 * KIB, Some(4 * KIB), 4096), 16);
        // never below one block
        assert_eq!(dealloc_granularity(512, None, 4096), 1);
    }

    // =========================================================================
    // Zone Geometry Tests
    // =========================================================================

    #[test]
    fn test_zone_geometry() {
        let params = NamespaceParams::zoned(4096, 128 * MIB, 96 * MIB);
        let geo = NamespaceGeometry::calculate(&params, &backend(1024 * MIB + 4096)).unwrap();
        let zones = geo.zones.unwrap();

        assert_eq!(zones.zone_size, 32768);
        assert_eq!(zones.zone_capacity, 24576);
        assert_eq!(zones.zone_count, 8);
        assert_eq!(geo.total_blocks, 262145);
        assert_eq!(geo.reported_blocks(), 8 * 32768);
    }

    #[test]
    fn test_zone_capacity_defaults_to_size() {
        let params = NamespaceParams::zoned(512, MIB, 0);
        let geo = NamespaceGeometry::calculate(&params, &backend(4 * MIB)).unwrap();
        let zones = geo.zones.unwrap();
        assert_eq!(zones.zone_capacity, zones.zone_size);
        assert_eq!(zones.zone_count, 4);
    }

    #[test]
    fn test_zone_size_defaults() {
        let mut params = NamespaceParams::zoned(4096, 0, 0);
        params.zone.zone_size = 0;
        let geo = NamespaceGeometry::calculate(&params, &backend(256 * MIB)).unwrap();
        assert_eq!(geo.zones.unwrap().zone_size, 32768);
    }

    #[test]
    fn test_capacity_exceeds_size() {
        let params = NamespaceParams::zoned(4096, 64 * MIB, 65 * MIB);
        let err = NamespaceGeometry::calculate(&params, &backend(1024 * MIB)).unwrap_err();
        assert!(matches!(err, Error::ZoneGeometry(_)));
    }

    #[test]
    fn test_zone_smaller_than_block() {
        let params = NamespaceParams::zoned(4096, 2048, 2048);
        let err = NamespaceGeometry::calculate(&params, &backend(MIB)).unwrap_err();
        assert!(matches!(err, Error::ZoneGeometry(_)));

        let params = NamespaceParams::zoned(4096, 8192, 2048);
        let err = NamespaceGeometry::calculate(&params, &backend(MIB)).unwrap_err();
        assert!(matches!(err, Error::ZoneGeometry(_)));
    }

    #[test]
    fn test_zero_zones_rejected() {
        let params = NamespaceParams::zoned(4096, 128 * MIB, 0);
        let err = NamespaceGeometry::calculate(&params, &backend(127 * MIB)).unwrap_err();
        assert!(matches!(err, Error::InsufficientCapacity { zone_size } if zone_size == 128 * MIB));
    }

    #[test]
    fn test_open_limit_defaults_to_active() {
        let mut params = NamespaceParams::zoned(4096, MIB, 0);
        params.zone.max_active = 6;
        let geo = NamespaceGeometry::calculate(&params, &backend(16 * MIB)).unwrap();
        assert_eq!(geo.zones.unwrap().max_open, 6);

        params.zone.max_open = 7;
        let err = NamespaceGeometry::calculate(&params, &backend(16 * MIB)).unwrap_err();
        assert!(matches!(
            err,
            Error::OpenExceedsActive {
                max_open: 7,
                max_active: 6
            }
        ));

        params.zone.max_active = 0;
        let geo = NamespaceGeometry::calculate(&params, &backend(16 * MIB)).unwrap();
        assert_eq!(geo.zones.unwrap().max_open, 7);
    }

    #[test]
    fn test_descriptor_extension_size() {
        let mut params = NamespaceParams::zoned(4096, MIB, 0);

        params.zone.descr_ext_size = 128;
        let geo = NamespaceGeometry::calculate(&params, &backend(16 * MIB)).unwrap();
        assert_eq!(geo.zones.unwrap().zdes(), 2);

        params.zone.descr_ext_size = 100;
        assert!(matches!(
            NamespaceGeometry::calculate(&params, &backend(16 * MIB)),
            Err(Error::DescriptorExtension { size: 100, .. })
        ));

        params.zone.descr_ext_size = 255 * 64;
        assert!(NamespaceGeometry::calculate(&params, &backend(16 * MIB)).is_ok());

        params.zone.descr_ext_size = 256 * 64;
        assert!(matches!(
            NamespaceGeometry::calculate(&params, &backend(16 * MIB)),
            Err(Error::DescriptorExtension { .. })
        ));
    }

    #[test]
    fn test_dulbe_disabled_on_misaligned_zone_size() {
        // 12 blocks of 512B per zone, 8-block granularity
        let params = NamespaceParams::zoned(512, 6 * KIB, 0);
        let geo = NamespaceGeometry::calculate(&params, &backend(MIB)).unwrap();
        assert_eq!(geo.dealloc_granularity, 8);
        assert!(!geo.dulbe);

        let params = NamespaceParams::zoned(512, 8 * KIB, 0);
        let geo = NamespaceGeometry::calculate(&params, &backend(MIB)).unwrap();
        assert!(geo.dulbe);
    }
}
