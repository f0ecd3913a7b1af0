//! Error types for the zoned namespace core

use thiserror::Error;

use crate::zns::ZoneId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Do Not Retry bit of an NVMe completion status.
pub const NVME_DNR: u16 = 0x4000;

/// Errors that can occur while bringing up or running a namespace
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the backing store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error
    #[error("Failed to parse namespace configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Zone size/capacity relationship is invalid
    #[error("Invalid zone geometry: {0}")]
    ZoneGeometry(String),

    /// Backing store too small for a single zone
    #[error("insufficient drive capacity, must be at least the size of one zone ({zone_size}B)")]
    InsufficientCapacity { zone_size: u64 },

    /// max_open_zones exceeds max_active_zones
    #[error("max_open_zones ({max_open}) exceeds max_active_zones ({max_active})")]
    OpenExceedsActive { max_open: u32, max_active: u32 },

    /// Zone descriptor extension size is misaligned or too large
    #[error("Invalid zone descriptor extension size {size}B: {reason}")]
    DescriptorExtension { size: u32, reason: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Lifecycle method called out of order
    #[error("Invalid lifecycle transition for namespace {nsid}: {reason}")]
    Lifecycle { nsid: u32, reason: String },

    /// Operation requires a zoned namespace
    #[error("Namespace {0} is not zoned")]
    NotZoned(u32),

    // =========================================================================
    // Zone Operation Errors
    // =========================================================================
    /// Zone management or admission failure
    #[error(transparent)]
    Zone(#[from] ZoneError),
}

/// Non-fatal failures of zone management requests.
///
/// Every variant maps to a distinct NVMe completion status, see
/// [`ZoneError::status`]. A request that fails with one of these leaves the
/// namespace untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneError {
    /// Admission would exceed the active zone limit
    #[error("too many active zones (max {max_active})")]
    TooManyActive { max_active: u32 },

    /// Admission would exceed the open zone limit
    #[error("too many open zones (max {max_open})")]
    TooManyOpen { max_open: u32 },

    /// The requested state change is not allowed from the zone's state
    #[error("invalid zone state transition for zone {zone}")]
    InvalidTransition { zone: ZoneId },

    /// Zone index or start LBA out of range
    #[error("invalid zone: {0}")]
    InvalidZone(u64),

    /// Write or read would cross a zone boundary
    #[error("zone boundary error at lba {slba} (+{nlb})")]
    BoundaryError { slba: u64, nlb: u32 },

    /// Write targets a full zone
    #[error("zone {0} is full")]
    ZoneFull(ZoneId),

    /// Write targets a read-only zone
    #[error("zone {0} is read-only")]
    ZoneReadOnly(ZoneId),

    /// Access to an offline zone
    #[error("zone {0} is offline")]
    ZoneOffline(ZoneId),

    /// Write does not start at the write pointer
    #[error("invalid write to zone {zone}: lba {slba} != wp {wp}")]
    InvalidWrite { zone: ZoneId, slba: u64, wp: u64 },

    /// Malformed request (wrong extension length, extensions disabled, ...)
    #[error("invalid field in zone request")]
    InvalidField,
}

impl ZoneError {
    /// NVMe completion status for this error, with the DNR bit set.
    pub fn status(&self) -> u16 {
        let sc = match self {
            ZoneError::InvalidField => 0x0002,
            ZoneError::InvalidZone(_) => 0x0080,
            ZoneError::BoundaryError { .. } => 0x01b8,
            ZoneError::ZoneFull(_) => 0x01b9,
            ZoneError::ZoneReadOnly(_) => 0x01ba,
            ZoneError::ZoneOffline(_) => 0x01bb,
            ZoneError::InvalidWrite { .. } => 0x01bc,
            ZoneError::TooManyActive { .. } => 0x01bd,
            ZoneError::TooManyOpen { .. } => 0x01be,
            ZoneError::InvalidTransition { .. } => 0x01bf,
        };
        sc | NVME_DNR
    }

    /// Whether this is an active/open resource admission failure.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            ZoneError::TooManyActive { .. } | ZoneError::TooManyOpen { .. }
        )
    }
}

impl Error {
    /// Whether the error prevented the namespace from coming online.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::ZoneGeometry(_)
                | Error::InsufficientCapacity { .. }
                | Error::OpenExceedsActive { .. }
                | Error::DescriptorExtension { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_statuses_are_distinct() {
        let active = ZoneError::TooManyActive { max_active: 4 };
        let open = ZoneError::TooManyOpen { max_open: 2 };

        assert_eq!(active.status(), 0x41bd);
        assert_eq!(open.status(), 0x41be);
        assert_ne!(active.status(), open.status());
        assert!(active.is_admission());
        assert!(open.is_admission());
        assert!(!ZoneError::InvalidTransition { zone: 0 }.is_admission());
    }

    #[test]
    fn test_config_classification() {
        assert!(Error::ZoneGeometry("x".into()).is_config());
        assert!(Error::OpenExceedsActive {
            max_open: 3,
            max_active: 2
        }
        .is_config());
        assert!(!Error::Zone(ZoneError::ZoneFull(1)).is_config());
    }

    #[test]
    fn test_display() {
        let err = Error::InsufficientCapacity {
            zone_size: 128 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "insufficient drive capacity, must be at least the size of one zone (134217728B)"
        );
        let err: Error = ZoneError::TooManyOpen { max_open: 2 }.into();
        assert_eq!(err.to_string(), "too many open zones (max 2)");
    }
}
