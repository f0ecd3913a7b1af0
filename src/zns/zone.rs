//! Zone records and their state/attribute encodings.

use serde::{Deserialize, Serialize};

/// Index of a zone in the namespace's zone array.
pub type ZoneId = u32;

// =============================================================================
// Zone State
// =============================================================================

/// State of a zone, with the NVMe ZNS state encoding as discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum ZoneState {
    /// No data written, no resources held
    #[default]
    Empty = 0x1,

    /// Opened by a write
    ImplicitlyOpen = 0x2,

    /// Opened by an explicit open request
    ExplicitlyOpen = 0x3,

    /// Active but not open for writes
    Closed = 0x4,

    /// Readable, never writable again
    ReadOnly = 0xd,

    /// Write pointer at the write boundary
    Full = 0xe,

    /// Neither readable nor writable
    Offline = 0xf,
}

impl std::fmt::Display for ZoneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneState::Empty => write!(f, "Empty"),
            ZoneState::ImplicitlyOpen => write!(f, "Implicitly Open"),
            ZoneState::ExplicitlyOpen => write!(f, "Explicitly Open"),
            ZoneState::Closed => write!(f, "Closed"),
            ZoneState::ReadOnly => write!(f, "Read Only"),
            ZoneState::Full => write!(f, "Full"),
            ZoneState::Offline => write!(f, "Offline"),
        }
    }
}

impl ZoneState {
    /// Decode the 4-bit state code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x1 => Some(ZoneState::Empty),
            0x2 => Some(ZoneState::ImplicitlyOpen),
            0x3 => Some(ZoneState::ExplicitlyOpen),
            0x4 => Some(ZoneState::Closed),
            0xd => Some(ZoneState::ReadOnly),
            0xe => Some(ZoneState::Full),
            0xf => Some(ZoneState::Offline),
            _ => None,
        }
    }

    /// 4-bit state code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Zone counts against the open limit.
    pub fn is_open(self) -> bool {
        matches!(self, ZoneState::ImplicitlyOpen | ZoneState::ExplicitlyOpen)
    }

    /// Zone counts against the active limit.
    pub fn is_active(self) -> bool {
        self.is_open() || self == ZoneState::Closed
    }

    /// The write pointer is meaningful in this state.
    pub fn wp_is_valid(self) -> bool {
        !matches!(
            self,
            ZoneState::Full | ZoneState::ReadOnly | ZoneState::Offline
        )
    }
}

/// Zone type. Only sequential-write-required zones are emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum ZoneType {
    #[default]
    SeqWriteRequired = 0x2,
}

// =============================================================================
// Zone Attributes
// =============================================================================

/// Zone attribute bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ZoneAttrs(u8);

impl ZoneAttrs {
    /// Zone Finished by Controller
    pub const FINISHED_BY_CTRL: u8 = 0x01;
    /// Finish Zone Recommended
    pub const FINISH_RECOMMENDED: u8 = 0x04;
    /// Reset Zone Recommended
    pub const RESET_RECOMMENDED: u8 = 0x08;
    /// Zone Descriptor Extension Valid
    pub const ZD_EXT_VALID: u8 = 0x80;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn insert(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn remove(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// Zone
// =============================================================================

/// A single zone record.
///
/// `start` and `capacity` are fixed when the registry is built; everything
/// else is mutated through the registry's state primitive and the zone
/// management operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone start LBA
    pub start: u64,

    /// Writable blocks in the zone
    pub capacity: u64,

    /// Write pointer as reported to the host
    pub wp: u64,

    /// Shadow write pointer, used for clear/reset bookkeeping
    pub shadow_wp: u64,

    pub state: ZoneState,
    pub attrs: ZoneAttrs,
    pub zone_type: ZoneType,
}

impl Zone {
    /// Create an empty zone.
    pub fn new(start: u64, capacity: u64) -> Self {
        Self {
            start,
            capacity,
            wp: start,
            shadow_wp: start,
            state: ZoneState::Empty,
            attrs: ZoneAttrs::default(),
            zone_type: ZoneType::SeqWriteRequired,
        }
    }

    /// First LBA past the writable part of the zone.
    pub fn wr_boundary(&self) -> u64 {
        self.start + self.capacity
    }

    /// Blocks written so far.
    pub fn written(&self) -> u64 {
        self.wp - self.start
    }

    /// Blocks that can still be written.
    pub fn remaining(&self) -> u64 {
        self.wr_boundary().saturating_sub(self.wp)
    }

    /// The zone holds data or a valid descriptor extension.
    pub fn has_content(&self) -> bool {
        self.wp != self.start || self.attrs.contains(ZoneAttrs::ZD_EXT_VALID)
    }
}
