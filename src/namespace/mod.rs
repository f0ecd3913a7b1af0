//! NVMe namespaces
//!
//! A [`Namespace`] ties together its configuration, the geometry computed for
//! its backend and, for zoned namespaces, the [`ZonedNamespace`] zone state.
//!
//! # Lifecycle
//!
//! ```text
//!   NamespaceFactory::setup ──► Online ──drain──► Online
//!                                 │
//!                              shutdown  (flush, close all zones)
//!                                 ▼
//!                             ShutDown ──shutdown/drain──► ShutDown
//!                                 │
//!                              cleanup   (release zone state, once)
//!                                 ▼
//!                            CleanedUp
//! ```
//!
//! Setup either yields a fully initialized namespace or an error with nothing
//! left behind. A shut-down namespace can still be inspected; a cleaned-up
//! one can not.

pub mod backend;
pub mod geometry;
pub mod identify;
pub mod params;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use backend::{BlockBackend, FileBackend, MemBackend};
pub use geometry::{BackendInfo, LbaFormat, LbaFormatTable, NamespaceGeometry, ZoneGeometry};
pub use params::{NamespaceParams, ZonedParams};

use crate::error::{Error, Result};
use crate::zns::{ZoneId, ZoneState, ZonedNamespace};
use identify::{IdNs, IdNsZoned, CSI_NVM, CSI_ZONED};

/// Base of generated EUI-64 values (QEMU OUI 52:54:00).
pub const EUI64_DEFAULT_BASE: u64 = 0x5254_0000_0000_0000;

/// Namespace handle shared between threads. Zone management on one
/// namespace is serialized by the lock.
pub type SharedNamespace = Arc<Mutex<Namespace>>;

// =============================================================================
// Factory
// =============================================================================

/// Creates namespaces and hands out generated identifiers.
#[derive(Debug, Default)]
pub struct NamespaceFactory {
    setup_count: AtomicU64,
}

impl NamespaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of setups that got past parameter validation.
    pub fn setup_count(&self) -> u64 {
        self.setup_count.load(Ordering::Acquire)
    }

    /// Validate `params`, compute the geometry for `backend` and initialize
    /// the zone state of zoned namespaces.
    ///
    /// Every setup that passes parameter validation consumes one EUI-64
    /// sequence number, whether or not a default EUI-64 is assigned and
    /// whether or not the rest of setup succeeds.
    #[instrument(skip_all, fields(nsid = params.nsid))]
    pub fn setup(
        &self,
        mut params: NamespaceParams,
        backend: Arc<dyn BlockBackend>,
    ) -> Result<Namespace> {
        params.validate()?;

        let seq = self.setup_count.fetch_add(1, Ordering::AcqRel) + 1;
        if params.eui64 == 0 && params.eui64_default {
            params.eui64 = EUI64_DEFAULT_BASE + seq;
        }
        let uuid = *params.uuid.get_or_insert_with(Uuid::new_v4);

        let info = backend.info()?;
        let geometry = NamespaceGeometry::calculate(&params, &info)?;
        let zns = geometry.zones.map(ZonedNamespace::new);

        info!(
            nsid = params.nsid,
            %uuid,
            eui64 = %format!("{:016x}", params.eui64),
            zoned = zns.is_some(),
            blocks = geometry.reported_blocks(),
            "namespace online"
        );

        Ok(Namespace {
            params,
            geometry,
            uuid,
            zns,
            backend,
            phase: Phase::Online,
        })
    }
}

// =============================================================================
// Namespace
// =============================================================================

/// Lifecycle phase of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Online,
    ShutDown,
    CleanedUp,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Online => write!(f, "online"),
            Phase::ShutDown => write!(f, "shut down"),
            Phase::CleanedUp => write!(f, "cleaned up"),
        }
    }
}

/// One namespace and its zone state.
#[derive(Debug)]
pub struct Namespace {
    params: NamespaceParams,
    geometry: NamespaceGeometry,
    uuid: Uuid,
    zns: Option<ZonedNamespace>,
    backend: Arc<dyn BlockBackend>,
    phase: Phase,
}

impl Namespace {
    pub fn nsid(&self) -> u32 {
        self.params.nsid
    }

    pub fn params(&self) -> &NamespaceParams {
        &self.params
    }

    pub fn geometry(&self) -> &NamespaceGeometry {
        &self.geometry
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// EUI-64, 0 when neither configured nor generated.
    pub fn eui64(&self) -> u64 {
        self.params.eui64
    }

    pub fn is_zoned(&self) -> bool {
        self.params.zoned
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Command set identifier.
    pub fn csi(&self) -> u8 {
        if self.is_zoned() {
            CSI_ZONED
        } else {
            CSI_NVM
        }
    }

    fn ensure_not_cleaned_up(&self, what: &str) -> Result<()> {
        if self.phase == Phase::CleanedUp {
            return Err(Error::Lifecycle {
                nsid: self.nsid(),
                reason: format!("{} after cleanup", what),
            });
        }
        Ok(())
    }

    /// Zone state of a zoned namespace.
    pub fn zns(&self) -> Result<&ZonedNamespace> {
        self.ensure_not_cleaned_up("zone access")?;
        self.zns.as_ref().ok_or(Error::NotZoned(self.nsid()))
    }

    pub fn zns_mut(&mut self) -> Result<&mut ZonedNamespace> {
        self.ensure_not_cleaned_up("zone access")?;
        let nsid = self.nsid();
        self.zns.as_mut().ok_or(Error::NotZoned(nsid))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Wait for outstanding backend requests.
    pub fn drain(&self) -> Result<()> {
        self.ensure_not_cleaned_up("drain")?;
        self.backend.drain();
        debug!(nsid = self.nsid(), "namespace drained");
        Ok(())
    }

    /// Flush the backend and bring every zone to a resting state.
    ///
    /// Open zones are closed, and zones without content return to Empty.
    /// Requires external quiescence, see [`Namespace::drain`].
    ///
    /// Zones are brought to rest and the namespace is shut down even when the
    /// flush fails; the flush error is returned afterwards.
    #[instrument(skip(self), fields(nsid = self.nsid()))]
    pub fn shutdown(&mut self) -> Result<()> {
        self.ensure_not_cleaned_up("shutdown")?;
        let flushed = self.backend.flush();
        if let Err(e) = &flushed {
            warn!(nsid = self.nsid(), error = %e, "backend flush failed");
        }
        if let Some(zns) = self.zns.as_mut() {
            zns.shutdown();
        }
        self.phase = Phase::ShutDown;
        info!(nsid = self.nsid(), "namespace shut down");
        flushed
    }

    /// Release the zone state. Allowed once, after shutdown.
    pub fn cleanup(&mut self) -> Result<()> {
        match self.phase {
            Phase::ShutDown => {}
            phase => {
                return Err(Error::Lifecycle {
                    nsid: self.nsid(),
                    reason: format!("cleanup while {}", phase),
                })
            }
        }
        self.zns = None;
        self.phase = Phase::CleanedUp;
        debug!(nsid = self.nsid(), "namespace cleaned up");
        Ok(())
    }

    /// Drain, shut down and clean up, as on device removal. A failed flush
    /// does not prevent cleanup; its error is returned once cleanup is done.
    pub fn teardown(&mut self) -> Result<()> {
        self.drain()?;
        let flushed = self.shutdown();
        self.cleanup()?;
        flushed
    }

    pub fn into_shared(self) -> SharedNamespace {
        Arc::new(Mutex::new(self))
    }

    // =========================================================================
    // Identification
    // =========================================================================

    /// Identify Namespace data structure.
    pub fn identify(&self) -> Bytes {
        IdNs::new(&self.geometry, &self.params, &self.uuid, self.eui64()).encode()
    }

    /// Zoned command set specific Identify Namespace data structure.
    pub fn identify_zoned(&self) -> Result<Bytes> {
        let zones = self.zns()?.geometry();
        Ok(IdNsZoned::new(zones, self.geometry.formats.len()).encode())
    }

    /// Namespace identification descriptor list.
    pub fn identify_descriptors(&self) -> Bytes {
        identify::encode_ns_descriptors(self.eui64(), &self.uuid, self.csi())
    }

    /// Zone report starting at zone `from`, optionally filtered by state.
    /// Extended reports carry the descriptor extension of zones whose
    /// extension is valid, and zeros for every other zone.
    pub fn report_zones(
        &self,
        from: ZoneId,
        filter: Option<ZoneState>,
        extended: bool,
    ) -> Result<Bytes> {
        let zns = self.zns()?;
        if extended && zns.geometry().zd_extension_size == 0 {
            return Err(crate::error::ZoneError::InvalidField.into());
        }
        if from >= zns.zone_count() {
            return Err(crate::error::ZoneError::InvalidZone(u64::from(from)).into());
        }

        let ext_size = if extended {
            zns.geometry().zd_extension_size as usize
        } else {
            0
        };
        let zones = zns
            .report_zones(from, filter)
            .into_iter()
            .map(|(id, zone)| (zone, zns.reported_zd_extension(id)));
        Ok(identify::encode_zone_report(zones, ext_size))
    }
}
