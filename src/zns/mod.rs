//! Zoned Namespaces (ZNS) state
//!
//! Zone state machine, active/open resource accounting and the lifecycle of
//! the zone array of one zoned namespace.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         ZonedNamespace                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────┐   ┌───────────────────────────┐   │
//! │  │        ZoneRegistry          │   │      AorAccountant        │   │
//! │  │  zones[0..N]  (arena)        │   │  active / max_active      │   │
//! │  │  exp_open imp_open closed    │   │  open   / max_open        │   │
//! │  │  full         (index lists)  │   └───────────────────────────┘   │
//! │  └──────────────────────────────┘                                    │
//! │  ┌──────────────────────────────┐                                    │
//! │  │  descriptor extensions       │  ext_size bytes per zone           │
//! │  └──────────────────────────────┘                                    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Zone Lifecycle
//!
//! ```text
//!            open/write              close
//!   Empty ───────────────► Open ───────────► Closed
//!     ▲                     │  ▲                │
//!     │ reset               │  └── open/write ──┘
//!     │                     ▼ finish / wp at boundary
//!     └──────────────────  Full
//! ```
//!
//! Every transition that changes open/active status is paired with the
//! matching [`AorAccountant`] update; the operations in this module do both.
//! Callers serialize access per namespace.

pub mod aor;
pub mod mgmt;
pub mod registry;
pub mod zone;

#[cfg(test)]
mod proptest;

pub use aor::AorAccountant;
pub use mgmt::OpenMode;
pub use registry::{ZoneList, ZoneRegistry};
pub use zone::{Zone, ZoneAttrs, ZoneId, ZoneState, ZoneType};

use tracing::{debug, info, trace};

use crate::namespace::geometry::ZoneGeometry;

/// Zone state of one zoned namespace.
#[derive(Debug, Clone)]
pub struct ZonedNamespace {
    geometry: ZoneGeometry,
    registry: ZoneRegistry,
    aor: AorAccountant,
    extensions: Option<Vec<u8>>,
}

impl ZonedNamespace {
    /// Build the zone array for `geometry`. All zones start Empty.
    pub fn new(geometry: ZoneGeometry) -> Self {
        let registry = ZoneRegistry::new(
            geometry.zone_count,
            geometry.zone_size,
            geometry.zone_capacity,
        );
        let extensions = (geometry.zd_extension_size != 0).then(|| {
            vec![0u8; geometry.zd_extension_size as usize * geometry.zone_count as usize]
        });

        debug!(
            zones = geometry.zone_count,
            zone_size = geometry.zone_size,
            zone_capacity = geometry.zone_capacity,
            max_active = geometry.max_active,
            max_open = geometry.max_open,
            "zone array initialized"
        );

        Self {
            aor: AorAccountant::new(geometry.max_active, geometry.max_open),
            geometry,
            registry,
            extensions,
        }
    }

    pub fn geometry(&self) -> &ZoneGeometry {
        &self.geometry
    }

    pub fn registry(&self) -> &ZoneRegistry {
        &self.registry
    }

    pub fn aor(&self) -> &AorAccountant {
        &self.aor
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.registry.zone(id)
    }

    pub fn zone_count(&self) -> u32 {
        self.geometry.zone_count
    }

    pub fn active_count(&self) -> u32 {
        self.aor.active()
    }

    pub fn open_count(&self) -> u32 {
        self.aor.open()
    }

    /// Descriptor extension of a zone, when extensions are configured.
    pub fn zd_extension(&self, id: ZoneId) -> Option<&[u8]> {
        let size = self.geometry.zd_extension_size as usize;
        let start = id as usize * size;
        self.extensions
            .as_deref()
            .and_then(|ext| ext.get(start..start + size))
    }

    /// Descriptor extension as a zone report carries it: only while the
    /// zone's extension-valid attribute is set.
    pub fn reported_zd_extension(&self, id: ZoneId) -> Option<&[u8]> {
        let valid = self
            .registry
            .zone(id)
            .map_or(false, |z| z.attrs.contains(ZoneAttrs::ZD_EXT_VALID));
        if valid {
            self.zd_extension(id)
        } else {
            None
        }
    }

    pub(crate) fn zd_extension_mut(&mut self, id: ZoneId) -> Option<&mut [u8]> {
        let size = self.geometry.zd_extension_size as usize;
        let start = id as usize * size;
        self.extensions
            .as_deref_mut()
            .and_then(|ext| ext.get_mut(start..start + size))
    }

    /// Counters respect the maxima and agree with the zone lists.
    pub fn is_consistent(&self) -> bool {
        let open = self.registry.list_len(ZoneList::ExplicitlyOpen)
            + self.registry.list_len(ZoneList::ImplicitlyOpen);
        let active = open + self.registry.list_len(ZoneList::Closed);

        self.aor.within_limits()
            && self.registry.lists_consistent()
            && self.aor.open() as usize == open
            && self.aor.active() as usize == active
    }

    /// Reconcile a zone's state and accounting with its content.
    ///
    /// A zone holding data or a valid descriptor extension becomes Closed and
    /// is counted active again, linked at the head of the closed list. Any
    /// other zone becomes Empty. The caller has already released the zone's
    /// open/active counts and unlinked it from its list.
    pub fn clear_zone(&mut self, id: ZoneId) {
        let Some(zone) = self.registry.zone_mut(id) else {
            return;
        };
        zone.shadow_wp = zone.wp;
        let state = zone.state;

        if zone.has_content() {
            if state != ZoneState::Closed {
                trace!(zone = id, from = %state, "clear: closing zone");
                zone.state = ZoneState::Closed;
            }
            self.aor.inc_active();
            self.registry.push_front(ZoneList::Closed, id);
        } else {
            trace!(zone = id, from = %state, "clear: resetting zone");
            self.registry.assign_state(id, ZoneState::Empty);
        }
    }

    /// Close every open zone and normalize every closed one.
    ///
    /// After this, no zone is open and every previously open or closed zone
    /// is Closed when it holds content and Empty otherwise.
    pub fn shutdown(&mut self) {
        let closed = self.registry.drain_list(ZoneList::Closed);
        for &id in &closed {
            self.aor.dec_active();
            self.clear_zone(id);
        }

        let imp_open = self.registry.drain_list(ZoneList::ImplicitlyOpen);
        for &id in &imp_open {
            self.aor.dec_open();
            self.aor.dec_active();
            self.clear_zone(id);
        }

        let exp_open = self.registry.drain_list(ZoneList::ExplicitlyOpen);
        for &id in &exp_open {
            self.aor.dec_open();
            self.aor.dec_active();
            self.clear_zone(id);
        }

        debug_assert_eq!(self.aor.open(), 0);
        info!(
            closed = closed.len(),
            implicitly_open = imp_open.len(),
            explicitly_open = exp_open.len(),
            active = self.aor.active(),
            "zones quiesced"
        );
    }
}
