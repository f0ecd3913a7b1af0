//! Zone management operations.
//!
//! Each operation pairs a state transition with the matching active/open
//! accounting and either commits both or changes nothing.
//!
//! | from \ op        | open (explicit) | close  | finish | reset  |
//! |------------------|-----------------|--------|--------|--------|
//! | Empty            | +act +open      | error  | Full   | no-op  |
//! | Implicitly Open  | Explicitly Open | -open  | -open -act | -open -act |
//! | Explicitly Open  | no-op           | -open  | -open -act | -open -act |
//! | Closed           | +open           | no-op  | -act   | -act   |
//! | Full             | error           | error  | no-op  | Empty  |
//! | Read Only        | error           | error  | error  | error  |
//! | Offline          | error           | error  | error  | error  |

use tracing::{debug, instrument};

use super::registry::ZoneList;
use super::zone::{Zone, ZoneAttrs, ZoneId, ZoneState};
use super::ZonedNamespace;
use crate::error::ZoneError;

/// How a zone is being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open Zone request
    Explicit,

    /// Opened as a side effect of a write
    Implicit,
}

impl ZonedNamespace {
    fn zone_checked(&self, id: ZoneId) -> Result<&Zone, ZoneError> {
        self.registry
            .zone(id)
            .ok_or(ZoneError::InvalidZone(u64::from(id)))
    }

    /// Zone containing `slba`.
    pub fn zone_by_slba(&self, slba: u64) -> Result<ZoneId, ZoneError> {
        self.registry
            .zone_by_slba(slba)
            .ok_or(ZoneError::InvalidZone(slba))
    }

    /// Open a zone, explicitly or implicitly.
    #[instrument(skip(self), level = "debug")]
    pub fn open_zone(&mut self, id: ZoneId, mode: OpenMode) -> Result<(), ZoneError> {
        let state = self.zone_checked(id)?.state;

        match state {
            ZoneState::Empty | ZoneState::Closed => {
                let act = u32::from(state == ZoneState::Empty);
                self.aor.check(act, 1)?;
                if act != 0 {
                    self.aor.inc_active();
                }
                self.aor.inc_open();
                let target = match mode {
                    OpenMode::Implicit => ZoneState::ImplicitlyOpen,
                    OpenMode::Explicit => ZoneState::ExplicitlyOpen,
                };
                self.registry.assign_state(id, target);
            }
            ZoneState::ImplicitlyOpen => {
                if mode == OpenMode::Explicit {
                    self.registry.assign_state(id, ZoneState::ExplicitlyOpen);
                }
            }
            ZoneState::ExplicitlyOpen => {}
            _ => return Err(ZoneError::InvalidTransition { zone: id }),
        }

        debug!(zone = id, from = %state, "zone opened");
        Ok(())
    }

    /// Close an open zone.
    #[instrument(skip(self), level = "debug")]
    pub fn close_zone(&mut self, id: ZoneId) -> Result<(), ZoneError> {
        match self.zone_checked(id)?.state {
            ZoneState::ImplicitlyOpen | ZoneState::ExplicitlyOpen => {
                self.aor.dec_open();
                self.registry.assign_state(id, ZoneState::Closed);
                Ok(())
            }
            ZoneState::Closed => Ok(()),
            _ => Err(ZoneError::InvalidTransition { zone: id }),
        }
    }

    /// Transition a zone to Full, releasing its resources.
    #[instrument(skip(self), level = "debug")]
    pub fn finish_zone(&mut self, id: ZoneId) -> Result<(), ZoneError> {
        let state = self.zone_checked(id)?.state;

        match state {
            ZoneState::ImplicitlyOpen | ZoneState::ExplicitlyOpen => {
                self.aor.dec_open();
                self.aor.dec_active();
            }
            ZoneState::Closed => self.aor.dec_active(),
            ZoneState::Empty => {}
            ZoneState::Full => return Ok(()),
            _ => return Err(ZoneError::InvalidTransition { zone: id }),
        }

        if let Some(zone) = self.registry.zone_mut(id) {
            zone.wp = zone.wr_boundary();
            zone.shadow_wp = zone.wp;
        }
        self.registry.assign_state(id, ZoneState::Full);
        Ok(())
    }

    /// Rewind a zone to Empty, releasing its resources.
    #[instrument(skip(self), level = "debug")]
    pub fn reset_zone(&mut self, id: ZoneId) -> Result<(), ZoneError> {
        let state = self.zone_checked(id)?.state;

        match state {
            ZoneState::ImplicitlyOpen | ZoneState::ExplicitlyOpen => {
                self.aor.dec_open();
                self.aor.dec_active();
            }
            ZoneState::Closed => self.aor.dec_active(),
            ZoneState::Full => {}
            ZoneState::Empty => return Ok(()),
            _ => return Err(ZoneError::InvalidTransition { zone: id }),
        }

        if let Some(zone) = self.registry.zone_mut(id) {
            zone.wp = zone.start;
            zone.shadow_wp = zone.start;
        }
        self.registry.assign_state(id, ZoneState::Empty);
        Ok(())
    }

    /// Take a read-only zone offline.
    pub fn offline_zone(&mut self, id: ZoneId) -> Result<(), ZoneError> {
        match self.zone_checked(id)?.state {
            ZoneState::ReadOnly => {
                self.registry.assign_state(id, ZoneState::Offline);
                Ok(())
            }
            ZoneState::Offline => Ok(()),
            _ => Err(ZoneError::InvalidTransition { zone: id }),
        }
    }

    /// Mark a zone read-only, as a media failure would. The zone gives up
    /// any open/active resources it held.
    pub fn set_read_only(&mut self, id: ZoneId) -> Result<(), ZoneError> {
        let state = self.zone_checked(id)?.state;
        if state == ZoneState::Offline {
            return Err(ZoneError::InvalidTransition { zone: id });
        }
        if state.is_open() {
            self.aor.dec_open();
        }
        if state.is_active() {
            self.aor.dec_active();
        }
        self.registry.assign_state(id, ZoneState::ReadOnly);
        Ok(())
    }

    /// Store a zone descriptor extension, activating an Empty zone as Closed.
    #[instrument(skip(self, data), level = "debug")]
    pub fn set_zd_extension(&mut self, id: ZoneId, data: &[u8]) -> Result<(), ZoneError> {
        let state = self.zone_checked(id)?.state;
        if self.geometry.zd_extension_size == 0
            || data.len() != self.geometry.zd_extension_size as usize
        {
            return Err(ZoneError::InvalidField);
        }
        if state != ZoneState::Empty {
            return Err(ZoneError::InvalidTransition { zone: id });
        }

        self.aor.check(1, 0)?;
        self.aor.inc_active();

        if let Some(ext) = self.zd_extension_mut(id) {
            ext.copy_from_slice(data);
        }
        if let Some(zone) = self.registry.zone_mut(id) {
            zone.attrs.insert(ZoneAttrs::ZD_EXT_VALID);
        }
        self.registry.assign_state(id, ZoneState::Closed);
        Ok(())
    }

    /// Account for `nlb` blocks written at `slba`.
    ///
    /// The write must cover at least one block, start at the zone's write
    /// pointer and stay within its capacity. Empty and Closed zones are implicitly opened first, subject
    /// to admission. A zone whose write pointer reaches the write boundary is
    /// finished. Returns the zone written to.
    #[instrument(skip(self), level = "trace")]
    pub fn record_write(&mut self, slba: u64, nlb: u32) -> Result<ZoneId, ZoneError> {
        if nlb == 0 {
            return Err(ZoneError::InvalidField);
        }
        let id = self.zone_by_slba(slba)?;
        let zone = self.zone_checked(id)?;

        match zone.state {
            ZoneState::Full => return Err(ZoneError::ZoneFull(id)),
            ZoneState::ReadOnly => return Err(ZoneError::ZoneReadOnly(id)),
            ZoneState::Offline => return Err(ZoneError::ZoneOffline(id)),
            _ => {}
        }
        if slba != zone.wp {
            return Err(ZoneError::InvalidWrite {
                zone: id,
                slba,
                wp: zone.wp,
            });
        }
        if slba + u64::from(nlb) > zone.wr_boundary() {
            return Err(ZoneError::BoundaryError { slba, nlb });
        }

        self.open_zone(id, OpenMode::Implicit)?;

        let full = match self.registry.zone_mut(id) {
            Some(zone) => {
                zone.wp += u64::from(nlb);
                zone.shadow_wp = zone.wp;
                zone.wp == zone.wr_boundary()
            }
            None => false,
        };
        if full {
            self.finish_zone(id)?;
        }
        Ok(id)
    }

    /// Validate a read of `nlb` blocks at `slba`.
    pub fn check_read(&self, slba: u64, nlb: u32) -> Result<(), ZoneError> {
        let id = self.zone_by_slba(slba)?;
        let end = slba + u64::from(nlb);

        if !self.geometry.cross_zone_read {
            let boundary = self
                .registry
                .rd_boundary(id)
                .ok_or(ZoneError::InvalidZone(slba))?;
            if end > boundary {
                return Err(ZoneError::BoundaryError { slba, nlb });
            }
        }

        let last = if nlb == 0 { slba } else { end - 1 };
        let last_id = self.zone_by_slba(last)?;
        for zid in id..=last_id {
            if self.zone_checked(zid)?.state == ZoneState::Offline {
                return Err(ZoneError::ZoneOffline(zid));
            }
        }
        Ok(())
    }

    /// Zones starting at `from`, in zone order, filtered by state.
    pub fn report_zones(&self, from: ZoneId, filter: Option<ZoneState>) -> Vec<(ZoneId, &Zone)> {
        self.registry
            .zones()
            .iter()
            .enumerate()
            .skip(from as usize)
            .filter(|(_, z)| filter.map_or(true, |s| z.state == s))
            .map(|(i, z)| (i as ZoneId, z))
            .collect()
    }

    /// Zones in `list`, head first.
    pub fn list_members(&self, list: ZoneList) -> Vec<ZoneId> {
        self.registry.list(list).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::geometry::ZoneGeometry;
    use assert_matches::assert_matches;

    fn zns(max_active: u32, max_open: u32) -> ZonedNamespace {
        ZonedNamespace::new(ZoneGeometry {
            zone_size: 1024,
            zone_capacity: 768,
            zone_count: 8,
            max_active,
            max_open,
            zd_extension_size: 64,
            cross_zone_read: false,
        })
    }

    // =========================================================================
    // Open / Close Tests
    // =========================================================================

    #[test]
    fn test_open_limits() {
        let mut zns = zns(4, 2);

        zns.open_zone(0, OpenMode::Explicit).unwrap();
        zns.open_zone(1, OpenMode::Explicit).unwrap();
        assert_eq!(zns.open_count(), 2);
        assert_eq!(zns.active_count(), 2);

        assert_eq!(
            zns.open_zone(2, OpenMode::Explicit),
            Err(ZoneError::TooManyOpen { max_open: 2 })
        );
        assert_eq!(zns.zone(2).unwrap().state, ZoneState::Empty);

        zns.close_zone(0).unwrap();
        assert_eq!(zns.open_count(), 1);
        assert_eq!(zns.active_count(), 2);

        zns.open_zone(2, OpenMode::Explicit).unwrap();
        assert_eq!(zns.open_count(), 2);
        assert_eq!(zns.active_count(), 3);
        assert!(zns.is_consistent());
    }

    #[test]
    fn test_active_limit() {
        let mut zns = zns(2, 2);
        zns.open_zone(0, OpenMode::Explicit).unwrap();
        zns.open_zone(1, OpenMode::Explicit).unwrap();
        zns.close_zone(0).unwrap();
        zns.close_zone(1).unwrap();

        assert_eq!(
            zns.open_zone(2, OpenMode::Explicit),
            Err(ZoneError::TooManyActive { max_active: 2 })
        );

        // reopening a closed zone only needs an open resource
        zns.open_zone(1, OpenMode::Explicit).unwrap();
        assert_eq!(zns.active_count(), 2);
        assert_eq!(zns.open_count(), 1);
    }

    #[test]
    fn test_implicit_to_explicit() {
        let mut zns = zns(0, 0);
        zns.open_zone(3, OpenMode::Implicit).unwrap();
        assert_eq!(zns.list_members(ZoneList::ImplicitlyOpen), vec![3]);

        zns.open_zone(3, OpenMode::Implicit).unwrap();
        zns.open_zone(3, OpenMode::Explicit).unwrap();
        assert_eq!(zns.zone(3).unwrap().state, ZoneState::ExplicitlyOpen);
        assert!(zns.list_members(ZoneList::ImplicitlyOpen).is_empty());
        assert_eq!(zns.open_count(), 1);
        assert_eq!(zns.active_count(), 1);

        // an explicitly opened zone stays explicit on write
        zns.open_zone(3, OpenMode::Implicit).unwrap();
        assert_eq!(zns.zone(3).unwrap().state, ZoneState::ExplicitlyOpen);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut zns = zns(0, 0);
        assert_matches!(zns.close_zone(0), Err(ZoneError::InvalidTransition { zone: 0 }));

        zns.finish_zone(0).unwrap();
        assert_matches!(
            zns.open_zone(0, OpenMode::Explicit),
            Err(ZoneError::InvalidTransition { .. })
        );
        assert_matches!(zns.offline_zone(0), Err(ZoneError::InvalidTransition { .. }));
        assert_matches!(zns.open_zone(99, OpenMode::Explicit), Err(ZoneError::InvalidZone(99)));
    }

    // =========================================================================
    // Finish / Reset Tests
    // =========================================================================

    #[test]
    fn test_finish_releases_resources() {
        let mut zns = zns(4, 2);
        zns.open_zone(0, OpenMode::Explicit).unwrap();
        zns.open_zone(1, OpenMode::Explicit).unwrap();
        zns.close_zone(1).unwrap();

        zns.finish_zone(0).unwrap();
        zns.finish_zone(1).unwrap();
        zns.finish_zone(2).unwrap();
        zns.finish_zone(2).unwrap();

        assert_eq!(zns.active_count(), 0);
        assert_eq!(zns.open_count(), 0);
        assert_eq!(zns.list_members(ZoneList::Full), vec![0, 1, 2]);
        let zone = zns.zone(2).unwrap();
        assert_eq!(zone.wp, zone.wr_boundary());
        assert!(zns.is_consistent());
    }

    #[test]
    fn test_reset() {
        let mut zns = zns(4, 2);
        zns.record_write(1024, 16).unwrap();
        zns.set_zd_extension(2, &[0xab; 64]).unwrap();
        zns.finish_zone(3).unwrap();

        for id in 0..4 {
            zns.reset_zone(id).unwrap();
            let zone = zns.zone(id).unwrap();
            assert_eq!(zone.state, ZoneState::Empty);
            assert_eq!(zone.wp, zone.start);
            assert_eq!(zone.shadow_wp, zone.start);
            assert!(zone.attrs.is_empty());
        }
        assert_eq!(zns.active_count(), 0);
        assert!(zns.is_consistent());
    }

    #[test]
    fn test_read_only_and_offline() {
        let mut zns = zns(4, 4);
        zns.open_zone(0, OpenMode::Explicit).unwrap();
        zns.set_read_only(0).unwrap();
        assert_eq!(zns.open_count(), 0);
        assert_eq!(zns.active_count(), 0);

        assert_matches!(zns.reset_zone(0), Err(ZoneError::InvalidTransition { .. }));
        zns.offline_zone(0).unwrap();
        assert_eq!(zns.zone(0).unwrap().state, ZoneState::Offline);
        assert!(zns.is_consistent());
    }

    // =========================================================================
    // Descriptor Extension Tests
    // =========================================================================

    #[test]
    fn test_set_zd_extension() {
        let mut zns = zns(1, 1);
        zns.set_zd_extension(4, &[7u8; 64]).unwrap();

        let zone = zns.zone(4).unwrap();
        assert_eq!(zone.state, ZoneState::Closed);
        assert!(zone.attrs.contains(ZoneAttrs::ZD_EXT_VALID));
        assert_eq!(zns.zd_extension(4).unwrap(), &[7u8; 64][..]);
        assert_eq!(zns.active_count(), 1);

        assert_eq!(
            zns.set_zd_extension(5, &[0u8; 64]),
            Err(ZoneError::TooManyActive { max_active: 1 })
        );
        assert_eq!(zns.set_zd_extension(5, &[0u8; 63]), Err(ZoneError::InvalidField));
        assert_matches!(
            zns.set_zd_extension(4, &[0u8; 64]),
            Err(ZoneError::InvalidTransition { .. })
        );
    }

    // =========================================================================
    // Write / Read Tests
    // =========================================================================

    #[test]
    fn test_record_write_opens_and_finishes() {
        let mut zns = zns(0, 0);

        assert_eq!(zns.record_write(0, 256).unwrap(), 0);
        assert_eq!(zns.zone(0).unwrap().state, ZoneState::ImplicitlyOpen);
        assert_eq!(zns.zone(0).unwrap().wp, 256);

        zns.record_write(256, 512).unwrap();
        let zone = zns.zone(0).unwrap();
        assert_eq!(zone.state, ZoneState::Full);
        assert_eq!(zone.wp, 768);
        assert_eq!(zns.open_count(), 0);
        assert_eq!(zns.active_count(), 0);
    }

    #[test]
    fn test_record_write_errors() {
        let mut zns = zns(1, 1);
        zns.record_write(0, 8).unwrap();

        assert_matches!(
            zns.record_write(0, 8),
            Err(ZoneError::InvalidWrite { zone: 0, slba: 0, wp: 8 })
        );
        assert_matches!(zns.record_write(8, 761), Err(ZoneError::BoundaryError { .. }));
        assert_matches!(zns.record_write(1024, 8), Err(ZoneError::TooManyActive { .. }));
        assert_eq!(zns.zone(1).unwrap().wp, 1024);

        zns.finish_zone(0).unwrap();
        assert_matches!(zns.record_write(768, 1), Err(ZoneError::ZoneFull(0)));
        assert_matches!(zns.record_write(8 * 1024, 1), Err(ZoneError::InvalidZone(_)));
    }

    #[test]
    fn test_empty_write_takes_no_resources() {
        let mut zns = zns(1, 1);
        assert_eq!(zns.record_write(0, 0), Err(ZoneError::InvalidField));
        assert_eq!(zns.zone(0).unwrap().state, ZoneState::Empty);
        assert_eq!(zns.active_count(), 0);
        assert_eq!(zns.open_count(), 0);

        // another zone can still take the only active resource
        assert_eq!(zns.record_write(1024, 1), Ok(1));
        assert_eq!(zns.active_count(), 1);
    }

    #[test]
    fn test_check_read() {
        let mut zns = zns(0, 0);
        zns.check_read(0, 1024).unwrap();
        assert_matches!(zns.check_read(1000, 100), Err(ZoneError::BoundaryError { .. }));

        zns.set_read_only(1).unwrap();
        zns.offline_zone(1).unwrap();
        assert_matches!(zns.check_read(1024, 1), Err(ZoneError::ZoneOffline(1)));

        let mut cross = ZonedNamespace::new(ZoneGeometry {
            cross_zone_read: true,
            ..*zns.geometry()
        });
        cross.check_read(1000, 100).unwrap();
        cross.set_read_only(2).unwrap();
        cross.offline_zone(2).unwrap();
        assert_matches!(cross.check_read(2000, 100), Err(ZoneError::ZoneOffline(2)));
    }

    #[test]
    fn test_report_zones() {
        let mut zns = zns(0, 0);
        zns.finish_zone(5).unwrap();
        assert_eq!(zns.report_zones(2, None).len(), 6);

        let full = zns.report_zones(0, Some(ZoneState::Full));
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].0, 5);
    }
}
