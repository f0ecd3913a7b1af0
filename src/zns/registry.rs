//! Zone registry: the zone arena plus per-state ordered zone lists.
//!
//! # Layout
//!
//! ```text
//! zones:          [ z0 | z1 | z2 | z3 | z4 | ... | zN-1 ]   (fixed, by ZoneId)
//!
//! exp_open:       z3
//! imp_open:       z1 -> z4
//! closed:         z0
//! full:           z2
//! ```
//!
//! A zone sits in at most one list, chosen by its state. Empty, Read-Only and
//! Offline zones are in none. All state changes go through
//! [`ZoneRegistry::assign_state`], which keeps membership consistent.

use serde::Serialize;
use tracing::trace;

use super::zone::{Zone, ZoneId, ZoneState};

/// The four tracked zone lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ZoneList {
    ExplicitlyOpen,
    ImplicitlyOpen,
    Closed,
    Full,
}

impl ZoneList {
    /// List that tracks zones in `state`, if any.
    pub fn for_state(state: ZoneState) -> Option<Self> {
        match state {
            ZoneState::ExplicitlyOpen => Some(ZoneList::ExplicitlyOpen),
            ZoneState::ImplicitlyOpen => Some(ZoneList::ImplicitlyOpen),
            ZoneState::Closed => Some(ZoneList::Closed),
            ZoneState::Full => Some(ZoneList::Full),
            _ => None,
        }
    }

    fn slot(self) -> usize {
        match self {
            ZoneList::ExplicitlyOpen => 0,
            ZoneList::ImplicitlyOpen => 1,
            ZoneList::Closed => 2,
            ZoneList::Full => 3,
        }
    }
}

/// Position of a zone in its list.
#[derive(Debug, Clone, Copy, Default)]
struct Link {
    list: Option<ZoneList>,
    prev: Option<ZoneId>,
    next: Option<ZoneId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ListHead {
    head: Option<ZoneId>,
    tail: Option<ZoneId>,
    len: usize,
}

/// Fixed-size zone arena.
///
/// Lists are threaded through per-zone links, so linking and unlinking a
/// zone never scans a list.
#[derive(Debug, Clone)]
pub struct ZoneRegistry {
    zones: Vec<Zone>,
    links: Vec<Link>,
    lists: [ListHead; 4],
    zone_size: u64,
    zone_size_log2: Option<u32>,
}

/// Iterator over the members of one zone list, head first.
#[derive(Debug, Clone)]
pub struct ListIter<'a> {
    links: &'a [Link],
    cursor: Option<ZoneId>,
    remaining: usize,
}

impl Iterator for ListIter<'_> {
    type Item = ZoneId;

    fn next(&mut self) -> Option<ZoneId> {
        let id = self.cursor?;
        self.cursor = self.links[id as usize].next;
        self.remaining = self.remaining.saturating_sub(1);
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ListIter<'_> {}

impl ZoneRegistry {
    /// Build `zone_count` empty zones of `zone_size` blocks each.
    ///
    /// Every zone gets `zone_capacity` writable blocks, clipped so that no
    /// zone extends past `zone_count * zone_size`.
    pub fn new(zone_count: u32, zone_size: u64, zone_capacity: u64) -> Self {
        let total = u64::from(zone_count) * zone_size;
        let zones = (0..u64::from(zone_count))
            .map(|i| {
                let start = i * zone_size;
                let capacity = zone_capacity.min(total - start);
                Zone::new(start, capacity)
            })
            .collect();

        Self {
            zones,
            links: vec![Link::default(); zone_count as usize],
            lists: Default::default(),
            zone_size,
            zone_size_log2: zone_size
                .is_power_of_two()
                .then(|| zone_size.trailing_zeros()),
        }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn zone_size(&self) -> u64 {
        self.zone_size
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(id as usize)
    }

    pub(crate) fn zone_mut(&mut self, id: ZoneId) -> Option<&mut Zone> {
        self.zones.get_mut(id as usize)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Index of the zone containing `slba`, without range checking.
    pub fn zone_index(&self, slba: u64) -> u64 {
        match self.zone_size_log2 {
            Some(shift) => slba >> shift,
            None => slba / self.zone_size,
        }
    }

    /// Zone containing `slba`.
    pub fn zone_by_slba(&self, slba: u64) -> Option<ZoneId> {
        let idx = self.zone_index(slba);
        (idx < self.zones.len() as u64).then_some(idx as ZoneId)
    }

    /// First LBA past the readable part of a zone.
    pub fn rd_boundary(&self, id: ZoneId) -> Option<u64> {
        self.zone(id).map(|z| z.start + self.zone_size)
    }

    /// Members of a tracked list, head first.
    pub fn list(&self, list: ZoneList) -> ListIter<'_> {
        let head = &self.lists[list.slot()];
        ListIter {
            links: &self.links,
            cursor: head.head,
            remaining: head.len,
        }
    }

    /// Number of zones in a tracked list.
    pub fn list_len(&self, list: ZoneList) -> usize {
        self.lists[list.slot()].len
    }

    /// Unconditionally move a zone to `state`, keeping list membership and
    /// attributes consistent. Transition legality is the caller's concern.
    pub fn assign_state(&mut self, id: ZoneId, state: ZoneState) {
        let Some(zone) = self.zones.get(id as usize) else {
            return;
        };
        let current = zone.state;
        trace!(zone = id, from = %current, to = %state, "assign zone state");

        if let Some(list) = ZoneList::for_state(current) {
            self.unlink(list, id);
        }

        self.zones[id as usize].state = state;

        match state {
            ZoneState::ExplicitlyOpen => self.push_back(ZoneList::ExplicitlyOpen, id),
            ZoneState::ImplicitlyOpen => self.push_back(ZoneList::ImplicitlyOpen, id),
            ZoneState::Closed => self.push_back(ZoneList::Closed, id),
            ZoneState::Full | ZoneState::ReadOnly => {
                if state == ZoneState::Full {
                    self.push_back(ZoneList::Full, id);
                }
                // Full shares the Read-Only arm; neither touches attributes.
            }
            ZoneState::Empty | ZoneState::Offline => self.zones[id as usize].attrs.clear(),
        }
    }

    /// Remove a zone from `list` without touching its state. Returns false
    /// when the zone is not a member.
    pub(crate) fn unlink(&mut self, list: ZoneList, id: ZoneId) -> bool {
        let Some(link) = self.links.get(id as usize).copied() else {
            return false;
        };
        if link.list != Some(list) {
            return false;
        }

        match link.prev {
            Some(prev) => self.links[prev as usize].next = link.next,
            None => self.lists[list.slot()].head = link.next,
        }
        match link.next {
            Some(next) => self.links[next as usize].prev = link.prev,
            None => self.lists[list.slot()].tail = link.prev,
        }
        self.lists[list.slot()].len -= 1;
        self.links[id as usize] = Link::default();
        true
    }

    fn push_back(&mut self, list: ZoneList, id: ZoneId) {
        let head = &mut self.lists[list.slot()];
        let prev = head.tail;
        match prev {
            Some(tail) => self.links[tail as usize].next = Some(id),
            None => head.head = Some(id),
        }
        head.tail = Some(id);
        head.len += 1;
        self.links[id as usize] = Link {
            list: Some(list),
            prev,
            next: None,
        };
    }

    /// Link a zone at the head of `list` without touching its state.
    pub(crate) fn push_front(&mut self, list: ZoneList, id: ZoneId) {
        let head = &mut self.lists[list.slot()];
        let next = head.head;
        match next {
            Some(first) => self.links[first as usize].prev = Some(id),
            None => head.tail = Some(id),
        }
        head.head = Some(id);
        head.len += 1;
        self.links[id as usize] = Link {
            list: Some(list),
            prev: None,
            next,
        };
    }

    /// Take the whole contents of a list, leaving it empty.
    pub(crate) fn drain_list(&mut self, list: ZoneList) -> Vec<ZoneId> {
        let members: Vec<ZoneId> = self.list(list).collect();
        for &id in &members {
            self.links[id as usize] = Link::default();
        }
        self.lists[list.slot()] = ListHead::default();
        members
    }

    /// Number of zones currently in `state`.
    pub fn count_in(&self, state: ZoneState) -> usize {
        match ZoneList::for_state(state) {
            Some(list) => self.list_len(list),
            None => self.zones.iter().filter(|z| z.state == state).count(),
        }
    }

    /// Every zone is in exactly the list matching its state, and every list
    /// is linked both ways.
    pub fn lists_consistent(&self) -> bool {
        let mut seen = vec![0u8; self.zones.len()];
        for list in [
            ZoneList::ExplicitlyOpen,
            ZoneList::ImplicitlyOpen,
            ZoneList::Closed,
            ZoneList::Full,
        ] {
            let mut prev = None;
            let mut walked = 0;
            for id in self.list(list) {
                let Some(zone) = self.zone(id) else {
                    return false;
                };
                let link = &self.links[id as usize];
                if ZoneList::for_state(zone.state) != Some(list)
                    || link.list != Some(list)
                    || link.prev != prev
                    || seen[id as usize] != 0
                {
                    return false;
                }
                seen[id as usize] += 1;
                prev = Some(id);
                walked += 1;
            }
            if walked != self.list_len(list) || self.lists[list.slot()].tail != prev {
                return false;
            }
        }
        self.zones
            .iter()
            .zip(seen)
            .all(|(z, n)| n == u8::from(ZoneList::for_state(z.state).is_some()))
    }
}
