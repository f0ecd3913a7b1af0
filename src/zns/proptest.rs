//! Property-Based Tests for Zone State and Resource Accounting
//!
//! Drives random sequences of zone management requests against a small
//! zoned namespace and checks the invariants after every step.
//!
//! # Test Properties
//!
//! 1. **Limits**: active/open counts never exceed non-zero maxima
//! 2. **Consistency**: counters always agree with the zone lists
//! 3. **Atomicity**: a rejected request changes nothing
//! 4. **Shutdown**: no zone is open afterwards, and each zone's final state
//!    depends only on its content

#![cfg(test)]

use proptest::prelude::*;

use super::mgmt::OpenMode;
use super::{ZoneAttrs, ZoneId, ZoneList, ZoneState, ZonedNamespace};
use crate::namespace::geometry::ZoneGeometry;

const ZONES: u32 = 8;
const ZONE_SIZE: u64 = 64;
const ZONE_CAP: u64 = 48;

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Open(ZoneId, bool),
    Close(ZoneId),
    Finish(ZoneId),
    Reset(ZoneId),
    Write(ZoneId, u32),
    SetExtension(ZoneId),
    ReadOnly(ZoneId),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let zone = 0..ZONES;
    prop_oneof![
        4 => (zone.clone(), any::<bool>()).prop_map(|(z, e)| Op::Open(z, e)),
        3 => zone.clone().prop_map(Op::Close),
        1 => zone.clone().prop_map(Op::Finish),
        1 => zone.clone().prop_map(Op::Reset),
        4 => (zone.clone(), 1u32..24).prop_map(|(z, n)| Op::Write(z, n)),
        1 => zone.clone().prop_map(Op::SetExtension),
        1 => zone.prop_map(Op::ReadOnly),
    ]
}

/// (max_active, max_open) with max_open <= max_active when limited.
fn limits_strategy() -> impl Strategy<Value = (u32, u32)> {
    prop_oneof![
        Just((0u32, 0u32)),
        (0u32..=4).prop_map(|o| (0, o)),
        (1u32..=5).prop_flat_map(|a| (Just(a), 1..=a)),
    ]
}

fn zns(max_active: u32, max_open: u32) -> ZonedNamespace {
    ZonedNamespace::new(ZoneGeometry {
        zone_size: ZONE_SIZE,
        zone_capacity: ZONE_CAP,
        zone_count: ZONES,
        max_active,
        max_open,
        zd_extension_size: 64,
        cross_zone_read: false,
    })
}

fn apply(zns: &mut ZonedNamespace, op: &Op) -> bool {
    let result = match *op {
        Op::Open(z, explicit) => zns.open_zone(
            z,
            if explicit {
                OpenMode::Explicit
            } else {
                OpenMode::Implicit
            },
        ),
        Op::Close(z) => zns.close_zone(z),
        Op::Finish(z) => zns.finish_zone(z),
        Op::Reset(z) => zns.reset_zone(z),
        Op::Write(z, nlb) => {
            let wp = zns.zone(z).map(|zone| zone.wp).unwrap_or_default();
            zns.record_write(wp, nlb).map(|_| ())
        }
        Op::SetExtension(z) => zns.set_zd_extension(z, &[0x5a; 64]),
        Op::ReadOnly(z) => zns.set_read_only(z),
    };
    result.is_ok()
}

// =============================================================================
// Accounting Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: limits hold and counters match the lists after every request.
    #[test]
    fn prop_limits_hold(
        (max_active, max_open) in limits_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let mut zns = zns(max_active, max_open);
        for op in &ops {
            apply(&mut zns, op);
            prop_assert!(zns.is_consistent(), "inconsistent after {:?}", op);
            if max_active != 0 {
                prop_assert!(zns.active_count() <= max_active);
            }
            if max_open != 0 {
                prop_assert!(zns.open_count() <= max_open);
            }
            prop_assert!(zns.open_count() <= zns.active_count());
        }
    }

    /// Property: a rejected request leaves zones and counters untouched.
    #[test]
    fn prop_rejected_requests_change_nothing(
        (max_active, max_open) in limits_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let mut zns = zns(max_active, max_open);
        for op in &ops {
            let zones_before = zns.registry().zones().to_vec();
            let aor_before = zns.aor().clone();
            if !apply(&mut zns, op) {
                prop_assert_eq!(zns.registry().zones(), &zones_before[..]);
                prop_assert_eq!(zns.aor(), &aor_before);
            }
        }
    }

    /// Property: admission checks never mutate the counters.
    #[test]
    fn prop_check_is_pure(
        (max_active, max_open) in limits_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..40),
        act in 0u32..3,
        opn in 0u32..3,
    ) {
        let mut zns = zns(max_active, max_open);
        for op in &ops {
            apply(&mut zns, op);
        }
        let before = zns.aor().clone();
        let first = zns.aor().check(act, opn);
        for _ in 0..5 {
            prop_assert_eq!(zns.aor().check(act, opn), first);
        }
        prop_assert_eq!(zns.aor(), &before);
    }
}

// =============================================================================
// Shutdown Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: shutdown closes everything and each zone ends in the state
    /// its content dictates.
    #[test]
    fn prop_shutdown_normalizes(
        (max_active, max_open) in limits_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let mut zns = zns(max_active, max_open);
        for op in &ops {
            apply(&mut zns, op);
        }

        let before: Vec<_> = zns.registry().zones().to_vec();
        zns.shutdown();

        prop_assert_eq!(zns.open_count(), 0);
        prop_assert!(zns.is_consistent());

        for (id, (old, new)) in before.iter().zip(zns.registry().zones()).enumerate() {
            if old.state.is_active() {
                let expected = if old.wp != old.start
                    || old.attrs.contains(ZoneAttrs::ZD_EXT_VALID)
                {
                    ZoneState::Closed
                } else {
                    ZoneState::Empty
                };
                prop_assert_eq!(new.state, expected, "zone {}", id);
                prop_assert_eq!(new.shadow_wp, new.wp);
            } else {
                prop_assert_eq!(new, old, "zone {} not touched", id);
            }
        }
    }

    /// Property: shutting down twice changes nothing the second time except
    /// the order of the closed list.
    #[test]
    fn prop_shutdown_idempotent(
        (max_active, max_open) in limits_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let mut zns = zns(max_active, max_open);
        for op in &ops {
            apply(&mut zns, op);
        }

        zns.shutdown();
        let zones = zns.registry().zones().to_vec();
        let active = zns.active_count();
        let mut closed = zns.list_members(ZoneList::Closed);

        zns.shutdown();
        prop_assert_eq!(zns.registry().zones(), &zones[..]);
        prop_assert_eq!(zns.active_count(), active);

        let mut closed_again = zns.list_members(ZoneList::Closed);
        closed.sort_unstable();
        closed_again.sort_unstable();
        prop_assert_eq!(closed, closed_again);
    }
}
