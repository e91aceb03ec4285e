//! Hierarchical (Cskip) tree addressing.
//!
//! Every router at depth `d` owns a contiguous block of `cskip(d - 1)`
//! addresses starting at its own address. Inside that block it hands out
//! `max_routers` equally sized sub-blocks of `cskip(d)` addresses to child
//! routers, followed by single addresses for end-device children:
//!
//! ```text
//! A | A+1 .. A+cskip | A+cskip+1 .. A+2*cskip | ... | A+Rm*cskip+1 .. A+Rm*cskip+(Cm-Rm)
//!   |   router #0    |       router #1        | ... |          end devices
//! ```
//!
//! Everything here is a pure function of the tree parameters, so every
//! node of the network agrees on where an address lives.

use crate::types::{ShortAddr, NWK_BROADCAST_MASK};

/// Tree parameters shared by the whole network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLimits {
    /// Rm: router children per router.
    pub max_routers: u8,
    /// Cm: children (routers + end devices) per router.
    pub max_children: u8,
    /// Lm: maximum tree depth.
    pub max_depth: u8,
}

/// A router's place in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreePosition {
    pub addr: ShortAddr,
    pub depth: u8,
    pub is_coordinator: bool,
    pub limits: TreeLimits,
}

/// Size of the address block owned by each router child of a node at `depth`.
///
/// Returns 0 when `depth >= max_depth`: nodes that deep cannot have children.
pub fn calc_cskip(limits: TreeLimits, depth: u8) -> u16 {
    if depth >= limits.max_depth {
        return 0;
    }
    let cm = i64::from(limits.max_children);
    let rm = i64::from(limits.max_routers);
    let exp = u32::from(limits.max_depth - depth - 1);

    let skip = if rm == 1 {
        1 + cm * i64::from(exp)
    } else {
        let rm_pow = rm.saturating_pow(exp);
        (1 + cm - rm)
            .saturating_sub(cm.saturating_mul(rm_pow))
            .checked_div(1 - rm)
            .unwrap_or(i64::MAX)
    };
    skip.clamp(0, i64::from(u16::MAX)) as u16
}

fn checked_addr(addr: u32) -> Option<ShortAddr> {
    if addr < u32::from(NWK_BROADCAST_MASK) {
        Some(addr as ShortAddr)
    } else {
        None
    }
}

/// Address for router child number `ordinal` of `parent`.
///
/// `cskip` is the parent's Cskip (its own depth). `None` if the parent may
/// not have children or the router slots are exhausted.
pub fn calc_router_address(
    limits: TreeLimits,
    parent: ShortAddr,
    cskip: u16,
    ordinal: u8,
) -> Option<ShortAddr> {
    if cskip == 0 || ordinal >= limits.max_routers {
        return None;
    }
    checked_addr(u32::from(parent) + 1 + u32::from(cskip) * u32::from(ordinal))
}

/// Address for end-device child number `ordinal` of `parent`.
pub fn calc_end_device_address(
    limits: TreeLimits,
    parent: ShortAddr,
    cskip: u16,
    ordinal: u8,
) -> Option<ShortAddr> {
    let end_device_slots = limits.max_children.saturating_sub(limits.max_routers);
    if cskip == 0 || ordinal >= end_device_slots {
        return None;
    }
    checked_addr(
        u32::from(parent)
            + u32::from(cskip) * u32::from(limits.max_routers)
            + u32::from(ordinal)
            + 1,
    )
}

/// Whether `dest` lies strictly inside the block owned by the router at `pos`.
pub fn is_descendant(pos: &TreePosition, dest: ShortAddr) -> bool {
    if pos.is_coordinator {
        return dest != pos.addr;
    }
    if pos.depth == 0 {
        return false;
    }
    let block = u32::from(calc_cskip(pos.limits, pos.depth - 1));
    let here = u32::from(pos.addr);
    let dest = u32::from(dest);
    dest > here && dest < here + block
}

/// Tree-routing next hop toward `dest`.
///
/// Descendants route down: to `dest` itself if `is_child` says it is a
/// direct child or it falls in the end-device range, otherwise to the child
/// router whose block contains it. Everything else routes up to `parent`.
/// `None` means no hop exists (no parent, or a hole in the address space).
pub fn calc_next_hop<F>(
    pos: &TreePosition,
    dest: ShortAddr,
    parent: Option<ShortAddr>,
    is_child: F,
) -> Option<ShortAddr>
where
    F: Fn(ShortAddr) -> bool,
{
    if !is_descendant(pos, dest) {
        return parent;
    }
    if is_child(dest) {
        return Some(dest);
    }

    let cskip = u32::from(calc_cskip(pos.limits, pos.depth));
    if cskip == 0 {
        return None;
    }
    let here = u32::from(pos.addr);
    let target = u32::from(dest);
    let routers = u32::from(pos.limits.max_routers);
    let end_devices = u32::from(pos.limits.max_children.saturating_sub(pos.limits.max_routers));

    let end_device_base = here + routers * cskip;
    if target > end_device_base {
        return if target <= end_device_base + end_devices {
            Some(dest)
        } else {
            None
        };
    }

    (0..routers)
        .map(|i| here + 1 + i * cskip)
        .find(|&lo| target >= lo && target < lo + cskip)
        .and_then(checked_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LIMITS: TreeLimits = TreeLimits {
        max_routers: 4,
        max_children: 10,
        max_depth: 3,
    };

    fn coordinator() -> TreePosition {
        TreePosition {
            addr: 0,
            depth: 0,
            is_coordinator: true,
            limits: LIMITS,
        }
    }

    #[test]
    fn test_cskip_values() {
        assert_eq!(calc_cskip(LIMITS, 0), 51);
        assert_eq!(calc_cskip(LIMITS, 1), 11);
        assert_eq!(calc_cskip(LIMITS, 2), 1);
        assert_eq!(calc_cskip(LIMITS, 3), 0);
        assert_eq!(calc_cskip(LIMITS, 7), 0);
    }

    #[test]
    fn test_cskip_single_router_branch() {
        let limits = TreeLimits {
            max_routers: 1,
            max_children: 5,
            max_depth: 3,
        };
        assert_eq!(calc_cskip(limits, 0), 11);
        assert_eq!(calc_cskip(limits, 2), 1);
    }

    #[test]
    fn test_cskip_saturates_for_wide_shallow_limits() {
        let limits = TreeLimits {
            max_routers: 200,
            max_children: 10,
            max_depth: 20,
        };
        assert_eq!(calc_cskip(limits, 0), u16::MAX);
        assert_eq!(calc_cskip(limits, 19), 1);
    }

    #[test]
    fn test_router_addresses() {
        assert_eq!(calc_router_address(LIMITS, 0, 51, 0), Some(1));
        assert_eq!(calc_router_address(LIMITS, 0, 51, 1), Some(52));
        assert_eq!(calc_router_address(LIMITS, 0, 51, 3), Some(154));
        assert_eq!(calc_router_address(LIMITS, 0, 51, 4), None);
        assert_eq!(calc_router_address(LIMITS, 52, 0, 0), None);
    }

    #[test]
    fn test_end_device_addresses() {
        assert_eq!(calc_end_device_address(LIMITS, 0, 51, 0), Some(205));
        assert_eq!(calc_end_device_address(LIMITS, 0, 51, 5), Some(210));
        assert_eq!(calc_end_device_address(LIMITS, 0, 51, 6), None);
        assert_eq!(calc_end_device_address(LIMITS, 52, 11, 0), Some(97));
    }

    #[test]
    fn test_coordinator_routes_down_to_router_block() {
        let pos = coordinator();
        assert_eq!(calc_next_hop(&pos, 60, None, |_| false), Some(52));
        assert_eq!(calc_next_hop(&pos, 52, None, |_| false), Some(52));
        assert_eq!(calc_next_hop(&pos, 1, None, |_| false), Some(1));
        assert_eq!(calc_next_hop(&pos, 50, None, |_| false), Some(1));
    }

    #[test]
    fn test_exact_child_wins() {
        let pos = coordinator();
        assert_eq!(calc_next_hop(&pos, 60, None, |a| a == 60), Some(60));
    }

    #[test]
    fn test_end_device_range_routes_direct() {
        let pos = coordinator();
        assert_eq!(calc_next_hop(&pos, 207, None, |_| false), Some(207));
        // Beyond the last end-device slot nothing owns the address.
        assert_eq!(calc_next_hop(&pos, 300, None, |_| false), None);
    }

    #[test]
    fn test_router_routes_up_outside_block() {
        let pos = TreePosition {
            addr: 52,
            depth: 1,
            is_coordinator: false,
            limits: LIMITS,
        };
        assert_eq!(calc_next_hop(&pos, 1, Some(0), |_| false), Some(0));
        assert_eq!(calc_next_hop(&pos, 103, Some(0), |_| false), Some(0));
        assert_eq!(calc_next_hop(&pos, 1, None, |_| false), None);
        // Inside its block: router #1 of 52 sits at 52 + 1 + 11.
        assert_eq!(calc_next_hop(&pos, 65, Some(0), |_| false), Some(64));
    }

    fn limits_strategy() -> impl Strategy<Value = TreeLimits> {
        (1u8..=6, 0u8..=6, 1u8..=4).prop_map(|(rm, extra, lm)| TreeLimits {
            max_routers: rm,
            max_children: rm + extra,
            max_depth: lm,
        })
    }

    proptest! {
        #[test]
        fn prop_child_addresses_stay_inside_parent_block(
            limits in limits_strategy(),
            ordinal in 0u8..12,
        ) {
            let cskip = calc_cskip(limits, 0);
            let block_end = u32::from(cskip) * u32::from(limits.max_routers)
                + u32::from(limits.max_children - limits.max_routers);
            if let Some(addr) = calc_router_address(limits, 0, cskip, ordinal) {
                prop_assert!(addr > 0 && u32::from(addr) <= block_end);
            }
            if let Some(addr) = calc_end_device_address(limits, 0, cskip, ordinal) {
                prop_assert!(addr > 0 && u32::from(addr) <= block_end);
            }
        }

        #[test]
        fn prop_cskip_total_for_any_limits(
            max_routers in any::<u8>(),
            max_children in any::<u8>(),
            max_depth in any::<u8>(),
            depth in any::<u8>(),
        ) {
            let limits = TreeLimits { max_routers, max_children, max_depth };
            let cskip = calc_cskip(limits, depth);
            prop_assert_eq!(cskip == 0, depth >= max_depth);
        }

        #[test]
        fn prop_sibling_addresses_never_collide(limits in limits_strategy()) {
            let cskip = calc_cskip(limits, 0);
            let mut seen = std::collections::HashSet::new();
            for ordinal in 0..limits.max_children {
                if let Some(addr) = calc_router_address(limits, 0, cskip, ordinal) {
                    prop_assert!(seen.insert(addr));
                }
                if let Some(addr) = calc_end_device_address(limits, 0, cskip, ordinal) {
                    prop_assert!(seen.insert(addr));
                }
            }
        }

        #[test]
        fn prop_coordinator_next_hop_leads_to_owner(
            limits in limits_strategy(),
            ordinal in 0u8..6,
            offset in 0u16..64,
        ) {
            let cskip = calc_cskip(limits, 0);
            let pos = TreePosition { addr: 0, depth: 0, is_coordinator: true, limits };
            if let Some(router) = calc_router_address(limits, 0, cskip, ordinal) {
                let dest = router + offset % cskip;
                prop_assert_eq!(calc_next_hop(&pos, dest, None, |_| false), Some(router));
            }
        }
    }
}
