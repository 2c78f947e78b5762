// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Canonical encoding and flag bitmaps for items and actions.
//!
//! The canonical form of a template is the `postcard` encoding of its
//! masked item or action list. Two templates built from identical
//! input always encode identically, and the digest of the encoding is
//! what dumps report to identify a template.

use crate::api::Action;
use crate::api::ActionSpec;
use crate::api::FlowError;
use crate::api::IndirectKind;
use crate::api::Item;
use crate::api::PatternItem;
use alloc::vec::Vec;
use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// The item kinds present in a pattern, split by encapsulation
    /// layer where that matters.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ItemFlags: u32 {
        const OUTER_L2 = 1;
        const OUTER_VLAN = 1 << 1;
        const OUTER_IPV4 = 1 << 2;
        const OUTER_IPV6 = 1 << 3;
        const OUTER_TCP = 1 << 4;
        const OUTER_UDP = 1 << 5;
        const VXLAN = 1 << 6;
        const INNER_L2 = 1 << 7;
        const INNER_VLAN = 1 << 8;
        const INNER_IPV4 = 1 << 9;
        const INNER_IPV6 = 1 << 10;
        const INNER_TCP = 1 << 11;
        const INNER_UDP = 1 << 12;
        const TAG = 1 << 13;
        const META = 1 << 14;
        const REPR_PORT = 1 << 15;
        const CONNTRACK = 1 << 16;
        const IPV6_ROUTING_EXT = 1 << 17;
        const FLEX = 1 << 18;

        const OUTER_L3 = Self::OUTER_IPV4.bits() | Self::OUTER_IPV6.bits();
        const OUTER_L4 = Self::OUTER_TCP.bits() | Self::OUTER_UDP.bits();
        const INNER_L3 = Self::INNER_IPV4.bits() | Self::INNER_IPV6.bits();
        const INNER_L4 = Self::INNER_TCP.bits() | Self::INNER_UDP.bits();
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ActionFlags: u32 {
        const DROP = 1;
        const MARK = 1 << 1;
        const JUMP = 1 << 2;
        const JUMP_TO_TABLE_INDEX = 1 << 3;
        const QUEUE = 1 << 4;
        const RSS = 1 << 5;
        const COUNT = 1 << 6;
        const AGE = 1 << 7;
        const METER = 1 << 8;
        const CT = 1 << 9;
        const PORT = 1 << 10;
        const MODIFY_FIELD = 1 << 11;
        const SET_TAG = 1 << 12;
        const PUSH_VLAN = 1 << 13;
        const SET_VLAN_VID = 1 << 14;
        const SET_VLAN_PCP = 1 << 15;
        const POP_VLAN = 1 << 16;
        const ENCAP = 1 << 17;
        const DECAP = 1 << 18;
        const MIRROR = 1 << 19;
        const INDIRECT = 1 << 20;

        const FATE = Self::DROP.bits()
            | Self::JUMP.bits()
            | Self::JUMP_TO_TABLE_INDEX.bits()
            | Self::QUEUE.bits()
            | Self::RSS.bits()
            | Self::PORT.bits()
            | Self::MIRROR.bits();
        const MHDR = Self::MODIFY_FIELD.bits()
            | Self::SET_TAG.bits()
            | Self::SET_VLAN_VID.bits()
            | Self::SET_VLAN_PCP.bits();
    }
}

impl ActionFlags {
    /// The flag for a single action. Indirect actions set both the
    /// generic indirect flag and the flag of the object kind.
    pub fn of(action: &Action) -> Self {
        match action {
            Action::Drop => Self::DROP,
            Action::Mark { .. } => Self::MARK,
            Action::Jump { .. } => Self::JUMP,
            Action::JumpToTableIndex { .. } => Self::JUMP_TO_TABLE_INDEX,
            Action::Queue { .. } => Self::QUEUE,
            Action::Rss { .. } => Self::RSS,
            Action::Count { .. } => Self::COUNT,
            Action::Age { .. } => Self::AGE,
            Action::MeterMark(_) => Self::METER,
            Action::RepresentedPort { .. } => Self::PORT,
            Action::ModifyField(_) => Self::MODIFY_FIELD,
            Action::SetTag { .. } => Self::SET_TAG,
            Action::PushVlan { .. } => Self::PUSH_VLAN,
            Action::SetVlanVid { .. } => Self::SET_VLAN_VID,
            Action::SetVlanPcp { .. } => Self::SET_VLAN_PCP,
            Action::PopVlan => Self::POP_VLAN,
            Action::RawEncap { .. } => Self::ENCAP,
            Action::RawDecap { .. } => Self::DECAP,
            Action::IndirectList(_) => Self::MIRROR,
            Action::Indirect(h) => {
                Self::INDIRECT
                    | match h.kind {
                        IndirectKind::Count => Self::COUNT,
                        IndirectKind::Age => Self::AGE,
                        IndirectKind::MeterMark => Self::METER,
                        IndirectKind::Conntrack => Self::CT,
                    }
            }
        }
    }
}

/// Compute the item flags of a pattern and validate its layering.
///
/// Items after a VXLAN item describe the inner packet. Each layer may
/// carry at most one L2, one L3, and one L4 item, and an IPv6 routing
/// extension must follow an IPv6 item.
pub fn item_flags(items: &[PatternItem]) -> Result<ItemFlags, FlowError> {
    let mut flags = ItemFlags::empty();

    for (i, item) in items.iter().enumerate() {
        let inner = flags.contains(ItemFlags::VXLAN);
        let (flag, layer) = match &item.spec {
            Item::Eth(_) if inner => (ItemFlags::INNER_L2, ItemFlags::INNER_L2),
            Item::Eth(_) => (ItemFlags::OUTER_L2, ItemFlags::OUTER_L2),
            Item::Vlan(_) if inner => {
                (ItemFlags::INNER_VLAN, ItemFlags::INNER_VLAN)
            }
            Item::Vlan(_) => (ItemFlags::OUTER_VLAN, ItemFlags::OUTER_VLAN),
            Item::Ipv4(_) if inner => {
                (ItemFlags::INNER_IPV4, ItemFlags::INNER_L3)
            }
            Item::Ipv4(_) => (ItemFlags::OUTER_IPV4, ItemFlags::OUTER_L3),
            Item::Ipv6(_) if inner => {
                (ItemFlags::INNER_IPV6, ItemFlags::INNER_L3)
            }
            Item::Ipv6(_) => (ItemFlags::OUTER_IPV6, ItemFlags::OUTER_L3),
            Item::Tcp(_) if inner => {
                (ItemFlags::INNER_TCP, ItemFlags::INNER_L4)
            }
            Item::Tcp(_) => (ItemFlags::OUTER_TCP, ItemFlags::OUTER_L4),
            Item::Udp(_) if inner => {
                (ItemFlags::INNER_UDP, ItemFlags::INNER_L4)
            }
            Item::Udp(_) => (ItemFlags::OUTER_UDP, ItemFlags::OUTER_L4),
            Item::Vxlan(_) => (ItemFlags::VXLAN, ItemFlags::VXLAN),
            Item::Tag(_) => (ItemFlags::TAG, ItemFlags::empty()),
            Item::Meta { .. } => (ItemFlags::META, ItemFlags::META),
            Item::RepresentedPort { .. } => {
                (ItemFlags::REPR_PORT, ItemFlags::REPR_PORT)
            }
            Item::Conntrack { .. } => {
                (ItemFlags::CONNTRACK, ItemFlags::CONNTRACK)
            }
            Item::Ipv6RoutingExt(_) => {
                if !flags.intersects(
                    ItemFlags::OUTER_IPV6 | ItemFlags::INNER_IPV6,
                ) {
                    return Err(FlowError::item(
                        i,
                        "IPv6 routing extension requires a preceding IPv6 item",
                    ));
                }
                (ItemFlags::IPV6_ROUTING_EXT, ItemFlags::IPV6_ROUTING_EXT)
            }
            Item::Flex(_) => (ItemFlags::FLEX, ItemFlags::empty()),
        };

        if !layer.is_empty() && flags.intersects(layer) {
            return Err(FlowError::item(
                i,
                format!("duplicate {} item in the same layer", item.kind()),
            ));
        }

        if item.mask.as_ref().is_some_and(|m| m.kind() != item.kind()) {
            return Err(FlowError::item(i, "mask kind differs from item"));
        }

        flags |= flag;
    }

    Ok(flags)
}

/// The action flags of a template.
pub fn action_flags(actions: &[ActionSpec]) -> ActionFlags {
    actions
        .iter()
        .fold(ActionFlags::empty(), |acc, a| acc | ActionFlags::of(&a.action))
}

/// Encode `val` in canonical form.
pub fn encode<T: Serialize + ?Sized>(val: &T) -> Result<Vec<u8>, FlowError> {
    postcard::to_allocvec(val)
        .map_err(|e| FlowError::InvalidAttr(format!("encode: {e}")))
}

/// The digest of a canonical encoding.
pub fn digest(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}
