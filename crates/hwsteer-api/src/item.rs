// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Match items.

use super::FlexHandle;
use super::MacAddr;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct EthItem {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ether_type: u16,
    pub has_vlan: bool,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct VlanItem {
    pub tci: u16,
    pub inner_type: u16,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct Ipv4Item {
    pub src: [u8; 4],
    pub dst: [u8; 4],
    pub proto: u8,
    pub tos: u8,
    pub ttl: u8,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct Ipv6Item {
    pub src: [u8; 16],
    pub dst: [u8; 16],
    pub proto: u8,
    pub tc: u8,
    pub hop_limit: u8,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct L4Item {
    pub src_port: u16,
    pub dst_port: u16,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct TcpItem {
    pub ports: L4Item,
    pub flags: u8,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct VxlanItem {
    pub vni: u32,
    pub flags: u8,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct TagItem {
    pub index: u8,
    pub data: u32,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct Ipv6RoutingExtItem {
    pub next_hdr: u8,
    pub routing_type: u8,
    pub segments_left: u8,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlexItem {
    pub handle: FlexHandle,
    pub pattern: Vec<u8>,
}

/// The configuration of a flex parser: a custom header found after
/// `prev_proto` and sampled in 32-bit words at byte offsets.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlexItemConf {
    /// The ether type or UDP destination port announcing the header.
    pub prev_proto: u16,
    pub header_len: u16,
    pub samples: Vec<u16>,
}

impl FlexItemConf {
    /// The number of pattern bytes a flex item may match.
    pub fn pattern_len(&self) -> usize {
        self.samples.len() * 4
    }
}

impl Default for FlexHandle {
    fn default() -> Self {
        FlexHandle(0)
    }
}

/// A single match item.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Item {
    Eth(EthItem),
    Vlan(VlanItem),
    Ipv4(Ipv4Item),
    Ipv6(Ipv6Item),
    Tcp(TcpItem),
    Udp(L4Item),
    Vxlan(VxlanItem),
    Tag(TagItem),
    Meta { data: u32 },
    RepresentedPort { port_id: u16 },
    Conntrack { state: u32 },
    Ipv6RoutingExt(Ipv6RoutingExtItem),
    Flex(FlexItem),
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub enum ItemKind {
    Eth,
    Vlan,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Vxlan,
    Tag,
    Meta,
    RepresentedPort,
    Conntrack,
    Ipv6RoutingExt,
    Flex,
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Eth => "eth",
            Self::Vlan => "vlan",
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Vxlan => "vxlan",
            Self::Tag => "tag",
            Self::Meta => "meta",
            Self::RepresentedPort => "represented_port",
            Self::Conntrack => "conntrack",
            Self::Ipv6RoutingExt => "ipv6_routing_ext",
            Self::Flex => "flex",
        };
        write!(f, "{s}")
    }
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Eth(_) => ItemKind::Eth,
            Self::Vlan(_) => ItemKind::Vlan,
            Self::Ipv4(_) => ItemKind::Ipv4,
            Self::Ipv6(_) => ItemKind::Ipv6,
            Self::Tcp(_) => ItemKind::Tcp,
            Self::Udp(_) => ItemKind::Udp,
            Self::Vxlan(_) => ItemKind::Vxlan,
            Self::Tag(_) => ItemKind::Tag,
            Self::Meta { .. } => ItemKind::Meta,
            Self::RepresentedPort { .. } => ItemKind::RepresentedPort,
            Self::Conntrack { .. } => ItemKind::Conntrack,
            Self::Ipv6RoutingExt(_) => ItemKind::Ipv6RoutingExt,
            Self::Flex(_) => ItemKind::Flex,
        }
    }

    /// Does this item, used as a mask, select no bits at all?
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Eth(e) => {
                e.dst.is_zero() && e.src.is_zero() && e.ether_type == 0
                    && !e.has_vlan
            }
            Self::Vlan(v) => v.tci == 0 && v.inner_type == 0,
            Self::Ipv4(ip) => {
                ip.src == [0; 4]
                    && ip.dst == [0; 4]
                    && ip.proto == 0
                    && ip.tos == 0
                    && ip.ttl == 0
            }
            Self::Ipv6(ip) => {
                ip.src == [0; 16]
                    && ip.dst == [0; 16]
                    && ip.proto == 0
                    && ip.tc == 0
                    && ip.hop_limit == 0
            }
            Self::Tcp(t) => {
                t.ports.src_port == 0 && t.ports.dst_port == 0 && t.flags == 0
            }
            Self::Udp(u) => u.src_port == 0 && u.dst_port == 0,
            Self::Vxlan(v) => v.vni == 0 && v.flags == 0,
            Self::Tag(t) => t.data == 0,
            Self::Meta { data } => *data == 0,
            Self::RepresentedPort { port_id } => *port_id == 0,
            Self::Conntrack { state } => *state == 0,
            Self::Ipv6RoutingExt(r) => {
                r.next_hdr == 0 && r.routing_type == 0 && r.segments_left == 0
            }
            Self::Flex(f) => f.pattern.iter().all(|b| *b == 0),
        }
    }
}

/// An item as it appears in a pattern template: the item itself
/// (providing, for some kinds, template-level configuration such as the
/// tag index or flex handle) and its mask.
///
/// A mask of `None` means the item is present but matches on no
/// fields: it only constrains the protocol stack.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PatternItem {
    pub spec: Item,
    pub mask: Option<Item>,
}

impl PatternItem {
    pub fn new(spec: Item, mask: Item) -> Self {
        Self { spec, mask: Some(mask) }
    }

    pub fn any(spec: Item) -> Self {
        Self { spec, mask: None }
    }

    pub fn kind(&self) -> ItemKind {
        self.spec.kind()
    }

    /// Does this item match on any bits?
    pub fn is_masked(&self) -> bool {
        self.mask.as_ref().is_some_and(|m| !m.is_zero())
    }
}

/// The conntrack item state bits.
pub mod ct_state {
    pub const VALID: u32 = 1;
    pub const CHANGED: u32 = 1 << 1;
    pub const INVALID: u32 = 1 << 2;
    pub const DISABLED: u32 = 1 << 3;
    pub const BAD: u32 = 1 << 4;
    pub const ALL: u32 = VALID | CHANGED | INVALID | DISABLED | BAD;
}
