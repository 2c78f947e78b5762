// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Modify-header commands.
//!
//! Every header rewrite (modify-field, set-tag, VLAN VID/PCP, and the
//! VID/PCP half of a VLAN push) is lowered to one or more fixed-size
//! commands. All commands of a template share a single modify-header
//! slot; each contributing action owns a contiguous range of them.
//!
//! A command is two big-endian words:
//!
//! ```text
//!  31    28 27          16 15      8 7   5 4      0
//! +--------+--------------+---------+-----+--------+
//! |   op   |   field id   | offset  |  0  | length |   word 0
//! +--------+--------------+---------+-----+--------+
//! |            value, or source field/offset       |   word 1
//! +------------------------------------------------+
//! ```
//!
//! A length of zero means 32 bits.

use crate::api::Field;
use crate::api::FieldId;
use crate::api::ModifyOp;
use crate::api::ModifySrc;
use alloc::string::String;
use alloc::vec::Vec;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::byteorder::big_endian::U32;

pub const MHDR_OP_SET: u32 = 1;
pub const MHDR_OP_ADD: u32 = 2;
pub const MHDR_OP_COPY: u32 = 3;

/// Added to a field id when the field is in the inner packet.
const INNER_FIELD: u16 = 0x800;

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
)]
#[repr(C)]
pub struct MhdrCmd {
    pub hdr: U32,
    pub data: U32,
}

impl MhdrCmd {
    pub fn new(op: u32, field: u16, offset: u8, length: u8, data: u32) -> Self {
        let len = u32::from(length) & 0x1F;
        let hdr = (op << 28)
            | (u32::from(field & 0xFFF) << 16)
            | (u32::from(offset) << 8)
            | len;
        Self { hdr: U32::new(hdr), data: U32::new(data) }
    }

    pub fn op(&self) -> u32 {
        self.hdr.get() >> 28
    }

    pub fn field(&self) -> u16 {
        ((self.hdr.get() >> 16) & 0xFFF) as u16
    }

    pub fn offset(&self) -> u8 {
        ((self.hdr.get() >> 8) & 0xFF) as u8
    }

    /// The length in bits, 1 through 32.
    pub fn length(&self) -> u32 {
        match self.hdr.get() & 0x1F {
            0 => 32,
            n => n,
        }
    }

    pub fn value(&self) -> u32 {
        self.data.get()
    }
}

/// Encode a command list as the bytes handed to the steering engine.
pub fn cmds_as_bytes(cmds: &[MhdrCmd]) -> Vec<u8> {
    cmds.as_bytes().to_vec()
}

/// Decode bytes produced by [`cmds_as_bytes`].
pub fn cmds_from_bytes(bytes: &[u8]) -> Option<Vec<MhdrCmd>> {
    <[MhdrCmd]>::ref_from_bytes(bytes).ok().map(|c| c.to_vec())
}

/// A hardware sub-field: a field of up to 32 bits that a single
/// command can address.
#[derive(Clone, Copy, Debug)]
struct SubField {
    id: u16,
    /// The bit position of the sub-field's LSB within the field.
    lo: u32,
    bits: u32,
}

const fn sf(id: u16, lo: u32, bits: u32) -> SubField {
    SubField { id, lo, bits }
}

fn sub_fields(field: Field) -> &'static [SubField] {
    const MAC_DST: [SubField; 2] = [sf(0x01, 16, 32), sf(0x02, 0, 16)];
    const MAC_SRC: [SubField; 2] = [sf(0x03, 16, 32), sf(0x04, 0, 16)];
    const VLAN_VID: [SubField; 1] = [sf(0x05, 0, 12)];
    const VLAN_PCP: [SubField; 1] = [sf(0x06, 0, 3)];
    const IPV4_DSCP: [SubField; 1] = [sf(0x07, 0, 6)];
    const IPV4_TTL: [SubField; 1] = [sf(0x08, 0, 8)];
    const IPV6_HOP: [SubField; 1] = [sf(0x09, 0, 8)];
    const TCP_SEQ: [SubField; 1] = [sf(0x0A, 0, 32)];
    const TCP_ACK: [SubField; 1] = [sf(0x0B, 0, 32)];
    const L4_SPORT: [SubField; 1] = [sf(0x0C, 0, 16)];
    const L4_DPORT: [SubField; 1] = [sf(0x0D, 0, 16)];
    const META: [SubField; 1] = [sf(0x0E, 0, 32)];
    const MARK: [SubField; 1] = [sf(0x0F, 0, 24)];
    const TAGS: [[SubField; 1]; 8] = [
        [sf(0x10, 0, 32)],
        [sf(0x11, 0, 32)],
        [sf(0x12, 0, 32)],
        [sf(0x13, 0, 32)],
        [sf(0x14, 0, 32)],
        [sf(0x15, 0, 32)],
        [sf(0x16, 0, 32)],
        [sf(0x17, 0, 32)],
    ];

    match field {
        Field::MacDst => &MAC_DST,
        Field::MacSrc => &MAC_SRC,
        Field::VlanVid => &VLAN_VID,
        Field::VlanPcp => &VLAN_PCP,
        Field::Ipv4Dscp => &IPV4_DSCP,
        Field::Ipv4Ttl => &IPV4_TTL,
        Field::Ipv6HopLimit => &IPV6_HOP,
        Field::TcpSeq => &TCP_SEQ,
        Field::TcpAck => &TCP_ACK,
        Field::L4SrcPort => &L4_SPORT,
        Field::L4DstPort => &L4_DPORT,
        Field::Meta => &META,
        Field::Mark => &MARK,
        Field::Tag(i) => TAGS.get(usize::from(i)).map_or(&[], |t| t),
    }
}

fn field_id(sub: &SubField, level: u8) -> u16 {
    if level >= 2 { sub.id | INNER_FIELD } else { sub.id }
}

fn low_bits(val: u64, bits: u32) -> u64 {
    if bits >= 64 { val } else { val & ((1u64 << bits) - 1) }
}

/// Lower a modify-field to commands.
///
/// The bit range `[dst.offset, dst.offset + width)` of the field is
/// split across the hardware sub-fields it touches. Copies must stay
/// within a single sub-field on both sides.
pub fn modify_field_cmds(
    op: ModifyOp,
    dst: &FieldId,
    src: &ModifySrc,
    width: u32,
) -> Result<Vec<MhdrCmd>, String> {
    let total = dst.field.bits();
    if width == 0 || dst.offset >= total || width > total - dst.offset {
        return Err(format!(
            "width {width} at offset {} exceeds {:?} ({total} bits)",
            dst.offset, dst.field
        ));
    }

    let subs = sub_fields(dst.field);
    if subs.is_empty() {
        return Err(format!("no such field {:?}", dst.field));
    }

    let start = dst.offset;
    let end = dst.offset + width;

    if let ModifySrc::Field(sfid) = src {
        if op != ModifyOp::Set {
            return Err("field copy only supports set".into());
        }
        let src_total = sfid.field.bits();
        if sfid.offset >= src_total || width > src_total - sfid.offset {
            return Err(format!("source {:?} too narrow", sfid.field));
        }
        let dsub = subs
            .iter()
            .find(|s| start >= s.lo && end <= s.lo + s.bits)
            .ok_or("copy destination spans sub-fields")?;
        let ssub = sub_fields(sfid.field)
            .iter()
            .find(|s| {
                sfid.offset >= s.lo && sfid.offset + width <= s.lo + s.bits
            })
            .ok_or("copy source spans sub-fields")?;
        let data = (u32::from(field_id(ssub, sfid.level)) << 16)
            | ((sfid.offset - ssub.lo) << 8);
        return Ok(vec![MhdrCmd::new(
            MHDR_OP_COPY,
            field_id(dsub, dst.level),
            (start - dsub.lo) as u8,
            (width & 0x1F) as u8,
            data,
        )]);
    }

    let value = match src {
        ModifySrc::Value(v) => *v,
        ModifySrc::Field(_) => 0,
    };
    let opc = match op {
        ModifyOp::Set => MHDR_OP_SET,
        ModifyOp::Add => MHDR_OP_ADD,
    };

    let mut out = Vec::new();
    for sub in subs {
        let lo = start.max(sub.lo);
        let hi = end.min(sub.lo + sub.bits);
        if lo >= hi {
            continue;
        }
        let len = hi - lo;
        let v = low_bits(value >> (lo - start), len) as u32;
        out.push(MhdrCmd::new(
            opc,
            field_id(sub, dst.level),
            (lo - sub.lo) as u8,
            (len & 0x1F) as u8,
            v,
        ));
    }
    Ok(out)
}

/// Lower a set-tag to a single command. `mask` selects the bits of
/// the tag register written and must be contiguous.
pub fn set_tag_cmd(index: u8, data: u32, mask: u32) -> Result<MhdrCmd, String> {
    let subs = sub_fields(Field::Tag(index));
    let sub = subs.first().ok_or_else(|| format!("bad tag index {index}"))?;
    if mask == 0 {
        return Err("empty tag mask".into());
    }
    let shift = mask.trailing_zeros();
    let len = 32 - mask.leading_zeros() - shift;
    if (mask >> shift).count_ones() != len {
        return Err(format!("tag mask {mask:#x} is not contiguous"));
    }
    Ok(MhdrCmd::new(
        MHDR_OP_SET,
        sub.id,
        shift as u8,
        (len & 0x1F) as u8,
        (data & mask) >> shift,
    ))
}

pub fn vlan_vid_cmd(vid: u16) -> MhdrCmd {
    let sub = sub_fields(Field::VlanVid)[0];
    MhdrCmd::new(MHDR_OP_SET, sub.id, 0, 12, u32::from(vid & 0xFFF))
}

pub fn vlan_pcp_cmd(pcp: u8) -> MhdrCmd {
    let sub = sub_fields(Field::VlanPcp)[0];
    MhdrCmd::new(MHDR_OP_SET, sub.id, 0, 3, u32::from(pcp & 0x7))
}
