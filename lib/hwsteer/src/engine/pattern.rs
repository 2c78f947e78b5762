// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Pattern templates.

use super::codec;
use super::codec::ItemFlags;
use super::flex::FlexParsers;
use super::steering::MatchTemplateId;
use crate::api::FlexHandle;
use crate::api::FlowDir;
use crate::api::FlowError;
use crate::api::Item;
use crate::api::MAX_TAG_INDEX;
use crate::api::PatternItem;
use crate::api::PatternTemplateId;
use crate::api::PortConfig;
use crate::api::TemplateAttr;
use crate::api::TemplateDump;
use crate::api::TemplateKind;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

/// The compiled, immutable form of a pattern template.
#[derive(Clone, Debug)]
pub struct PatternLayout {
    pub attr: TemplateAttr,
    /// The items matched, implicit items first.
    pub items: Vec<PatternItem>,
    /// How many leading items the port supplies itself.
    pub implicit: usize,
    pub flags: ItemFlags,
    pub flex: Vec<FlexHandle>,
    pub srh: bool,
    pub encoded: Vec<u8>,
    pub digest: u32,
}

impl PatternLayout {
    /// The number of items a rule supplies.
    pub fn user_items(&self) -> usize {
        self.items.len() - self.implicit
    }

    /// Drop the parser references taken by [`compile`].
    pub fn release_parsers(&self, parsers: &FlexParsers) {
        for h in self.flex.iter().rev() {
            parsers.put(*h);
        }
        if self.srh {
            parsers.srh_put();
        }
    }

    /// Check a rule's items against the template and prepend the
    /// implicit ones.
    pub fn rule_items(
        &self,
        cfg: &PortConfig,
        items: &[Item],
    ) -> Result<Vec<Item>, FlowError> {
        if items.len() != self.user_items() {
            return Err(FlowError::item(
                items.len().min(self.user_items()),
                format!(
                    "template has {} items, rule has {}",
                    self.user_items(),
                    items.len()
                ),
            ));
        }

        let mut out = Vec::with_capacity(self.items.len());
        if self.implicit > 0 {
            out.push(Item::RepresentedPort { port_id: cfg.port_id });
        }

        for (i, (item, tmpl)) in
            items.iter().zip(&self.items[self.implicit..]).enumerate()
        {
            if item.kind() != tmpl.kind() {
                return Err(FlowError::item(
                    i,
                    format!("expected {}, got {}", tmpl.kind(), item.kind()),
                ));
            }
            out.push(item.clone());
        }

        Ok(out)
    }
}

fn validate_item(
    dir: FlowDir,
    idx: usize,
    item: &PatternItem,
) -> Result<(), FlowError> {
    match &item.spec {
        Item::RepresentedPort { .. } if dir != FlowDir::TRANSFER => Err(
            FlowError::item(idx, "represented_port is only valid in transfer"),
        ),
        Item::Tag(t) if t.index >= MAX_TAG_INDEX => Err(FlowError::item(
            idx,
            format!("tag index {} out of range", t.index),
        )),
        _ => Ok(()),
    }
}

/// Compile a masked item list, registering the parser profiles it
/// uses. On failure every registration made here is undone.
pub fn compile(
    attr: TemplateAttr,
    items: &[PatternItem],
    cfg: &PortConfig,
    parsers: &FlexParsers,
) -> Result<PatternLayout, FlowError> {
    if attr.dir.is_empty() {
        return Err(FlowError::InvalidAttr("empty direction".into()));
    }

    for (i, item) in items.iter().enumerate() {
        validate_item(attr.dir, i, item)?;
    }

    let mut flags = codec::item_flags(items)?;

    let implicit = attr.dir == FlowDir::TRANSFER
        && cfg.repr_matching
        && !flags.contains(ItemFlags::REPR_PORT);

    let mut all = Vec::with_capacity(items.len() + 1);
    if implicit {
        all.push(PatternItem::new(
            Item::RepresentedPort { port_id: cfg.port_id },
            Item::RepresentedPort { port_id: u16::MAX },
        ));
        flags |= ItemFlags::REPR_PORT;
    }
    all.extend_from_slice(items);

    let mut flex = Vec::new();
    let unwind = |flex: &[FlexHandle]| {
        for h in flex.iter().rev() {
            parsers.put(*h);
        }
    };

    for (i, item) in items.iter().enumerate() {
        let Item::Flex(fi) = &item.spec else {
            continue;
        };
        match parsers.get(fi.handle) {
            Ok(len) if fi.pattern.len() <= len => flex.push(fi.handle),
            Ok(len) => {
                parsers.put(fi.handle);
                unwind(&flex);
                return Err(FlowError::item(
                    i,
                    format!("flex pattern longer than {len} sampled bytes"),
                ));
            }
            Err(_) => {
                unwind(&flex);
                return Err(FlowError::item(
                    i,
                    format!("unknown flex handle {}", fi.handle),
                ));
            }
        }
    }

    let srh = flags.contains(ItemFlags::IPV6_ROUTING_EXT);
    if srh {
        parsers.srh_get();
    }

    let encoded = match codec::encode(&(attr, &all)) {
        Ok(enc) => enc,
        Err(e) => {
            unwind(&flex);
            if srh {
                parsers.srh_put();
            }
            return Err(e);
        }
    };
    let digest = codec::digest(&encoded);

    Ok(PatternLayout {
        attr,
        items: all,
        implicit: usize::from(implicit),
        flags,
        flex,
        srh,
        encoded,
        digest,
    })
}

/// A registered pattern template.
#[derive(Debug)]
pub struct PatternTemplate {
    pub id: PatternTemplateId,
    pub layout: PatternLayout,
    pub hw: MatchTemplateId,
    refcnt: AtomicU32,
}

impl PatternTemplate {
    pub fn new(
        id: PatternTemplateId,
        layout: PatternLayout,
        hw: MatchTemplateId,
    ) -> Self {
        Self { id, layout, hw, refcnt: AtomicU32::new(1) }
    }

    pub fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Acquire)
    }

    pub fn hold(&self) {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(&self) {
        self.refcnt.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn dump(&self) -> TemplateDump {
        TemplateDump {
            kind: TemplateKind::Pattern,
            id: self.id.0,
            dir: self.layout.attr.dir,
            refcnt: self.refcnt(),
            len: self.layout.items.len(),
            digest: self.layout.digest,
            flags: format!("{:?}", self.layout.flags),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::EthItem;
    use crate::api::FlexItem;
    use crate::api::FlexItemConf;
    use crate::api::Ipv6Item;
    use crate::api::Ipv6RoutingExtItem;
    use crate::api::L4Item;
    use crate::api::TagItem;

    fn any(item: Item) -> PatternItem {
        PatternItem::any(item)
    }

    #[test]
    fn implicit_repr_port_for_transfer() {
        let cfg = PortConfig { port_id: 7, ..Default::default() };
        let parsers = FlexParsers::new();
        let items = [any(Item::Eth(EthItem::default()))];

        let t = compile(
            TemplateAttr::new(FlowDir::TRANSFER),
            &items,
            &cfg,
            &parsers,
        )
        .unwrap();
        assert_eq!(t.implicit, 1);
        assert_eq!(t.user_items(), 1);
        let eth = [Item::Eth(EthItem::default())];
        let rule = t.rule_items(&cfg, &eth).unwrap();
        assert_eq!(rule[0], Item::RepresentedPort { port_id: 7 });

        let t =
            compile(TemplateAttr::new(FlowDir::INGRESS), &items, &cfg, &parsers)
                .unwrap();
        assert_eq!(t.implicit, 0);
    }

    #[test]
    fn rule_items_checked() {
        let cfg = PortConfig::default();
        let parsers = FlexParsers::new();
        let items = [any(Item::Udp(L4Item::default()))];
        let t =
            compile(TemplateAttr::new(FlowDir::INGRESS), &items, &cfg, &parsers)
                .unwrap();
        assert!(t.rule_items(&cfg, &[]).is_err());
        assert!(t.rule_items(&cfg, &[Item::Meta { data: 1 }]).is_err());
    }

    #[test]
    fn direction_and_tag_checks() {
        let cfg = PortConfig::default();
        let parsers = FlexParsers::new();
        let repr = [any(Item::RepresentedPort { port_id: 1 })];
        assert!(
            compile(TemplateAttr::new(FlowDir::INGRESS), &repr, &cfg, &parsers)
                .is_err()
        );
        let tag = [any(Item::Tag(TagItem { index: 8, data: 0 }))];
        assert!(
            compile(TemplateAttr::new(FlowDir::INGRESS), &tag, &cfg, &parsers)
                .is_err()
        );
    }

    #[test]
    fn flex_refs_unwound_on_failure() {
        let cfg = PortConfig::default();
        let parsers = FlexParsers::new();
        let h = parsers
            .create(FlexItemConf {
                prev_proto: 0x88B5,
                header_len: 8,
                samples: vec![0],
            })
            .unwrap();

        let good = FlexItem { handle: h, pattern: vec![1, 2] };
        let unknown = FlexItem { handle: FlexHandle(99), pattern: vec![] };
        let items = [any(Item::Flex(good.clone())), any(Item::Flex(unknown))];
        let attr = TemplateAttr::new(FlowDir::INGRESS);
        match compile(attr, &items, &cfg, &parsers) {
            Err(FlowError::InvalidItem { index, .. }) => assert_eq!(index, 1),
            res => panic!("unexpected {res:?}"),
        }
        assert_eq!(parsers.refcnt(h), Some(1));

        let t = compile(
            TemplateAttr::new(FlowDir::INGRESS),
            &[any(Item::Flex(good))],
            &cfg,
            &parsers,
        )
        .unwrap();
        assert_eq!(parsers.refcnt(h), Some(2));
        t.release_parsers(&parsers);
        assert_eq!(parsers.refcnt(h), Some(1));
    }

    #[test]
    fn srh_parser_referenced() {
        let cfg = PortConfig::default();
        let parsers = FlexParsers::new();
        let items = [
            any(Item::Ipv6(Ipv6Item::default())),
            any(Item::Ipv6RoutingExt(Ipv6RoutingExtItem::default())),
        ];
        let t =
            compile(TemplateAttr::new(FlowDir::INGRESS), &items, &cfg, &parsers)
                .unwrap();
        assert!(t.srh);
        assert_eq!(parsers.srh_refcnt(), 1);
        t.release_parsers(&parsers);
        assert_eq!(parsers.srh_refcnt(), 0);
    }
}
