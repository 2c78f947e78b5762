// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Workloads for the rule insertion and removal benchmarks.

use hwsteer::ExecCtx;
use hwsteer::api::Action;
use hwsteer::api::ActionSpec;
use hwsteer::api::EthItem;
use hwsteer::api::FlowDir;
use hwsteer::api::FlowHandle;
use hwsteer::api::Ipv4Item;
use hwsteer::api::Item;
use hwsteer::api::OpAttr;
use hwsteer::api::PatternItem;
use hwsteer::api::PortConfig;
use hwsteer::api::TableAttr;
use hwsteer::api::TableId;
use hwsteer::api::TemplateAttr;
use hwsteer::engine::port::Port;
use hwsteer::engine::port::RuleSpec;
use hwsteer::engine::soft::SoftEngine;
use hwsteer::provider::NullLog;

/// A port with one IPv4 count-and-drop table and the rule items to
/// fill it with.
pub struct Workload {
    pub port: Port<SoftEngine>,
    pub table: TableId,
    items: Vec<[Item; 2]>,
    actions: [Action; 2],
}

impl Workload {
    pub fn new(rules: u32) -> Self {
        let port = match Port::configure(
            SoftEngine::new(),
            PortConfig { nb_counters: 2 * rules, ..Default::default() },
            ExecCtx::new(NullLog),
        ) {
            Ok(port) => port,
            Err(e) => panic!("configure: {e}"),
        };

        let tattr = TemplateAttr::new(FlowDir::INGRESS);
        let dst_mask = Ipv4Item { dst: [0xFF; 4], ..Default::default() };
        let pt = port
            .pattern_template_create(
                tattr,
                &[
                    PatternItem::any(Item::Eth(EthItem::default())),
                    PatternItem::new(
                        Item::Ipv4(Ipv4Item::default()),
                        Item::Ipv4(dst_mask),
                    ),
                ],
            )
            .unwrap();
        let at = port
            .actions_template_create(
                tattr,
                &[
                    ActionSpec::per_rule(Action::Count { id: 0 }),
                    ActionSpec::fixed(Action::Drop),
                ],
            )
            .unwrap();
        let attr = TableAttr::new(1, FlowDir::INGRESS, 2 * rules);
        let table = port.table_create(attr, &[pt], &[at]).unwrap();

        let items = (0..rules)
            .map(|n| {
                let [_, b, c, d] = n.to_be_bytes();
                [
                    Item::Eth(EthItem::default()),
                    Item::Ipv4(Ipv4Item {
                        dst: [10, b, c, d],
                        ..Default::default()
                    }),
                ]
            })
            .collect();

        Self {
            port,
            table,
            items,
            actions: [Action::Count { id: 0 }, Action::Drop],
        }
    }

    fn ring(&self, n: usize, burst: usize) {
        if (n + 1) % burst == 0 {
            self.port.push(0).unwrap();
            self.port.pull(0, usize::MAX).unwrap();
        }
    }

    fn finish(&self) {
        self.port.push(0).unwrap();
        self.port.pull(0, usize::MAX).unwrap();
    }

    /// Insert every rule, ringing the doorbell once per `burst`
    /// submissions.
    pub fn insert(&self, burst: usize) -> Vec<FlowHandle> {
        let attr = if burst > 1 { OpAttr::POSTPONE } else { OpAttr::NOW };
        let mut flows = Vec::with_capacity(self.items.len());
        for (n, items) in self.items.iter().enumerate() {
            let spec = RuleSpec {
                pt_idx: 0,
                items,
                at_idx: 0,
                actions: &self.actions,
            };
            let fh = self
                .port
                .async_create(0, attr, self.table, &spec, n as u64)
                .unwrap();
            flows.push(fh);
            self.ring(n, burst);
        }
        self.finish();
        flows
    }

    /// Remove `flows`, ringing the doorbell once per `burst`
    /// submissions.
    pub fn remove(&self, flows: Vec<FlowHandle>, burst: usize) {
        let attr = if burst > 1 { OpAttr::POSTPONE } else { OpAttr::NOW };
        for (n, fh) in flows.into_iter().enumerate() {
            self.port.async_destroy(0, attr, fh, n as u64).unwrap();
            self.ring(n, burst);
        }
        self.finish();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn workload_returns_to_empty() {
        let w = Workload::new(100);
        let flows = w.insert(32);
        assert_eq!(flows.len(), 100);
        assert_eq!(w.port.engine().rule_count(), 100);
        assert_eq!(w.port.stats().rule_create_ok, 100);

        w.remove(flows, 32);
        assert_eq!(w.port.engine().rule_count(), 0);
        assert_eq!(w.port.dump_tables()[0].rules, 0);
    }
}
