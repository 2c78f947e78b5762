// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Bulk rule installation for `hwsteeradm run`.

use anyhow::Context;
use hwsteer::api::Action;
use hwsteer::api::ActionSpec;
use hwsteer::api::EthItem;
use hwsteer::api::FlowError;
use hwsteer::api::FlowHandle;
use hwsteer::api::Ipv4Item;
use hwsteer::api::Item;
use hwsteer::api::OpAttr;
use hwsteer::api::OpResult;
use hwsteer::api::PatternItem;
use hwsteer::api::TableAttr;
use hwsteer::api::TableId;
use hwsteer::api::TemplateAttr;
use hwsteer::engine::port::Port;
use hwsteer::engine::port::RuleSpec;
use hwsteer::engine::soft::SoftEngine;

#[derive(Clone, Copy, Debug)]
pub struct RunOpts {
    pub table: TableAttr,
    pub rules: u32,
    pub queue: u16,

    /// Submissions are postponed and pushed once per burst.
    pub burst: u32,
}

/// The rules installed by [`install`], and every completion pulled
/// while doing so.
#[derive(Debug)]
pub struct Batch {
    pub table: TableId,
    pub flows: Vec<FlowHandle>,
    pub results: Vec<OpResult>,
}

impl Batch {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_ok()).count()
    }
}

/// The destination address of the `n`th rule: 10.0.0.0/8 in order.
pub fn rule_dst(n: u32) -> [u8; 4] {
    let [_, b, c, d] = n.to_be_bytes();
    [10, b, c, d]
}

fn drain(
    port: &Port<SoftEngine>,
    queue: u16,
    results: &mut Vec<OpResult>,
) -> Result<(), FlowError> {
    port.push(queue)?;
    results.extend(port.pull(queue, usize::MAX)?);
    Ok(())
}

// Submit `op`, draining the queue and trying once more if it is full.
fn submit<T>(
    port: &Port<SoftEngine>,
    queue: u16,
    results: &mut Vec<OpResult>,
    op: impl Fn() -> Result<T, FlowError>,
) -> Result<T, FlowError> {
    match op() {
        Err(FlowError::QueueFull { .. }) => {
            drain(port, queue, results)?;
            op()
        }
        res => res,
    }
}

/// Create a table matching IPv4 destinations, counting and dropping,
/// and fill it with `opts.rules` rules.
pub fn install(
    port: &Port<SoftEngine>,
    opts: &RunOpts,
) -> anyhow::Result<Batch> {
    let tattr = TemplateAttr::new(opts.table.dir);
    let dst_mask = Ipv4Item { dst: [0xFF; 4], ..Default::default() };
    let pt = port.pattern_template_create(
        tattr,
        &[
            PatternItem::any(Item::Eth(EthItem::default())),
            PatternItem::new(
                Item::Ipv4(Ipv4Item::default()),
                Item::Ipv4(dst_mask),
            ),
        ],
    )?;
    let at = port.actions_template_create(
        tattr,
        &[
            ActionSpec::per_rule(Action::Count { id: 0 }),
            ActionSpec::fixed(Action::Drop),
        ],
    )?;
    let table = port.table_create(opts.table, &[pt], &[at])?;

    let burst = opts.burst.max(1);
    let attr = if burst > 1 { OpAttr::POSTPONE } else { OpAttr::NOW };
    let actions = [Action::Count { id: 0 }, Action::Drop];
    let mut batch = Batch { table, flows: vec![], results: vec![] };

    for n in 0..opts.rules {
        let items = [
            Item::Eth(EthItem::default()),
            Item::Ipv4(Ipv4Item { dst: rule_dst(n), ..Default::default() }),
        ];
        let spec =
            RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions: &actions };
        let flow = submit(port, opts.queue, &mut batch.results, || {
            port.async_create(opts.queue, attr, table, &spec, u64::from(n))
        })
        .with_context(|| format!("rule {n}"))?;
        batch.flows.push(flow);

        if (n + 1) % burst == 0 {
            drain(port, opts.queue, &mut batch.results)?;
        }
    }
    drain(port, opts.queue, &mut batch.results)?;
    Ok(batch)
}

/// Destroy every rule of `batch`, then its table and templates.
pub fn remove(
    port: &Port<SoftEngine>,
    opts: &RunOpts,
    batch: &mut Batch,
) -> anyhow::Result<()> {
    let burst = opts.burst.max(1);
    let attr = if burst > 1 { OpAttr::POSTPONE } else { OpAttr::NOW };

    for (n, flow) in batch.flows.drain(..).enumerate() {
        let ud = (1 << 32) | n as u64;
        submit(port, opts.queue, &mut batch.results, || {
            port.async_destroy(opts.queue, attr, flow, ud)
        })
        .with_context(|| format!("destroying {flow}"))?;

        if (n as u32 + 1) % burst == 0 {
            drain(port, opts.queue, &mut batch.results)?;
        }
    }
    drain(port, opts.queue, &mut batch.results)?;

    let tables = port.dump_tables();
    let dump = tables.iter().find(|t| t.id == batch.table);
    port.table_destroy(batch.table)?;
    if let Some(dump) = dump {
        for pt in &dump.pattern_templates {
            port.pattern_template_destroy(*pt)?;
        }
        for at in &dump.actions_templates {
            port.actions_template_destroy(*at)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::open_port;
    use hwsteer::api::FlowDir;
    use hwsteer::api::PortConfig;
    use hwsteer::provider::NullLog;

    fn opts(rules: u32, burst: u32) -> RunOpts {
        RunOpts {
            table: TableAttr::new(1, FlowDir::INGRESS, 256),
            rules,
            queue: 1,
            burst,
        }
    }

    #[test]
    fn destinations_in_order() {
        assert_eq!(rule_dst(0), [10, 0, 0, 0]);
        assert_eq!(rule_dst(0x0102), [10, 0, 1, 2]);
    }

    #[test]
    fn install_then_remove() {
        let port = open_port(PortConfig::default(), NullLog).unwrap();
        let opts = opts(40, 8);
        let mut batch = install(&port, &opts).unwrap();
        assert_eq!(batch.flows.len(), 40);
        assert_eq!(batch.results.len(), 40);
        assert_eq!(batch.failed(), 0);
        assert_eq!(port.dump_tables()[0].rules, 40);

        remove(&port, &opts, &mut batch).unwrap();
        assert_eq!(batch.results.len(), 80);
        assert_eq!(batch.failed(), 0);
        assert!(port.dump_tables().is_empty());
        assert!(port.dump_templates().is_empty());
        assert_eq!(port.engine().rule_count(), 0);
    }

    // A burst larger than the queue drains early rather than failing.
    #[test]
    fn burst_beyond_queue_size() {
        let cfg = PortConfig { queue_size: 4, ..Default::default() };
        let port = open_port(cfg, NullLog).unwrap();
        let batch = install(&port, &opts(10, 16)).unwrap();
        assert_eq!(batch.results.len(), 10);
        assert_eq!(batch.failed(), 0);
        let tokens: Vec<_> =
            batch.results.iter().map(|r| r.user_data).collect();
        assert_eq!(tokens, (0..10).collect::<Vec<u64>>());
    }
}
