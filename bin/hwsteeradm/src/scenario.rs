// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Canned walks through the port's control surface.
//!
//! Each scenario drives a port from empty, prints the completions it
//! pulls along the way, and fails if the port does not behave as
//! expected.

use anyhow::bail;
use anyhow::ensure;
use hwsteer::api::Action;
use hwsteer::api::ActionSpec;
use hwsteer::api::EthItem;
use hwsteer::api::FlowDir;
use hwsteer::api::FlowError;
use hwsteer::api::FlowHandle;
use hwsteer::api::IndirectActionConf;
use hwsteer::api::Ipv4Item;
use hwsteer::api::Item;
use hwsteer::api::MacAddr;
use hwsteer::api::OpAttr;
use hwsteer::api::OpResult;
use hwsteer::api::PatternItem;
use hwsteer::api::QueryAction;
use hwsteer::api::QueryData;
use hwsteer::api::TableAttr;
use hwsteer::api::TableId;
use hwsteer::api::TemplateAttr;
use hwsteer::engine::port::Port;
use hwsteer::engine::port::RuleSpec;
use hwsteer::engine::soft::SoftEngine;
use hwsteer::print::print_results_into;
use hwsteer::print::print_tables_into;
use hwsteer::print::write_hr;
use std::io::Write;

type SoftPort = Port<SoftEngine>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Scenario {
    /// Drop multicast traffic with one rule in a table of 64.
    McastDrop,

    /// Three rules sharing one indirect counter.
    SharedCounter,

    /// Fill a queue with postponed creates until it refuses more.
    QueueFull,

    /// Grow a table from 16 to 64 rules while it is in use.
    Resize,
}

impl Scenario {
    pub const ALL: [Self; 4] =
        [Self::McastDrop, Self::SharedCounter, Self::QueueFull, Self::Resize];

    /// Run the scenario on `port`, which must be freshly configured.
    pub fn run(
        self,
        port: &SoftPort,
        out: &mut impl Write,
    ) -> anyhow::Result<()> {
        match self {
            Self::McastDrop => mcast_drop(port, out),
            Self::SharedCounter => shared_counter(port, out),
            Self::QueueFull => queue_full(port, out),
            Self::Resize => resize(port, out),
        }
    }
}

fn drain(
    port: &SoftPort,
    queue: u16,
    out: &mut impl Write,
) -> anyhow::Result<Vec<OpResult>> {
    port.push(queue)?;
    let res = port.pull(queue, usize::MAX)?;
    print_results_into(out, queue, &res)?;
    if let Some(bad) = res.iter().find(|r| !r.is_ok()) {
        bail!("operation {:#x} failed", bad.user_data);
    }
    Ok(res)
}

fn tokens(res: &[OpResult]) -> Vec<u64> {
    res.iter().map(|r| r.user_data).collect()
}

fn ipv4_items(last: u8) -> [Item; 2] {
    [
        Item::Eth(EthItem::default()),
        Item::Ipv4(Ipv4Item { dst: [10, 0, 0, last], ..Default::default() }),
    ]
}

// An ingress table of `attr` whose rules name an IPv4 destination and
// take `first` followed by a drop.
fn ipv4_table(
    port: &SoftPort,
    attr: TableAttr,
    first: Action,
) -> anyhow::Result<TableId> {
    let tattr = TemplateAttr::new(attr.dir);
    let pt = port.pattern_template_create(
        tattr,
        &[
            PatternItem::any(Item::Eth(EthItem::default())),
            PatternItem::any(Item::Ipv4(Ipv4Item::default())),
        ],
    )?;
    let at = port.actions_template_create(
        tattr,
        &[ActionSpec::per_rule(first), ActionSpec::fixed(Action::Drop)],
    )?;
    Ok(port.table_create(attr, &[pt], &[at])?)
}

fn create_ipv4(
    port: &SoftPort,
    attr: OpAttr,
    table: TableId,
    last: u8,
    first: &Action,
) -> Result<FlowHandle, FlowError> {
    let items = ipv4_items(last);
    let actions = [first.clone(), Action::Drop];
    let spec =
        RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions: &actions };
    port.async_create(0, attr, table, &spec, u64::from(last))
}

fn mcast_drop(port: &SoftPort, out: &mut impl Write) -> anyhow::Result<()> {
    let tattr = TemplateAttr::new(FlowDir::INGRESS);
    let pt = port.pattern_template_create(
        tattr,
        &[PatternItem::new(
            Item::Eth(EthItem { dst: MacAddr::ZERO, ..Default::default() }),
            Item::Eth(EthItem {
                dst: MacAddr::MULTICAST_BIT,
                ..Default::default()
            }),
        )],
    )?;
    let drop = [ActionSpec::fixed(Action::Drop)];
    let at = port.actions_template_create(tattr, &drop)?;
    let attr = TableAttr::new(1, FlowDir::INGRESS, 64);
    let table = port.table_create(attr, &[pt], &[at])?;

    let mcast = MacAddr::from_const([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]);
    let items = [Item::Eth(EthItem { dst: mcast, ..Default::default() })];
    let spec = RuleSpec {
        pt_idx: 0,
        items: &items,
        at_idx: 0,
        actions: &[Action::Drop],
    };
    port.async_create(0, OpAttr::NOW, table, &spec, 0xD0)?;

    let res = port.pull(0, 8)?;
    print_results_into(out, 0, &res)?;
    ensure!(
        res.len() == 1 && res[0].is_ok() && res[0].user_data == 0xD0,
        "expected a single successful completion, got {res:?}"
    );
    Ok(())
}

fn shared_counter(
    port: &SoftPort,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let h = port.indirect_action_create(&IndirectActionConf::Count)?;
    let attr = TableAttr::new(1, FlowDir::INGRESS, 16);
    let table = ipv4_table(port, attr, Action::Indirect(h))?;

    let shared = Action::Indirect(h);
    let mut flows = vec![];
    for last in 1..=3 {
        flows.push(create_ipv4(port, OpAttr::POSTPONE, table, last, &shared)?);
    }
    drain(port, 0, out)?;

    for (i, fh) in flows.iter().enumerate() {
        if let Some(rule) = port.flow_rule(*fh) {
            port.engine().hit_rule(rule, 1, 64 * (i as u64 + 1));
        }
    }
    let counted = port.indirect_action_query(h)?;
    writeln!(out, "{h}: {counted:?}")?;
    ensure!(
        counted == QueryData::Count { hits: 3, bytes: 384 },
        "shared counter missed hits"
    );

    match port.indirect_action_destroy(h) {
        Err(FlowError::InUse(_)) => {}
        res => bail!("destroying a counter in use: {res:?}"),
    }

    for (i, fh) in flows.iter().enumerate() {
        port.async_destroy(0, OpAttr::POSTPONE, *fh, 0x10 + i as u64)?;
    }
    drain(port, 0, out)?;
    port.indirect_action_destroy(h)?;
    Ok(())
}

fn queue_full(port: &SoftPort, out: &mut impl Write) -> anyhow::Result<()> {
    let depth = port.config().queue_size;
    ensure!(depth < 255, "queue of {depth} is too deep for this scenario");
    let depth = depth as u8;
    let attr = TableAttr::new(1, FlowDir::INGRESS, 2 * u32::from(depth));
    let count = Action::Count { id: 0 };
    let table = ipv4_table(port, attr, count.clone())?;

    for last in 0..depth {
        create_ipv4(port, OpAttr::POSTPONE, table, last, &count)?;
    }
    match create_ipv4(port, OpAttr::POSTPONE, table, depth, &count) {
        Err(e @ FlowError::QueueFull { .. }) => {
            writeln!(out, "{e}")?;
        }
        res => bail!("expected the queue to be full: {res:?}"),
    }
    ensure!(port.pull(0, usize::MAX)?.is_empty(), "completed before push");

    let res = drain(port, 0, out)?;
    ensure!(
        tokens(&res) == (0..u64::from(depth)).collect::<Vec<_>>(),
        "completions out of order"
    );

    create_ipv4(port, OpAttr::POSTPONE, table, depth, &count)?;
    drain(port, 0, out)?;
    Ok(())
}

fn resize(port: &SoftPort, out: &mut impl Write) -> anyhow::Result<()> {
    let attr = TableAttr::new(1, FlowDir::INGRESS, 16).resizable();
    let count = Action::Count { id: 0 };
    let table = ipv4_table(port, attr, count.clone())?;

    let old = create_ipv4(port, OpAttr::NOW, table, 1, &count)?;
    drain(port, 0, out)?;

    port.table_resize(table, 64)?;
    ensure!(
        port.table_resize(table, 128) == Err(FlowError::ResizeInProgress),
        "a second resize was accepted"
    );

    let fresh = create_ipv4(port, OpAttr::NOW, table, 2, &count)?;
    drain(port, 0, out)?;
    write_hr(out)?;
    print_tables_into(out, &port.dump_tables())?;
    write_hr(out)?;

    match port.table_resize_complete(table) {
        Err(FlowError::InUse(_)) => {}
        res => bail!("completed a resize with rules left behind: {res:?}"),
    }

    port.async_update_resized(0, OpAttr::NOW, old, 3)?;
    port.async_update_resized(0, OpAttr::NOW, fresh, 4)?;
    let res = drain(port, 0, out)?;
    ensure!(tokens(&res) == [3, 4], "moves out of order");
    port.table_resize_complete(table)?;

    for fh in [old, fresh] {
        let counted = port.query(fh, QueryAction::Count { reset: false })?;
        writeln!(out, "{fh}: {counted:?}")?;
    }
    port.async_destroy(0, OpAttr::NOW, old, 5)?;
    port.async_destroy(0, OpAttr::NOW, fresh, 6)?;
    drain(port, 0, out)?;

    write_hr(out)?;
    print_tables_into(out, &port.dump_tables())?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::open_port;
    use hwsteer::api::PortConfig;
    use hwsteer::provider::NullLog;

    #[test]
    fn every_scenario_passes() {
        for scenario in Scenario::ALL {
            let mut port = open_port(PortConfig::default(), NullLog).unwrap();
            let mut out = Vec::new();
            if let Err(e) = scenario.run(&port, &mut out) {
                panic!("{scenario:?}: {e:#}");
            }
            assert!(!out.is_empty());
            port.shutdown();
        }
    }

    #[test]
    fn queue_full_follows_queue_size() {
        let cfg = PortConfig { queue_size: 8, ..Default::default() };
        let port = open_port(cfg, NullLog).unwrap();
        let mut out = Vec::new();
        Scenario::QueueFull.run(&port, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("queue 0"));
        assert_eq!(port.engine().rule_count(), 9);
    }
}
