// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

// Let's make our lives easier and pub use a bunch of stuff.
pub use hwsteer::ExecCtx;
pub use hwsteer::api::*;
pub use hwsteer::engine::flow::FlowFlags;
pub use hwsteer::engine::flow::FlowState;
pub use hwsteer::engine::port::Port;
pub use hwsteer::engine::port::RuleSpec;
pub use hwsteer::engine::soft::SoftEngine;
pub use hwsteer::engine::soft::SoftOp;
pub use hwsteer::engine::stat::PortStatsSnapshot;
pub use hwsteer::engine::steering::HwActionKind;
pub use hwsteer::engine::steering::RuleActionArg;
pub use hwsteer::engine::table::TableState;
pub use hwsteer::provider::PrintlnLog;

/// Matches any multicast destination.
pub const MCAST_MASK: MacAddr = MacAddr::MULTICAST_BIT;

/// Assert that the port's stats moved from `$before` by exactly the
/// given amounts, and that nothing else moved.
///
/// ```ignore
/// let before = port.stats();
/// ...
/// assert_stats!(port, before, [rule_create += 1, completions += 1]);
/// ```
#[macro_export]
macro_rules! assert_stats {
    ($port:expr, $before:expr, [$($field:ident += $n:expr),* $(,)?]) => {{
        #[allow(unused_mut)]
        let mut expected = $before;
        $(expected.$field += $n;)*
        let actual = $port.stats();
        assert_eq!(actual, expected, "port stats");
    }};
}

/// Assert that every completion of a pull succeeded.
#[macro_export]
macro_rules! assert_all_ok {
    ($results:expr) => {
        for r in &$results {
            assert!(r.is_ok(), "completion {:#x} failed", r.user_data);
        }
    };
}

/// Configure a port over a fresh [`SoftEngine`].
pub fn port(cfg: PortConfig) -> Port<SoftEngine> {
    match Port::configure(SoftEngine::new(), cfg, ExecCtx::new(PrintlnLog)) {
        Ok(port) => port,
        Err(e) => panic!("failed to configure port: {e}"),
    }
}

pub fn default_port() -> Port<SoftEngine> {
    port(PortConfig::default())
}

/// An Ethernet item matching destination `dst` under `mask`.
pub fn eth_dst(dst: MacAddr, mask: MacAddr) -> PatternItem {
    PatternItem::new(
        Item::Eth(EthItem { dst, ..Default::default() }),
        Item::Eth(EthItem { dst: mask, ..Default::default() }),
    )
}

/// Ethernet followed by IPv4, every field given per rule.
pub fn eth_ipv4() -> Vec<PatternItem> {
    vec![
        PatternItem::any(Item::Eth(EthItem::default())),
        PatternItem::any(Item::Ipv4(Ipv4Item::default())),
    ]
}

/// The rule items of an [`eth_ipv4`] template, for destination
/// 10.0.0.`last`.
pub fn ipv4_items(last: u8) -> Vec<Item> {
    vec![
        Item::Eth(EthItem::default()),
        Item::Ipv4(Ipv4Item { dst: [10, 0, 0, last], ..Default::default() }),
    ]
}

/// A table over a single pattern and actions template.
pub struct TestTable {
    pub id: TableId,
    pub pt: PatternTemplateId,
    pub at: ActionsTemplateId,
}

/// Create an ingress table of `attr` over the `items` and `actions`
/// templates.
pub fn table(
    port: &Port<SoftEngine>,
    attr: TableAttr,
    items: &[PatternItem],
    actions: &[ActionSpec],
) -> TestTable {
    let tattr = TemplateAttr::new(attr.dir);
    let pt = port.pattern_template_create(tattr, items).unwrap();
    let at = port.actions_template_create(tattr, actions).unwrap();
    let id = port.table_create(attr, &[pt], &[at]).unwrap();
    TestTable { id, pt, at }
}

/// An ingress table of `capacity` rules dropping multicast traffic.
pub fn mcast_drop_table(port: &Port<SoftEngine>, capacity: u32) -> TestTable {
    table(
        port,
        TableAttr::new(1, FlowDir::INGRESS, capacity),
        &[eth_dst(MacAddr::ZERO, MCAST_MASK)],
        &[ActionSpec::fixed(Action::Drop)],
    )
}

/// An ingress table counting and dropping per-rule IPv4 flows.
pub fn count_drop_table(port: &Port<SoftEngine>, attr: TableAttr) -> TestTable {
    table(
        port,
        attr,
        &eth_ipv4(),
        &[
            ActionSpec::per_rule(Action::Count { id: 0 }),
            ActionSpec::fixed(Action::Drop),
        ],
    )
}

pub fn count_drop() -> Vec<Action> {
    vec![Action::Count { id: 0 }, Action::Drop]
}

/// Enqueue a rule matching 10.0.0.`last` in a [`count_drop_table`].
pub fn create_ipv4(
    port: &Port<SoftEngine>,
    queue: u16,
    attr: OpAttr,
    table: TableId,
    last: u8,
    user_data: u64,
) -> Result<FlowHandle, FlowError> {
    let items = ipv4_items(last);
    let actions = count_drop();
    let spec =
        RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions: &actions };
    port.async_create(queue, attr, table, &spec, user_data)
}

/// Ring the doorbell and retire everything outstanding on `queue`.
pub fn drain(port: &Port<SoftEngine>, queue: u16) -> Vec<OpResult> {
    port.push(queue).unwrap();
    port.pull(queue, usize::MAX).unwrap()
}

/// Retire everything outstanding on `queue`, expecting all of it to
/// succeed, and return the user data in completion order.
pub fn drain_ok(port: &Port<SoftEngine>, queue: u16) -> Vec<u64> {
    let results = drain(port, queue);
    assert_all_ok!(results);
    results.iter().map(|r| r.user_data).collect()
}
