// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! End-to-end scenarios over a port backed by the software engine.
//!
//! Each test drives a port through the public control surface only:
//! templates, tables, asynchronous rule operations, and the push/pull
//! completion protocol.

use common::*;
use hwsteer_test_utils as common;

// A single multicast drop rule in a 64-entry table completes with
// exactly one successful completion carrying the caller's token.
#[test]
fn multicast_drop() {
    let port = default_port();
    let tbl = mcast_drop_table(&port, 64);
    let before = port.stats();

    let mcast = MacAddr::from_const([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]);
    let items = [Item::Eth(EthItem { dst: mcast, ..Default::default() })];
    let actions = [Action::Drop];
    let spec =
        RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions: &actions };
    let fh = port.async_create(0, OpAttr::NOW, tbl.id, &spec, 0xD0).unwrap();
    assert_eq!(fh.table, tbl.id);

    let res = port.pull(0, 8).unwrap();
    assert_eq!(res.len(), 1);
    assert_eq!(res[0].status, OpStatus::Success);
    assert_eq!(res[0].user_data, 0xD0);
    assert_eq!(res[0].query, None);
    assert!(port.pull(0, 8).unwrap().is_empty());

    assert_eq!(port.flow_state(fh), Some(FlowState::Live));
    let rule = port.engine().rule(port.flow_rule(fh).unwrap()).unwrap();
    assert_eq!(rule.items, items.to_vec());
    assert_eq!(rule.actions.len(), 1);
    assert_eq!(rule.actions[0].kind, HwActionKind::Drop);

    assert_stats!(
        port,
        before,
        [rule_create += 1, rule_create_ok += 1, completions += 1]
    );

    let dump = port.dump_tables();
    assert_eq!(dump.len(), 1);
    assert_eq!(dump[0].capacity, 64);
    assert_eq!(dump[0].rules, 1);
    assert_eq!(dump[0].state, TableState::Bound.to_string());
}

// Three rules share one indirect counter; the counter's references
// return to the creator's alone once they are destroyed.
#[test]
fn shared_counter() {
    let port = default_port();
    let h = port.indirect_action_create(&IndirectActionConf::Count).unwrap();
    let counters = port.pools().counters().unwrap();
    assert_eq!(counters.refcnt(h.index), 1);

    let tbl = table(
        &port,
        TableAttr::new(1, FlowDir::INGRESS, 16),
        &eth_ipv4(),
        &[
            ActionSpec::per_rule(Action::Indirect(h)),
            ActionSpec::fixed(Action::Drop),
        ],
    );

    let actions = [Action::Indirect(h), Action::Drop];
    let flows: Vec<_> = (1..=3u8)
        .map(|i| {
            let items = ipv4_items(i);
            let spec = RuleSpec {
                pt_idx: 0,
                items: &items,
                at_idx: 0,
                actions: &actions,
            };
            port.async_create(0, OpAttr::NOW, tbl.id, &spec, u64::from(i))
                .unwrap()
        })
        .collect();
    assert_eq!(drain_ok(&port, 0), vec![1, 2, 3]);
    assert_eq!(counters.refcnt(h.index), 4);
    for fh in &flows {
        assert_eq!(port.flow_flags(*fh), Some(FlowFlags::SHARED_COUNTER));
    }

    // Traffic through any rule lands in the one counter.
    let first = port.flow_rule(flows[0]).unwrap();
    let last = port.flow_rule(flows[2]).unwrap();
    assert!(port.engine().hit_rule(first, 2, 128));
    assert!(port.engine().hit_rule(last, 1, 64));
    assert_eq!(
        port.indirect_action_query(h),
        Ok(QueryData::Count { hits: 3, bytes: 192 })
    );

    assert!(matches!(
        port.indirect_action_destroy(h),
        Err(FlowError::InUse(_))
    ));

    for (i, fh) in flows.iter().enumerate() {
        port.async_destroy(0, OpAttr::NOW, *fh, 10 + i as u64).unwrap();
    }
    assert_eq!(drain_ok(&port, 0), vec![10, 11, 12]);
    assert_eq!(counters.refcnt(h.index), 1);

    port.indirect_action_destroy(h).unwrap();
    assert_eq!(counters.live(), 0);
}

// A queue of 32 descriptors takes 32 postponed creates and refuses
// the 33rd until the first batch is pushed and pulled.
#[test]
fn queue_full_until_drained() {
    let port = port(PortConfig { queue_size: 32, ..Default::default() });
    let tbl = count_drop_table(&port, TableAttr::new(1, FlowDir::INGRESS, 64));

    for i in 0..32u8 {
        create_ipv4(&port, 0, OpAttr::POSTPONE, tbl.id, i, u64::from(i))
            .unwrap();
    }
    assert_eq!(port.dump_queues()[0].inflight, 32);
    assert_eq!(port.dump_queues()[0].pending, 32);
    assert_eq!(port.engine().held(0), 32);

    let before = port.stats();
    let err = create_ipv4(&port, 0, OpAttr::POSTPONE, tbl.id, 32, 32);
    assert_eq!(err, Err(FlowError::QueueFull { queue: 0 }));
    assert!(err.unwrap_err().is_retryable());
    // The refused create took nothing.
    assert_stats!(port, before, [queue_full += 1]);
    assert_eq!(port.pools().counters().unwrap().live(), 32);

    // Nothing completes before the doorbell.
    assert!(port.pull(0, 64).unwrap().is_empty());

    port.push(0).unwrap();
    let res = port.pull(0, 64).unwrap();
    assert_eq!(res.len(), 32);
    assert_all_ok!(res);
    let tokens: Vec<_> = res.iter().map(|r| r.user_data).collect();
    assert_eq!(tokens, (0..32).collect::<Vec<u64>>());

    let fh =
        create_ipv4(&port, 0, OpAttr::POSTPONE, tbl.id, 32, 32).unwrap();
    assert_eq!(drain_ok(&port, 0), vec![32]);
    assert_eq!(port.flow_state(fh), Some(FlowState::Live));
    assert_eq!(port.engine().rule_count(), 33);
}

// Growing a table from 16 to 64 rules while a rule is inserted in
// between; every rule stays usable once the resize completes.
#[test]
fn resize_in_place() {
    let port = default_port();
    let attr = TableAttr::new(1, FlowDir::INGRESS, 16).resizable();
    let tbl = count_drop_table(&port, attr);
    let t = port.table_ref(tbl.id).unwrap();

    let old = create_ipv4(&port, 0, OpAttr::NOW, tbl.id, 1, 1).unwrap();
    drain_ok(&port, 0);
    let old_matcher = t.matcher(t.selector()).unwrap();

    port.table_resize(tbl.id, 64).unwrap();
    assert_eq!(t.state(), TableState::Resizing);
    assert_eq!(t.capacity(), 64);
    // At most one resize at a time, and a failed one changes nothing.
    assert_eq!(
        port.table_resize(tbl.id, 128),
        Err(FlowError::ResizeInProgress)
    );
    assert_eq!(t.capacity(), 64);

    let new_matcher = t.matcher(t.selector()).unwrap();
    assert_ne!(old_matcher, new_matcher);

    // Inserted while the resize is pending: straight into the new
    // matcher.
    let fresh = create_ipv4(&port, 0, OpAttr::NOW, tbl.id, 2, 2).unwrap();
    drain_ok(&port, 0);
    let rule = port.flow_rule(fresh).unwrap();
    assert_eq!(port.engine().rule(rule).unwrap().matcher, new_matcher);

    // The old matcher still holds a rule.
    assert!(matches!(
        port.table_resize_complete(tbl.id),
        Err(FlowError::InUse(_))
    ));

    port.async_update_resized(0, OpAttr::NOW, old, 3).unwrap();
    assert_eq!(port.flow_state(old), Some(FlowState::Moving));
    // Already in place; completes without touching the engine.
    port.async_update_resized(0, OpAttr::NOW, fresh, 4).unwrap();
    assert_eq!(drain_ok(&port, 0), vec![3, 4]);

    let rule = port.flow_rule(old).unwrap();
    assert_eq!(port.engine().rule(rule).unwrap().matcher, new_matcher);
    assert_eq!(port.engine().matcher_rules(old_matcher), 0);

    port.table_resize_complete(tbl.id).unwrap();
    assert_eq!(t.state(), TableState::Bound);
    assert_eq!(t.matcher(1 - t.selector()), None);

    // Both rules can be queried and destroyed.
    assert!(port.engine().hit_rule(rule, 5, 300));
    assert_eq!(
        port.query(old, QueryAction::Count { reset: false }),
        Ok(QueryData::Count { hits: 5, bytes: 300 })
    );
    assert_eq!(
        port.query(fresh, QueryAction::Count { reset: false }),
        Ok(QueryData::Count { hits: 0, bytes: 0 })
    );

    port.async_destroy(0, OpAttr::NOW, old, 5).unwrap();
    port.async_destroy(0, OpAttr::NOW, fresh, 6).unwrap();
    assert_eq!(drain_ok(&port, 0), vec![5, 6]);
    assert_eq!(port.flow_state(old), None);
    assert_eq!(port.flow_state(fresh), None);
    assert_eq!(port.engine().rule_count(), 0);
    assert_eq!(port.pools().counters().unwrap().live(), 0);

    drop(t);
    port.table_destroy(tbl.id).unwrap();
}
