// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Properties that hold across the port's operations: conservation of
//! references and resources, ordering, and all-or-nothing failure.

use common::*;
use hwsteer::engine::pool::aso::AsoState;
use hwsteer_test_utils as common;

fn age_count_drop(timeout: u32, context: Option<u64>) -> Vec<Action> {
    vec![
        Action::Count { id: 0 },
        Action::Age { timeout, context },
        Action::Drop,
    ]
}

fn age_count_table(port: &Port<SoftEngine>, attr: TableAttr) -> TestTable {
    table(
        port,
        attr,
        &eth_ipv4(),
        &[
            ActionSpec::per_rule(Action::Count { id: 0 }),
            ActionSpec::per_rule(Action::Age { timeout: 0, context: None }),
            ActionSpec::fixed(Action::Drop),
        ],
    )
}

fn create_with(
    port: &Port<SoftEngine>,
    queue: u16,
    table: TableId,
    last: u8,
    actions: &[Action],
) -> FlowHandle {
    let items = ipv4_items(last);
    let spec = RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions };
    port.async_create(queue, OpAttr::NOW, table, &spec, u64::from(last))
        .unwrap()
}

#[test]
fn templates_unchanged_by_use() {
    let port = default_port();
    let tbl = count_drop_table(&port, TableAttr::new(1, FlowDir::INGRESS, 8));
    let before = port.dump_templates();

    let fh = create_ipv4(&port, 0, OpAttr::NOW, tbl.id, 1, 1).unwrap();
    drain_ok(&port, 0);
    let tbl2 = port
        .table_create(TableAttr::new(2, FlowDir::INGRESS, 8), &[tbl.pt], &[
            tbl.at,
        ])
        .unwrap();

    let after = port.dump_templates();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!((b.kind, b.id, b.len), (a.kind, a.id, a.len));
        assert_eq!(b.digest, a.digest);
        assert_eq!(b.flags, a.flags);
        assert_eq!(a.refcnt, b.refcnt + 1);
    }

    port.async_destroy(0, OpAttr::NOW, fh, 2).unwrap();
    drain_ok(&port, 0);
    port.table_destroy(tbl2).unwrap();
    assert_eq!(port.dump_templates(), before);
}

#[test]
fn template_refcount_follows_tables() {
    let port = default_port();
    let tbl = count_drop_table(&port, TableAttr::new(1, FlowDir::INGRESS, 8));
    let pt = port.pattern_template(tbl.pt).unwrap();
    let at = port.actions_template(tbl.at).unwrap();
    assert_eq!(pt.refcnt(), 2);

    let more: Vec<_> = (2..5)
        .map(|g| {
            let attr = TableAttr::new(g, FlowDir::INGRESS, 8);
            port.table_create(attr, &[tbl.pt], &[tbl.at]).unwrap()
        })
        .collect();
    assert_eq!(pt.refcnt(), 5);
    assert_eq!(at.refcnt(), 5);

    // A failed table takes no reference.
    let egress = TableAttr::new(1, FlowDir::EGRESS, 8);
    assert!(matches!(
        port.table_create(egress, &[tbl.pt], &[tbl.at]),
        Err(FlowError::InvalidAttr(_))
    ));
    assert_eq!(pt.refcnt(), 5);

    for id in more {
        port.table_destroy(id).unwrap();
    }
    assert_eq!(pt.refcnt(), 2);
    assert_eq!(at.refcnt(), 2);
}

#[test]
fn completions_in_submission_order_per_queue() {
    let port = default_port();
    let tbl = count_drop_table(&port, TableAttr::new(1, FlowDir::INGRESS, 64));

    for i in 0..16u8 {
        let queue = u16::from(i % 2);
        create_ipv4(&port, queue, OpAttr::POSTPONE, tbl.id, i, u64::from(i))
            .unwrap();
    }
    port.push(0).unwrap();
    port.push(1).unwrap();

    // A bounded pull takes the oldest first.
    let head: Vec<_> =
        port.pull(1, 3).unwrap().iter().map(|r| r.user_data).collect();
    assert_eq!(head, vec![1, 3, 5]);
    assert_eq!(drain_ok(&port, 1), vec![7, 9, 11, 13, 15]);
    assert_eq!(drain_ok(&port, 0), vec![0, 2, 4, 6, 8, 10, 12, 14]);
}

#[test]
fn resources_return_to_their_pools() {
    let port = default_port();
    let tbl = age_count_table(&port, TableAttr::new(1, FlowDir::INGRESS, 32));
    let before = port.dump_pools();

    let flows: Vec<_> = (0..10u8)
        .map(|i| create_with(&port, 0, tbl.id, i, &age_count_drop(30, None)))
        .collect();
    drain_ok(&port, 0);
    assert_eq!(port.pools().counters().unwrap().live(), 10);
    assert_eq!(port.pools().ages().unwrap().live(), 10);
    for fh in &flows {
        assert_eq!(
            port.flow_flags(*fh),
            Some(FlowFlags::COUNTER | FlowFlags::AGE)
        );
    }

    for fh in &flows {
        port.async_destroy(0, OpAttr::NOW, *fh, 0).unwrap();
    }
    drain_ok(&port, 0);
    assert_eq!(port.dump_pools(), before);
    assert_eq!(port.table_ref(tbl.id).unwrap().live_rules(), 0);
}

#[test]
fn engine_failure_leaves_nothing_behind() {
    let port = default_port();
    let tattr = TemplateAttr::new(FlowDir::INGRESS);
    let pt = port.pattern_template_create(tattr, &eth_ipv4()).unwrap();
    let at = port
        .actions_template_create(tattr, &[
            ActionSpec::per_rule(Action::Count { id: 0 }),
            ActionSpec::fixed(Action::Drop),
        ])
        .unwrap();
    let objects = port.engine().object_count();
    let before = port.stats();

    port.engine().fail_next(SoftOp::MatcherCreate, -libc::ENOMEM);
    let attr = TableAttr::new(1, FlowDir::INGRESS, 8);
    let err = port.table_create(attr, &[pt], &[at]).unwrap_err();
    assert_eq!(err.status(), -libc::ENOMEM);
    assert_eq!(port.engine().object_count(), objects);
    assert_eq!(port.pattern_template(pt).unwrap().refcnt(), 1);
    assert!(port.dump_tables().is_empty());

    // The same table builds once the engine recovers; a refused rule
    // leaves the pools as they were.
    let tbl = port.table_create(attr, &[pt], &[at]).unwrap();
    port.engine().fail_next(SoftOp::RuleCreate, -libc::EBUSY);
    let res = create_ipv4(&port, 0, OpAttr::NOW, tbl, 1, 1);
    assert_eq!(res.map_err(|e| e.status()), Err(-libc::EBUSY));
    assert_eq!(port.pools().counters().unwrap().live(), 0);
    assert_eq!(port.dump_queues()[0].inflight, 0);
    assert_stats!(port, before, [hw_error += 1]);
}

#[test]
fn age_shares_the_rule_counter() {
    let port = default_port();
    let tbl = age_count_table(&port, TableAttr::new(1, FlowDir::INGRESS, 8));
    let fh = create_with(&port, 0, tbl.id, 1, &age_count_drop(5, Some(77)));
    drain_ok(&port, 0);

    // One counter, tagged with the rule's aging record.
    let rule = port.engine().rule(port.flow_rule(fh).unwrap()).unwrap();
    let counters = rule
        .actions
        .iter()
        .filter(|a| a.kind == HwActionKind::Counter)
        .count();
    assert_eq!(counters, 1);
    assert_eq!(port.pools().counters().unwrap().live(), 1);
    assert_eq!(
        port.query(fh, QueryAction::Age),
        Ok(QueryData::Age { aged: false, sec_since_last_hit: 0, timeout: 5 })
    );

    // Traffic restarts the timer.
    assert!(port.engine().hit_rule(port.flow_rule(fh).unwrap(), 1, 60));
    assert_eq!(port.age_scan(3), Ok(0));
    assert_eq!(port.age_scan(3), Ok(0));
    assert_eq!(port.get_aged_flows(0, 8), Ok(vec![]));
    assert_eq!(port.age_scan(3), Ok(1));

    assert_eq!(port.get_aged_flows(0, 8), Ok(vec![77]));
    assert_eq!(port.get_aged_flows(0, 8), Ok(vec![]));
    assert!(matches!(
        port.query(fh, QueryAction::Age),
        Ok(QueryData::Age { aged: true, .. })
    ));
    assert_eq!(port.stats().aged, 1);
}

#[test]
fn aged_lists_per_queue_when_strict() {
    for strict in [false, true] {
        let cfg = PortConfig { strict_queue: strict, ..Default::default() };
        let port = port(cfg);
        let tbl =
            age_count_table(&port, TableAttr::new(1, FlowDir::INGRESS, 8));
        create_with(&port, 1, tbl.id, 1, &age_count_drop(5, Some(11)));
        drain_ok(&port, 1);
        assert_eq!(port.age_scan(10), Ok(1));

        if strict {
            assert_eq!(port.get_aged_flows(0, 8), Ok(vec![]));
            assert_eq!(port.get_aged_flows(1, 8), Ok(vec![11]));
        } else {
            assert_eq!(port.get_aged_flows(0, 8), Ok(vec![11]));
            assert_eq!(port.get_aged_flows(1, 8), Ok(vec![]));
        }
    }
}

#[test]
fn root_group_restrictions() {
    let port = port(PortConfig { repr_matching: true, ..Default::default() });
    let tattr = TemplateAttr::new(FlowDir::INGRESS | FlowDir::EGRESS);
    let pt = port.pattern_template_create(tattr, &eth_ipv4()).unwrap();
    let aging = port
        .actions_template_create(tattr, &[
            ActionSpec::per_rule(Action::Age { timeout: 0, context: None }),
            ActionSpec::fixed(Action::Drop),
        ])
        .unwrap();
    let drop = port
        .actions_template_create(tattr, &[ActionSpec::fixed(Action::Drop)])
        .unwrap();

    let root = TableAttr::new(0, FlowDir::INGRESS, 8);
    assert!(matches!(
        port.table_create(root, &[pt], &[aging]),
        Err(FlowError::Unsupported(_))
    ));
    assert!(matches!(
        port.table_create(root.resizable(), &[pt], &[drop]),
        Err(FlowError::InvalidAttr(_))
    ));
    assert!(matches!(
        port.table_create(
            root.insertion(InsertionType::Index),
            &[pt],
            &[drop]
        ),
        Err(FlowError::InvalidAttr(_))
    ));
    port.table_create(root, &[pt], &[drop]).unwrap();

    // Egress group 0 is shifted past the represented-port root.
    let egress = TableAttr::new(0, FlowDir::EGRESS, 8);
    let tbl = port.table_create(egress, &[pt], &[aging]).unwrap();
    let dump = port.dump_tables();
    let eg = dump.iter().find(|t| t.id == tbl).unwrap();
    assert_eq!((eg.group, eg.hw_group), (0, 1));
}

#[test]
fn encap_data_per_rule() {
    let port = default_port();
    let tbl = table(
        &port,
        TableAttr::new(1, FlowDir::INGRESS, 8),
        &eth_ipv4(),
        &[
            ActionSpec::fixed(Action::RawDecap { size: 14 }),
            ActionSpec::per_rule(Action::RawEncap { data: vec![0; 50] }),
            ActionSpec::fixed(Action::Drop),
        ],
    );

    let short = [
        Action::RawDecap { size: 14 },
        Action::RawEncap { data: vec![1; 40] },
        Action::Drop,
    ];
    let items = ipv4_items(1);
    let spec =
        RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions: &short };
    assert!(matches!(
        port.async_create(0, OpAttr::NOW, tbl.id, &spec, 1),
        Err(FlowError::InvalidAction { index: 1, .. })
    ));
    assert_eq!(port.table_ref(tbl.id).unwrap().live_rules(), 0);

    let encap = vec![7; 50];
    let acts = [
        Action::RawDecap { size: 14 },
        Action::RawEncap { data: encap.clone() },
        Action::Drop,
    ];
    let fh = create_with(&port, 0, tbl.id, 2, &acts);
    drain_ok(&port, 0);

    // Decap and encap fuse into a single L2-to-L3-tunnel reformat.
    let rule = port.engine().rule(port.flow_rule(fh).unwrap()).unwrap();
    let kinds: Vec<_> = rule.actions.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![HwActionKind::Encap, HwActionKind::Drop]);
    assert!(matches!(
        &rule.actions[0].arg,
        RuleActionArg::Data { data, .. } if *data == encap
    ));
}

#[test]
fn push_vlan_per_rule() {
    let port = default_port();
    let tbl = table(
        &port,
        TableAttr::new(1, FlowDir::INGRESS, 8),
        &eth_ipv4(),
        &[
            ActionSpec::per_rule(Action::PushVlan {
                ethertype: 0x8100,
                vid: 0,
                pcp: 0,
            }),
            ActionSpec::fixed(Action::Drop),
        ],
    );
    let acts =
        [Action::PushVlan { ethertype: 0x8100, vid: 42, pcp: 2 }, Action::Drop];
    let fh = create_with(&port, 0, tbl.id, 1, &acts);
    drain_ok(&port, 0);

    let rule = port.engine().rule(port.flow_rule(fh).unwrap()).unwrap();
    let kinds: Vec<_> = rule.actions.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            HwActionKind::PushVlan,
            HwActionKind::ModifyHeader,
            HwActionKind::Drop
        ]
    );
    assert_eq!(rule.actions[0].arg, RuleActionArg::VlanHdr(0x8100_402A));
}

#[test]
fn push_vlan_from_template() {
    let port = default_port();
    let push = Action::PushVlan { ethertype: 0x8100, vid: 42, pcp: 2 };
    let tbl = table(
        &port,
        TableAttr::new(1, FlowDir::INGRESS, 8),
        &eth_ipv4(),
        &[ActionSpec::fixed(push.clone()), ActionSpec::fixed(Action::Drop)],
    );
    let fh = create_with(&port, 0, tbl.id, 1, &[push, Action::Drop]);
    assert_eq!(drain_ok(&port, 0), vec![1]);

    let rule = port.engine().rule(port.flow_rule(fh).unwrap()).unwrap();
    let kinds: Vec<_> = rule.actions.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            HwActionKind::PushVlan,
            HwActionKind::ModifyHeader,
            HwActionKind::Drop
        ]
    );
    assert_eq!(rule.actions[0].arg, RuleActionArg::VlanHdr(0x8100_402A));
    assert_ne!(rule.actions[0].obj, rule.actions[1].obj);
}

#[test]
fn shared_aso_actions_return_to_their_pools() {
    let port = default_port();
    let profile = MeterProfileId(1);
    port.meter_profile_add(profile, MeterProfile {
        cir: 1_000_000,
        cbs: 4096,
        ebs: 0,
    })
    .unwrap();
    let meters = port.pools().meters().unwrap();
    let cts = port.pools().cts().unwrap();
    let (meters_live, cts_live) = (meters.live(), cts.live());

    let meter = port
        .indirect_action_create(&IndirectActionConf::MeterMark(
            MeterMarkConf::new(profile),
        ))
        .unwrap();
    let ct = port
        .indirect_action_create(&IndirectActionConf::Conntrack(
            CtProfile::default(),
        ))
        .unwrap();
    assert_eq!(meters.refcnt(meter.index), 1);
    assert_eq!(cts.refcnt(ct.index), 1);

    let tbl = table(
        &port,
        TableAttr::new(1, FlowDir::INGRESS, 16),
        &eth_ipv4(),
        &[
            ActionSpec::per_rule(Action::Indirect(meter)),
            ActionSpec::per_rule(Action::Indirect(ct)),
            ActionSpec::fixed(Action::Drop),
        ],
    );
    let acts = [Action::Indirect(meter), Action::Indirect(ct), Action::Drop];
    let flows: Vec<_> =
        (0..5u8).map(|i| create_with(&port, 0, tbl.id, i, &acts)).collect();
    drain_ok(&port, 0);
    assert_eq!(meters.refcnt(meter.index), 6);
    assert_eq!(cts.refcnt(ct.index), 6);
    assert_eq!(meters.live(), meters_live + 1);
    assert_eq!(cts.live(), cts_live + 1);
    assert!(matches!(
        port.indirect_action_destroy(ct),
        Err(FlowError::InUse(_))
    ));

    for (i, fh) in flows.iter().enumerate() {
        port.async_destroy(0, OpAttr::NOW, *fh, i as u64).unwrap();
    }
    drain_ok(&port, 0);
    assert_eq!(meters.refcnt(meter.index), 1);
    assert_eq!(cts.refcnt(ct.index), 1);
    assert_eq!(port.pools().profiles.refcnt(profile), Some(1));

    port.indirect_action_destroy(meter).unwrap();
    port.indirect_action_destroy(ct).unwrap();
    assert_eq!(meters.live(), meters_live);
    assert_eq!(cts.live(), cts_live);
    assert_eq!(port.pools().profiles.refcnt(profile), Some(0));
}

#[test]
fn stale_meter_init_ignored_after_reuse() {
    // A single meter, so the second rule reuses the first one's.
    let port = port(PortConfig { nb_meters: 1, ..Default::default() });
    let profile = MeterProfileId(1);
    port.meter_profile_add(profile, MeterProfile {
        cir: 1_000_000,
        cbs: 4096,
        ebs: 0,
    })
    .unwrap();
    let conf = MeterMarkConf::new(profile);
    let tbl = table(
        &port,
        TableAttr::new(1, FlowDir::INGRESS, 8),
        &eth_ipv4(),
        &[
            ActionSpec::per_rule(Action::MeterMark(conf)),
            ActionSpec::fixed(Action::Drop),
        ],
    );
    let acts = [Action::MeterMark(conf), Action::Drop];
    let meters = port.pools().meters().unwrap();

    // The first rule is refused after its meter init was queued; the
    // init stays held in the engine.
    port.engine().fail_next(SoftOp::RuleCreate, -libc::EBUSY);
    let items = ipv4_items(1);
    let spec = RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions: &acts };
    assert!(port.async_create(0, OpAttr::POSTPONE, tbl.id, &spec, 1).is_err());
    assert_eq!(meters.live(), 0);

    let items = ipv4_items(2);
    let spec = RuleSpec { pt_idx: 0, items: &items, at_idx: 0, actions: &acts };
    port.async_create(0, OpAttr::POSTPONE, tbl.id, &spec, 2).unwrap();
    assert_eq!(meters.live(), 1);
    assert_eq!(meters.state(1), AsoState::WaitInit);

    // The stale init succeeds; the second rule's own init fails.
    port.engine().fail_nth(SoftOp::Completion, 2, -libc::EIO);
    assert_eq!(drain_ok(&port, 0), vec![2]);
    assert_eq!(meters.state(1), AsoState::Error);
}

#[test]
fn direct_meter_init_stays_internal() {
    let port = default_port();
    let profile = MeterProfileId(1);
    port.meter_profile_add(profile, MeterProfile {
        cir: 1_000_000,
        cbs: 4096,
        ebs: 0,
    })
    .unwrap();
    let conf = MeterMarkConf::new(profile);
    let tbl = table(
        &port,
        TableAttr::new(1, FlowDir::INGRESS, 8),
        &eth_ipv4(),
        &[
            ActionSpec::per_rule(Action::MeterMark(conf)),
            ActionSpec::fixed(Action::Drop),
        ],
    );

    let fh = create_with(&port, 0, tbl.id, 1, &[
        Action::MeterMark(conf),
        Action::Drop,
    ]);
    // Only the rule's own completion surfaces.
    assert_eq!(drain_ok(&port, 0), vec![1]);
    assert_eq!(port.pools().meters().unwrap().live(), 1);
    assert_eq!(port.pools().profiles.refcnt(profile), Some(1));
    assert!(matches!(
        port.meter_profile_delete(profile),
        Err(FlowError::InUse(_))
    ));

    port.async_destroy(0, OpAttr::NOW, fh, 2).unwrap();
    assert_eq!(drain_ok(&port, 0), vec![2]);
    assert_eq!(port.pools().meters().unwrap().live(), 0);
    port.meter_profile_delete(profile).unwrap();
}

#[test]
fn flush_and_shutdown() {
    let mut port = default_port();
    let tbl = count_drop_table(&port, TableAttr::new(1, FlowDir::INGRESS, 16));
    for i in 0..4 {
        create_ipv4(&port, 0, OpAttr::NOW, tbl.id, i, u64::from(i)).unwrap();
    }
    drain_ok(&port, 0);
    assert_eq!(port.flush(), Ok(4));
    assert_eq!(port.engine().rule_count(), 0);
    assert_eq!(port.dump_tables()[0].rules, 0);

    port.shutdown();
    assert_eq!(port.engine().object_count(), 0);
}
