// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print port dumps in human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both hwsteeradm and integration tests.

use crate::api::OpResult;
use crate::api::PoolDump;
use crate::api::QueryData;
use crate::api::QueueDump;
use crate::api::TableDump;
use crate::api::TemplateDump;
use crate::engine::stat::PortStatsSnapshot;
use itertools::Itertools;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a list of [`TableDump`].
pub fn print_tables(tables: &[TableDump]) -> std::io::Result<()> {
    print_tables_into(&mut std::io::stdout(), tables)
}

/// Print a list of [`TableDump`] into a given writer.
pub fn print_tables_into(
    writer: &mut impl Write,
    tables: &[TableDump],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(
        t,
        "ID\tGROUP\tHW GROUP\tDIR\tSTATE\tRULES\tCAPACITY\tRESIZES\t\
         TEMPLATES"
    )?;

    for tbl in tables {
        let templates = tbl
            .pattern_templates
            .iter()
            .map(ToString::to_string)
            .chain(tbl.actions_templates.iter().map(ToString::to_string))
            .join(",");
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            tbl.id,
            tbl.group,
            tbl.hw_group,
            tbl.dir,
            tbl.state,
            tbl.rules,
            tbl.capacity,
            tbl.resizes,
            templates,
        )?;
    }
    t.flush()
}

/// Print a list of [`TemplateDump`].
pub fn print_templates(templates: &[TemplateDump]) -> std::io::Result<()> {
    print_templates_into(&mut std::io::stdout(), templates)
}

/// Print a list of [`TemplateDump`] into a given writer.
pub fn print_templates_into(
    writer: &mut impl Write,
    templates: &[TemplateDump],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "KIND\tID\tDIR\tREFCNT\tLEN\tDIGEST\tFLAGS")?;

    for tmpl in templates {
        let flags = if tmpl.flags.is_empty() { "--" } else { &tmpl.flags };
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{:08x}\t{}",
            tmpl.kind,
            tmpl.id,
            tmpl.dir,
            tmpl.refcnt,
            tmpl.len,
            tmpl.digest,
            flags,
        )?;
    }
    t.flush()
}

/// Print a list of [`PoolDump`].
pub fn print_pools(pools: &[PoolDump]) -> std::io::Result<()> {
    print_pools_into(&mut std::io::stdout(), pools)
}

/// Print a list of [`PoolDump`] into a given writer.
pub fn print_pools_into(
    writer: &mut impl Write,
    pools: &[PoolDump],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "POOL\tLIVE\tCAPACITY")?;
    for pool in pools {
        // Unbounded pools report no capacity.
        let cap = match pool.capacity {
            0 => "--".to_string(),
            n => n.to_string(),
        };
        writeln!(t, "{}\t{}\t{}", pool.name, pool.live, cap)?;
    }
    t.flush()
}

/// Print a list of [`QueueDump`].
pub fn print_queues(queues: &[QueueDump]) -> std::io::Result<()> {
    print_queues_into(&mut std::io::stdout(), queues)
}

/// Print a list of [`QueueDump`] into a given writer. The last queue
/// is the control queue.
pub fn print_queues_into(
    writer: &mut impl Write,
    queues: &[QueueDump],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "QUEUE\tSIZE\tINFLIGHT\tPENDING")?;
    for (i, q) in queues.iter().enumerate() {
        let name = if i + 1 == queues.len() {
            format!("{} (ctrl)", q.queue)
        } else {
            q.queue.to_string()
        };
        writeln!(t, "{}\t{}\t{}\t{}", name, q.size, q.inflight, q.pending)?;
    }
    t.flush()
}

/// Print a [`PortStatsSnapshot`].
pub fn print_stats(stats: &PortStatsSnapshot) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), stats)
}

/// Print a [`PortStatsSnapshot`] into a given writer.
pub fn print_stats_into(
    writer: &mut impl Write,
    stats: &PortStatsSnapshot,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "STAT\tVALUE")?;
    for (name, val) in stats.fields() {
        writeln!(t, "{name}\t{val}")?;
    }
    t.flush()
}

/// Print the completions returned by a `pull`.
pub fn print_results(queue: u16, results: &[OpResult]) -> std::io::Result<()> {
    print_results_into(&mut std::io::stdout(), queue, results)
}

/// Print the completions returned by a `pull` into a given writer.
pub fn print_results_into(
    writer: &mut impl Write,
    queue: u16,
    results: &[OpResult],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "QUEUE\tUSER DATA\tSTATUS\tQUERY")?;
    for res in results {
        let query = match &res.query {
            None => "--".to_string(),
            Some(q) => fmt_query(q),
        };
        writeln!(t, "{queue}\t{:#x}\t{}\t{query}", res.user_data, res.status)?;
    }
    t.flush()
}

fn fmt_query(q: &QueryData) -> String {
    match q {
        QueryData::Count { hits, bytes } => {
            format!("hits={hits} bytes={bytes}")
        }
        QueryData::Age { aged, sec_since_last_hit, timeout } => {
            format!("aged={aged} idle={sec_since_last_hit}/{timeout}s")
        }
        QueryData::MeterMark { ready, enabled } => {
            format!("ready={ready} enabled={enabled}")
        }
        QueryData::Conntrack(ct) => {
            format!("{:?} peer_port={}", ct.state, ct.peer_port)
        }
    }
}

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
