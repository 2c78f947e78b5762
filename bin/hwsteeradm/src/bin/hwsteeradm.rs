// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use std::io;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

use hwsteer::api::API_VERSION;
use hwsteer::api::FlowDir;
use hwsteer::api::TableAttr;
use hwsteer::engine::port::Port;
use hwsteer::engine::soft::SoftEngine;
use hwsteer::print::print_pools;
use hwsteer::print::print_queues;
use hwsteer::print::print_results;
use hwsteer::print::print_stats;
use hwsteer::print::print_tables;
use hwsteer::print::print_templates;
use hwsteer::print::write_hrb;
use hwsteeradm::SlogLog;
use hwsteeradm::load_config;
use hwsteeradm::logger;
use hwsteeradm::open_port;
use hwsteeradm::run::RunOpts;
use hwsteeradm::run::install;
use hwsteeradm::run::remove;
use hwsteeradm::scenario::Scenario;

/// Administer a flow-steering port backed by the software engine
#[derive(Debug, Parser)]
#[command(version = hwsteer_pkg_version())]
struct Cli {
    /// Port configuration (TOML); missing fields take their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log engine notes, not just warnings and errors.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective port configuration.
    ShowConfig,

    /// Fill a table with IPv4 count-and-drop rules and dump the port.
    Run {
        /// The table's group.
        #[arg(long, default_value_t = 1)]
        group: u32,

        #[arg(long = "dir", default_value = "ingress")]
        direction: FlowDir,

        /// The table's rule capacity.
        #[arg(long, default_value_t = 1024)]
        capacity: u32,

        /// Let the table be resized.
        #[arg(long)]
        resizable: bool,

        /// The number of rules to install.
        #[arg(short, long, default_value_t = 64)]
        rules: u32,

        /// The flow queue to submit on.
        #[arg(short, long, default_value_t = 0)]
        queue: u16,

        /// Postpone submissions, ringing the doorbell once per burst.
        #[arg(long, default_value_t = 16)]
        burst: u32,

        /// Remove everything again before dumping the port.
        #[arg(long)]
        remove: bool,

        /// Print every completion pulled.
        #[arg(long)]
        results: bool,
    },

    /// Run a canned scenario on a fresh port.
    Scenario {
        #[arg(value_enum)]
        name: Option<Scenario>,

        /// Run every scenario, each on its own port.
        #[arg(long, conflicts_with = "name")]
        all: bool,
    },
}

fn hwsteer_pkg_version() -> String {
    format!("{} (API {API_VERSION})", env!("CARGO_PKG_VERSION"))
}

fn dump_port(port: &Port<SoftEngine>) -> io::Result<()> {
    let mut out = io::stdout();
    writeln!(out, "Tables")?;
    write_hrb(&mut out)?;
    print_tables(&port.dump_tables())?;
    writeln!(out, "\nTemplates")?;
    write_hrb(&mut out)?;
    print_templates(&port.dump_templates())?;
    writeln!(out, "\nPools")?;
    write_hrb(&mut out)?;
    print_pools(&port.dump_pools())?;
    writeln!(out, "\nQueues")?;
    write_hrb(&mut out)?;
    print_queues(&port.dump_queues())?;
    writeln!(out, "\nStats")?;
    write_hrb(&mut out)?;
    print_stats(&port.stats())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;
    let log = logger(cli.verbose);

    match cli.cmd {
        Command::ShowConfig => {
            print!("{}", toml::to_string(&cfg)?);
        }

        Command::Run {
            group,
            direction,
            capacity,
            resizable,
            rules,
            queue,
            burst,
            remove: remove_after,
            results,
        } => {
            let mut table = TableAttr::new(group, direction, capacity);
            table.resizable = resizable;
            let opts = RunOpts { table, rules, queue, burst };

            let mut port = open_port(cfg, SlogLog::new(log.clone()))?;
            let mut batch = install(&port, &opts)?;
            if remove_after {
                remove(&port, &opts, &mut batch)?;
            }

            if results {
                print_results(queue, &batch.results)?;
                println!();
            }
            dump_port(&port)?;
            port.shutdown();

            let failed = batch.failed();
            if failed > 0 {
                anyhow::bail!("{failed} operations failed");
            }
        }

        Command::Scenario { name, all } => {
            let scenarios = match (name, all) {
                (Some(s), _) => vec![s],
                (None, true) => Scenario::ALL.to_vec(),
                (None, false) => {
                    anyhow::bail!("name a scenario or pass --all")
                }
            };

            for s in scenarios {
                let mut port =
                    open_port(cfg.clone(), SlogLog::new(log.clone()))?;
                println!("Scenario {s:?}");
                write_hrb(&mut io::stdout())?;
                s.run(&port, &mut io::stdout())?;
                println!();
                print_stats(&port.stats())?;
                println!();
                port.shutdown();
            }
        }
    }

    Ok(())
}
