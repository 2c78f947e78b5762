// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Administration library for ports backed by the software steering
//! engine.

use anyhow::Context;
use hwsteer::ExecCtx;
use hwsteer::api::PortConfig;
use hwsteer::engine::port::Port;
use hwsteer::engine::soft::SoftEngine;
use hwsteer::provider::LogLevel;
use hwsteer::provider::LogProvider;
use slog::Drain;
use slog::Level;
use slog::LevelFilter;
use slog::Logger;
use slog::o;
use std::path::Path;

pub mod run;
pub mod scenario;

/// Hands engine messages to a [`slog::Logger`].
#[derive(Clone)]
pub struct SlogLog(Logger);

impl SlogLog {
    pub fn new(log: Logger) -> Self {
        Self(log)
    }
}

impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => slog::info!(self.0, "{}", msg),
            LogLevel::Warn => slog::warn!(self.0, "{}", msg),
            LogLevel::Error => slog::error!(self.0, "{}", msg),
        }
    }
}

/// Build the terminal logger used by hwsteeradm. Engine notes are
/// only shown when `verbose` is set.
pub fn logger(verbose: bool) -> Logger {
    let level = if verbose { Level::Info } else { Level::Warning };
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = LevelFilter::new(drain, level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "hwsteer"))
}

/// Parse a port configuration. Missing fields take their defaults.
pub fn parse_config(s: &str) -> anyhow::Result<PortConfig> {
    toml::from_str(s).context("invalid port configuration")
}

/// Load the port configuration at `path`, or the default
/// configuration when there is none.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PortConfig> {
    let Some(path) = path else {
        return Ok(PortConfig::default());
    };

    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_config(&s).with_context(|| format!("in {}", path.display()))
}

/// Configure a port over a fresh [`SoftEngine`].
pub fn open_port(
    cfg: PortConfig,
    log: impl LogProvider + 'static,
) -> anyhow::Result<Port<SoftEngine>> {
    let port_id = cfg.port_id;
    Port::configure(SoftEngine::new(), cfg, ExecCtx::new(log))
        .with_context(|| format!("failed to configure port {port_id}"))
}

#[cfg(test)]
mod test {
    use super::*;
    use hwsteer::provider::NullLog;

    #[test]
    fn partial_config() {
        let cfg = parse_config("queue_size = 32\ndefault_rules = false\n")
            .unwrap();
        assert_eq!(cfg.queue_size, 32);
        assert!(!cfg.default_rules);
        assert_eq!(cfg.nb_queues, PortConfig::default().nb_queues);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = PortConfig { nb_counters: 8, ..Default::default() };
        let s = toml::to_string(&cfg).unwrap();
        assert_eq!(parse_config(&s).unwrap(), cfg);
    }

    #[test]
    fn bad_config_rejected() {
        assert!(parse_config("queue_size = \"lots\"\n").is_err());
        assert!(load_config(Some(Path::new("/nonexistent/port.toml")))
            .is_err());
        assert_eq!(load_config(None).unwrap(), PortConfig::default());
    }

    #[test]
    fn zero_queues_refused() {
        let cfg = PortConfig { nb_queues: 0, ..Default::default() };
        let err = open_port(cfg, NullLog).err().unwrap();
        assert!(err.to_string().contains("port 0"));
    }
}
