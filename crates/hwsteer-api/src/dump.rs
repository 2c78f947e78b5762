// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Operation results and state dumps.

use super::ActionsTemplateId;
use super::CtProfile;
use super::FlowDir;
use super::PatternTemplateId;
use super::TableId;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OpStatus {
    Success,
    Error,
}

impl Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Success => write!(f, "OK"),
            Self::Error => write!(f, "ERR"),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum QueryData {
    Count { hits: u64, bytes: u64 },
    Age { aged: bool, sec_since_last_hit: u32, timeout: u32 },
    MeterMark { ready: bool, enabled: bool },
    Conntrack(CtProfile),
}

/// A single completion returned by `pull`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OpResult {
    pub status: OpStatus,

    /// The caller's correlation token, as given at submission.
    pub user_data: u64,

    /// Data produced by an asynchronous query.
    pub query: Option<QueryData>,
}

impl OpResult {
    pub fn is_ok(&self) -> bool {
        self.status == OpStatus::Success
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableDump {
    pub id: TableId,
    pub group: u32,
    pub hw_group: u32,
    pub dir: FlowDir,
    pub capacity: u32,
    pub state: String,
    pub selector: u8,
    pub rules: u32,
    pub resizes: u32,
    pub pattern_templates: Vec<PatternTemplateId>,
    pub actions_templates: Vec<ActionsTemplateId>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TemplateKind {
    Pattern,
    Actions,
}

impl Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Pattern => write!(f, "pattern"),
            Self::Actions => write!(f, "actions"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TemplateDump {
    pub kind: TemplateKind,
    pub id: u32,
    pub dir: FlowDir,
    pub refcnt: u32,

    /// The number of items or hardware action slots.
    pub len: usize,

    /// A digest of the template's canonical encoding.
    pub digest: u32,
    pub flags: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PoolDump {
    pub name: String,
    pub capacity: u32,
    pub live: u32,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct QueueDump {
    pub queue: u16,
    pub size: u32,
    pub inflight: u32,
    pub pending: u32,
}
