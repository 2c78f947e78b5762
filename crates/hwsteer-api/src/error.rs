// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// The broad class of a [`FlowError`].
///
/// Callers are expected to branch on the kind, never on the message.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    /// Invalid or contradictory template, table, or port attributes.
    Config,

    /// A pool, queue, or index space is full.
    Exhausted,

    /// The steering engine refused an object or did not respond.
    Hardware,

    /// The target object is in the wrong lifecycle state.
    State,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Exhausted => "exhausted",
            Self::Hardware => "hardware",
            Self::State => "state",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Deserialize, Error, Eq, PartialEq, Serialize)]
pub enum FlowError {
    #[error("invalid attribute: {0}")]
    InvalidAttr(String),

    #[error("invalid item at index {index}: {msg}")]
    InvalidItem { index: usize, msg: String },

    #[error("invalid action at index {index}: {msg}")]
    InvalidAction { index: usize, msg: String },

    #[error("too many hardware actions (max {max})")]
    TooManyActions { max: usize },

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The port was configured without any objects of this kind.
    #[error("no {0} pool configured")]
    PoolNotConfigured(String),

    #[error("invalid queue: {0}")]
    BadQueue(u16),

    #[error("table is not resizable")]
    NotResizable,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capacity exceeded: {0}")]
    MaxCapacity(u64),

    #[error("queue {queue} is full")]
    QueueFull { queue: u16 },

    #[error("{0} pool exhausted")]
    PoolExhausted(String),

    /// The steering engine rejected a request; `status` is its
    /// verbatim (negative) status code.
    #[error("hardware rejected {msg}: status {status}")]
    Hardware { status: i32, msg: String },

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("bad state: {0}")]
    BadState(String),

    #[error("{0} still in use")]
    InUse(String),

    #[error("resize already in progress")]
    ResizeInProgress,
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAttr(_)
            | Self::InvalidItem { .. }
            | Self::InvalidAction { .. }
            | Self::TooManyActions { .. }
            | Self::Unsupported(_)
            | Self::PoolNotConfigured(_)
            | Self::BadQueue(_)
            | Self::NotResizable => ErrorKind::Config,

            Self::NotFound(_)
            | Self::BadState(_)
            | Self::InUse(_)
            | Self::ResizeInProgress => ErrorKind::State,

            Self::MaxCapacity(_)
            | Self::QueueFull { .. }
            | Self::PoolExhausted(_) => ErrorKind::Exhausted,

            Self::Hardware { .. } | Self::Timeout(_) => ErrorKind::Hardware,
        }
    }

    /// Would the same request plausibly succeed if retried later,
    /// after completions have been drained?
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::QueueFull { .. } | Self::PoolExhausted(_) => true,
            Self::Timeout(_) => true,
            Self::Hardware { status, .. } => *status == -libc::EBUSY,
            _ => false,
        }
    }

    /// Convert to an errno value.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::InvalidAttr(_) => libc::EINVAL,
            Self::InvalidItem { .. } => libc::EINVAL,
            Self::InvalidAction { .. } => libc::EINVAL,
            Self::TooManyActions { .. } => libc::E2BIG,
            Self::Unsupported(_) => libc::ENOTSUP,
            Self::PoolNotConfigured(_) => libc::ENOTSUP,
            Self::BadQueue(_) => libc::EINVAL,
            Self::NotResizable => libc::EINVAL,
            Self::NotFound(_) => libc::ENOENT,
            Self::MaxCapacity(_) => libc::ENOSPC,
            Self::QueueFull { .. } => libc::EAGAIN,
            Self::PoolExhausted(_) => libc::ENOMEM,
            Self::Hardware { status, .. } => status.saturating_neg().max(1),
            Self::Timeout(_) => libc::ETIMEDOUT,
            Self::BadState(_) => libc::EINVAL,
            Self::InUse(_) => libc::EBUSY,
            Self::ResizeInProgress => libc::EBUSY,
        }
    }

    /// The negative status an entry point reports alongside this
    /// error.
    pub fn status(&self) -> i32 {
        -self.to_errno()
    }

    pub fn hw(status: i32, msg: impl Into<String>) -> Self {
        Self::Hardware { status, msg: msg.into() }
    }

    pub fn item(index: usize, msg: impl Into<String>) -> Self {
        Self::InvalidItem { index, msg: msg.into() }
    }

    pub fn action(index: usize, msg: impl Into<String>) -> Self {
        Self::InvalidAction { index, msg: msg.into() }
    }
}
