//
// meli - jmap sync engine
//
// Copyright 2025 Emmanouil Pitsidianakis <manos@pitsidianak.is>
//
// This file is part of meli.
//
// meli is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// meli is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with meli. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

//! Connection state machine shared by the persistent transports.
//!
//! ```text
//! Closed ──▶ Connecting ──▶ Connected
//!   ▲            │              │
//!   │            ▼              ▼
//!   └──────── Failed ◀──────────┘
//! ```
//!
//! `Closed` and `Failed` both need a reconnect. Entering either while a push
//! listener exists schedules one after a truncated binary exponential
//! backoff. Batches submitted while not connected are queued and handed
//! back, in submission order, on the next successful connect.

use std::{collections::VecDeque, time::Duration};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    pub const fn needs_reconnect(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        write!(fmt, "{}", s)
    }
}

/// `base * 2^min(attempt, max_exponent)`.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    attempt: u32,
    base: Duration,
    max_exponent: u32,
}

impl Backoff {
    pub const fn new(base: Duration, max_exponent: u32) -> Self {
        Self {
            attempt: 0,
            base,
            max_exponent,
        }
    }

    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The delay before the next attempt. Advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(self.max_exponent);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(2_u32.saturating_pow(exponent))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Debug)]
pub struct ReconnectMachine<Q> {
    state: ConnectionState,
    backoff: Backoff,
    queue: VecDeque<Q>,
}

impl<Q> ReconnectMachine<Q> {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Closed,
            backoff,
            queue: VecDeque::new(),
        }
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// # Panics
    ///
    /// If a connection is already being opened or is open: only one physical
    /// connection may exist at a time.
    pub fn begin_connect(&mut self) {
        assert!(
            self.state.needs_reconnect(),
            "Attempted to open a second connection while one is {}",
            self.state
        );
        self.state = ConnectionState::Connecting;
    }

    /// The connection is up: resets the backoff and returns the queued
    /// items in submission order.
    pub fn connected(&mut self) -> Vec<Q> {
        assert_eq!(
            self.state,
            ConnectionState::Connecting,
            "Connection established without a pending connect"
        );
        self.state = ConnectionState::Connected;
        self.backoff.reset();
        self.queue.drain(..).collect()
    }

    /// I/O failure, or a failed connect attempt. Returns the reconnect delay
    /// if someone still wants push notifications.
    pub fn failed(&mut self, wants_push: bool) -> Option<Duration> {
        self.state = ConnectionState::Failed;
        wants_push.then(|| self.backoff.next_delay())
    }

    /// Orderly close. Returns the reconnect delay if someone still wants
    /// push notifications.
    pub fn closed(&mut self, wants_push: bool) -> Option<Duration> {
        self.state = ConnectionState::Closed;
        wants_push.then(|| self.backoff.next_delay())
    }

    /// Returns the item back if it can be sent right away, otherwise queues
    /// it.
    pub fn submit(&mut self, item: Q) -> Option<Q> {
        if self.state == ConnectionState::Connected {
            Some(item)
        } else {
            self.queue.push_back(item);
            None
        }
    }

    pub fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Remove every queued item, e.g. to fail them after a connect attempt
    /// failed.
    pub fn take_queued(&mut self) -> Vec<Q> {
        self.queue.drain(..).collect()
    }
}
