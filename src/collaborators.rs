// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Trait boundaries for the external collaborators named in §1/§4.F: the
//! router, the backend server pool, the admin console, and the cron
//! scheduler. The core only depends on these narrow interfaces; a real
//! pooler substitutes its own implementations without touching anything in
//! `listener`, `worker`, `worker_pool`, or `supervisor`.

use mio::event::Event;

use crate::client::Client;

/// What a [`Router`] wants the worker to do next after handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Keep the session open, registered for the given interest.
    Continue(mio::Interest),
    /// End the session; the worker closes and frees the client.
    Terminate,
}

/// A background collaborator started once at supervisor startup (§4.F step 2).
///
/// Mirrors the "spawn a coroutine, return 0 on success, -1 on failure"
/// contract verbatim, just spelled as a `Result`.
pub trait Collaborator: Send + Sync {
    /// Starts the collaborator. `Err(())` aborts supervisor startup.
    fn start(&self) -> Result<(), ()>;
}

/// Routes an attached client through its session, including handing it to
/// the backend server pool. This is the one collaborator a [`crate::worker::Worker`]
/// calls on every registered I/O event.
pub trait Router: Collaborator {
    /// Called once when a client is first attached to a worker, before any
    /// I/O event has been observed on its socket. Returns the interest the
    /// worker should register the socket for.
    fn on_attach(&self, client: &mut Client) -> DriveOutcome;

    /// Called whenever the worker's poll reports an event on a registered
    /// client's socket.
    fn on_event(&self, client: &mut Client, event: &Event) -> DriveOutcome;
}

/// The admin console collaborator (out of scope; started but otherwise inert
/// here).
pub trait Console: Collaborator {}

/// The periodic maintenance collaborator (out of scope; started but
/// otherwise inert here).
pub trait Cron: Collaborator {}

/// A [`Router`] that reads and discards client bytes until the peer closes
/// or a read fails, terminating the session either way. Good enough to drive
/// the accept → dispatch → session-end path end to end in tests without a
/// real PostgreSQL protocol implementation behind it.
#[derive(Debug, Default)]
pub struct NoopRouter;

impl Collaborator for NoopRouter {
    fn start(&self) -> Result<(), ()> {
        Ok(())
    }
}

impl Router for NoopRouter {
    fn on_attach(&self, _client: &mut Client) -> DriveOutcome {
        DriveOutcome::Continue(mio::Interest::READABLE)
    }

    fn on_event(&self, client: &mut Client, event: &Event) -> DriveOutcome {
        use std::io::Read;

        if !event.is_readable() {
            return DriveOutcome::Continue(mio::Interest::READABLE);
        }

        let mut scratch = [0u8; 4096];
        loop {
            match client.io_mut().read(&mut scratch) {
                Ok(0) => return DriveOutcome::Terminate,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return DriveOutcome::Continue(mio::Interest::READABLE)
                }
                Err(_) => return DriveOutcome::Terminate,
            }
        }
    }
}

/// A [`Console`] that does nothing beyond reporting successful startup.
#[derive(Debug, Default)]
pub struct NoopConsole;

impl Collaborator for NoopConsole {
    fn start(&self) -> Result<(), ()> {
        Ok(())
    }
}

impl Console for NoopConsole {}

/// A [`Cron`] that does nothing beyond reporting successful startup.
#[derive(Debug, Default)]
pub struct NoopCron;

impl Collaborator for NoopCron {
    fn start(&self) -> Result<(), ()> {
        Ok(())
    }
}

impl Cron for NoopCron {}
