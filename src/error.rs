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

//! The error taxonomy every component classifies its failures into.
//!
//! Nothing in this crate unwinds across a thread boundary to signal one of
//! these: each `run` loop catches its own errors inline and decides between
//! skipping a unit of work, exiting its loop, or terminating the process.

use std::fmt;
use std::io;

/// One of the failure classes a component can raise.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Recoverable I/O failure: the offending unit of work is discarded and
    /// the caller's loop continues.
    #[error("transient I/O error: {0}")]
    TransientIo(#[source] io::Error),

    /// The listener's accept loop cannot continue (address became unusable).
    /// Other listeners are unaffected.
    #[error("listener for {addr} is no longer usable: {source}")]
    ListenerFatal {
        /// The address the listener was bound to.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A supervisor startup step failed outright.
    #[error("startup failed: {0}")]
    StartupFatal(String),

    /// A sink inside the logger failed to accept a write. Never propagated
    /// out of [`crate::logger::Logger::emit`]; kept only so sinks can report
    /// failure to each other's fallback path without panicking.
    #[error("log sink failed: {0}")]
    LogSink(String),
}

impl CoreError {
    /// Wraps an I/O error as a transient failure.
    pub fn transient(err: io::Error) -> Self {
        CoreError::TransientIo(err)
    }

    /// True when the wrapped I/O error is the platform's address-in-use code,
    /// the one error an accept loop treats as listener-fatal.
    pub fn is_addr_in_use(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::AddrInUse
    }
}

/// A one-line, human-readable rendering used by the component tag in log
/// lines emitted for startup/supervisor failures.
impl fmt::Display for StartupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StartupStep::Globals => "globals",
            StartupStep::Router => "router",
            StartupStep::Console => "console",
            StartupStep::Cron => "cron",
            StartupStep::WorkerPool => "worker pool",
            StartupStep::SignalHandler => "signal handler",
            StartupStep::Listeners => "listeners",
        };
        f.write_str(name)
    }
}

/// Names a supervisor startup step, for error messages and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStep {
    /// Building the process-wide globals record.
    Globals,
    /// Starting the external router collaborator.
    Router,
    /// Starting the external console collaborator.
    Console,
    /// Starting the external cron collaborator.
    Cron,
    /// Starting the worker pool's threads.
    WorkerPool,
    /// Spawning the signal handler thread.
    SignalHandler,
    /// Binding configured listen addresses.
    Listeners,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn is_addr_in_use_matches_only_that_kind() {
        let in_use = io::Error::from(io::ErrorKind::AddrInUse);
        let other = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(CoreError::is_addr_in_use(&in_use));
        assert!(!CoreError::is_addr_in_use(&other));
    }

    #[test]
    fn startup_step_display_matches_component_tag() {
        assert_eq!(StartupStep::Listeners.to_string(), "listeners");
        assert_eq!(StartupStep::WorkerPool.to_string(), "worker pool");
    }
}
