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

//! The signal-handler thread (§4.E).
//!
//! Runs entirely on its own dedicated OS thread, blocking on `signal-hook`'s
//! iterator rather than touching async-signal-safety concerns itself.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::logger::{LogEvent, Logger};

/// Handle to the running signal-handler thread, if it came up.
///
/// Neither failure mode here aborts supervisor startup (§4.E): a failed mask
/// install or thread spawn is logged and leaves the process running without
/// signal-driven termination, not a `StartupFatal`.
pub struct SignalHandler {
    join: Option<JoinHandle<()>>,
}

impl SignalHandler {
    /// Installs handlers for `SIGINT`, `SIGTERM`, and `SIGHUP` and spawns the
    /// thread that waits on them. Always succeeds from the caller's
    /// perspective; a failure to install the mask or spawn the thread is
    /// logged and yields a handler with no running thread.
    pub fn start(logger: Arc<Logger>) -> Self {
        let mut signals = match Signals::new([SIGINT, SIGTERM, SIGHUP]) {
            Ok(signals) => signals,
            Err(e) => {
                logger.emit(
                    LogEvent::Error,
                    None,
                    None,
                    format_args!("failed to install signal handlers: {e}"),
                );
                return SignalHandler { join: None };
            }
        };

        let spawned = thread::Builder::new()
            .name("frontdoor-signal".into())
            .spawn(move || {
                for signal in signals.forever() {
                    match signal {
                        SIGINT | SIGTERM => {
                            logger.emit(
                                LogEvent::Generic,
                                None,
                                None,
                                format_args!("received signal {signal}, exiting"),
                            );
                            std::process::exit(0);
                        }
                        SIGHUP => {
                            logger.emit(
                                LogEvent::Generic,
                                None,
                                None,
                                format_args!("SIGHUP received, skipping (reload not supported)"),
                            );
                        }
                        _ => {}
                    }
                }
            });

        match spawned {
            Ok(join) => SignalHandler { join: Some(join) },
            Err(e) => {
                logger.emit(
                    LogEvent::Error,
                    None,
                    None,
                    format_args!("failed to spawn signal handler thread: {e}"),
                );
                SignalHandler { join: None }
            }
        }
    }

    /// Waits for the signal handler thread to exit, if one is running. In
    /// normal operation this only happens via `process::exit`, so this
    /// rarely returns.
    pub fn join(self) {
        if let Some(join) = self.join {
            let _ = join.join();
        }
    }
}
