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

//! Process-wide globals and startup sequencing (§4.F).

use std::sync::{Arc, OnceLock};

use crate::collaborators::{Console, Cron, Router};
use crate::config::Config;
use crate::error::{CoreError, StartupStep};
use crate::id::IdManager;
use crate::listener::{self, ListenerThread};
use crate::logger::{LogEvent, Logger};
use crate::signal::SignalHandler;
use crate::worker_pool::WorkerPool;

/// Process-wide state reachable from every listener and worker thread.
///
/// `worker_pool` is filled in after construction: the pool's own workers are
/// built from `router`/`logger`, which `Globals` must already own, so the two
/// cannot be constructed in a single step. A [`OnceLock`] makes the
/// fill-in-once-then-read-forever shape explicit instead of reaching for
/// interior mutability that would allow a second, incorrect write.
pub struct Globals {
    config: Config,
    ids: Arc<IdManager>,
    logger: Arc<Logger>,
    router: Arc<dyn Router>,
    console: Arc<dyn Console>,
    cron: Arc<dyn Cron>,
    worker_pool: OnceLock<Arc<WorkerPool>>,
}

impl Globals {
    /// The parsed, validated configuration this process was started with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared id manager.
    pub fn ids(&self) -> &Arc<IdManager> {
        &self.ids
    }

    /// The shared logger.
    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// The worker pool, once startup has reached the point of creating it.
    ///
    /// Panics if called before [`Supervisor::start`] has run the worker-pool
    /// startup step; nothing in this crate calls it earlier.
    pub fn worker_pool(&self) -> &Arc<WorkerPool> {
        self.worker_pool
            .get()
            .expect("worker pool accessed before startup reached that step")
    }
}

/// Owns every long-lived handle produced by [`Supervisor::start`]: the
/// collaborators, the worker pool, the signal handler, and the listener
/// threads. Dropping it does not stop anything (the process exits via the
/// signal handler, matching the "abrupt exit, no draining" Non-goal); it
/// exists so callers (namely `main`) have somewhere to hold these handles
/// and `join` the listeners.
pub struct Supervisor {
    globals: Arc<Globals>,
    signal_handler: Option<SignalHandler>,
    listeners: Vec<ListenerThread>,
}

impl Supervisor {
    /// Runs the startup sequence in the order fixed by §4.F:
    /// globals, then router, then console, then cron, then the worker pool,
    /// then the signal handler, then the listeners. Any step failing aborts
    /// the remaining steps and returns the failing step alongside the error.
    pub fn start(
        config: Config,
        router: Arc<dyn Router>,
        console: Arc<dyn Console>,
        cron: Arc<dyn Cron>,
    ) -> Result<Self, (StartupStep, CoreError)> {
        let logger = Arc::new(Logger::from_config(&config.logger));
        let ids = Arc::new(IdManager::new());

        let globals = Arc::new(Globals {
            config,
            ids,
            logger: logger.clone(),
            router: router.clone(),
            console: console.clone(),
            cron: cron.clone(),
            worker_pool: OnceLock::new(),
        });

        globals
            .router
            .start()
            .map_err(|_| (StartupStep::Router, CoreError::StartupFatal("router failed to start".into())))?;
        globals
            .console
            .start()
            .map_err(|_| (StartupStep::Console, CoreError::StartupFatal("console failed to start".into())))?;
        globals
            .cron
            .start()
            .map_err(|_| (StartupStep::Cron, CoreError::StartupFatal("cron failed to start".into())))?;

        let worker_count = globals.config.workers.get();
        let pool = WorkerPool::start(worker_count, router.clone(), logger.clone())
            .map_err(|e| (StartupStep::WorkerPool, e))?;
        globals
            .worker_pool
            .set(Arc::new(pool))
            .unwrap_or_else(|_| unreachable!("worker_pool set exactly once during startup"));

        let signal_handler = SignalHandler::start(logger.clone());

        let mut listeners = Vec::new();
        for entry in &globals.config.listen {
            let entry = Arc::new(entry.clone());
            let spawned = listener::spawn_listeners(
                entry,
                globals.ids.clone(),
                logger.clone(),
                globals.worker_pool().clone(),
            );
            listeners.extend(spawned);
        }

        if listeners.is_empty() {
            logger.emit(LogEvent::Error, None, None, format_args!("failed to bind any listen address"));
            return Err((
                StartupStep::Listeners,
                CoreError::StartupFatal("failed to bind any listen address".into()),
            ));
        }

        Ok(Supervisor {
            globals,
            signal_handler: Some(signal_handler),
            listeners,
        })
    }

    /// The process-wide globals this supervisor built.
    pub fn globals(&self) -> &Arc<Globals> {
        &self.globals
    }

    /// Blocks until every listener thread exits (normally only on a fatal
    /// bind/accept failure) and the signal handler thread exits (normally
    /// only via `process::exit`, so this call does not return in practice).
    pub fn join(mut self) {
        for listener in self.listeners.drain(..) {
            listener.join();
        }
        if let Some(handler) = self.signal_handler.take() {
            handler.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::{NoopConsole, NoopCron, NoopRouter};
    use std::num::NonZeroU32;

    fn minimal_config(port: u16) -> Config {
        Config {
            listen: vec![crate::config::ListenConfig {
                host: "127.0.0.1".into(),
                port,
                backlog: 128,
                tls_mode: crate::config::TlsMode::Disable,
                tls_cert: None,
                tls_key: None,
                tls_ca: None,
                tuning: crate::config::TcpTuning::default(),
            }],
            workers: NonZeroU32::new(2).unwrap(),
            logger: crate::config::LoggerConfig {
                log_to_stdout: false,
                ..Default::default()
            },
        }
    }

    #[test]
    fn start_with_no_listeners_fails_at_listeners_step() {
        let config = Config {
            listen: vec![],
            workers: NonZeroU32::new(1).unwrap(),
            logger: crate::config::LoggerConfig {
                log_to_stdout: false,
                ..Default::default()
            },
        };
        let err = Supervisor::start(config, Arc::new(NoopRouter), Arc::new(NoopConsole), Arc::new(NoopCron))
            .unwrap_err();
        assert_eq!(err.0, StartupStep::Listeners);
    }

    #[test]
    fn start_binds_configured_listener_and_exposes_worker_pool() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = std_listener.local_addr().unwrap().port();
        drop(std_listener);

        let config = minimal_config(port);
        let supervisor = Supervisor::start(config, Arc::new(NoopRouter), Arc::new(NoopConsole), Arc::new(NoopCron))
            .unwrap();
        assert_eq!(supervisor.globals().worker_pool().worker_count(), 2);
    }

    #[test]
    fn start_fails_when_the_only_listen_entry_is_already_bound() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let config = minimal_config(port);
        let err = Supervisor::start(config, Arc::new(NoopRouter), Arc::new(NoopConsole), Arc::new(NoopCron))
            .unwrap_err();
        assert_eq!(err.0, StartupStep::Listeners);
    }

    #[test]
    fn start_succeeds_with_one_free_entry_even_if_another_is_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken_port = taken.local_addr().unwrap().port();
        let free_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let free_port = free_listener.local_addr().unwrap().port();
        drop(free_listener);

        let mut config = minimal_config(free_port);
        config.listen.push(crate::config::ListenConfig {
            host: "127.0.0.1".into(),
            port: taken_port,
            backlog: 128,
            tls_mode: crate::config::TlsMode::Disable,
            tls_cert: None,
            tls_key: None,
            tls_ca: None,
            tuning: crate::config::TcpTuning::default(),
        });

        let supervisor = Supervisor::start(config, Arc::new(NoopRouter), Arc::new(NoopConsole), Arc::new(NoopCron))
            .unwrap();
        assert_eq!(supervisor.listeners.len(), 1, "only the free address should have bound");
    }
}
