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

//! Round-robin dispatch of new-client messages across workers (§4.D).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use mio::{Poll, Waker};

use crate::client::Client;
use crate::collaborators::Router;
use crate::error::CoreError;
use crate::logger::Logger;
use crate::worker::Worker;

/// A message carried on a worker's inbox.
///
/// Currently a single variant; the match on it in [`crate::worker::Worker`]
/// is written exhaustively (not with a wildcard arm) so that adding a second
/// variant here is a compile error at every call site that needs updating,
/// per §4.C's "unrecognized tags are logged and discarded" contract.
pub enum Message {
    /// Ownership transfer of a freshly accepted [`Client`] to this worker.
    NewClient(Client),
}

struct WorkerHandle {
    sender: Sender<Message>,
    waker: Arc<Waker>,
    join: Option<JoinHandle<()>>,
}

/// Owns the N worker threads and dispatches [`Message`]s to them round-robin.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Spawns exactly `n` worker threads.
    pub fn start(n: u32, router: Arc<dyn Router>, logger: Arc<Logger>) -> Result<Self, CoreError> {
        let mut workers = Vec::with_capacity(n as usize);

        for index in 0..n {
            let (sender, receiver) = unbounded();
            let poll = Poll::new().map_err(CoreError::transient)?;
            let waker = Arc::new(
                Waker::new(poll.registry(), Worker::wake_token()).map_err(CoreError::transient)?,
            );

            let mut worker = Worker::new(index as usize, receiver, poll, router.clone(), logger.clone());
            let join = thread::Builder::new()
                .name(format!("frontdoor-worker-{index}"))
                .spawn(move || worker.run())
                .map_err(|e| CoreError::StartupFatal(format!("failed to spawn worker {index}: {e}")))?;

            workers.push(WorkerHandle {
                sender,
                waker,
                join: Some(join),
            });
        }

        Ok(WorkerPool {
            workers,
            next: AtomicUsize::new(0),
        })
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues `msg` onto exactly one worker's inbox, chosen by a wait-free
    /// round-robin counter. Ties are broken by lowest index because the
    /// counter only ever increases.
    pub fn feed(&self, msg: Message) -> Result<(), CoreError> {
        let n = self.workers.len();
        let index = self.next.fetch_add(1, Ordering::Relaxed) % n;
        let handle = &self.workers[index];
        handle
            .sender
            .send(msg)
            .map_err(|_| CoreError::transient(std::io::Error::other("worker channel closed")))?;
        handle.waker.wake().map_err(CoreError::transient)
    }

    /// Which worker index the next [`WorkerPool::feed`] call will target,
    /// for tests asserting round-robin distribution without racing the
    /// counter itself.
    #[cfg(test)]
    pub fn peek_next_index(&self) -> usize {
        self.next.load(Ordering::Relaxed) % self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Worker threads never return under normal operation (§4.C); on
        // process exit we detach rather than block here, matching the
        // "abrupt exit, no draining" Non-goal.
        for handle in &mut self.workers {
            drop(handle.join.take());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::NoopRouter;
    use std::collections::HashMap;

    fn pool(n: u32) -> WorkerPool {
        WorkerPool::start(n, Arc::new(NoopRouter), Arc::new(Logger::new(false, false))).unwrap()
    }

    #[test]
    fn single_worker_receives_every_message() {
        let pool = pool(1);
        for _ in 0..5 {
            assert_eq!(pool.peek_next_index(), 0);
            pool.next.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn round_robin_distributes_evenly() {
        let pool = pool(3);
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for _ in 0..7 {
            *counts.entry(pool.peek_next_index()).or_insert(0) += 1;
            pool.next.fetch_add(1, Ordering::Relaxed);
        }
        let mut values: Vec<_> = counts.values().copied().collect();
        values.sort_unstable();
        assert_eq!(values, vec![2, 2, 3]);
        assert_eq!(counts.get(&0), Some(&3));
    }

    #[test]
    fn worker_count_matches_requested_n() {
        let pool = pool(4);
        assert_eq!(pool.worker_count(), 4);
    }
}
