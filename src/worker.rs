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

//! The per-thread session host (§4.C).
//!
//! A `Worker` owns one OS thread, one `mio::Poll`, and a `Slab` of attached
//! client sessions. The only blocking call on this thread is `Poll::poll`;
//! every client read/write is driven from the events it reports.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use crate::client::Client;
use crate::collaborators::{DriveOutcome, Router};
use crate::logger::{LogEvent, Logger};
use crate::worker_pool::Message;

const WAKE_TOKEN: Token = Token(usize::MAX);

/// One attached client and the poll token it is registered under.
struct ClientSession {
    client: Client,
}

/// Runs the event loop for one worker thread.
pub struct Worker {
    index: usize,
    inbox: Receiver<Message>,
    poll: Poll,
    sessions: Slab<ClientSession>,
    router: Arc<dyn Router>,
    logger: Arc<Logger>,
}

impl Worker {
    /// Builds a worker. The caller (the worker pool) must already have
    /// registered a [`mio::Waker`] with `poll`'s registry under
    /// [`Worker::wake_token`] and retained its own `Arc` to it, so that
    /// sending to `inbox` reliably interrupts this worker's `poll` wait.
    pub fn new(
        index: usize,
        inbox: Receiver<Message>,
        poll: Poll,
        router: Arc<dyn Router>,
        logger: Arc<Logger>,
    ) -> Self {
        Worker {
            index,
            inbox,
            poll,
            sessions: Slab::new(),
            router,
            logger,
        }
    }

    /// The token the worker pool must register its waker under.
    pub fn wake_token() -> Token {
        WAKE_TOKEN
    }

    /// Runs the worker's event loop. Does not return under normal operation;
    /// only a poll failure (treated as fatal to this worker alone) returns.
    pub fn run(&mut self) {
        let mut events = Events::with_capacity(1024);
        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                self.logger.emit(
                    LogEvent::Error,
                    None,
                    Some("worker"),
                    format_args!("poll failed on worker {}: {e}", self.index),
                );
                return;
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    self.drain_inbox();
                    continue;
                }
                self.handle_client_event(event);
            }
        }
    }

    fn drain_inbox(&mut self) {
        while let Ok(msg) = self.inbox.try_recv() {
            match msg {
                Message::NewClient(client) => self.attach(client),
            }
        }
    }

    fn attach(&mut self, mut client: Client) {
        let outcome = self.router.on_attach(&mut client);
        let interest = match outcome {
            DriveOutcome::Continue(interest) => interest,
            DriveOutcome::Terminate => return,
        };

        let entry = self.sessions.vacant_entry();
        let token = Token(entry.key());
        if let Err(e) = self.poll.registry().register(client.io_mut(), token, interest) {
            self.logger.emit(
                LogEvent::ClientError,
                Some(client.id()),
                None,
                format_args!("failed to register with worker {}: {e}", self.index),
            );
            return;
        }
        entry.insert(ClientSession { client });
    }

    fn handle_client_event(&mut self, event: &mio::event::Event) {
        let token = event.token();
        let outcome = match self.sessions.get_mut(token.0) {
            Some(session) => self.router.on_event(&mut session.client, event),
            None => return,
        };

        match outcome {
            DriveOutcome::Continue(interest) => self.reregister(token, interest),
            DriveOutcome::Terminate => self.close(token),
        }
    }

    fn reregister(&mut self, token: Token, interest: Interest) {
        if let Some(session) = self.sessions.get_mut(token.0) {
            if self
                .poll
                .registry()
                .reregister(session.client.io_mut(), token, interest)
                .is_err()
            {
                self.close(token);
            }
        }
    }

    fn close(&mut self, token: Token) {
        if self.sessions.contains(token.0) {
            let mut session = self.sessions.remove(token.0);
            let _ = self.poll.registry().deregister(session.client.io_mut());
        }
    }

    #[cfg(test)]
    fn attached_count(&self) -> usize {
        self.sessions.len()
    }
}
