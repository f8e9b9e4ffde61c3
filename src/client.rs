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

//! The `Client` and `ListenerState` records (§3).

use std::sync::Arc;
use std::time::Instant;

use mio::net::TcpStream;
use rustls::ServerConfig;

use crate::config::ListenConfig;

/// A connection-session record, owned by exactly one thread at a time: the
/// accepting Listener until it is handed to the worker pool, the receiving
/// Worker from then on. `Client` is intentionally not `Clone` and never
/// shared behind an `Arc`; the type system is the enforcement of the
/// single-owner invariant, not a comment.
#[derive(Debug)]
pub struct Client {
    id: String,
    io: TcpStream,
    listen_config: Arc<ListenConfig>,
    tls: Option<Arc<ServerConfig>>,
    accepted_at: Instant,
}

impl Client {
    /// Builds a new client record at accept time.
    pub fn new(
        id: String,
        io: TcpStream,
        listen_config: Arc<ListenConfig>,
        tls: Option<Arc<ServerConfig>>,
    ) -> Self {
        Client {
            id,
            io,
            listen_config,
            tls,
            accepted_at: Instant::now(),
        }
    }

    /// The client's short printable id, e.g. `"c1a"`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared borrow of the socket, for read/write/register calls.
    pub fn io(&self) -> &TcpStream {
        &self.io
    }

    /// Mutable borrow of the socket.
    pub fn io_mut(&mut self) -> &mut TcpStream {
        &mut self.io
    }

    /// The listen config this client was accepted under.
    pub fn listen_config(&self) -> &ListenConfig {
        &self.listen_config
    }

    /// The listener's TLS context, if any.
    pub fn tls(&self) -> Option<&Arc<ServerConfig>> {
        self.tls.as_ref()
    }

    /// When this client was accepted.
    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::TcpTuning;
    use mio::net::TcpListener;
    use std::net::SocketAddr;

    fn listen_config() -> Arc<ListenConfig> {
        Arc::new(ListenConfig {
            host: "127.0.0.1".into(),
            port: 0,
            backlog: 128,
            tls_mode: crate::config::TlsMode::Disable,
            tls_cert: None,
            tls_key: None,
            tls_ca: None,
            tuning: TcpTuning::default(),
        })
    }

    #[test]
    fn client_exposes_id_and_config() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).unwrap();
        let bound = listener.local_addr().unwrap();
        let client_stream = std::net::TcpStream::connect(bound).unwrap();
        let (stream, _) = listener.accept().unwrap();
        drop(client_stream);

        let cfg = listen_config();
        let client = Client::new("c1".into(), stream, cfg.clone(), None);
        assert_eq!(client.id(), "c1");
        assert_eq!(client.listen_config().port, cfg.port);
        assert!(client.tls().is_none());
    }
}
