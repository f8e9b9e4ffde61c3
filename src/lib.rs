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

//! Front-door acceptor and dispatch core for a PostgreSQL connection pooler.
//!
//! This crate owns the network edge only: resolving and binding listen
//! addresses, accepting and lightly tuning client sockets, handing each
//! accepted client to a pool of worker threads over a round-robin channel,
//! and driving registered client sockets through a pluggable [`Router`].
//! Everything past that boundary (the wire protocol, connection pooling to
//! backend servers, authentication) belongs to the collaborator traits in
//! [`collaborators`], not to this crate.

pub mod client;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod id;
pub mod listener;
pub mod logger;
pub mod signal;
pub mod supervisor;
pub mod tls;
pub mod worker;
pub mod worker_pool;

pub use client::Client;
pub use collaborators::{Collaborator, Console, Cron, DriveOutcome, Router};
pub use config::Config;
pub use error::{CoreError, StartupStep};
pub use supervisor::{Globals, Supervisor};
