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

//! Configuration inputs consumed by the core (§6).
//!
//! Parsed from a TOML file with `serde`; nothing here reaches into the
//! environment or does discovery; that belongs to the surrounding
//! application, not the core.

use std::num::NonZeroU32;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// TLS negotiation policy for a single listen entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    /// No TLS is offered on this listener.
    Disable,
    /// TLS is offered but not required.
    Allow,
    /// TLS is required, no client certificate is checked.
    Require,
    /// TLS is required and the client certificate chain must validate.
    VerifyCa,
    /// TLS is required, the client certificate chain must validate, and the
    /// certificate's identity must match the client's presented username.
    VerifyFull,
}

impl TlsMode {
    /// Whether this mode requires a TLS context to be built at all.
    pub fn requires_tls(self) -> bool {
        !matches!(self, TlsMode::Disable)
    }

    /// Whether this mode requires verifying the client's certificate.
    pub fn requires_client_verification(self) -> bool {
        matches!(self, TlsMode::VerifyCa | TlsMode::VerifyFull)
    }
}

/// TCP tuning flags applied to every accepted client of a listener.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct TcpTuning {
    /// Disables Nagle's algorithm on accepted sockets.
    pub nodelay: bool,
    /// TCP keepalive idle time in seconds; 0 disables keepalive.
    pub keepalive: u32,
    /// Socket receive-buffer size in bytes ("read-ahead").
    pub readahead: u32,
}

impl Default for TcpTuning {
    fn default() -> Self {
        TcpTuning {
            nodelay: true,
            keepalive: 0,
            readahead: 8192,
        }
    }
}

/// One `listen[]` entry: a single address:port to accept on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Host to bind, or `"*"` for passive resolution across all interfaces.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Backlog passed to `listen(2)`.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// TLS negotiation policy for this listener.
    #[serde(default = "default_tls_mode")]
    pub tls_mode: TlsMode,
    /// PEM certificate chain path, required when `tls_mode != disable`.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key path, required when `tls_mode != disable`.
    pub tls_key: Option<PathBuf>,
    /// PEM CA bundle path, required for `verify-ca` / `verify-full`.
    pub tls_ca: Option<PathBuf>,
    /// TCP tuning applied to clients of this listener.
    #[serde(flatten)]
    pub tuning: TcpTuning,
}

fn default_backlog() -> u32 {
    128
}

fn default_tls_mode() -> TlsMode {
    TlsMode::Disable
}

impl ListenConfig {
    /// True when `host` is the passive-resolution wildcard.
    pub fn is_wildcard_host(&self) -> bool {
        self.host == "*"
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.tls_mode.requires_tls() && (self.tls_cert.is_none() || self.tls_key.is_none()) {
            return Err(CoreError::StartupFatal(format!(
                "listen entry {}:{} requests tls_mode {:?} but is missing tls_cert/tls_key",
                self.host, self.port, self.tls_mode
            )));
        }
        if self.tls_mode.requires_client_verification() && self.tls_ca.is_none() {
            return Err(CoreError::StartupFatal(format!(
                "listen entry {}:{} requests tls_mode {:?} but is missing tls_ca",
                self.host, self.port, self.tls_mode
            )));
        }
        Ok(())
    }
}

/// Logger configuration (§4.A inputs).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Emit log lines to standard output.
    pub log_to_stdout: bool,
    /// Path to a log file; opened in append mode if present.
    pub log_file: Option<PathBuf>,
    /// Syslog ident string; syslog sink is active only if set.
    pub log_syslog_ident: Option<String>,
    /// Syslog facility name (e.g. `"local0"`, `"daemon"`).
    pub log_syslog_facility: Option<String>,
    /// Whether debug-level variants are emitted.
    pub log_debug: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            log_to_stdout: true,
            log_file: None,
            log_syslog_ident: None,
            log_syslog_facility: None,
            log_debug: false,
        }
    }
}

/// The fully parsed, validated instance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listen entries to bind at startup.
    #[serde(default)]
    pub listen: Vec<ListenConfig>,
    /// Number of worker threads to start.
    pub workers: NonZeroU32,
    /// Logger configuration.
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl Config {
    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        let config: Config =
            toml::from_str(text).map_err(|e| CoreError::StartupFatal(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        for entry in &self.listen {
            entry.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = Config::from_toml_str(
            r#"
            workers = 2

            [[listen]]
            host = "127.0.0.1"
            port = 6432
            "#,
        )
        .unwrap();
        assert_eq!(cfg.workers.get(), 2);
        assert_eq!(cfg.listen.len(), 1);
        assert_eq!(cfg.listen[0].backlog, 128);
        assert_eq!(cfg.listen[0].tls_mode, TlsMode::Disable);
    }

    #[test]
    fn rejects_tls_entry_missing_cert() {
        let err = Config::from_toml_str(
            r#"
            workers = 1

            [[listen]]
            host = "*"
            port = 6432
            tls_mode = "require"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::StartupFatal(_)));
    }

    #[test]
    fn wildcard_host_is_detected() {
        let cfg = Config::from_toml_str(
            r#"
            workers = 1

            [[listen]]
            host = "*"
            port = 6432
            "#,
        )
        .unwrap();
        assert!(cfg.listen[0].is_wildcard_host());
    }
}
