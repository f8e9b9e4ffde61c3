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

//! TLS context construction.
//!
//! The distilled spec names this an external collaborator ("TLS context
//! construction details" are out of scope) but the core still has to call
//! *something* to turn a [`crate::config::ListenConfig`] into a working
//! `rustls::ServerConfig`, or `tls_mode != disable` could never be exercised.
//! This is the minimum concrete implementation of that boundary.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

use crate::config::{ListenConfig, TlsMode};

/// Failure building a TLS server context for a listener.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Reading or parsing the certificate/key/CA material failed.
    #[error("failed to load {what} from {path:?}: {source}")]
    Load {
        /// Which file failed to load (`"certificate"`, `"private key"`, `"CA bundle"`).
        what: &'static str,
        /// The path that failed to load.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// No private key was found in the configured key file.
    #[error("no private key found in {0:?}")]
    NoPrivateKey(std::path::PathBuf),
    /// Building the `rustls::ServerConfig` itself failed.
    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Builds a server-side TLS context for one listen entry, or `Ok(None)` when
/// the entry's `tls_mode` is `disable`.
pub fn build_server_tls(config: &ListenConfig) -> Result<Option<Arc<ServerConfig>>, TlsError> {
    if !config.tls_mode.requires_tls() {
        return Ok(None);
    }

    let cert_path = config.tls_cert.as_ref().expect("validated by Config::validate");
    let key_path = config.tls_key.as_ref().expect("validated by Config::validate");

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let builder = ServerConfig::builder();
    let server_config = if config.tls_mode.requires_client_verification() {
        let ca_path = config.tls_ca.as_ref().expect("validated by Config::validate");
        let ca_certs = load_certs(ca_path)?;
        let mut roots = RootCertStore::empty();
        for cert in ca_certs {
            roots.add(cert).map_err(TlsError::Rustls)?;
        }
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| TlsError::Rustls(rustls::Error::General(e.to_string())))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key)?
    };

    Ok(Some(Arc::new(server_config)))
}

fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Load {
        what: "certificate",
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Load {
            what: "certificate",
            path: path.to_path_buf(),
            source: e,
        })
}

fn load_private_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Load {
        what: "private key",
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::Load {
            what: "private key",
            path: path.to_path_buf(),
            source: e,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn disable_mode_builds_no_context() {
        let cfg = ListenConfig {
            host: "127.0.0.1".into(),
            port: 0,
            backlog: 128,
            tls_mode: TlsMode::Disable,
            tls_cert: None,
            tls_key: None,
            tls_ca: None,
            tuning: crate::config::TcpTuning::default(),
        };
        assert!(build_server_tls(&cfg).unwrap().is_none());
    }
}
