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

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use frontdoor::collaborators::{NoopConsole, NoopCron, NoopRouter};
use frontdoor::config::Config;
use frontdoor::error::StartupStep;
use frontdoor::supervisor::Supervisor;

/// Front-door acceptor and dispatch core.
#[derive(Parser, Debug)]
#[command(name = "frontdoor", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "./config.toml")]
    config: std::path::PathBuf,

    /// Parse and validate the configuration, print the resolved TOML, and
    /// exit without binding anything.
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    // rustls 0.23 requires a process-wide default crypto provider before any
    // `ServerConfig::builder()` call; install it once here rather than at
    // each listener's TLS context build.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install default crypto provider");

    let args = Args::parse();

    let text = match fs::read_to_string(&args.config) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("frontdoor: failed to read {:?}: {e}", args.config);
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::from_toml_str(&text) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("frontdoor: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.print_config {
        match toml::to_string_pretty(&config) {
            Ok(text) => {
                print!("{text}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("frontdoor: failed to render configuration: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let router = Arc::new(NoopRouter);
    let console = Arc::new(NoopConsole);
    let cron = Arc::new(NoopCron);

    match Supervisor::start(config, router, console, cron) {
        Ok(supervisor) => {
            supervisor.join();
            ExitCode::SUCCESS
        }
        Err((step, e)) => {
            eprintln!("frontdoor: startup failed at {step}: {e}");
            // §6: exit 1 is reserved for "no listen address bound"; every
            // other supervisor startup-step failure exits 2.
            match step {
                StartupStep::Listeners => ExitCode::from(1),
                _ => ExitCode::from(2),
            }
        }
    }
}
