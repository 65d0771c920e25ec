// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

//! # sbaudit
//!
//! Audits the Secure Boot trust chain of a shim based boot setup: which
//! loader the firmware started, whether a newer signed loader is
//! installed, and which enrolled keys have expired or are about to.
//! Nothing is changed on the system; the report names the follow-up
//! actions for the operator.

#![deny(
    nonstandard_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    while_true,
    trivial_casts,
    trivial_numeric_casts,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    unused_extern_crates,
    unused_import_braces
)]

mod audit;
mod boot_entry;
mod cmd_exec;
mod config;
mod error;
mod expiration;
mod key_listing;
mod loader_update;
mod local_key;
mod mount;
mod output;
mod secure_boot_state;

use clap::{CommandFactory, Parser, Subcommand};
use log::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use crate::audit::{parse_reference_time, Auditor};
use crate::boot_entry::BootEntry;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::expiration::ExpirationThresholds;
use crate::key_listing::{KeyStore, KeyStoreKind, Mokutil};
use crate::output::OutputHandler;
use crate::secure_boot_state::{BootChain, EfiVarFs, Efibootmgr};

/// Exit status of an audit stopped because Secure Boot is disabled
const EXIT_INSECURE: i32 = 2;

/// Secure Boot trust chain audit
#[derive(Parser)]
#[command(
    name = "sbaudit",
    version,
    about = "Audit the Secure Boot trust chain of a shim based boot setup",
    after_long_help = "CONFIGURATION SOURCES (highest to lowest priority):\n  \
        1. Command-line arguments (--search-root, --platform-tag, --soon-days)\n  \
        2. Environment variables (SBAUDIT_UPDATE__SEARCH_ROOTS, SBAUDIT_KEYS__SOON_DAYS, etc.)\n  \
        3. Configuration files (sbaudit.toml, ~/.config/sbaudit/config.toml, /etc/sbaudit/sbaudit.conf)\n  \
        4. Built-in defaults"
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Directory searched for loader updates (repeatable)
    #[arg(long, value_name = "DIR")]
    search_root: Vec<String>,

    /// EFI architecture tag, e.g. x64 or aa64
    #[arg(long, value_name = "TAG")]
    platform_tag: Option<String>,

    /// Flag certificates expiring within this many days [default: 365]
    #[arg(long, value_name = "DAYS")]
    soon_days: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all logging
    #[arg(short, long)]
    quiet: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available output formats
#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full audit and print recommendations
    Audit {
        /// Continue even though Secure Boot is disabled
        #[arg(long)]
        allow_insecure: bool,
    },
    /// Report Secure Boot state and the active boot entry
    Boot,
    /// Look for a newer shim than the one booted
    ShimUpdate,
    /// Audit enrolled key stores
    Keys {
        /// Key store to audit [default: all four]
        #[arg(long, value_name = "KIND", value_parser = parse_store_kind)]
        kind: Option<KeyStoreKind>,
        /// Audit a saved mokutil listing instead of querying the system
        #[arg(long, value_name = "FILE")]
        from_file: Option<PathBuf>,
        /// Reference time (RFC 3339) instead of the current time
        #[arg(long, value_name = "TIME")]
        now: Option<String>,
    },
    /// Parse a boot entry descriptor as printed by efibootmgr -v
    ParseEntry {
        #[arg(value_name = "DESCRIPTOR")]
        descriptor: String,
    },
    /// Check the expiration of the local signing certificate
    LocalKey {
        /// Certificate path [default: keys.local_certificate]
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

/// A command result together with the exit status to report it with
struct Outcome {
    value: Value,
    status: i32,
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Outcome { value, status: 0 }
    }
}

/// Listing text read from a file, served for whichever store is asked
struct SavedListing(String);

impl KeyStore for SavedListing {
    fn listing(&self, _kind: KeyStoreKind) -> Result<String> {
        Ok(self.0.clone())
    }
}

fn parse_store_kind(s: &str) -> std::result::Result<KeyStoreKind, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let Some(command) = cli.command.as_ref() else {
        let _ = Cli::command().print_help();
        return;
    };

    let output = OutputHandler::new(cli.format);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config.with_cli_overrides(&cli),
        Err(e) => {
            let e = Error::from(e);
            error!("Failed to load configuration: {e}");
            output.error(&e);
            process::exit(1);
        }
    };
    if let Some(path) = &config.loaded_from {
        debug!("Configuration loaded from {}", path.display());
    }

    if let Err(e) = config.validate() {
        let e = Error::from(e);
        error!("Invalid configuration: {e}");
        output.error(&e);
        process::exit(1);
    }

    match execute_command(command, &config) {
        Ok(outcome) => {
            output.success(outcome.value);
            if outcome.status != 0 {
                process::exit(outcome.status);
            }
        }
        Err(e) => {
            error!("Command failed: {e}");
            output.error(&e);
            process::exit(1);
        }
    }
}

fn execute_command(command: &Commands, config: &Config) -> Result<Outcome> {
    let firmware = EfiVarFs::new(&config.boot.efivars_dir);
    let boot_config = Efibootmgr::new(&config.boot.efibootmgr);
    let mokutil = Mokutil::new(&config.keys.mokutil);

    match command {
        Commands::Audit { allow_insecure } => {
            let auditor = Auditor::new(
                config,
                &firmware,
                &boot_config,
                &mokutil,
                ExpirationThresholds::capture(config.keys.soon_days),
            );
            let report = auditor.run(*allow_insecure)?;
            let status = if report.completed { 0 } else { EXIT_INSECURE };
            Ok(Outcome {
                value: serde_json::to_value(&report)?,
                status,
            })
        }
        Commands::Boot => {
            let auditor = Auditor::new(
                config,
                &firmware,
                &boot_config,
                &mokutil,
                ExpirationThresholds::capture(config.keys.soon_days),
            );
            Ok(serde_json::to_value(auditor.probe()?)?.into())
        }
        Commands::ShimUpdate => {
            let auditor = Auditor::new(
                config,
                &firmware,
                &boot_config,
                &mokutil,
                ExpirationThresholds::capture(config.keys.soon_days),
            );
            let boot = auditor.probe()?;
            let scan = match boot.chain {
                BootChain::ShimMediated => Some(auditor.scan_loader(&boot)?),
                BootChain::DirectControl => {
                    warn!(
                        "Active entry {} does not start {}, nothing to update",
                        boot.active_entry.loader_path, config.boot.loader_name
                    );
                    None
                }
            };
            Ok(json!({ "boot": boot, "loader_update": scan }).into())
        }
        Commands::Keys {
            kind,
            from_file,
            now,
        } => {
            let thresholds = match now {
                Some(text) => ExpirationThresholds::new(
                    parse_reference_time(text)?,
                    config.keys.soon_days,
                ),
                None => ExpirationThresholds::capture(config.keys.soon_days),
            };
            match from_file {
                Some(path) => audit_saved_listing(path, *kind, &thresholds),
                None => {
                    let kinds = match kind {
                        Some(kind) => vec![*kind],
                        None => KeyStoreKind::ALL.to_vec(),
                    };
                    let auditor = Auditor::new(
                        config,
                        &firmware,
                        &boot_config,
                        &mokutil,
                        thresholds,
                    );
                    let stores: Vec<_> = kinds
                        .into_iter()
                        .map(|k| auditor.audit_store(k))
                        .collect();
                    let summary = audit::summarize(None, &stores);
                    Ok(json!({
                        "reference_time": thresholds.now(),
                        "soon_days": thresholds.soon_days(),
                        "key_stores": stores,
                        "summary": summary,
                    })
                    .into())
                }
            }
        }
        Commands::ParseEntry { descriptor } => {
            Ok(serde_json::to_value(BootEntry::parse(descriptor)?)?.into())
        }
        Commands::LocalKey { path } => {
            let path = path.clone().unwrap_or_else(|| {
                PathBuf::from(&config.keys.local_certificate)
            });
            let thresholds =
                ExpirationThresholds::capture(config.keys.soon_days);
            match local_key::check_local_key(&path, &thresholds)? {
                Some(status) => Ok(serde_json::to_value(status)?.into()),
                None => Ok(json!({
                    "certificate": path,
                    "present": false,
                })
                .into()),
            }
        }
    }
}

fn audit_saved_listing(
    path: &Path,
    kind: Option<KeyStoreKind>,
    thresholds: &ExpirationThresholds,
) -> Result<Outcome> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::from_io_at(e, path, "keys"))?;
    let kind = kind.unwrap_or(KeyStoreKind::Mok);
    let audit =
        key_listing::audit_store(&SavedListing(text), kind, thresholds)?;
    Ok(json!({
        "source": path,
        "store": kind,
        "reference_time": thresholds.now(),
        "soon_days": thresholds.soon_days(),
        "audit": audit,
    })
    .into())
}

fn init_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let log_level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    pretty_env_logger::formatted_builder()
        .filter_level(log_level)
        .target(pretty_env_logger::env_logger::Target::Stderr)
        .init();
}
