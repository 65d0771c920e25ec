// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

//! Enrolled key listing audit.
//!
//! `mokutil` prints one block per certificate:
//!
//! ```text
//! [key 1]
//! SHA1 Fingerprint: 76:a0:...
//! Certificate:
//!     Data:
//!         Issuer: C=GB, ST=Isle of Man, L=Douglas, O=Canonical Ltd., CN=Canonical Ltd. Master Certificate Authority
//!         Validity
//!             Not Before: Apr 12 11:12:51 2012 GMT
//!             Not After : Apr 11 11:12:51 2042 GMT
//! ```
//!
//! The auditor scans those lines with a small state machine and keeps a
//! record only once the index, the issuer and the expiration date have all
//! been seen for the same block.

use crate::cmd_exec;
use crate::error::{Error, Result};
use crate::expiration::{
    parse_not_after, Classification, ExpirationThresholds,
};
use chrono::{DateTime, Utc};
use log::*;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

const INDEX_PREFIX: &str = "[key ";
const ISSUER_PREFIX: &str = "Issuer:";
const NOT_AFTER_PREFIX: &str = "Not After";

/// The four key stores audited on every run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreKind {
    /// Machine Owner Keys trusted by shim
    Mok,
    /// Firmware signature database
    Db,
    /// Key exchange keys
    Kek,
    /// Platform key
    Pk,
}

impl KeyStoreKind {
    pub const ALL: [KeyStoreKind; 4] = [
        KeyStoreKind::Mok,
        KeyStoreKind::Db,
        KeyStoreKind::Kek,
        KeyStoreKind::Pk,
    ];

    /// mokutil option listing this store
    pub fn mokutil_arg(&self) -> &'static str {
        match self {
            KeyStoreKind::Mok => "--list-enrolled",
            KeyStoreKind::Db => "--db",
            KeyStoreKind::Kek => "--kek",
            KeyStoreKind::Pk => "--pk",
        }
    }
}

impl fmt::Display for KeyStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            KeyStoreKind::Mok => "MOK",
            KeyStoreKind::Db => "db",
            KeyStoreKind::Kek => "KEK",
            KeyStoreKind::Pk => "PK",
        };
        write!(f, "{s}")
    }
}

impl FromStr for KeyStoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mok" => Ok(KeyStoreKind::Mok),
            "db" => Ok(KeyStoreKind::Db),
            "kek" => Ok(KeyStoreKind::Kek),
            "pk" => Ok(KeyStoreKind::Pk),
            other => Err(Error::Other(format!("unknown key store '{other}'"))),
        }
    }
}

/// Source of enrolled key listings
pub trait KeyStore {
    fn listing(&self, kind: KeyStoreKind) -> Result<String>;
}

/// Key listings queried through `mokutil`
#[derive(Debug, Clone)]
pub struct Mokutil {
    program: String,
}

impl Mokutil {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl KeyStore for Mokutil {
    fn listing(&self, kind: KeyStoreKind) -> Result<String> {
        cmd_exec::run(&self.program, &[kind.mokutil_arg()])
    }
}

/// One finalized certificate from a listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyRecord {
    pub index: u32,
    pub issuer: String,
    pub not_after: DateTime<Utc>,
    pub classification: Classification,
}

/// Outcome of auditing one listing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ListingAudit {
    pub records: Vec<KeyRecord>,
    pub expired: usize,
    pub expiring_soon: usize,
    pub total: usize,
    /// Non-fatal problems, e.g. blocks whose date could not be parsed
    pub warnings: Vec<String>,
}

impl ListingAudit {
    fn push(&mut self, record: KeyRecord) {
        match record.classification {
            Classification::Expired => self.expired += 1,
            Classification::ExpiringSoon => self.expiring_soon += 1,
            Classification::Valid => {}
        }
        self.total += 1;
        self.records.push(record);
    }
}

/// Accumulator state while scanning a listing
#[derive(Debug)]
enum Frame {
    /// No block in progress
    Idle,
    /// An index marker has been seen; issuer and expiration may follow
    IndexSeen {
        index: u32,
        issuer: Option<String>,
        expiration: Option<(DateTime<Utc>, Classification)>,
    },
}

enum Line<'a> {
    Index(u32),
    Issuer(&'a str),
    NotAfter(&'a str),
    Other,
}

fn classify_line(line: &str) -> Line<'_> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(INDEX_PREFIX) {
        if let Some(Ok(index)) =
            rest.strip_suffix(']').map(|n| n.trim().parse::<u32>())
        {
            return Line::Index(index);
        }
        debug!("Ignoring malformed index marker '{}'", line);
        return Line::Other;
    }
    if let Some(rest) = line.strip_prefix(ISSUER_PREFIX) {
        return Line::Issuer(rest.trim());
    }
    if line.starts_with(NOT_AFTER_PREFIX) {
        if let Some((_, date)) = line.split_once(':') {
            return Line::NotAfter(date.trim());
        }
    }
    Line::Other
}

/// Audit the lines of one key listing.
///
/// A block is emitted once its index, issuer and expiration have all been
/// observed. A new index marker discards an unfinished block, and so does
/// the end of input. A block whose expiration date cannot be parsed is
/// omitted with a warning; the rest of the listing is still audited.
pub fn audit<'a, I>(lines: I, thresholds: &ExpirationThresholds) -> ListingAudit
where
    I: IntoIterator<Item = &'a str>,
{
    let mut result = ListingAudit::default();
    let mut frame = Frame::Idle;

    for line in lines {
        match classify_line(line) {
            Line::Index(index) => {
                if let Frame::IndexSeen { index: previous, .. } = frame {
                    debug!("Dropping incomplete key record {}", previous);
                }
                frame = Frame::IndexSeen {
                    index,
                    issuer: None,
                    expiration: None,
                };
            }
            Line::Issuer(text) => {
                if let Frame::IndexSeen { issuer, .. } = &mut frame {
                    if !text.is_empty() {
                        *issuer = Some(text.to_string());
                    }
                }
            }
            Line::NotAfter(text) => {
                let Frame::IndexSeen {
                    index, expiration, ..
                } = &mut frame
                else {
                    continue;
                };
                match parse_not_after(text) {
                    Ok(not_after) => {
                        *expiration =
                            Some((not_after, thresholds.classify(not_after)));
                    }
                    Err(e) => {
                        let index = *index;
                        warn!("Key {}: {}", index, e);
                        result.warnings.push(format!("key {index}: {e}"));
                        frame = Frame::Idle;
                    }
                }
            }
            Line::Other => continue,
        }

        let complete = match &frame {
            Frame::IndexSeen {
                index,
                issuer: Some(issuer),
                expiration: Some((not_after, classification)),
            } => Some(KeyRecord {
                index: *index,
                issuer: issuer.clone(),
                not_after: *not_after,
                classification: *classification,
            }),
            _ => None,
        };
        if let Some(record) = complete {
            result.push(record);
            frame = Frame::Idle;
        }
    }

    if let Frame::IndexSeen { index, .. } = frame {
        debug!("Dropping incomplete trailing key record {}", index);
    }

    result
}

/// Query one key store and audit its listing
pub(crate) fn audit_store(
    store: &dyn KeyStore,
    kind: KeyStoreKind,
    thresholds: &ExpirationThresholds,
) -> Result<ListingAudit> {
    info!("Auditing {} keys", kind);
    let listing = store.listing(kind)?;
    let audit = audit(listing.lines(), thresholds);
    for record in &audit.records {
        let level = match record.classification {
            Classification::Valid => Level::Debug,
            _ => Level::Warn,
        };
        log!(
            level,
            "{} key {} ({}): {}, not after {}",
            kind,
            record.index,
            record.issuer,
            record.classification,
            record.not_after
        );
    }
    Ok(audit)
}
