// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

//! Firmware boot entry parsing.
//!
//! A boot entry descriptor is the text the boot manager prints for one
//! `BootXXXX` variable, e.g.
//!
//! ```text
//! rEFInd Boot Manager	HD(1,GPT,3c2b4a8e-...,0x800,0x100000)/File(\EFI\refind\shimx64.efi)
//! ```
//!
//! Only the partition GUID and the loader file path are of interest.

use crate::error::{Error, Result};
use log::*;
use serde::Serialize;

const PARTITION_MARKER: &str = "GPT,";
const FILE_MARKER: &str = "File(";

/// One parsed firmware boot entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BootEntry {
    /// Partition GUID the loader lives on
    pub partition_id: String,
    /// Loader path from the partition root, using '/' separators. The
    /// leading separator is kept; see [`BootEntry::relative_loader_path`].
    pub loader_path: String,
    /// Final path segment of `loader_path`
    pub loader_filename: String,
    /// Everything in `loader_path` before the filename
    pub loader_directory: String,
    /// Raw descriptor text
    pub description: String,
}

impl BootEntry {
    /// Parse a boot entry descriptor.
    ///
    /// Fails with [`Error::MalformedDescriptor`] if either marker is
    /// missing or if the loader path does not split into a non-empty
    /// directory and filename.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let malformed = |reason: &str| {
            Error::MalformedDescriptor(format!(
                "{reason} in '{}'",
                descriptor.trim()
            ))
        };

        let partition_id = extract_between(descriptor, PARTITION_MARKER, ',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| malformed("no GPT partition identifier"))?;

        let loader_path = extract_between(descriptor, FILE_MARKER, ')')
            .map(|p| p.trim().replace('\\', "/"))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| malformed("no File() loader path"))?;

        let (loader_directory, loader_filename) = match loader_path
            .rsplit_once('/')
        {
            Some((dir, file)) if !dir.is_empty() && !file.is_empty() => {
                (dir.to_string(), file.to_string())
            }
            _ => {
                return Err(malformed(
                    "loader path without directory and filename",
                ))
            }
        };

        debug!(
            "Parsed boot entry: partition {}, loader {}",
            partition_id, loader_path
        );

        Ok(BootEntry {
            partition_id: partition_id.to_string(),
            loader_path,
            loader_filename,
            loader_directory,
            description: descriptor.trim().to_string(),
        })
    }

    /// Loader path with the leading separator removed, suitable for
    /// joining onto a mount point
    pub fn relative_loader_path(&self) -> &str {
        self.loader_path.trim_start_matches('/')
    }

    /// Whether the descriptor names the given loader, ignoring case
    pub fn mentions(&self, name: &str) -> bool {
        self.description
            .to_ascii_lowercase()
            .contains(&name.to_ascii_lowercase())
    }
}

fn extract_between<'a>(
    text: &'a str,
    marker: &str,
    terminator: char,
) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find(terminator)?;
    Some(&rest[..end])
}

/// The boot manager's view of the firmware boot entries
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootManagerListing {
    /// Value of the current selection indicator (`BootCurrent`)
    pub current: Option<String>,
    /// Entry number and descriptor text, in listing order
    pub entries: Vec<(String, String)>,
}

impl BootManagerListing {
    /*
     * Parse `efibootmgr -v` style output:
     *
     *   BootCurrent: 0001
     *   BootOrder: 0001,0000
     *   Boot0000* Windows Boot Manager	HD(1,GPT,...)/File(\EFI\...)
     *   Boot0001* rEFInd	HD(1,GPT,...)/File(\EFI\refind\shimx64.efi)
     *
     * Lines that are neither the indicator nor a numbered entry are
     * ignored.
     */
    pub fn parse(output: &str) -> Self {
        let mut listing = BootManagerListing::default();

        for line in output.lines() {
            if let Some(value) = line.strip_prefix("BootCurrent:") {
                listing.current = Some(value.trim().to_string());
                continue;
            }

            let Some(rest) = line.strip_prefix("Boot") else {
                continue;
            };
            if rest.len() < 4
                || !rest.as_bytes()[..4].iter().all(u8::is_ascii_hexdigit)
            {
                continue;
            }
            let (number, descriptor) = rest.split_at(4);
            let descriptor =
                descriptor.strip_prefix('*').unwrap_or(descriptor).trim();
            listing
                .entries
                .push((number.to_string(), descriptor.to_string()));
        }

        listing
    }

    /// Descriptor of the entry the firmware booted from
    pub fn current_descriptor(&self) -> Result<&str> {
        let current = self.current.as_deref().ok_or_else(|| {
            Error::BootStateUnresolvable(
                "boot manager reports no current selection".to_string(),
            )
        })?;

        self.entries
            .iter()
            .find(|(number, _)| number.eq_ignore_ascii_case(current))
            .map(|(_, descriptor)| descriptor.as_str())
            .ok_or_else(|| {
                Error::BootStateUnresolvable(format!(
                    "no boot entry matches current selection Boot{current}"
                ))
            })
    }
}
