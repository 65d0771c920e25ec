// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

use crate::error::{Error, Result};
use log::*;
use std::fs;
use std::path::{Path, PathBuf};

pub static MOUNTINFO: &str = "/proc/self/mountinfo";
pub static PARTUUID_DIR: &str = "/dev/disk/by-partuuid";

/*
 * Find where a block device is mounted by parsing /proc/self/mountinfo
 * content.
 *
 * /proc/[pid]/mountinfo have 10+ elements separated with spaces (check
 * proc (5) for a complete description)
 *
 * The elements of interest are the mount point (5th element), and the
 * mount source (2nd element after the '-' separator).
 */
fn find_mount_point(mountinfo: &str, device: &Path) -> Option<PathBuf> {
    for line in mountinfo.lines() {
        let mut iter = line.split(' ');
        let Some(mount_point) = iter.nth(4) else {
            warn!("Mount information parsing error: not enough elements");
            continue;
        };

        // Skip all fields up to the separator, then the file system type
        let mut iter = iter.skip_while(|&x| x != "-").skip(2);
        if let Some(source) = iter.next() {
            if Path::new(&unescape(source)) == device {
                return Some(PathBuf::from(unescape(mount_point)));
            }
        }
    }
    None
}

// mountinfo escapes blanks, tabs, newlines and backslashes as \ooo
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = &bytes[i + 1..i + 4];
            if octal.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = octal
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Resolve the mount point of the partition with the given GUID.
///
/// The GUID is looked up under `/dev/disk/by-partuuid`, the link is
/// resolved to its block device and the device is searched for in the
/// mount table.
pub(crate) fn partition_mount_point(partition_id: &str) -> Result<PathBuf> {
    let link = Path::new(PARTUUID_DIR).join(partition_id.to_lowercase());
    let device = fs::canonicalize(&link).map_err(|e| {
        debug!("Unable to resolve {}: {}", link.display(), e);
        Error::PartitionNotMounted(partition_id.to_string())
    })?;

    let mountinfo = fs::read_to_string(MOUNTINFO)?;
    match find_mount_point(&mountinfo, &device) {
        Some(mount_point) => {
            debug!(
                "Partition {} ({}) mounted on {}",
                partition_id,
                device.display(),
                mount_point.display()
            );
            Ok(mount_point)
        }
        None => Err(Error::PartitionNotMounted(partition_id.to_string())),
    }
}

/// Resolve `relative` under `root` matching each path component without
/// regard to case, the way the firmware looks files up on FAT.
///
/// Returns `None` if any component cannot be found.
pub(crate) fn resolve_case_insensitive(
    root: &Path,
    relative: &str,
) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    for component in relative.split('/').filter(|c| !c.is_empty()) {
        let exact = current.join(component);
        if exact.exists() {
            current = exact;
            continue;
        }

        let mut names: Vec<_> = fs::read_dir(&current)
            .ok()?
            .flatten()
            .map(|entry| entry.file_name())
            .collect();
        names.sort();
        let found = names.into_iter().find(|name| {
            name.to_str()
                .map(|n| n.eq_ignore_ascii_case(component))
                .unwrap_or(false)
        })?;
        current = current.join(found);
    }
    Some(current)
}
