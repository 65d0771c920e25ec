// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

//! Secure Boot state probe.
//!
//! Reads the firmware SecureBoot flag and the active boot entry, and
//! decides whether the machine booted through a shim-style first stage
//! loader or straight into the boot manager.

use crate::boot_entry::{BootEntry, BootManagerListing};
use crate::cmd_exec;
use crate::error::{Error, Result};
use log::*;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// EFI global variable vendor GUID
pub const EFI_GLOBAL_VARIABLE: &str = "8be4df61-93ca-11d2-aa0d-00e098032b8c";

// efivarfs prefixes every variable with a 32-bit attribute word
const EFIVARFS_ATTR_LEN: usize = 4;

/// Source of firmware variable contents
pub trait FirmwareVariables {
    /// Raw data of a global variable, without attribute header.
    /// `Ok(None)` means the variable does not exist.
    fn read_global(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Source of the boot manager entry listing
pub trait BootConfiguration {
    fn boot_listing(&self) -> Result<BootManagerListing>;
}

/// Firmware variables exposed by the kernel's efivarfs
#[derive(Debug, Clone)]
pub struct EfiVarFs {
    dir: PathBuf,
}

impl EfiVarFs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FirmwareVariables for EfiVarFs {
    fn read_global(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.dir.join(format!("{name}-{EFI_GLOBAL_VARIABLE}"));
        match fs::read(&path) {
            Ok(raw) if raw.len() > EFIVARFS_ATTR_LEN => {
                Ok(Some(raw[EFIVARFS_ATTR_LEN..].to_vec()))
            }
            Ok(_) => {
                warn!("Firmware variable {} is empty", path.display());
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Firmware variable {} not present", path.display());
                Ok(None)
            }
            Err(e) => Err(Error::from_io_at(e, &path, "boot")),
        }
    }
}

/// Boot entries as reported by `efibootmgr -v`
#[derive(Debug, Clone)]
pub struct Efibootmgr {
    program: String,
}

impl Efibootmgr {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl BootConfiguration for Efibootmgr {
    fn boot_listing(&self) -> Result<BootManagerListing> {
        let output = cmd_exec::run(&self.program, &["-v"])?;
        Ok(BootManagerListing::parse(&output))
    }
}

/// How control reaches the boot manager
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootChain {
    /// The active entry launches a shim first stage loader
    ShimMediated,
    /// The active entry launches the boot manager directly
    DirectControl,
}

/// Result of probing the firmware
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SecureBootState {
    pub secure_boot_enabled: bool,
    /// `None` when the firmware does not expose SetupMode
    pub setup_mode: Option<bool>,
    pub chain: BootChain,
    pub active_entry: BootEntry,
}

pub struct SecureBootStateProbe<'a> {
    firmware: &'a dyn FirmwareVariables,
    boot_config: &'a dyn BootConfiguration,
    loader_name: String,
}

impl<'a> SecureBootStateProbe<'a> {
    pub fn new(
        firmware: &'a dyn FirmwareVariables,
        boot_config: &'a dyn BootConfiguration,
        loader_name: &str,
    ) -> Self {
        Self {
            firmware,
            boot_config,
            loader_name: loader_name.to_string(),
        }
    }

    /// Whether Secure Boot is enforced. A missing SecureBoot variable
    /// means a legacy or non-Secure-Boot capable firmware.
    pub fn secure_boot_enabled(&self) -> Result<bool> {
        Ok(self.read_flag("SecureBoot")?.unwrap_or(false))
    }

    fn read_flag(&self, name: &str) -> Result<Option<bool>> {
        match self.firmware.read_global(name)? {
            Some(data) => match data.first() {
                Some(0) => Ok(Some(false)),
                Some(1) => Ok(Some(true)),
                Some(other) => {
                    warn!("Unexpected {} value {}, assuming set", name, other);
                    Ok(Some(true))
                }
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Probe the firmware and classify the active boot chain.
    ///
    /// Fails with [`Error::BootStateUnresolvable`] when no entry matches
    /// the current selection, or [`Error::MalformedDescriptor`] when the
    /// active entry cannot be parsed. Both are fatal to an audit run.
    pub fn probe(&self) -> Result<SecureBootState> {
        let secure_boot_enabled = self.secure_boot_enabled()?;
        if secure_boot_enabled {
            info!("Secure Boot is enabled");
        } else {
            warn!("Secure Boot is disabled");
        }
        let setup_mode = self.read_flag("SetupMode")?;

        let listing = self.boot_config.boot_listing()?;
        let descriptor = listing.current_descriptor()?;
        let active_entry = BootEntry::parse(descriptor)?;

        let chain = if active_entry.mentions(&self.loader_name) {
            BootChain::ShimMediated
        } else {
            BootChain::DirectControl
        };
        info!(
            "Active boot loader {} ({:?})",
            active_entry.loader_path, chain
        );

        Ok(SecureBootState {
            secure_boot_enabled,
            setup_mode,
            chain,
            active_entry,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub(crate) struct FakeFirmware {
        pub(crate) vars: HashMap<String, Vec<u8>>,
    }

    impl FakeFirmware {
        pub(crate) fn with_secure_boot(value: u8) -> Self {
            let mut fw = FakeFirmware::default();
            let _ = fw.vars.insert("SecureBoot".to_string(), vec![value]);
            fw
        }
    }

    impl FirmwareVariables for FakeFirmware {
        fn read_global(&self, name: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.vars.get(name).cloned())
        }
    }

    pub(crate) struct FakeBootConfig(pub(crate) String);

    impl BootConfiguration for FakeBootConfig {
        fn boot_listing(&self) -> Result<BootManagerListing> {
            Ok(BootManagerListing::parse(&self.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    const LISTING: &str = "BootCurrent: 0002\n\
        BootOrder: 0002,0000\n\
        Boot0000* Windows Boot Manager\tHD(1,GPT,aaaa-bbbb,0x800,0x82000)/File(\\EFI\\Microsoft\\Boot\\bootmgfw.efi)\n\
        Boot0002* rEFInd\tHD(1,GPT,aaaa-bbbb,0x800,0x82000)/File(\\EFI\\refind\\ShimX64.efi)\n";

    #[test]
    fn test_probe_shim_mediated() {
        let firmware = FakeFirmware::with_secure_boot(1);
        let boot = FakeBootConfig(LISTING.to_string());
        let probe = SecureBootStateProbe::new(&firmware, &boot, "shim");

        let state = probe.probe().unwrap(); //#[allow_ci]
        assert!(state.secure_boot_enabled);
        assert_eq!(state.setup_mode, None);
        assert_eq!(state.chain, BootChain::ShimMediated);
        assert_eq!(state.active_entry.partition_id, "aaaa-bbbb");
        assert_eq!(state.active_entry.loader_filename, "ShimX64.efi");
    }

    #[test]
    fn test_probe_direct_control() {
        let mut firmware = FakeFirmware::with_secure_boot(0);
        let _ = firmware.vars.insert("SetupMode".to_string(), vec![1]);
        let boot = FakeBootConfig(
            LISTING.replace("BootCurrent: 0002", "BootCurrent: 0000"),
        );
        let probe = SecureBootStateProbe::new(&firmware, &boot, "shim");

        let state = probe.probe().unwrap(); //#[allow_ci]
        assert!(!state.secure_boot_enabled);
        assert_eq!(state.setup_mode, Some(true));
        assert_eq!(state.chain, BootChain::DirectControl);
    }

    #[test]
    fn test_probe_unresolvable() {
        let firmware = FakeFirmware::with_secure_boot(1);
        let boot = FakeBootConfig(LISTING.replace("BootCurrent: 0002", "BootCurrent: 0009"));
        let probe = SecureBootStateProbe::new(&firmware, &boot, "shim");

        assert!(matches!(
            probe.probe(),
            Err(Error::BootStateUnresolvable(_))
        ));
    }

    #[test]
    fn test_probe_malformed_active_entry() {
        let firmware = FakeFirmware::with_secure_boot(1);
        let boot = FakeBootConfig(
            "BootCurrent: 0001\nBoot0001* PXE\tMAC(001122334455,0)/IPv4(0.0.0.0)\n"
                .to_string(),
        );
        let probe = SecureBootStateProbe::new(&firmware, &boot, "shim");

        assert!(matches!(
            probe.probe(),
            Err(Error::MalformedDescriptor(_))
        ));
    }

    #[test]
    fn test_missing_secure_boot_variable_reads_disabled() {
        let firmware = FakeFirmware::default();
        let boot = FakeBootConfig(String::new());
        let probe = SecureBootStateProbe::new(&firmware, &boot, "shim");
        assert!(!probe.secure_boot_enabled().unwrap()); //#[allow_ci]
    }

    #[test]
    fn test_efivarfs_strips_attributes() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let path = dir
            .path()
            .join(format!("SecureBoot-{EFI_GLOBAL_VARIABLE}"));
        fs::write(&path, [0x06, 0x00, 0x00, 0x00, 0x01]).unwrap(); //#[allow_ci]

        let efivars = EfiVarFs::new(dir.path());
        assert_eq!(
            efivars.read_global("SecureBoot").unwrap(), //#[allow_ci]
            Some(vec![1])
        );
        assert_eq!(efivars.read_global("SetupMode").unwrap(), None); //#[allow_ci]
    }
}
