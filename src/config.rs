// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

//! Configuration management for sbaudit
//!
//! Sources, highest precedence first:
//!
//! 1. Command-line arguments
//! 2. Environment variables prefixed with `SBAUDIT_`, using `__` between
//!    section and key (e.g. `SBAUDIT_KEYS__SOON_DAYS=90`)
//! 3. TOML configuration files
//! 4. Built-in defaults
//!
//! Configuration files are optional. Searched locations:
//! - explicit `--config` path (must exist)
//! - `sbaudit.toml` (current directory)
//! - `~/.config/sbaudit/config.toml`
//! - `$XDG_CONFIG_HOME/sbaudit/config.toml`
//! - `/etc/sbaudit/sbaudit.conf`
//!
//! ## Example Configuration File
//!
//! ```toml
//! [boot]
//! loader_name = "shim"
//!
//! [update]
//! search_roots = ["/boot/efi", "/usr/lib/shim"]
//! platform_tag = "x64"
//!
//! [keys]
//! local_certificate = "/etc/refind.d/keys/refind_local.crt"
//! soon_days = 365
//! ```

use crate::expiration::DEFAULT_SOON_DAYS;
use crate::Cli;
use config::{ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the configuration file that was loaded, if any
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
    pub boot: BootConfig,
    pub update: UpdateConfig,
    pub keys: KeysConfig,
}

/// Firmware and boot manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfig {
    /// efivarfs mount point
    pub efivars_dir: String,
    /// Name identifying a shim first stage loader in a boot entry
    pub loader_name: String,
    /// Boot manager query tool
    pub efibootmgr: String,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            efivars_dir: "/sys/firmware/efi/efivars".to_string(),
            loader_name: "shim".to_string(),
            efibootmgr: "efibootmgr".to_string(),
        }
    }
}

/// Loader update search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Directories scanned for newer loaders
    pub search_roots: Vec<String>,
    /// Used when the boot partition cannot be resolved from its GUID
    pub esp_mount: String,
    /// EFI architecture suffix, e.g. `x64` in `mmx64.efi`
    pub platform_tag: String,
    /// Case-insensitive glob matched against loader file names
    pub loader_pattern: String,
    pub companion_prefix: String,
    pub companion_suffix: String,
    /// File names containing this tag are backups and never candidates
    pub backup_tag: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            search_roots: vec![
                "/boot/efi".to_string(),
                "/usr/lib/shim".to_string(),
                "/usr/share/shim-signed".to_string(),
                "/usr/share/shim".to_string(),
            ],
            esp_mount: "/boot/efi".to_string(),
            platform_tag: default_platform_tag(),
            loader_pattern: "shim*.efi".to_string(),
            companion_prefix: "mm".to_string(),
            companion_suffix: ".efi".to_string(),
            backup_tag: "backup".to_string(),
        }
    }
}

/// Key audit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Locally generated signing certificate (PEM)
    pub local_certificate: String,
    /// Certificates expiring within this many days are flagged
    pub soon_days: u32,
    /// Key store query tool
    pub mokutil: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            local_certificate: "/etc/refind.d/keys/refind_local.crt"
                .to_string(),
            soon_days: DEFAULT_SOON_DAYS,
            mokutil: "mokutil".to_string(),
        }
    }
}

/// EFI file name suffix for the architecture this binary was built for
pub fn default_platform_tag() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "aa64",
        "arm" => "arm",
        "riscv64" => "riscv64",
        "loongarch64" => "loongarch64",
        other => other,
    }
    .to_string()
}

impl Config {
    /// Load configuration from defaults, files and environment.
    ///
    /// An explicit `config_path` must exist; otherwise missing files are
    /// skipped silently.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        if let Some(explicit_path) = config_path {
            if !PathBuf::from(explicit_path).exists() {
                return Err(ConfigError::Message(format!(
                    "Specified configuration file not found: {explicit_path}"
                )));
            }
        }

        let mut loaded_path: Option<PathBuf> = None;
        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                log::debug!("Loading config from: {}", path.display());
                if loaded_path.is_none() {
                    loaded_path = Some(path.clone());
                }
                builder = builder.add_source(
                    File::from(path).format(FileFormat::Toml).required(false),
                );
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SBAUDIT")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("update.search_roots")
                .try_parsing(true),
        );

        let mut config: Config = builder.build()?.try_deserialize()?;
        if loaded_path.is_none() {
            log::info!("No configuration files found, using defaults and environment variables");
        }
        config.loaded_from = loaded_path;

        Ok(config)
    }

    /// Apply command-line argument overrides
    pub fn with_cli_overrides(mut self, cli: &Cli) -> Self {
        if !cli.search_root.is_empty() {
            self.update.search_roots = cli.search_root.clone();
        }
        if let Some(ref tag) = cli.platform_tag {
            self.update.platform_tag = tag.clone();
        }
        if let Some(days) = cli.soon_days {
            self.keys.soon_days = days;
        }
        self
    }

    /// Paths in the order they are merged; later files override earlier
    /// ones, so the most specific location comes last.
    fn get_config_paths(config_path: Option<&str>) -> Vec<PathBuf> {
        if let Some(path) = config_path {
            return vec![PathBuf::from(path)];
        }

        let mut paths = vec![PathBuf::from("/etc/sbaudit/sbaudit.conf")];
        if let Some(xdg_config) = std::env::var_os("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg_config).join("sbaudit/config.toml"));
        }
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".config/sbaudit/config.toml"));
        }
        paths.push(PathBuf::from("sbaudit.toml"));
        paths
    }

    pub fn search_roots(&self) -> Vec<PathBuf> {
        self.update.search_roots.iter().map(PathBuf::from).collect()
    }

    /// Validate the configuration for correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update.search_roots.iter().all(|r| r.trim().is_empty()) {
            return Err(ConfigError::Message(
                "update.search_roots must name at least one directory"
                    .to_string(),
            ));
        }
        if self.update.platform_tag.trim().is_empty() {
            return Err(ConfigError::Message(
                "update.platform_tag cannot be empty".to_string(),
            ));
        }
        if self.update.loader_pattern.trim().is_empty() {
            return Err(ConfigError::Message(
                "update.loader_pattern cannot be empty".to_string(),
            ));
        }
        if self.keys.soon_days == 0 {
            return Err(ConfigError::Message(
                "keys.soon_days must be greater than zero".to_string(),
            ));
        }
        if self.boot.loader_name.trim().is_empty() {
            return Err(ConfigError::Message(
                "boot.loader_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.boot.loader_name, "shim");
        assert_eq!(config.update.loader_pattern, "shim*.efi");
        assert_eq!(config.update.companion_prefix, "mm");
        assert_eq!(config.keys.soon_days, 365);
        assert!(config.update.search_roots.contains(&"/boot/efi".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_platform_tag() {
        let tag = default_platform_tag();
        assert!(!tag.is_empty());
        if cfg!(target_arch = "x86_64") {
            assert_eq!(tag, "x64");
        }
    }

    #[test]
    fn test_load_config_from_toml() {
        let toml_content = r#"
[update]
search_roots = ["/srv/esp", "/opt/shim"]
platform_tag = "aa64"

[keys]
soon_days = 90
local_certificate = "/etc/keys/db.crt"
"#;
        let mut temp_file = NamedTempFile::new().unwrap(); //#[allow_ci]
        temp_file.write_all(toml_content.as_bytes()).unwrap(); //#[allow_ci]
        temp_file.flush().unwrap(); //#[allow_ci]

        let config =
            Config::load(Some(temp_file.path().to_str().unwrap())).unwrap(); //#[allow_ci]

        assert_eq!(config.update.search_roots, ["/srv/esp", "/opt/shim"]);
        assert_eq!(config.update.platform_tag, "aa64");
        assert_eq!(config.keys.soon_days, 90);
        assert_eq!(config.keys.local_certificate, "/etc/keys/db.crt");
        // Untouched sections keep their defaults
        assert_eq!(config.boot.efibootmgr, "efibootmgr");
        assert_eq!(config.update.backup_tag, "backup");
        assert_eq!(config.loaded_from, Some(temp_file.path().to_path_buf()));
    }

    #[test]
    fn test_load_config_explicit_file_not_found() {
        let result = Config::load(Some("/nonexistent/path/sbaudit.toml"));
        let error_msg = result.unwrap_err().to_string(); //#[allow_ci]
        assert!(error_msg.contains("Specified configuration file not found"));
    }

    #[test]
    fn test_get_config_paths_explicit() {
        let paths = Config::get_config_paths(Some("/custom/path.toml"));
        assert_eq!(paths, [PathBuf::from("/custom/path.toml")]);
    }

    #[test]
    fn test_get_config_paths_standard() {
        let paths = Config::get_config_paths(None);
        assert_eq!(paths[0], PathBuf::from("/etc/sbaudit/sbaudit.conf"));
        assert_eq!(paths.last(), Some(&PathBuf::from("sbaudit.toml")));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.update.search_roots = vec![" ".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.update.platform_tag = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.keys.soon_days = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.boot.loader_name = String::new();
        assert!(config.validate().is_err());
    }
}
