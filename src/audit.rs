// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

//! Audit run orchestration.
//!
//! One run probes the boot chain, looks for a loader update, checks the
//! local signing key and audits the four enrolled key stores, in that
//! order. Every phase returns its own result; the caller folds the key
//! counts into an [`AuditSummary`] and derives [`Recommendation`]s. No
//! action is taken here: copying loaders, enrolling keys and rebooting
//! are left to the operator.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::expiration::{Classification, ExpirationThresholds};
use crate::key_listing::{self, KeyStore, KeyStoreKind, ListingAudit};
use crate::loader_update::{LoaderScan, LoaderUpdateSelector, UpdateDecision};
use crate::local_key::{self, LocalKeyStatus};
use crate::mount;
use crate::secure_boot_state::{
    BootChain, BootConfiguration, FirmwareVariables, SecureBootState,
    SecureBootStateProbe,
};
use chrono::{DateTime, Utc};
use log::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Key counts accumulated across the phases of one run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub total: usize,
    pub expired: usize,
    pub expiring_soon: usize,
}

impl AuditSummary {
    pub fn fold_listing(mut self, audit: &ListingAudit) -> Self {
        self.total += audit.total;
        self.expired += audit.expired;
        self.expiring_soon += audit.expiring_soon;
        self
    }

    pub fn fold_local(mut self, status: &LocalKeyStatus) -> Self {
        self.total += 1;
        match status.classification {
            Classification::Expired => self.expired += 1,
            Classification::ExpiringSoon => self.expiring_soon += 1,
            Classification::Valid => {}
        }
        self
    }
}

/// Follow-up action for the operator
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Recommendation {
    EnableSecureBoot,
    InstallLoaderUpdate {
        candidate: PathBuf,
        companion: PathBuf,
        target: PathBuf,
    },
    RenewLocalKeys {
        certificate: PathBuf,
        classification: Classification,
    },
    ReplaceEnrolledKeys {
        store: KeyStoreKind,
        expired: usize,
        expiring_soon: usize,
    },
}

/// Audit of one key store; `error` is set when the store could not be
/// queried
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreAudit {
    pub store: KeyStoreKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<ListingAudit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full report of one audit run
#[derive(Clone, Debug, Serialize)]
pub struct AuditReport {
    pub reference_time: DateTime<Utc>,
    pub soon_days: i64,
    pub boot: SecureBootState,
    /// False when the run stopped because Secure Boot is disabled
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader_update: Option<LoaderScan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_key: Option<LocalKeyStatus>,
    pub key_stores: Vec<StoreAudit>,
    pub summary: AuditSummary,
    pub recommendations: Vec<Recommendation>,
    pub warnings: Vec<String>,
}

pub struct Auditor<'a> {
    config: &'a Config,
    firmware: &'a dyn FirmwareVariables,
    boot_config: &'a dyn BootConfiguration,
    key_store: &'a dyn KeyStore,
    thresholds: ExpirationThresholds,
}

impl<'a> Auditor<'a> {
    pub fn new(
        config: &'a Config,
        firmware: &'a dyn FirmwareVariables,
        boot_config: &'a dyn BootConfiguration,
        key_store: &'a dyn KeyStore,
        thresholds: ExpirationThresholds,
    ) -> Self {
        Self {
            config,
            firmware,
            boot_config,
            key_store,
            thresholds,
        }
    }

    pub fn probe(&self) -> Result<SecureBootState> {
        SecureBootStateProbe::new(
            self.firmware,
            self.boot_config,
            &self.config.boot.loader_name,
        )
        .probe()
    }

    /// Mount point of the partition holding the active loader
    fn boot_partition(&self, state: &SecureBootState) -> PathBuf {
        match mount::partition_mount_point(&state.active_entry.partition_id)
        {
            Ok(mount_point) => mount_point,
            Err(e) => {
                warn!(
                    "{}; falling back to {}",
                    e, self.config.update.esp_mount
                );
                PathBuf::from(&self.config.update.esp_mount)
            }
        }
    }

    pub fn selector(&self) -> Result<LoaderUpdateSelector> {
        let update = &self.config.update;
        LoaderUpdateSelector::new(
            self.config.search_roots(),
            &update.loader_pattern,
            &update.companion_prefix,
            &update.platform_tag,
            &update.companion_suffix,
            &update.backup_tag,
        )
    }

    /// Look for a newer paired loader than the active one
    pub fn scan_loader(&self, state: &SecureBootState) -> Result<LoaderScan> {
        let mount_point = self.boot_partition(state);
        self.selector()?
            .select_update(&state.active_entry, &mount_point)
    }

    pub fn check_local_key(&self) -> Result<Option<LocalKeyStatus>> {
        local_key::check_local_key(
            Path::new(&self.config.keys.local_certificate),
            &self.thresholds,
        )
    }

    pub fn audit_store(&self, kind: KeyStoreKind) -> StoreAudit {
        match key_listing::audit_store(self.key_store, kind, &self.thresholds)
        {
            Ok(audit) => StoreAudit {
                store: kind,
                audit: Some(audit),
                error: None,
            },
            Err(e) => {
                warn!("Unable to list {} keys: {}", kind, e);
                StoreAudit {
                    store: kind,
                    audit: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Run every phase.
    ///
    /// Only a failure to identify the active boot entry aborts the run.
    /// With Secure Boot disabled the run stops after the boot probe unless
    /// `allow_insecure` is set.
    pub fn run(&self, allow_insecure: bool) -> Result<AuditReport> {
        let boot = self.probe()?;
        let mut report = AuditReport {
            reference_time: self.thresholds.now(),
            soon_days: self.thresholds.soon_days(),
            boot,
            completed: false,
            loader_update: None,
            local_key: None,
            key_stores: Vec::new(),
            summary: AuditSummary::default(),
            recommendations: Vec::new(),
            warnings: Vec::new(),
        };

        if !report.boot.secure_boot_enabled {
            report.recommendations.push(Recommendation::EnableSecureBoot);
            if !allow_insecure {
                warn!("Secure Boot is disabled, stopping the audit");
                report.warnings.push(
                    "Secure Boot is disabled; rerun with --allow-insecure to audit anyway"
                        .to_string(),
                );
                return Ok(report);
            }
        }

        match report.boot.chain {
            BootChain::ShimMediated => match self.scan_loader(&report.boot) {
                Ok(scan) => report.loader_update = Some(scan),
                Err(e) => {
                    warn!("Loader update scan failed: {}", e);
                    report.warnings.push(format!("loader update scan: {e}"));
                }
            },
            BootChain::DirectControl => {
                info!("Boot manager started without shim, skipping loader update scan");
            }
        }

        match self.check_local_key() {
            Ok(status) => report.local_key = status,
            Err(e) => {
                warn!("Local key check failed: {}", e);
                report.warnings.push(format!("local key: {e}"));
            }
        }

        for kind in KeyStoreKind::ALL {
            let store = self.audit_store(kind);
            if let Some(error) = &store.error {
                report.warnings.push(format!("{kind} keys: {error}"));
            }
            if let Some(audit) = &store.audit {
                report
                    .warnings
                    .extend(audit.warnings.iter().map(|w| format!("{kind} {w}")));
            }
            report.key_stores.push(store);
        }

        report.summary = summarize(report.local_key.as_ref(), &report.key_stores);
        report.recommendations.extend(recommend(&report));
        report.completed = true;
        Ok(report)
    }
}

/// Fold the per-phase counts of one run
pub fn summarize(
    local_key: Option<&LocalKeyStatus>,
    stores: &[StoreAudit],
) -> AuditSummary {
    let summary = match local_key {
        Some(status) => AuditSummary::default().fold_local(status),
        None => AuditSummary::default(),
    };
    stores
        .iter()
        .filter_map(|s| s.audit.as_ref())
        .fold(summary, AuditSummary::fold_listing)
}

fn recommend(report: &AuditReport) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if let Some(LoaderScan {
        current_loader,
        decision: UpdateDecision::Update(candidate),
        ..
    }) = &report.loader_update
    {
        if let Some(companion) = &candidate.companion {
            recommendations.push(Recommendation::InstallLoaderUpdate {
                candidate: candidate.path.clone(),
                companion: companion.clone(),
                target: current_loader.clone(),
            });
        }
    }

    if let Some(status) = &report.local_key {
        if status.classification != Classification::Valid {
            recommendations.push(Recommendation::RenewLocalKeys {
                certificate: status.certificate.clone(),
                classification: status.classification,
            });
        }
    }

    for store in &report.key_stores {
        if let Some(audit) = &store.audit {
            if audit.expired > 0 || audit.expiring_soon > 0 {
                recommendations.push(Recommendation::ReplaceEnrolledKeys {
                    store: store.store,
                    expired: audit.expired,
                    expiring_soon: audit.expiring_soon,
                });
            }
        }
    }

    recommendations
}

/// Parse a reference time given on the command line
pub(crate) fn parse_reference_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("invalid time '{text}': {e}")))
}
