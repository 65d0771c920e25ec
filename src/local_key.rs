// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

use crate::error::{Error, Result};
use crate::expiration::{parse_not_after, Classification, ExpirationThresholds};
use chrono::{DateTime, Utc};
use log::*;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Expiration status of the locally generated signing certificate
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LocalKeyStatus {
    pub certificate: PathBuf,
    pub subject: String,
    pub not_after: DateTime<Utc>,
    pub classification: Classification,
}

/// Check the local signing certificate at `path`.
///
/// Returns `Ok(None)` when no local certificate exists, which simply means
/// the boot manager is signed by a distribution key.
pub(crate) fn check_local_key(
    path: &Path,
    thresholds: &ExpirationThresholds,
) -> Result<Option<LocalKeyStatus>> {
    let pem = match fs::read(path) {
        Ok(pem) => pem,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No local signing certificate at {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(Error::from_io_at(e, path, "local-key")),
    };

    let cert = X509::from_pem(&pem)?;
    // OpenSSL renders ASN1_TIME as e.g. "Jan  1 00:00:00 2030 GMT"
    let not_after = parse_not_after(&cert.not_after().to_string())?;
    let classification = thresholds.classify(not_after);
    let subject = common_name(cert.subject_name())
        .unwrap_or_else(|| "(no common name)".to_string());

    match classification {
        Classification::Expired => {
            warn!("Local key {} expired on {}", path.display(), not_after)
        }
        Classification::ExpiringSoon => {
            warn!("Local key {} expires on {}", path.display(), not_after)
        }
        Classification::Valid => {
            info!("Local key {} valid until {}", path.display(), not_after)
        }
    }

    Ok(Some(LocalKeyStatus {
        certificate: path.to_path_buf(),
        subject,
        not_after,
        classification,
    }))
}

fn common_name(name: &X509NameRef) -> Option<String> {
    let entry = name.entries_by_nid(Nid::COMMONNAME).next()?;
    let cn = entry.data().as_utf8().ok()?;
    Some(cn.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::X509NameBuilder;

    // Self-signed certificate valid for `days` from now
    fn self_signed(days: u32) -> Vec<u8> {
        self_signed_named(days, Nid::COMMONNAME, "Locally generated key")
    }

    fn self_signed_named(days: u32, nid: Nid, value: &str) -> Vec<u8> {
        let rsa = Rsa::generate(2048).unwrap(); //#[allow_ci]
        let key = PKey::from_rsa(rsa).unwrap(); //#[allow_ci]

        let mut name = X509NameBuilder::new().unwrap(); //#[allow_ci]
        name.append_entry_by_nid(nid, value).unwrap(); //#[allow_ci]
        let name = name.build();

        let mut builder = X509::builder().unwrap(); //#[allow_ci]
        builder.set_version(2).unwrap(); //#[allow_ci]
        let mut serial = BigNum::new().unwrap(); //#[allow_ci]
        serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap(); //#[allow_ci]
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap()) //#[allow_ci]
            .unwrap(); //#[allow_ci]
        builder.set_subject_name(&name).unwrap(); //#[allow_ci]
        builder.set_issuer_name(&name).unwrap(); //#[allow_ci]
        builder.set_pubkey(&key).unwrap(); //#[allow_ci]
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap()) //#[allow_ci]
            .unwrap(); //#[allow_ci]
        builder
            .set_not_after(&Asn1Time::days_from_now(days).unwrap()) //#[allow_ci]
            .unwrap(); //#[allow_ci]
        builder.sign(&key, MessageDigest::sha256()).unwrap(); //#[allow_ci]
        builder.build().to_pem().unwrap() //#[allow_ci]
    }

    #[test]
    fn test_missing_certificate_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let status = check_local_key(
            &dir.path().join("refind_local.crt"),
            &ExpirationThresholds::default(),
        )
        .unwrap(); //#[allow_ci]
        assert!(status.is_none());
    }

    #[test]
    fn test_local_key_classification() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let short = dir.path().join("short.crt");
        let long = dir.path().join("long.crt");
        fs::write(&short, self_signed(30)).unwrap(); //#[allow_ci]
        fs::write(&long, self_signed(3650)).unwrap(); //#[allow_ci]

        let thresholds = ExpirationThresholds::default();
        let status = check_local_key(&short, &thresholds).unwrap().unwrap(); //#[allow_ci]
        assert_eq!(status.classification, Classification::ExpiringSoon);
        assert_eq!(status.subject, "Locally generated key");

        let status = check_local_key(&long, &thresholds).unwrap().unwrap(); //#[allow_ci]
        assert_eq!(status.classification, Classification::Valid);

        // Same certificate, audited long after it lapsed
        let later = ExpirationThresholds::new(
            Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(), //#[allow_ci]
            365,
        );
        let status = check_local_key(&long, &later).unwrap().unwrap(); //#[allow_ci]
        assert_eq!(status.classification, Classification::Expired);
    }

    #[test]
    fn test_subject_common_name() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let path = dir.path().join("org-only.crt");
        fs::write(
            &path,
            self_signed_named(3650, Nid::ORGANIZATIONNAME, "Example Org"),
        )
        .unwrap(); //#[allow_ci]

        let thresholds = ExpirationThresholds::default();
        let status = check_local_key(&path, &thresholds).unwrap().unwrap(); //#[allow_ci]
        assert_eq!(status.subject, "(no common name)");

        let cert = X509::from_pem(&self_signed(30)).unwrap(); //#[allow_ci]
        assert_eq!(
            common_name(cert.subject_name()).as_deref(),
            Some("Locally generated key")
        );
    }

    #[test]
    fn test_garbage_certificate() {
        let dir = tempfile::tempdir().unwrap(); //#[allow_ci]
        let path = dir.path().join("bad.crt");
        fs::write(&path, b"not a certificate").unwrap(); //#[allow_ci]
        assert!(matches!(
            check_local_key(&path, &ExpirationThresholds::default()),
            Err(Error::Crypto(_))
        ));
    }
}
