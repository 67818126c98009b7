use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CertificateStatus;

/// One designated co-signer of a multi-party certificate.
///
/// Stored camelCase; older rows written with PascalCase keys still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerState {
    #[serde(alias = "IssuerAddress")]
    pub issuer_address: String,
    #[serde(alias = "IssuerName")]
    pub issuer_name: String,
    #[serde(alias = "IsSigned", default)]
    pub is_signed: bool,
    #[serde(alias = "SignedDate", default)]
    pub signed_date: Option<DateTime<Utc>>,
}

impl SignerState {
    pub fn unsigned(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            issuer_address: address.into(),
            issuer_name: name.into(),
            is_signed: false,
            signed_date: None,
        }
    }
}

/// Ordered signer list of a multi-sign certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(Vec<SignerState>);

impl Roster {
    pub fn new(entries: Vec<SignerState>) -> Self {
        Self(entries)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> String {
        // A Vec of plain structs cannot fail to serialize.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn entries(&self) -> &[SignerState] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.0.iter().any(|s| s.issuer_address == address)
    }

    /// Marks every entry for `address` as signed at `at`. Returns whether any
    /// entry matched.
    pub fn mark_signed(&mut self, address: &str, at: DateTime<Utc>) -> bool {
        let mut matched = false;
        for entry in self.0.iter_mut().filter(|s| s.issuer_address == address) {
            entry.is_signed = true;
            entry.signed_date = Some(at);
            matched = true;
        }
        matched
    }

    pub fn is_complete(&self) -> bool {
        self.0.iter().all(|s| s.is_signed)
    }

    /// Status a multi-sign certificate takes after a signature is applied.
    pub fn aggregate_status(&self) -> CertificateStatus {
        if self.is_complete() {
            CertificateStatus::Signed
        } else {
            CertificateStatus::Pending
        }
    }
}

/// Splits a comma-separated signer list: trims entries, drops blanks and
/// repeated addresses, keeps the caller's order.
pub fn parse_signer_addresses(raw: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        let part = part.trim();
        if part.is_empty() || out.iter().any(|a| a == part) {
            continue;
        }
        out.push(part.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(addresses: &[&str]) -> Roster {
        Roster::new(
            addresses
                .iter()
                .map(|a| SignerState::unsigned(*a, format!("name-{a}")))
                .collect(),
        )
    }

    #[test]
    fn status_tracks_partial_and_full_completion() {
        for size in 1..=3 {
            let addresses: Vec<String> = (0..size).map(|i| format!("addr{i}")).collect();
            let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
            let mut r = roster(&refs);

            for (i, addr) in addresses.iter().enumerate() {
                assert!(r.mark_signed(addr, Utc::now()));
                let expected = if i + 1 == size {
                    CertificateStatus::Signed
                } else {
                    CertificateStatus::Pending
                };
                assert_eq!(r.aggregate_status(), expected, "size={size} signed={}", i + 1);
            }
        }
    }

    #[test]
    fn marking_unknown_address_changes_nothing() {
        let mut r = roster(&["a", "b"]);
        assert!(!r.mark_signed("zzz", Utc::now()));
        assert!(r.entries().iter().all(|s| !s.is_signed));
        assert_eq!(r.aggregate_status(), CertificateStatus::Pending);
    }

    #[test]
    fn json_uses_camel_case_and_reads_legacy_pascal_case() {
        let r = roster(&["addr1"]);
        let json = r.to_json();
        assert!(json.contains("\"issuerAddress\":\"addr1\""));
        assert!(json.contains("\"isSigned\":false"));
        assert_eq!(Roster::from_json(&json).unwrap(), r);

        let legacy = r#"[{"IssuerAddress":"x","IssuerName":"X","IsSigned":true,"SignedDate":null}]"#;
        let parsed = Roster::from_json(legacy).unwrap();
        assert!(parsed.contains("x"));
        assert!(parsed.is_complete());
    }

    #[test]
    fn blank_json_is_an_empty_roster() {
        assert!(Roster::from_json("").unwrap().is_empty());
    }

    #[test]
    fn signer_list_is_trimmed_and_deduplicated() {
        assert_eq!(
            parse_signer_addresses(Some(" a, b,,a , c ")),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_signer_addresses(Some(" , ")).is_empty());
        assert!(parse_signer_addresses(None).is_empty());
    }
}
