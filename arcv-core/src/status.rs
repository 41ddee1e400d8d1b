use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::HashAlgorithm;

/// Outcome of one verification run.
///
/// Built only through [`VerificationStatus::new`], so `is_verified` always
/// equals `errors.is_empty()`. Records read back from disk are checked for the
/// same property by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStatus {
    is_verified: bool,
    has_checksums: bool,
    errors: Vec<String>,
    checked_at: DateTime<Utc>,
    #[serde(default)]
    algorithm: Option<HashAlgorithm>,
    #[serde(default)]
    entries_checked: u64,
}

impl VerificationStatus {
    pub fn new(
        has_checksums: bool,
        errors: Vec<String>,
        algorithm: Option<HashAlgorithm>,
        entries_checked: u64,
    ) -> Self {
        Self {
            is_verified: errors.is_empty(),
            has_checksums,
            errors,
            checked_at: Utc::now(),
            algorithm,
            entries_checked,
        }
    }

    #[inline]
    pub fn is_verified(&self) -> bool {
        self.is_verified
    }

    /// Whether an external digest comparison took part in this run.
    #[inline]
    pub fn has_checksums(&self) -> bool {
        self.has_checksums
    }

    #[inline]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    #[inline]
    pub fn checked_at(&self) -> DateTime<Utc> {
        self.checked_at
    }

    #[inline]
    pub fn algorithm(&self) -> Option<HashAlgorithm> {
        self.algorithm
    }

    #[inline]
    pub fn entries_checked(&self) -> u64 {
        self.entries_checked
    }

    pub fn display_state(&self) -> DisplayState {
        DisplayState::from(Some(self))
    }

    /// True if the container itself could not be opened.
    pub fn has_container_error(&self) -> bool {
        self.errors.iter().any(|e| e.starts_with("container: "))
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.is_verified == self.errors.is_empty()
    }
}

/// What a user sees for an archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayState {
    Verified,
    Unverified,
    Failed,
}

impl DisplayState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Verified => "VERIFIED",
            Self::Unverified => "UNVERIFIED",
            Self::Failed => "FAILED",
        }
    }
}

impl From<Option<&VerificationStatus>> for DisplayState {
    fn from(status: Option<&VerificationStatus>) -> Self {
        match status {
            None => Self::Unverified,
            Some(s) if s.is_verified() => Self::Verified,
            Some(_) => Self::Failed,
        }
    }
}

impl std::fmt::Display for DisplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_iff_no_errors() {
        let ok = VerificationStatus::new(false, vec![], None, 3);
        assert!(ok.is_verified());
        assert_eq!(ok.display_state(), DisplayState::Verified);

        let bad = VerificationStatus::new(true, vec!["entry a: missing".into()], Some(HashAlgorithm::Sha256), 1);
        assert!(!bad.is_verified());
        assert!(bad.has_checksums());
        assert_eq!(bad.display_state().label(), "FAILED");
        assert!(!bad.has_container_error());
    }

    #[test]
    fn absent_record_is_unverified() {
        assert_eq!(DisplayState::from(None).label(), "UNVERIFIED");
    }

    #[test]
    fn serde_keeps_timestamp_exactly() {
        let s = VerificationStatus::new(false, vec!["container: end-of-central-directory record not found".into()], None, 0);
        let text = serde_json::to_string(&s).unwrap();
        let back: VerificationStatus = serde_json::from_str(&text).unwrap();
        assert_eq!(back, s);
        assert!(back.has_container_error());
    }
}
