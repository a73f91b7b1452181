use gateway_schemas::{EvidenceMode, EvidenceRef};
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceValidationError {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedEvidence {
    pub refs: Vec<EvidenceRef>,
}

fn sha256_regex() -> Regex {
    Regex::new(r"^[a-f0-9]{64}$").expect("sha256 pattern must compile")
}

/// `memory://attachments/<id>/<sha256>` — the only URI shape accepted in
/// strict mode. Compat mode accepts any non-empty URI.
fn is_well_formed_attachment_uri(uri: &str) -> bool {
    let Some(rest) = uri.strip_prefix("memory://attachments/") else {
        return false;
    };
    let mut parts = rest.splitn(2, '/');
    let (Some(id_part), Some(sha_part)) = (parts.next(), parts.next()) else {
        return false;
    };
    if id_part.is_empty() || !id_part.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    sha256_regex().is_match(sha_part)
}

/// Validates a set of evidence refs against the configured mode. `compat`
/// only requires a non-empty URI; `strict` additionally requires the
/// `memory://attachments/<id>/<sha256>` shape and a well-formed sha256 hash
/// when `sha256` is present.
pub fn validate(
    evidence: &[EvidenceRef],
    mode: EvidenceMode,
) -> Result<ValidatedEvidence, EvidenceValidationError> {
    for (index, ev) in evidence.iter().enumerate() {
        if ev.uri.trim().is_empty() {
            return Err(EvidenceValidationError {
                index,
                reason: "uri must not be empty".to_string(),
            });
        }

        if let Some(sha) = &ev.sha256 {
            if !sha256_regex().is_match(sha) {
                return Err(EvidenceValidationError {
                    index,
                    reason: "sha256 must be 64 lowercase hex characters".to_string(),
                });
            }
        }

        if mode == EvidenceMode::Strict && !is_well_formed_attachment_uri(&ev.uri) {
            return Err(EvidenceValidationError {
                index,
                reason: "uri must match memory://attachments/<id>/<sha256> in strict mode"
                    .to_string(),
            });
        }
    }

    Ok(ValidatedEvidence {
        refs: evidence.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(uri: &str, sha: Option<&str>) -> EvidenceRef {
        EvidenceRef {
            uri: uri.to_string(),
            sha256: sha.map(|s| s.to_string()),
        }
    }

    const VALID_SHA: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85";

    #[test]
    fn compat_mode_accepts_any_nonempty_uri() {
        let refs = vec![ev("https://example.com/doc", None)];
        assert!(validate(&refs, EvidenceMode::Compat).is_ok());
    }

    #[test]
    fn compat_mode_rejects_empty_uri() {
        let refs = vec![ev("", None)];
        let err = validate(&refs, EvidenceMode::Compat).unwrap_err();
        assert_eq!(err.index, 0);
    }

    #[test]
    fn rejects_malformed_sha256_in_any_mode() {
        let refs = vec![ev("https://example.com/doc", Some("not-a-hash"))];
        let err = validate(&refs, EvidenceMode::Compat).unwrap_err();
        assert!(err.reason.contains("sha256"));
    }

    #[test]
    fn strict_mode_accepts_well_formed_attachment_uri() {
        let uri = format!("memory://attachments/42/{VALID_SHA}");
        let refs = vec![ev(&uri, Some(VALID_SHA))];
        assert!(validate(&refs, EvidenceMode::Strict).is_ok());
    }

    #[test]
    fn strict_mode_rejects_non_attachment_uri() {
        let refs = vec![ev("https://example.com/doc", None)];
        let err = validate(&refs, EvidenceMode::Strict).unwrap_err();
        assert!(err.reason.contains("strict mode"));
    }

    #[test]
    fn strict_mode_rejects_non_numeric_attachment_id() {
        let uri = format!("memory://attachments/abc/{VALID_SHA}");
        let refs = vec![ev(&uri, None)];
        assert!(validate(&refs, EvidenceMode::Strict).is_err());
    }

    #[test]
    fn error_reports_index_of_first_bad_ref() {
        let uri = format!("memory://attachments/1/{VALID_SHA}");
        let refs = vec![ev(&uri, None), ev("", None)];
        let err = validate(&refs, EvidenceMode::Strict).unwrap_err();
        assert_eq!(err.index, 1);
    }
}
