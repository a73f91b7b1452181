use crate::HandlerContext;
use gateway_core::sha256_hex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Deserialize)]
pub struct EvidenceUploadRequest {
    pub correlation_id: String,
    pub content_base64: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceMetadata {
    pub uri: String,
    pub sha256: String,
    pub size: usize,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceUploadResponse {
    pub ok: bool,
    pub evidence: EvidenceMetadata,
    pub correlation_id: String,
}

/// Where uploaded evidence attachments land. The gateway ships only a local
/// filesystem implementation; object-store backends are a deployment
/// concern outside this crate.
pub trait ArtifactStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> std::io::Result<()>;
}

pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)
    }
}

/// Builds the `memory://attachments/<id>/<sha256>` URI the strict evidence
/// validator requires. `<id>` must be all-ASCII-digits, so it is derived
/// from the content's own hash rather than the (non-numeric) correlation id.
fn attachment_uri(sha256: &str) -> (String, String) {
    let numeric_id = u64::from_str_radix(&sha256[..15], 16).unwrap_or(0).to_string();
    let key = format!("attachments/{numeric_id}/{sha256}");
    let uri = format!("memory://{key}");
    (key, uri)
}

pub async fn handle(
    ctx: &HandlerContext,
    req: EvidenceUploadRequest,
) -> Result<EvidenceUploadResponse, crate::HandlerError> {
    use base64::Engine;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.as_bytes())
        .map_err(|e| {
            crate::HandlerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
    let sha256 = sha256_hex(&bytes);
    let (key, uri) = attachment_uri(&sha256);

    let path = PathBuf::from(&ctx.artifact_store_root).join(&key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(&path).await?;
    file.write_all(&bytes).await?;

    Ok(EvidenceUploadResponse {
        ok: true,
        evidence: EvidenceMetadata {
            uri,
            sha256,
            size: bytes.len(),
            content_type: req.content_type,
        },
        correlation_id: req.correlation_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_uri_id_segment_is_all_ascii_digits() {
        let sha = sha256_hex(b"hello");
        let (key, uri) = attachment_uri(&sha);
        let id_segment = key.split('/').nth(1).unwrap();
        assert!(!id_segment.is_empty());
        assert!(id_segment.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(uri, format!("memory://{key}"));
    }

    #[test]
    fn attachment_uri_matches_strict_validator_shape() {
        let sha = sha256_hex(b"evidence payload");
        let (_, uri) = attachment_uri(&sha);
        let refs = vec![gateway_schemas::EvidenceRef {
            uri,
            sha256: Some(sha),
        }];
        assert!(gateway_policy::evidence::validate(&refs, gateway_schemas::EvidenceMode::Strict).is_ok());
    }
}
