//! Signature block generation.
//!
//! The signature block covers the finalized region: the metadata header
//! followed by the compressed payload. It always records the region's size and
//! SHA-256 digest, and optionally one detached signature over that digest.

use std::io::{self, Read, Seek, SeekFrom};

use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pkgwright_schema::{Header, SigTag, Sha256Digest, Tag};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("{0} signing requires a pass-phrase (set PKGWRIGHT_SIGNING_KEY)")]
    MissingSecret(SignatureKind),

    #[error("invalid {kind} key: {reason}")]
    InvalidKey {
        kind: SignatureKind,
        reason: String,
    },

    #[error("signature verification failed: {0}")]
    Verify(String),

    #[error("signed region is {0} bytes, larger than a 32-bit size tag allows")]
    TooLarge(u64),

    #[error("couldn't read signed region: {0}")]
    Io(#[from] io::Error),
}

/// Which detached signature, if any, goes into the signature block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureKind {
    /// Size and digest only.
    #[default]
    None,
    /// Ed25519 over the region's SHA-256.
    Ed25519,
}

impl std::fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Ed25519 => f.write_str("ed25519"),
        }
    }
}

/// Produces one signature record from the region digest.
pub trait RegionSigner {
    /// Signature-block tag the record is stored under.
    fn tag(&self) -> Tag;

    /// Sign the region's SHA-256.
    fn sign(&self, digest: &[u8; 32]) -> Vec<u8>;
}

/// Ed25519 signer keyed by a base64-encoded 32-byte secret.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Decode a base64 secret key, as printed by `pkgwright keygen`.
    pub fn from_base64(secret: &str) -> Result<Self, SignatureError> {
        let invalid = |reason: String| SignatureError::InvalidKey {
            kind: SignatureKind::Ed25519,
            reason,
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(secret.trim())
            .map_err(|e| invalid(format!("not base64: {e}")))?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| invalid(format!("expected 32 bytes, got {}", bytes.len())))?;

        Ok(Self {
            key: SigningKey::from_bytes(&key),
        })
    }

    /// The matching public key, base64-encoded.
    pub fn public_key_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.key.verifying_key().to_bytes())
    }
}

impl RegionSigner for Ed25519Signer {
    fn tag(&self) -> Tag {
        SigTag::ED25519
    }

    fn sign(&self, digest: &[u8; 32]) -> Vec<u8> {
        self.key.sign(digest).to_bytes().to_vec()
    }
}

/// Build the signer for `kind`, or `None` when no signature is wanted.
pub fn signer_for(
    kind: SignatureKind,
    secret: Option<&str>,
) -> Result<Option<Box<dyn RegionSigner>>, SignatureError> {
    match kind {
        SignatureKind::None => Ok(None),
        SignatureKind::Ed25519 => {
            let secret = secret
                .filter(|s| !s.trim().is_empty())
                .ok_or(SignatureError::MissingSecret(kind))?;
            Ok(Some(Box::new(Ed25519Signer::from_base64(secret)?)))
        }
    }
}

/// Compute the signature block for `region`.
///
/// The region is rewound and read once from the start. The signer is built
/// before any bytes are read, so a bad secret fails fast.
///
/// # Errors
///
/// Returns [`SignatureError`] for a missing or unusable secret, an unreadable
/// region, or a region too large for the 32-bit size tag.
pub fn generate_signature<R: Read + Seek>(
    region: &mut R,
    kind: SignatureKind,
    secret: Option<&str>,
) -> Result<Header, SignatureError> {
    let signer = signer_for(kind, secret)?;

    region.seek(SeekFrom::Start(0))?;
    let (digest, size) = Sha256Digest::compute_reader(region)?;
    let size32 = u32::try_from(size).map_err(|_| SignatureError::TooLarge(size))?;

    let mut sig = Header::new();
    sig.set(SigTag::SIZE, size32);
    sig.set(SigTag::SHA256, digest.as_str());
    if let Some(signer) = signer {
        sig.set(signer.tag(), signer.sign(&digest.to_bytes()));
    }

    tracing::info!(kind = %kind, size, digest = %digest, "generated signature block");
    Ok(sig)
}

/// Check an Ed25519 record against a base64 public key.
pub fn verify_ed25519(
    public_key: &str,
    digest: &[u8; 32],
    signature: &[u8],
) -> Result<(), SignatureError> {
    let invalid = |reason: String| SignatureError::InvalidKey {
        kind: SignatureKind::Ed25519,
        reason,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(public_key.trim())
        .map_err(|e| invalid(format!("not base64: {e}")))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| invalid(format!("expected 32 bytes, got {}", bytes.len())))?;
    let key = VerifyingKey::from_bytes(&bytes).map_err(|e| invalid(e.to_string()))?;

    let signature =
        Signature::from_slice(signature).map_err(|e| SignatureError::Verify(e.to_string()))?;
    key.verify(digest, &signature)
        .map_err(|e| SignatureError::Verify(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgwright_schema::TagValue;
    use std::io::Cursor;

    const SECRET: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

    #[test]
    fn size_and_digest_only_by_default() {
        let mut region = Cursor::new(b"header+payload".to_vec());
        region.set_position(5);

        let sig = generate_signature(&mut region, SignatureKind::None, None).unwrap();
        assert_eq!(sig.len(), 2);
        assert_eq!(sig.get_u32(SigTag::SIZE), Some(14));
        assert_eq!(
            sig.get_str(SigTag::SHA256),
            Some(Sha256Digest::compute(b"header+payload").as_str())
        );
    }

    #[test]
    fn ed25519_record_verifies() {
        let data = b"region bytes".to_vec();
        let sig = generate_signature(
            &mut Cursor::new(data.clone()),
            SignatureKind::Ed25519,
            Some(SECRET),
        )
        .unwrap();

        let Some(TagValue::Bin(record)) = sig.get(SigTag::ED25519) else {
            panic!("missing ed25519 record");
        };
        assert_eq!(record.len(), 64);

        let public = Ed25519Signer::from_base64(SECRET).unwrap().public_key_base64();
        let digest = Sha256Digest::compute(&data).to_bytes();
        verify_ed25519(&public, &digest, record).unwrap();

        let other = Sha256Digest::compute(b"tampered").to_bytes();
        assert!(matches!(
            verify_ed25519(&public, &other, record),
            Err(SignatureError::Verify(_))
        ));
    }

    #[test]
    fn ed25519_without_secret_fails() {
        let err = generate_signature(&mut Cursor::new(vec![1u8]), SignatureKind::Ed25519, None)
            .unwrap_err();
        assert!(matches!(err, SignatureError::MissingSecret(SignatureKind::Ed25519)));

        let err = generate_signature(&mut Cursor::new(vec![1u8]), SignatureKind::Ed25519, Some(" "))
            .unwrap_err();
        assert!(matches!(err, SignatureError::MissingSecret(_)));
    }

    #[test]
    fn malformed_secrets_are_rejected() {
        assert!(matches!(
            Ed25519Signer::from_base64("not base64!"),
            Err(SignatureError::InvalidKey { .. })
        ));
        assert!(matches!(
            Ed25519Signer::from_base64("AAAA"),
            Err(SignatureError::InvalidKey { .. })
        ));
    }

    #[test]
    fn kind_parses_from_config_names() {
        #[derive(Deserialize)]
        struct Wrap {
            kind: SignatureKind,
        }
        let w: Wrap = toml::from_str("kind = \"ed25519\"").unwrap();
        assert_eq!(w.kind, SignatureKind::Ed25519);
        assert_eq!(SignatureKind::default().to_string(), "none");
    }
}
