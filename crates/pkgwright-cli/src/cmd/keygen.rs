//! Keygen command

use anyhow::{Context, Result, bail};
use base64::Engine;
use ed25519_dalek::SigningKey;
use rand::RngCore;
use std::io::Write;
use std::path::Path;

/// Generate an Ed25519 keypair. The secret goes to `output` when given,
/// otherwise to stdout.
pub fn keygen(output: Option<&Path>) -> Result<()> {
    let mut secret_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut secret_bytes);
    let signing_key = SigningKey::from_bytes(&secret_bytes);

    let secret_b64 = base64::engine::general_purpose::STANDARD.encode(signing_key.to_bytes());
    let public_b64 =
        base64::engine::general_purpose::STANDARD.encode(signing_key.verifying_key().to_bytes());

    match output {
        Some(path) => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            write_secret(path, &secret_b64)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Wrote: {}", path.display());
        }
        None => {
            println!("secret (set PKGWRIGHT_SIGNING_KEY): {secret_b64}");
        }
    }
    println!("public: {public_b64}");

    Ok(())
}

fn write_secret(path: &Path, secret: &str) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut f = options.open(path)?;
    f.write_all(secret.as_bytes())?;
    f.write_all(b"\n")
}
