//! Node identity: one secp256k1 key, persisted next to the binary.

use std::{fs, path::Path, str::FromStr};

use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use tracing::info;

/// Load the signing key from `path`, or generate one on first run.
///
/// The file holds the key as a single line of hex and is created readable by
/// the owner only.
pub fn load_or_create_signer(path: &Path) -> Result<PrivateKeySigner> {
    if path.exists() {
        let hex_key = fs::read_to_string(path)
            .with_context(|| format!("failed to read wallet {}", path.display()))?;
        return PrivateKeySigner::from_str(hex_key.trim())
            .with_context(|| format!("invalid wallet key in {}", path.display()));
    }

    let signer = PrivateKeySigner::random();
    write_key(path, &hex::encode(signer.to_bytes()))
        .with_context(|| format!("failed to write wallet {}", path.display()))?;
    info!("generated wallet {} at {}", signer.address(), path.display());
    Ok(signer)
}

#[cfg(unix)]
fn write_key(path: &Path, hex_key: &str) -> Result<()> {
    use std::{io::Write, os::unix::fs::OpenOptionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    writeln!(file, "{hex_key}")?;
    Ok(())
}

#[cfg(not(unix))]
fn write_key(path: &Path, hex_key: &str) -> Result<()> {
    fs::write(path, format!("{hex_key}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::load_or_create_signer;

    #[test]
    fn key_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("account-evm.data");

        let first = load_or_create_signer(&path).unwrap();
        assert!(path.exists());
        let second = load_or_create_signer(&path).unwrap();
        assert_eq!(first.address(), second.address());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("account-evm.data");
        load_or_create_signer(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("account-evm.data");
        std::fs::write(&path, "not hex\n").unwrap();

        assert!(load_or_create_signer(&path).is_err());
    }
}
