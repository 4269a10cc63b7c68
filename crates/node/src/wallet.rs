//! File-backed keypairs for the `wallet` and `sign-tx` subcommands.
//!
//! A wallet file holds the hex-encoded 32-byte ed25519 secret on one line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use quarry_crypto::{sign_tx, CryptoError, Keypair, Signer};
use quarry_types::{Address, Transaction};

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("wallet io: {0}")]
    Io(#[from] std::io::Error),
    #[error("wallet already exists at {0}")]
    Exists(PathBuf),
    #[error("wallet key: {0}")]
    Key(#[from] CryptoError),
}

/// Generate a fresh keypair and write it to `path`. Never overwrites.
pub fn create(path: &Path) -> Result<Keypair, WalletError> {
    let keypair = Keypair::generate();

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(WalletError::Exists(path.to_path_buf()))
        }
        Err(err) => return Err(err.into()),
    };
    writeln!(file, "{}", keypair.to_hex())?;
    file.sync_all()?;
    Ok(keypair)
}

pub fn load(path: &Path) -> Result<Keypair, WalletError> {
    let content = std::fs::read_to_string(path)?;
    Ok(Keypair::from_hex(content.trim())?)
}

/// Build and sign a transfer from `keypair`'s address, stamped with the
/// current time.
pub fn signed_transfer(
    keypair: &Keypair,
    to: Address,
    amount: u64,
    fee: u64,
    nonce: u64,
) -> Transaction {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let mut tx = Transaction::transfer(keypair.address(), to, amount, fee, nonce, timestamp);
    sign_tx(keypair, &mut tx);
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    use quarry_crypto::verify_tx;

    #[test]
    fn create_then_load_round_trips_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.key");

        let created = create(&path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(created.address(), loaded.address());
        assert_eq!(created.to_hex(), loaded.to_hex());
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.key");

        let first = create(&path).unwrap();
        assert!(matches!(create(&path), Err(WalletError::Exists(_))));
        assert_eq!(load(&path).unwrap().address(), first.address());
    }

    #[cfg(unix)]
    #[test]
    fn wallet_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.key");
        create(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.key");
        std::fs::write(&path, "not a key\n").unwrap();
        assert!(matches!(load(&path), Err(WalletError::Key(_))));
        assert!(matches!(
            load(&dir.path().join("missing")),
            Err(WalletError::Io(_))
        ));
    }

    #[test]
    fn signed_transfer_verifies() {
        let keypair = Keypair::generate();
        let to = Keypair::generate().address();

        let tx = signed_transfer(&keypair, to, 10, 1, 1);
        assert_eq!(tx.from, Some(keypair.address()));
        assert_eq!((tx.amount, tx.fee, tx.nonce), (10, 1, 1));
        assert_eq!(verify_tx(&tx), Ok(true));
    }
}
