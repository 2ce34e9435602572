//! Two-tier envelope encryption.
//!
//! A deployment-wide [`MasterKey`] wraps one [`SubjectKey`] per subject; the
//! subject key seals that subject's payloads. Everything is AES-256-GCM with a
//! fresh random 96-bit nonce per call, transported as base64(nonce || ciphertext).

mod envelope;

pub use envelope::{Envelope, content_digest};

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{Error, Result};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Process-wide key that wraps subject keys. Stored hex-encoded on disk.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let decoded = hex::decode(encoded.trim())
            .map_err(|e| Error::Config(format!("master key is not valid hex: {e}")))?;
        let key: [u8; KEY_LEN] = decoded.try_into().map_err(|_| {
            Error::Config(format!("master key must be {KEY_LEN} bytes"))
        })?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let encoded = fs::read_to_string(path)?;
        Self::from_hex(&encoded)
    }

    /// Writes the key to a new file readable only by the owner.
    /// Fails if the file already exists.
    pub fn write_new(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
        file.write_all(self.to_hex().as_bytes())?;
        file.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub(crate) fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Per-subject payload key. Only ever persisted wrapped by the master key.
#[derive(Clone, PartialEq, Eq)]
pub struct SubjectKey([u8; KEY_LEN]);

impl SubjectKey {
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        seal(&self.0, plaintext, &[])
    }

    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        open(&self.0, sealed, &[])
    }

    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::Decryption("unwrapped key has wrong length".to_string()))?;
        Ok(Self(key))
    }

    pub(crate) fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubjectKey(..)")
    }
}

fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::Decryption("invalid key length".to_string()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::Decryption("encryption failed".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
}

fn open(key: &[u8; KEY_LEN], sealed: &str, aad: &[u8]) -> Result<Vec<u8>> {
    let raw = BASE64
        .decode(sealed.as_bytes())
        .map_err(|_| Error::Decryption("ciphertext is not valid base64".to_string()))?;
    if raw.len() <= NONCE_LEN {
        return Err(Error::Decryption("ciphertext is truncated".to_string()));
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::Decryption("invalid key length".to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::Decryption("authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let key = SubjectKey::generate();
        let a = key.seal(b"same plaintext").unwrap();
        let b = key.seal(b"same plaintext").unwrap();
        assert_ne!(a, b);
        assert_eq!(key.open(&a).unwrap(), b"same plaintext");
        assert_eq!(key.open(&b).unwrap(), b"same plaintext");
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let sealed = SubjectKey::generate().seal(b"secret").unwrap();
        let result = SubjectKey::generate().open(&sealed);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_open_rejects_tampering() {
        let key = SubjectKey::generate();
        let sealed = key.seal(b"secret").unwrap();

        let mut raw = BASE64.decode(sealed.as_bytes()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);

        assert!(matches!(key.open(&tampered), Err(Error::Decryption(_))));
        assert!(matches!(key.open("not base64!"), Err(Error::Decryption(_))));
        assert!(matches!(key.open("AAAA"), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_master_key_hex() {
        let key = MasterKey::generate();
        let parsed = MasterKey::from_hex(&format!("{}\n", key.to_hex())).unwrap();
        assert_eq!(parsed.bytes(), key.bytes());

        assert!(matches!(MasterKey::from_hex("zz"), Err(Error::Config(_))));
        assert!(matches!(MasterKey::from_hex("abcd"), Err(Error::Config(_))));
    }

    #[test]
    fn test_master_key_file_is_private_and_not_overwritten() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("master.key");

        let key = MasterKey::generate();
        key.write_new(&path).unwrap();
        assert_eq!(MasterKey::load(&path).unwrap().bytes(), key.bytes());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        assert!(matches!(
            MasterKey::generate().write_new(&path),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = MasterKey::generate();
        assert_eq!(format!("{key:?}"), "MasterKey(..)");
        assert!(!format!("{:?}", SubjectKey::generate()).contains('['));
    }
}
