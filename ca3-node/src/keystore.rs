//! File-backed Ed25519 key store: the local signing keypair lives in one
//! file, and every peer's public key in a second. No password
//! encryption of either file.

use std::collections::HashMap;
use std::fs;

use ca3_core::error::{Error, ErrorKind, Result};
use ca3_core::signature::KeyStore;
use ed25519_dalek::{Keypair, PublicKey, Signature, Signer, Verifier};

pub struct FileKeyStore {
    keypair: Option<Keypair>,
    peer_keys: HashMap<String, PublicKey>,
}

impl FileKeyStore {
    /// Loads the local secret keypair from `keypair_path` (64 raw bytes:
    /// secret || public, the `ed25519-dalek` on-disk convention) and every
    /// peer's public key from `peers_path` (a TOML map of nodename ->
    /// hex-encoded public key).
    pub fn load(keypair_path: Option<&str>, peers_path: &str) -> Result<Self> {
        let keypair = match keypair_path {
            Some(path) => {
                let bytes = fs::read(path).map_err(|_| Error::from(ErrorKind::KeyMissing))?;
                Some(Keypair::from_bytes(&bytes).map_err(|_| Error::from(ErrorKind::MalformedData))?)
            }
            None => None,
        };

        let raw = fs::read_to_string(peers_path).map_err(|_| Error::from(ErrorKind::MalformedData))?;
        let parsed: HashMap<String, String> =
            toml::from_str(&raw).map_err(|_| Error::from(ErrorKind::MalformedData))?;

        let mut peer_keys = HashMap::new();
        for (name, hex_key) in parsed {
            let bytes = hex::decode(&hex_key).map_err(|_| Error::from(ErrorKind::MalformedData))?;
            let key = PublicKey::from_bytes(&bytes).map_err(|_| Error::from(ErrorKind::MalformedData))?;
            peer_keys.insert(name, key);
        }

        Ok(FileKeyStore { keypair, peer_keys })
    }
}

impl KeyStore for FileKeyStore {
    fn sign(&self, payload: &[u8]) -> Result<String> {
        let keypair = self
            .keypair
            .as_ref()
            .ok_or_else(|| Error::from(ErrorKind::KeyMissing))?;
        Ok(hex::encode(keypair.sign(payload).to_bytes()))
    }

    fn verify(&self, payload: &[u8], sig_hex: &str, peer_name: &str) -> Result<bool> {
        let public_key = self
            .peer_keys
            .get(peer_name)
            .ok_or_else(|| Error::from(ErrorKind::CollaboratorDown(format!("public key for {}", peer_name))))?;
        let bytes = hex::decode(sig_hex).map_err(|_| Error::from(ErrorKind::MalformedData))?;
        let signature = match Signature::from_bytes(&bytes) {
            Ok(s) => s,
            Err(_) => return Ok(false),
        };
        Ok(public_key.verify(payload, &signature).is_ok())
    }
}
