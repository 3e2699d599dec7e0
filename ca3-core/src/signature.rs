//! Ed25519 signing and the verify-all-signatures routine.

use crate::assembler::{canonical_bytes, compute_hash};
use crate::error::{Error, ErrorKind, Result};
use crate::types::Block;

/// Collaborator boundary for signing and verifying over a peer's identity.
/// Implementations are expected to hold an Ed25519 keypair per node and a
/// map of peer name -> public key.
pub trait KeyStore: Send + Sync {
    /// Signs `payload` with the local node's key, returning a hex-encoded
    /// signature. `Err` if no local key is configured (`ErrorKind::KeyMissing`).
    fn sign(&self, payload: &[u8]) -> Result<String>;

    /// Verifies `sig_hex` over `payload` as having been produced by
    /// `peer_name`'s key. Returns `Ok(false)` (not an error) when the
    /// signature simply doesn't match; returns `Err` only when the peer's
    /// public key is unknown to this store.
    fn verify(&self, payload: &[u8], sig_hex: &str, peer_name: &str) -> Result<bool>;
}

/// Outcome of `verify_all`: a status code plus a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub status: i32,
    pub detail: String,
}

impl VerifyOutcome {
    pub fn ok() -> Self {
        VerifyOutcome {
            status: 0,
            detail: "ok".to_string(),
        }
    }
}

/// Signs `block` on behalf of `self_name`, decrementing `signcounter` and
/// recording the signature in `signedby`. The signed payload is the
/// block's canonical content, *not* the stored `hash` field — so a signature still checks out even if
/// `block.hash` is later corrupted in transit; that corruption is instead
/// caught by the hash-mismatch check at the end of `verify_all`.
///
/// Fails with `Timeout` if `now_ms` is past `deadline_ms` (the trip's
/// absolute deadline, checked by the caller's registry lookup and passed in
/// here so this module stays free of registry access), and with
/// `KeyMissing`/`SignFailed` if the local key store can't produce a
/// signature.
pub fn sign(
    block: &mut Block,
    self_name: &str,
    key_store: &dyn KeyStore,
    max_sign_nodes: u32,
    now_ms: u64,
    deadline_ms: u64,
    trip_id: &str,
) -> Result<()> {
    if now_ms > deadline_ms {
        return Err(ErrorKind::Timeout(trip_id.to_string()).into());
    }
    if self_name.is_empty() {
        return Err(ErrorKind::SignFailed("empty peer name".to_string()).into());
    }

    let payload = canonical_bytes(block, max_sign_nodes);
    let sig = key_store.sign(&payload).map_err(|e| match e.kind() {
        ErrorKind::KeyMissing => e,
        _ => Error::from(ErrorKind::SignFailed(e.to_string())),
    })?;

    if block.signcounter == 0 {
        return Err(ErrorKind::SignFailed("signature budget exhausted".to_string()).into());
    }
    block.signcounter -= 1;
    block.signedby.insert(self_name.to_string(), sig);
    Ok(())
}

/// Verifies every signature on `block`, peeling `signedby` in descending
/// key order (a fully deterministic stand-in for "reverse insertion order":
/// the data model defines `signedby` as order-independent, so any fixed,
/// reproducible order satisfies the peeling contract) and recomputing the
/// content hash once all signatures have been removed.
///
/// Returns status `0` on full success, `3*10*k` for the `k`-th (1-based)
/// signature that fails to verify, and `3` if the final hash does not match.
pub fn verify_all(block: &Block, max_sign_nodes: u32, key_store: &dyn KeyStore) -> VerifyOutcome {
    let payload = canonical_bytes(block, max_sign_nodes);

    let mut names: Vec<String> = block.signedby.keys().cloned().collect();
    names.sort();
    names.reverse();

    let mut remaining = block.signcounter;
    for (idx, name) in names.iter().enumerate() {
        if name.is_empty() {
            return VerifyOutcome {
                status: -1,
                detail: "empty signer name".to_string(),
            };
        }
        let sig = match block.signedby.get(name) {
            Some(s) => s,
            None => {
                return VerifyOutcome {
                    status: -1,
                    detail: "signature vanished mid-verification".to_string(),
                }
            }
        };
        remaining += 1;
        match key_store.verify(&payload, sig, name) {
            Ok(true) => {}
            Ok(false) => {
                let k = (idx + 1) as i32;
                return VerifyOutcome {
                    status: 30 * k,
                    detail: format!("signature {} ({}) failed to verify", idx + 1, name),
                };
            }
            Err(e) => {
                let k = (idx + 1) as i32;
                return VerifyOutcome {
                    status: 30 * k,
                    detail: format!("signature {} ({}): {}", idx + 1, name, e),
                };
            }
        }
    }

    if remaining != max_sign_nodes {
        return VerifyOutcome {
            status: -1,
            detail: "signature budget inconsistent with configured max_sign_nodes".to_string(),
        };
    }

    let recomputed = compute_hash(block, max_sign_nodes);
    if recomputed == block.hash {
        VerifyOutcome::ok()
    } else {
        VerifyOutcome {
            status: 3,
            detail: "hash mismatch".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::pack;
    use crate::types::BlockType;
    use ed25519_dalek::{Keypair, Signer, Verifier};
    use std::collections::HashMap;

    struct FakeKeyStore {
        me: String,
        keys: HashMap<String, Keypair>,
    }

    impl KeyStore for FakeKeyStore {
        fn sign(&self, payload: &[u8]) -> Result<String> {
            let kp = self
                .keys
                .get(&self.me)
                .ok_or_else(|| Error::from(ErrorKind::KeyMissing))?;
            Ok(hex::encode(kp.sign(payload).to_bytes()))
        }

        fn verify(&self, payload: &[u8], sig_hex: &str, peer_name: &str) -> Result<bool> {
            let kp = self
                .keys
                .get(peer_name)
                .ok_or_else(|| Error::from(ErrorKind::CollaboratorDown("key store".into())))?;
            let bytes = hex::decode(sig_hex).map_err(|_| Error::from(ErrorKind::MalformedData))?;
            let sig = match ed25519_dalek::Signature::from_bytes(&bytes) {
                Ok(s) => s,
                Err(_) => return Ok(false),
            };
            Ok(kp.public.verify(payload, &sig).is_ok())
        }
    }

    fn keypair(seed: u8) -> Keypair {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::from_seed([seed; 32]);
        Keypair::generate(&mut rng)
    }

    #[test]
    fn sign_then_verify_all_is_identity() {
        let mut keys = HashMap::new();
        keys.insert("a".to_string(), keypair(1));
        keys.insert("b".to_string(), keypair(2));

        let mut block = pack(
            None,
            vec![],
            BlockType::Genesis,
            "tenant".into(),
            2,
            "t".into(),
            "0".into(),
        )
        .unwrap();

        let store_a = FakeKeyStore {
            me: "a".to_string(),
            keys: keys.clone(),
        };
        sign(&mut block, "a", &store_a, 2, 0, 1000, "trip-1").unwrap();

        let store_b = FakeKeyStore {
            me: "b".to_string(),
            keys: keys.clone(),
        };
        sign(&mut block, "b", &store_b, 2, 0, 1000, "trip-1").unwrap();

        assert!(block.signature_budget_holds(2));
        let outcome = verify_all(&block, 2, &store_a);
        assert_eq!(outcome.status, 0);
    }

    #[test]
    fn tampered_hash_fails_verification() {
        let mut keys = HashMap::new();
        keys.insert("a".to_string(), keypair(1));
        let store = FakeKeyStore {
            me: "a".to_string(),
            keys,
        };

        let mut block = pack(
            None,
            vec![],
            BlockType::Genesis,
            "tenant".into(),
            1,
            "t".into(),
            "0".into(),
        )
        .unwrap();
        sign(&mut block, "a", &store, 1, 0, 1000, "trip-1").unwrap();
        block.hash = "0".repeat(64);

        let outcome = verify_all(&block, 1, &store);
        assert_eq!(outcome.status, 3);
    }

    #[test]
    fn sign_past_deadline_times_out() {
        let keys = HashMap::new();
        let store = FakeKeyStore {
            me: "a".to_string(),
            keys,
        };
        let mut block = pack(
            None,
            vec![],
            BlockType::Genesis,
            "tenant".into(),
            1,
            "t".into(),
            "0".into(),
        )
        .unwrap();
        let err = sign(&mut block, "a", &store, 1, 2000, 1000, "trip-1").unwrap_err();
        match err.kind() {
            ErrorKind::Timeout(_) => {}
            other => panic!("expected Timeout, got {:?}", other),
        }
    }
}
