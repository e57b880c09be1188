//! Purpose: Seam between the publish flow and the entry signing primitive.
//! Exports: `EntrySigner`, `Ed25519Signer`.
//! Role: Turns chain args + payload + key pair into signed entry bytes and hash.
//! Invariants: Signing is pure and deterministic; no I/O happens here.
//! Invariants: Failures surface as `ErrorKind::Signing`.

use crate::core::chain::ChainArgs;
use crate::core::entry::{Entry, SignedEntry};
use crate::core::error::Error;
use crate::core::identity::KeyPair;

pub trait EntrySigner: Send + Sync {
    fn sign(&self, key_pair: &KeyPair, args: &ChainArgs, payload: &[u8])
    -> Result<SignedEntry, Error>;
}

/// Default signer producing the crate's ed25519 entry encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Signer;

impl EntrySigner for Ed25519Signer {
    fn sign(
        &self,
        key_pair: &KeyPair,
        args: &ChainArgs,
        payload: &[u8],
    ) -> Result<SignedEntry, Error> {
        Entry::sign(key_pair, args, payload)
    }
}
