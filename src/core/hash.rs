// Multihash-framed sha2-256 digests used for entry, payload, and operation ids.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};

/// Multihash code for sha2-256 followed by the digest length.
const MULTIHASH_PREFIX: [u8; 2] = [0x12, 0x20];
pub const HASH_LEN: usize = 34;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    pub fn digest(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; HASH_LEN];
        out[..2].copy_from_slice(&MULTIHASH_PREFIX);
        out[2..].copy_from_slice(&digest);
        Self(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != HASH_LEN {
            return Err(Error::new(ErrorKind::InvalidInput)
                .with_message(format!("hash must be {HASH_LEN} bytes, got {}", bytes.len())));
        }
        if bytes[..2] != MULTIHASH_PREFIX {
            return Err(
                Error::new(ErrorKind::InvalidInput).with_message("hash is not a sha2-256 multihash")
            );
        }
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(value).map_err(|err| {
            Error::new(ErrorKind::InvalidInput)
                .with_message(format!("invalid hash `{value}`"))
                .with_source(err)
        })?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{HASH_LEN, Hash};
    use crate::core::error::ErrorKind;

    #[test]
    fn digest_is_prefixed_sha256() {
        let hash = Hash::digest(b"abc");
        assert_eq!(
            hash.to_hex(),
            "1220ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash.as_bytes().len(), HASH_LEN);
    }

    #[test]
    fn parse_accepts_display_output() {
        let hash = Hash::digest(b"entry");
        let parsed: Hash = hash.to_string().parse().expect("parse");
        assert_eq!(parsed, hash);
    }

    #[test]
    fn parse_rejects_wrong_prefix_and_length() {
        let digest_only = &Hash::digest(b"x").to_hex()[4..];
        let err = digest_only.parse::<Hash>().expect_err("too short");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let wrong_prefix = format!("1320{digest_only}");
        let err = wrong_prefix.parse::<Hash>().expect_err("prefix");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = "not-hex".parse::<Hash>().expect_err("hex");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn serde_uses_hex_strings() {
        let hash = Hash::digest(b"serde");
        let json = serde_json::to_string(&hash).expect("encode");
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: Hash = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, hash);
    }
}
