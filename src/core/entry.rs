// Signed Bamboo-style entry layout, encoding, decoding, and signature checks.
use crate::core::chain::{ChainArgs, is_skiplink_required};
use crate::core::error::{Error, ErrorKind};
use crate::core::hash::{HASH_LEN, Hash};
use crate::core::identity::{KeyPair, PUBLIC_KEY_LEN, PublicKey, SIGNATURE_LEN};

pub const ENTRY_TAG: u8 = 0x00;
pub const MAX_PAYLOAD_SIZE: u64 = 16 * 1024 * 1024;

/// Immutable, signed log entry. Field order mirrors the encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub author: PublicKey,
    pub log_id: u64,
    pub seq_num: u64,
    pub skiplink: Option<Hash>,
    pub backlink: Option<Hash>,
    pub payload_size: u64,
    pub payload_hash: Hash,
    pub signature: [u8; SIGNATURE_LEN],
}

/// Bytes and hash of a freshly signed entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedEntry {
    pub bytes: Vec<u8>,
    pub hash: Hash,
}

impl Entry {
    /// Encodes and signs an entry for `payload` at the position described by `args`.
    pub fn sign(key_pair: &KeyPair, args: &ChainArgs, payload: &[u8]) -> Result<SignedEntry, Error> {
        args.validate(ErrorKind::Signing)?;
        let payload_size = payload.len() as u64;
        if payload_size == 0 || payload_size > MAX_PAYLOAD_SIZE {
            return Err(Error::new(ErrorKind::Signing)
                .with_message(format!("payload size {payload_size} out of range"))
                .with_seq(args.seq_num));
        }

        let mut bytes = Vec::with_capacity(unsigned_len(args.seq_num) + SIGNATURE_LEN);
        bytes.push(ENTRY_TAG);
        bytes.extend_from_slice(key_pair.public_key().as_bytes());
        bytes.extend_from_slice(&args.log_id.to_be_bytes());
        bytes.extend_from_slice(&args.seq_num.to_be_bytes());
        if let Some(skiplink) = &args.skiplink {
            bytes.extend_from_slice(skiplink.as_bytes());
        }
        if let Some(backlink) = &args.backlink {
            bytes.extend_from_slice(backlink.as_bytes());
        }
        bytes.extend_from_slice(&payload_size.to_be_bytes());
        bytes.extend_from_slice(Hash::digest(payload).as_bytes());

        let signature = key_pair.sign(&bytes);
        bytes.extend_from_slice(&signature);

        let hash = Hash::digest(&bytes);
        Ok(SignedEntry { bytes, hash })
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let mut reader = Reader::new(buf);
        if reader.take(1)?[0] != ENTRY_TAG {
            return Err(corrupt("unknown entry tag"));
        }
        let author = PublicKey::from_bytes(reader.take(PUBLIC_KEY_LEN)?)?;
        let log_id = reader.read_u64()?;
        let seq_num = reader.read_u64()?;
        if seq_num == 0 {
            return Err(corrupt("sequence number 0"));
        }
        let skiplink = if is_skiplink_required(seq_num) {
            Some(reader.read_hash()?)
        } else {
            None
        };
        let backlink = if seq_num > 1 {
            Some(reader.read_hash()?)
        } else {
            None
        };
        let payload_size = reader.read_u64()?;
        let payload_hash = reader.read_hash()?;
        let signed_len = reader.offset;
        let signature: [u8; SIGNATURE_LEN] = reader
            .take(SIGNATURE_LEN)?
            .try_into()
            .map_err(|_| corrupt("signature truncated"))?;
        if reader.offset != buf.len() {
            return Err(corrupt("trailing bytes after signature").with_seq(seq_num));
        }
        if !author.verify(&buf[..signed_len], &signature) {
            return Err(corrupt("signature does not match author").with_seq(seq_num));
        }

        Ok(Self {
            author,
            log_id,
            seq_num,
            skiplink,
            backlink,
            payload_size,
            payload_hash,
            signature,
        })
    }

    /// Checks that `payload` is the one this entry commits to.
    pub fn verify_payload(&self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() as u64 != self.payload_size || Hash::digest(payload) != self.payload_hash {
            return Err(Error::new(ErrorKind::InvalidInput)
                .with_message("payload does not match entry")
                .with_seq(self.seq_num));
        }
        Ok(())
    }

    pub fn chain_args(&self) -> ChainArgs {
        ChainArgs {
            log_id: self.log_id,
            seq_num: self.seq_num,
            backlink: self.backlink,
            skiplink: self.skiplink,
        }
    }
}

fn unsigned_len(seq_num: u64) -> usize {
    let mut len = 1 + PUBLIC_KEY_LEN + 8 + 8 + 8 + HASH_LEN;
    if seq_num > 1 {
        len += HASH_LEN;
    }
    if is_skiplink_required(seq_num) {
        len += HASH_LEN;
    }
    len
}

fn corrupt(message: &str) -> Error {
    Error::new(ErrorKind::InvalidInput).with_message(format!("malformed entry: {message}"))
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self.offset + len;
        if end > self.buf.len() {
            return Err(corrupt("entry truncated"));
        }
        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u64(&mut self) -> Result<u64, Error> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| corrupt("integer truncated"))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn read_hash(&mut self) -> Result<Hash, Error> {
        Hash::from_bytes(self.take(HASH_LEN)?)
    }
}

#[cfg(test)]
mod tests {
    use super::Entry;
    use crate::core::chain::ChainArgs;
    use crate::core::error::ErrorKind;
    use crate::core::hash::Hash;
    use crate::core::identity::KeyPair;

    fn key_pair() -> KeyPair {
        KeyPair::from_private_key_hex(
            "eb852fefa703901e42f17cdc2aa507947f392a72101b2c1a6d30023af14f75e2",
        )
        .expect("key pair")
    }

    fn args(seq_num: u64) -> ChainArgs {
        let backlink = (seq_num > 1).then(|| Hash::digest(b"back"));
        let skiplink = crate::core::chain::is_skiplink_required(seq_num)
            .then(|| Hash::digest(b"skip"));
        ChainArgs {
            log_id: 2,
            seq_num,
            backlink,
            skiplink,
        }
    }

    #[test]
    fn signed_entry_decodes_with_same_chain_args() {
        let key_pair = key_pair();
        for seq_num in [1, 2, 4, 5, 8, 13] {
            let signed = Entry::sign(&key_pair, &args(seq_num), b"payload").expect("sign");
            let entry = Entry::decode(&signed.bytes).expect("decode");
            assert_eq!(entry.author, key_pair.public_key());
            assert_eq!(entry.chain_args(), args(seq_num));
            assert_eq!(signed.hash, Hash::digest(&signed.bytes));
            entry.verify_payload(b"payload").expect("payload");
        }
    }

    #[test]
    fn signing_is_deterministic() {
        let a = Entry::sign(&key_pair(), &args(5), b"x").expect("a");
        let b = Entry::sign(&key_pair(), &args(5), b"x").expect("b");
        assert_eq!(a, b);
        let c = Entry::sign(&key_pair(), &args(6), b"x").expect("c");
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn sign_rejects_inconsistent_args() {
        let mut bad = args(4);
        bad.skiplink = None;
        let err = Entry::sign(&key_pair(), &bad, b"x").expect_err("skiplink");
        assert_eq!(err.kind(), ErrorKind::Signing);

        let err = Entry::sign(&key_pair(), &args(1), b"").expect_err("empty payload");
        assert_eq!(err.kind(), ErrorKind::Signing);
    }

    #[test]
    fn decode_detects_tampering() {
        let signed = Entry::sign(&key_pair(), &args(3), b"payload").expect("sign");
        let mut tampered = signed.bytes.clone();
        tampered[40] ^= 0x01;
        let err = Entry::decode(&tampered).expect_err("tampered");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = Entry::decode(&signed.bytes[..signed.bytes.len() - 1]).expect_err("short");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let mut trailing = signed.bytes.clone();
        trailing.push(0);
        assert!(Entry::decode(&trailing).is_err());

        let entry = Entry::decode(&signed.bytes).expect("decode");
        assert!(entry.verify_payload(b"other").is_err());
    }
}
