// Chain-position metadata for the next entry of a log plus the lipmaa skiplink rule.
use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::hash::Hash;

pub const FIRST_SEQ_NUM: u64 = 1;
/// Highest usable log id; `log_id + 1` must stay representable.
pub const MAX_LOG_ID: u64 = u64::MAX - 1;

/// Arguments needed to construct the next valid entry of a log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainArgs {
    pub log_id: u64,
    pub seq_num: u64,
    pub backlink: Option<Hash>,
    pub skiplink: Option<Hash>,
}

impl ChainArgs {
    /// Args for the first entry of a brand-new log.
    pub fn first(log_id: u64) -> Self {
        Self {
            log_id,
            seq_num: FIRST_SEQ_NUM,
            backlink: None,
            skiplink: None,
        }
    }

    pub fn is_first(&self) -> bool {
        self.seq_num == FIRST_SEQ_NUM
    }

    /// Checks the structural invariants; violations are reported as `kind`.
    pub fn validate(&self, kind: ErrorKind) -> Result<(), Error> {
        if self.log_id > MAX_LOG_ID {
            return Err(Error::new(kind)
                .with_message(format!("log id {} out of range", self.log_id))
                .with_seq(self.seq_num));
        }
        if self.seq_num < FIRST_SEQ_NUM {
            return Err(Error::new(kind).with_message("sequence number must be at least 1"));
        }
        if self.is_first() {
            if self.backlink.is_some() || self.skiplink.is_some() {
                return Err(Error::new(kind)
                    .with_message("first entry of a log must not carry backlink or skiplink")
                    .with_seq(self.seq_num));
            }
            return Ok(());
        }
        if self.backlink.is_none() {
            return Err(Error::new(kind)
                .with_message("backlink missing for non-initial entry")
                .with_seq(self.seq_num));
        }
        match (is_skiplink_required(self.seq_num), self.skiplink.is_some()) {
            (true, false) => Err(Error::new(kind)
                .with_message(format!(
                    "skiplink to entry {} missing",
                    lipmaa(self.seq_num)
                ))
                .with_seq(self.seq_num)),
            (false, true) => Err(Error::new(kind)
                .with_message("skiplink given where the backlink already covers it")
                .with_seq(self.seq_num)),
            _ => Ok(()),
        }
    }
}

/// Sequence number of the long-range back-reference of entry `n` in a
/// Bamboo log. Returns 0 for `n <= 1`.
pub fn lipmaa(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let target = u128::from(n);
    let mut m: u128 = 1;
    let mut po3: u128 = 3;
    let mut u: u128 = target;

    // smallest k with (3^k - 1) / 2 >= n
    while m < target {
        po3 *= 3;
        m = (po3 - 1) / 2;
    }

    po3 /= 3;
    if m != target {
        while u != 0 {
            m = (po3 - 1) / 2;
            po3 /= 3;
            u %= m;
        }
        if m != po3 {
            po3 = m;
        }
    }

    n - po3 as u64
}

/// A skiplink is encoded only when it points somewhere other than the backlink.
pub fn is_skiplink_required(seq_num: u64) -> bool {
    seq_num > FIRST_SEQ_NUM && lipmaa(seq_num) != seq_num - 1
}
