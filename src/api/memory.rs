//! Purpose: In-process `RemoteLog` keeping Bamboo logs in memory.
//! Exports: `MemoryLog`.
//! Role: Offline stand-in for a node; backs tests and offline use.
//! Invariants: Answers next args exactly like a node would for serial writers.
//! Invariants: Each author writes one document into one log; a view resolves
//! through its document to the author's log for it.
//! Invariants: Call counters reflect every trait call, including failed ones.

use crate::core::chain::{ChainArgs, is_skiplink_required, lipmaa};
use crate::core::entry::Entry;
use crate::core::error::{Error, ErrorKind};
use crate::core::hash::Hash;
use crate::core::identity::PublicKey;
use crate::core::operation::{Operation, ViewId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use super::remote::RemoteLog;

type ApiResult<T> = Result<T, Error>;

#[derive(Default)]
pub struct MemoryLog {
    state: Mutex<State>,
    next_args_calls: AtomicUsize,
    publish_calls: AtomicUsize,
}

#[derive(Default)]
struct State {
    /// Entry hashes per log, index `i` holds sequence number `i + 1`.
    logs: HashMap<(PublicKey, u64), Vec<Hash>>,
    located: HashMap<Hash, (PublicKey, u64)>,
    /// Document (id of its create entry) each log belongs to.
    log_documents: HashMap<(PublicKey, u64), Hash>,
    document_logs: HashMap<(PublicKey, Hash), u64>,
    payloads: HashMap<Hash, Vec<u8>>,
    fail_next: Option<String>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_args_calls(&self) -> usize {
        self.next_args_calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.next_args_calls() + self.publish_calls()
    }

    /// Makes the next trait call fail with a `Remote` error carrying `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    pub fn log_len(&self, author: &PublicKey, log_id: u64) -> usize {
        self.lock()
            .logs
            .get(&(*author, log_id))
            .map_or(0, Vec::len)
    }

    pub fn payload(&self, entry_hash: &Hash) -> Option<Vec<u8>> {
        self.lock().payloads.get(entry_hash).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl State {
    fn take_failure(&mut self) -> ApiResult<()> {
        match self.fail_next.take() {
            Some(message) => Err(Error::new(ErrorKind::Remote).with_message(message)),
            None => Ok(()),
        }
    }

    fn next_log_id(&self, author: &PublicKey) -> u64 {
        self.logs
            .keys()
            .filter(|(owner, _)| owner == author)
            .map(|(_, log_id)| log_id.saturating_add(1))
            .max()
            .unwrap_or(0)
    }

    fn document_of(&self, view_id: &ViewId) -> Option<Hash> {
        view_id.operations().iter().find_map(|hash| {
            let located = self.located.get(hash)?;
            self.log_documents.get(located).copied()
        })
    }

    fn tip_args(&self, author: &PublicKey, log_id: u64) -> ChainArgs {
        let hashes = self
            .logs
            .get(&(*author, log_id))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let seq_num = hashes.len() as u64 + 1;
        if seq_num == 1 {
            return ChainArgs::first(log_id);
        }
        let skiplink = is_skiplink_required(seq_num)
            .then(|| hashes[(lipmaa(seq_num) - 1) as usize]);
        ChainArgs {
            log_id,
            seq_num,
            backlink: hashes.last().copied(),
            skiplink,
        }
    }
}

#[async_trait]
impl RemoteLog for MemoryLog {
    async fn next_args(
        &self,
        public_key: &PublicKey,
        view_id: Option<&ViewId>,
    ) -> ApiResult<ChainArgs> {
        self.next_args_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        state.take_failure()?;

        let Some(view_id) = view_id else {
            return Ok(ChainArgs::first(state.next_log_id(public_key)));
        };
        let Some(document) = state.document_of(view_id) else {
            return Err(Error::new(ErrorKind::Remote)
                .with_message(format!("document view {view_id} not found")));
        };
        match state.document_logs.get(&(*public_key, document)) {
            Some(log_id) => Ok(state.tip_args(public_key, *log_id)),
            None => Ok(ChainArgs::first(state.next_log_id(public_key))),
        }
    }

    async fn publish(&self, entry: &[u8], payload: &[u8]) -> ApiResult<ChainArgs> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        state.take_failure()?;

        let remote = |err: Error| {
            Error::new(ErrorKind::Remote)
                .with_message(format!("entry rejected: {err}"))
                .with_source(err)
        };
        let decoded = Entry::decode(entry).map_err(remote)?;
        decoded.verify_payload(payload).map_err(remote)?;
        decoded
            .chain_args()
            .validate(ErrorKind::Remote)
            .map_err(remote)?;

        let expected = state.tip_args(&decoded.author, decoded.log_id);
        if decoded.chain_args() != expected {
            return Err(Error::new(ErrorKind::Remote)
                .with_message("entry does not extend the log tip")
                .with_seq(decoded.seq_num));
        }

        let hash = Hash::digest(entry);
        let key = (decoded.author, decoded.log_id);
        if decoded.seq_num == 1 {
            // Payloads that are not operations start a document of their own.
            let document = Operation::decode(payload)
                .ok()
                .and_then(|operation| operation.previous().and_then(|view| state.document_of(view)))
                .unwrap_or(hash);
            if state.document_logs.contains_key(&(decoded.author, document)) {
                return Err(Error::new(ErrorKind::Remote)
                    .with_message("author already writes this document in another log")
                    .with_seq(decoded.seq_num));
            }
            state.log_documents.insert(key, document);
            state.document_logs.insert((decoded.author, document), decoded.log_id);
        }
        state.logs.entry(key).or_default().push(hash);
        state.located.insert(hash, key);
        state.payloads.insert(hash, payload.to_vec());
        debug!(author = %decoded.author, log_id = decoded.log_id, seq_num = decoded.seq_num, "stored entry");

        Ok(state.tip_args(&decoded.author, decoded.log_id))
    }
}
