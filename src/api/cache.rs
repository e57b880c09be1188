//! Purpose: Remember the chain args of the next write per author and document view.
//! Exports: `ArgsCache`.
//! Role: Lets a session skip the remote next-args query when the answer is known.
//! Invariants: Keys are `(author, view id)`; `None` stands for "next new log".
//! Invariants: Writes overwrite unconditionally; only stale pending answers are evicted.
//! Invariants: Views resolve to their log, so every view of a log sees the latest tip.
//! Invariants: Only a publish binds a view to a log; first-entry answers stay pending.

use crate::core::chain::ChainArgs;
use crate::core::identity::PublicKey;
use crate::core::operation::ViewId;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ArgsCache {
    tips: HashMap<(PublicKey, u64), ChainArgs>,
    views: HashMap<(PublicKey, ViewId), u64>,
    /// New-log answers for views this author has not written into yet.
    pending: HashMap<(PublicKey, ViewId), ChainArgs>,
    fresh: HashMap<PublicKey, ChainArgs>,
}

impl ArgsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, author: &PublicKey, view_id: Option<&ViewId>) -> Option<ChainArgs> {
        match view_id {
            None => self.fresh.get(author).copied(),
            Some(view_id) => {
                let key = (*author, view_id.clone());
                match self.views.get(&key) {
                    Some(log_id) => self.tips.get(&(*author, *log_id)).copied(),
                    None => self.pending.get(&key).copied(),
                }
            }
        }
    }

    /// Stores a remote answer. A first-entry answer for a view is kept apart
    /// from the log index until a publish actually lands in that log.
    pub fn put(&mut self, author: &PublicKey, view_id: Option<&ViewId>, args: ChainArgs) {
        match view_id {
            None => {
                self.fresh.insert(*author, args);
            }
            Some(view_id) if args.is_first() => {
                self.pending.insert((*author, view_id.clone()), args);
            }
            Some(view_id) => {
                let key = (*author, view_id.clone());
                self.pending.remove(&key);
                self.views.insert(key, args.log_id);
                self.tips.insert((*author, args.log_id), args);
            }
        }
    }

    /// Records a publish made with args resolved under `resolved`; `next` are
    /// the args the node returned for the entry after `published`.
    pub fn advance(
        &mut self,
        author: &PublicKey,
        resolved: Option<&ViewId>,
        published: &ViewId,
        next: ChainArgs,
    ) {
        match resolved {
            None => match following_log(next.log_id) {
                Some(fresh) => {
                    self.fresh.insert(*author, fresh);
                }
                None => {
                    self.fresh.remove(author);
                }
            },
            Some(resolved) => {
                self.views.insert((*author, resolved.clone()), next.log_id);
            }
        }
        self.record(author, published, next);
    }

    /// Records a publish whose resolution key is unknown (pre-signed entries).
    pub fn record(&mut self, author: &PublicKey, published: &ViewId, next: ChainArgs) {
        let log_id = next.log_id;
        if self
            .fresh
            .get(author)
            .is_some_and(|fresh| fresh.log_id <= log_id)
        {
            match following_log(log_id) {
                Some(fresh) => self.fresh.insert(*author, fresh),
                None => self.fresh.remove(author),
            };
        }
        // Log `log_id` is taken now; new-log answers pointing at it are stale.
        self.pending
            .retain(|(owner, _), args| owner != author || args.log_id > log_id);
        self.views.insert((*author, published.clone()), log_id);
        self.tips.insert((*author, log_id), next);
    }

    pub fn len(&self) -> usize {
        self.views.len() + self.pending.len() + self.fresh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn following_log(log_id: u64) -> Option<ChainArgs> {
    log_id.checked_add(1).map(ChainArgs::first)
}
