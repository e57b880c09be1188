//! Purpose: Define the public Rust API boundary for publishing into Bamboo logs.
//! Exports: Session orchestration, collaborator seams, and the core value types.
//! Role: Public, additive-only surface used by the CLI and integration tests.
//! Invariants: The remote log and the signer are only reached through their traits.
//! Invariants: Core modules remain reachable through these re-exports.

mod cache;
mod memory;
mod remote;
mod session;
mod signer;

pub use crate::core::chain::{ChainArgs, MAX_LOG_ID, is_skiplink_required, lipmaa};
pub use crate::core::entry::{Entry, SignedEntry};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::hash::Hash;
pub use crate::core::identity::{KeyPair, PublicKey};
pub use crate::core::operation::{Action, FieldValue, Fields, Operation, SchemaId, ViewId};
pub use cache::ArgsCache;
pub use memory::MemoryLog;
pub use remote::{GQL_NEXT_ARGS, GQL_PUBLISH, GraphqlClient, RemoteLog};
pub use session::{PublishOptions, Session};
pub use signer::{Ed25519Signer, EntrySigner};
