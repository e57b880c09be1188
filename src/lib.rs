//! Purpose: Library crate backing the `bamboo` CLI and embedding applications.
//! Exports: `api` (session, cache, remote/signer seams), `core` (value types, errors).
//! Role: Client side of a Bamboo append-only log node reached over GraphQL.
//! Invariants: Chain args come from the cache or the remote, never from guesses.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
