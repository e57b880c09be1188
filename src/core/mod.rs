// Core value types: chain args, entries, operations, identities, hashes, errors.
pub mod chain;
pub mod entry;
pub mod error;
pub mod hash;
pub mod identity;
pub mod operation;
