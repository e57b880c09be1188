//! Purpose: Orchestrate publishing document operations into a remote Bamboo log.
//! Exports: `Session`, `PublishOptions`.
//! Role: Resolves chain args (cache first), signs, publishes, and advances the cache.
//! Invariants: Parameter validation completes before any remote call.
//! Invariants: A failed remote call or signing step leaves the cache untouched.
//! Invariants: Remote errors are returned as-is; nothing is retried.
//! Invariants: `&mut self` on every write keeps one writer per session.
#![allow(clippy::result_large_err)]

use super::cache::ArgsCache;
use super::remote::{GraphqlClient, RemoteLog};
use super::signer::{Ed25519Signer, EntrySigner};
use crate::core::chain::ChainArgs;
use crate::core::entry::Entry;
use crate::core::error::{Error, ErrorKind};
use crate::core::hash::Hash;
use crate::core::identity::{KeyPair, PublicKey};
use crate::core::operation::{Fields, Operation, SchemaId, ViewId};
use tracing::{debug, info};

type ApiResult<T> = Result<T, Error>;

/// Per-call overrides for the session defaults.
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    pub schema_id: Option<SchemaId>,
    pub key_pair: Option<KeyPair>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema_id(mut self, schema_id: SchemaId) -> Self {
        self.schema_id = Some(schema_id);
        self
    }

    pub fn with_key_pair(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }
}

pub struct Session<R = GraphqlClient, S = Ed25519Signer> {
    remote: R,
    signer: S,
    key_pair: Option<KeyPair>,
    schema_id: Option<SchemaId>,
    cache: ArgsCache,
}

impl Session {
    /// Session talking GraphQL to `endpoint`; fails with `Configuration` when
    /// the endpoint is empty or not an http(s) URL.
    pub fn new(endpoint: impl AsRef<str>) -> ApiResult<Self> {
        let remote = GraphqlClient::new(endpoint)?;
        Ok(Self::with_parts(remote, Ed25519Signer))
    }
}

impl<R, S> Session<R, S>
where
    R: RemoteLog,
    S: EntrySigner,
{
    pub fn with_parts(remote: R, signer: S) -> Self {
        Self {
            remote,
            signer,
            key_pair: None,
            schema_id: None,
            cache: ArgsCache::new(),
        }
    }

    pub fn set_key_pair(&mut self, key_pair: KeyPair) -> &mut Self {
        self.key_pair = Some(key_pair);
        self
    }

    pub fn with_key_pair(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    pub fn key_pair(&self) -> ApiResult<&KeyPair> {
        self.key_pair.as_ref().ok_or_else(missing_key_pair)
    }

    pub fn set_schema_id(&mut self, schema_id: SchemaId) -> &mut Self {
        self.schema_id = Some(schema_id);
        self
    }

    pub fn with_schema_id(mut self, schema_id: SchemaId) -> Self {
        self.schema_id = Some(schema_id);
        self
    }

    pub fn schema_id(&self) -> Option<&SchemaId> {
        self.schema_id.as_ref()
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn cache(&self) -> &ArgsCache {
        &self.cache
    }

    /// Chain args for the next entry of `public_key` after `view_id`, or for a
    /// new log when no view id is given. Remote answers are cached.
    pub async fn next_args(
        &mut self,
        public_key: &PublicKey,
        view_id: Option<&ViewId>,
    ) -> ApiResult<ChainArgs> {
        if let Some(args) = self.cache.get(public_key, view_id) {
            debug!(%public_key, ?view_id, seq_num = args.seq_num, "next args cache hit");
            return Ok(args);
        }
        let args = checked(self.remote.next_args(public_key, view_id).await?)?;
        self.cache.put(public_key, view_id, args);
        Ok(args)
    }

    pub async fn create(&mut self, fields: Fields, options: PublishOptions) -> ApiResult<ViewId> {
        if fields.is_empty() {
            return Err(missing("fields", "create"));
        }
        let schema_id = self.resolve_schema_id(&options)?;
        let key_pair = self.resolve_key_pair(&options)?;
        let operation = Operation::create(schema_id, fields)?;
        self.sign_and_publish(&key_pair, None, &operation).await
    }

    pub async fn update(
        &mut self,
        fields: Fields,
        previous: &[Hash],
        options: PublishOptions,
    ) -> ApiResult<ViewId> {
        if fields.is_empty() {
            return Err(missing("fields", "update"));
        }
        if previous.is_empty() {
            return Err(missing("previous", "update"));
        }
        let schema_id = self.resolve_schema_id(&options)?;
        let key_pair = self.resolve_key_pair(&options)?;
        let previous = ViewId::new(previous.iter().copied())?;
        let operation = Operation::update(schema_id, previous.clone(), fields)?;
        self.sign_and_publish(&key_pair, Some(&previous), &operation)
            .await
    }

    pub async fn delete(&mut self, previous: &[Hash], options: PublishOptions) -> ApiResult<ViewId> {
        if previous.is_empty() {
            return Err(missing("previous", "delete"));
        }
        let schema_id = self.resolve_schema_id(&options)?;
        let key_pair = self.resolve_key_pair(&options)?;
        let previous = ViewId::new(previous.iter().copied())?;
        let operation = Operation::delete(schema_id, previous.clone())?;
        self.sign_and_publish(&key_pair, Some(&previous), &operation)
            .await
    }

    /// Submits a pre-signed entry and its payload; returns the entry hash as
    /// the new view id.
    pub async fn publish(&mut self, entry: &[u8], payload: &[u8]) -> ApiResult<ViewId> {
        if entry.is_empty() {
            return Err(missing("entry bytes", "publish"));
        }
        if payload.is_empty() {
            return Err(missing("payload bytes", "publish"));
        }
        let decoded = Entry::decode(entry)?;
        decoded.verify_payload(payload)?;

        let next = checked(self.remote.publish(entry, payload).await?)?;
        let published = ViewId::from(Hash::digest(entry));
        self.cache.record(&decoded.author, &published, next);
        info!(author = %decoded.author, log_id = decoded.log_id, seq_num = decoded.seq_num, "published entry");
        Ok(published)
    }

    async fn sign_and_publish(
        &mut self,
        key_pair: &KeyPair,
        resolved: Option<&ViewId>,
        operation: &Operation,
    ) -> ApiResult<ViewId> {
        let payload = operation.encode()?;
        let author = key_pair.public_key();

        let args = match self.cache.get(&author, resolved) {
            Some(args) => {
                debug!(%author, ?resolved, seq_num = args.seq_num, "next args cache hit");
                args
            }
            None => checked(self.remote.next_args(&author, resolved).await?)?,
        };
        let signed = self.signer.sign(key_pair, &args, &payload)?;
        let next = checked(self.remote.publish(&signed.bytes, &payload).await?)?;

        let published = ViewId::from(signed.hash);
        self.cache.advance(&author, resolved, &published, next);
        info!(
            %author,
            action = ?operation.action(),
            log_id = args.log_id,
            seq_num = args.seq_num,
            view_id = %published,
            "published operation"
        );
        Ok(published)
    }

    fn resolve_schema_id(&self, options: &PublishOptions) -> ApiResult<SchemaId> {
        options
            .schema_id
            .as_ref()
            .or(self.schema_id.as_ref())
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::MissingParameter)
                    .with_message("no schema id given and no session default set")
                    .with_hint("Pass a schema id in the options or call set_schema_id.")
            })
    }

    fn resolve_key_pair(&self, options: &PublishOptions) -> ApiResult<KeyPair> {
        options
            .key_pair
            .as_ref()
            .or(self.key_pair.as_ref())
            .cloned()
            .ok_or_else(missing_key_pair)
    }
}

/// Rejects remote args that break the chain rules or the log id range.
fn checked(args: ChainArgs) -> ApiResult<ChainArgs> {
    args.validate(ErrorKind::Remote)?;
    Ok(args)
}

fn missing(what: &str, operation: &str) -> Error {
    Error::new(ErrorKind::MissingParameter).with_message(format!("{operation} requires {what}"))
}

fn missing_key_pair() -> Error {
    Error::new(ErrorKind::Configuration)
        .with_message("no key pair configured for this session")
        .with_hint("Call set_key_pair or pass a key pair in the options.")
}
