//! Purpose: Remote log seam plus the HTTP/GraphQL client that implements it.
//! Exports: `RemoteLog`, `GraphqlClient`, `GQL_NEXT_ARGS`, `GQL_PUBLISH`.
//! Role: The only place the session crosses a network boundary.
//! Invariants: One GraphQL request per trait call; no retries, no caching.
//! Invariants: Every failure (transport, status, `errors`, bad body) is `ErrorKind::Remote`.
//! Invariants: Returned chain args are structurally validated before use.
#![allow(clippy::result_large_err)]

use crate::core::chain::ChainArgs;
use crate::core::error::{Error, ErrorKind};
use crate::core::hash::Hash;
use crate::core::identity::PublicKey;
use crate::core::operation::ViewId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

type ApiResult<T> = Result<T, Error>;

pub const GQL_NEXT_ARGS: &str = "query NextArgs($publicKey: String!, $viewId: String) {
  nextArgs(publicKey: $publicKey, viewId: $viewId) {
    logId
    seqNum
    backlink
    skiplink
  }
}";

pub const GQL_PUBLISH: &str = "mutation Publish($entry: String!, $operation: String!) {
  publish(entry: $entry, operation: $operation) {
    logId
    seqNum
    backlink
    skiplink
  }
}";

/// Query/mutation contract of a node hosting Bamboo logs.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    /// Chain args for the next entry by `public_key`. Without a view id the
    /// node answers for a brand-new log.
    async fn next_args(
        &self,
        public_key: &PublicKey,
        view_id: Option<&ViewId>,
    ) -> ApiResult<ChainArgs>;

    /// Submits a signed entry with its payload and returns the chain args
    /// for the entry after it.
    async fn publish(&self, entry: &[u8], payload: &[u8]) -> ApiResult<ChainArgs>;
}

#[derive(Clone)]
pub struct GraphqlClient {
    inner: Arc<GraphqlClientInner>,
}

struct GraphqlClientInner {
    endpoint: Url,
    timeout: Option<Duration>,
    agent: ureq::Agent,
}

#[derive(Serialize)]
struct GraphqlRequest<'a, V> {
    query: &'a str,
    variables: V,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NextArgsVariables {
    public_key: String,
    view_id: Option<String>,
}

#[derive(Serialize)]
struct PublishVariables {
    entry: String,
    operation: String,
}

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextArgsData {
    next_args: RemoteChainArgs,
}

#[derive(Deserialize)]
struct PublishData {
    publish: RemoteChainArgs,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteChainArgs {
    log_id: String,
    seq_num: String,
    backlink: Option<String>,
    skiplink: Option<String>,
}

impl GraphqlClient {
    pub fn new(endpoint: impl AsRef<str>) -> ApiResult<Self> {
        let endpoint = normalize_endpoint(endpoint.as_ref())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(GraphqlClientInner {
                endpoint,
                timeout: None,
                agent,
            }),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.timeout = Some(timeout);
            inner.agent = agent;
        } else {
            self.inner = Arc::new(GraphqlClientInner {
                endpoint: self.inner.endpoint.clone(),
                timeout: Some(timeout),
                agent,
            });
        }
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    fn query_next_args(&self, public_key: String, view_id: Option<String>) -> ApiResult<ChainArgs> {
        let variables = NextArgsVariables {
            public_key,
            view_id,
        };
        let data: NextArgsData = self.request(GQL_NEXT_ARGS, &variables)?;
        self.chain_args_from_remote(data.next_args)
    }

    fn mutate_publish(&self, entry: String, operation: String) -> ApiResult<ChainArgs> {
        let variables = PublishVariables { entry, operation };
        let data: PublishData = self.request(GQL_PUBLISH, &variables)?;
        self.chain_args_from_remote(data.publish)
    }

    fn request<V, R>(&self, query: &str, variables: &V) -> ApiResult<R>
    where
        V: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_string(&GraphqlRequest { query, variables }).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode graphql request")
                .with_source(err)
        })?;
        let response = self
            .inner
            .agent
            .post(self.inner.endpoint.as_str())
            .set("Accept", "application/json")
            .set("Content-Type", "application/json")
            .send_string(&payload);

        let body = match response {
            Ok(resp) => resp.into_string().map_err(|err| {
                self.remote_error("failed to read response body")
                    .with_source(err)
            })?,
            Err(ureq::Error::Status(code, resp)) => {
                return Err(self.parse_error_response(code, resp));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(self.remote_error("request failed").with_source(err));
            }
        };

        let envelope: GraphqlResponse<R> = serde_json::from_str(&body).map_err(|err| {
            self.remote_error("invalid graphql response json")
                .with_source(err)
        })?;
        if let Some(first) = envelope.errors.first() {
            return Err(self.remote_error(first.message.clone()));
        }
        envelope
            .data
            .ok_or_else(|| self.remote_error("graphql response has no data"))
    }

    fn parse_error_response(&self, status: u16, response: ureq::Response) -> Error {
        let body = response.into_string().unwrap_or_default();
        if let Ok(envelope) = serde_json::from_str::<GraphqlResponse<serde_json::Value>>(&body) {
            if let Some(first) = envelope.errors.first() {
                return self.remote_error(format!("{} (status {status})", first.message));
            }
        }
        self.remote_error(format!("remote error status {status}"))
    }

    fn chain_args_from_remote(&self, remote: RemoteChainArgs) -> ApiResult<ChainArgs> {
        let log_id = parse_u64("logId", &remote.log_id).map_err(|err| self.tag(err))?;
        let seq_num = parse_u64("seqNum", &remote.seq_num).map_err(|err| self.tag(err))?;
        let backlink = parse_link("backlink", remote.backlink).map_err(|err| self.tag(err))?;
        let skiplink = parse_link("skiplink", remote.skiplink).map_err(|err| self.tag(err))?;
        let args = ChainArgs {
            log_id,
            seq_num,
            backlink,
            skiplink,
        };
        args.validate(ErrorKind::Remote)
            .map_err(|err| self.tag(err))?;
        Ok(args)
    }

    fn remote_error(&self, message: impl Into<String>) -> Error {
        self.tag(Error::new(ErrorKind::Remote).with_message(message))
    }

    fn tag(&self, err: Error) -> Error {
        err.with_endpoint(self.inner.endpoint.as_str())
    }
}

#[async_trait]
impl RemoteLog for GraphqlClient {
    async fn next_args(
        &self,
        public_key: &PublicKey,
        view_id: Option<&ViewId>,
    ) -> ApiResult<ChainArgs> {
        let client = self.clone();
        let public_key = public_key.to_hex();
        let view_id = view_id.map(ViewId::to_string);
        debug!(endpoint = %self.endpoint(), %public_key, ?view_id, "querying next args");
        run_blocking(move || client.query_next_args(public_key, view_id))
            .await
            .inspect_err(|err| warn!(error = %err, "next args query failed"))
    }

    async fn publish(&self, entry: &[u8], payload: &[u8]) -> ApiResult<ChainArgs> {
        let client = self.clone();
        let entry = hex::encode(entry);
        let operation = hex::encode(payload);
        debug!(endpoint = %self.endpoint(), entry_len = entry.len() / 2, "publishing entry");
        run_blocking(move || client.mutate_publish(entry, operation))
            .await
            .inspect_err(|err| warn!(error = %err, "publish mutation failed"))
    }
}

async fn run_blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("remote request task failed")
            .with_source(err)
    })?
}

fn normalize_endpoint(raw: &str) -> ApiResult<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::new(ErrorKind::Configuration)
            .with_message("missing `endpoint` parameter for creating a session")
            .with_hint("Pass --endpoint or set BAMBOO_ENDPOINT."));
    }
    let mut url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Configuration)
            .with_message(format!("invalid endpoint url `{raw}`"))
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Configuration)
            .with_message("endpoint must use http or https scheme")
            .with_endpoint(raw));
    }
    url.set_fragment(None);
    Ok(url)
}

fn parse_u64(name: &str, value: &str) -> ApiResult<u64> {
    value.parse().map_err(|err| {
        Error::new(ErrorKind::Remote)
            .with_message(format!("invalid {name} `{value}` in response"))
            .with_source(err)
    })
}

fn parse_link(name: &str, value: Option<String>) -> ApiResult<Option<Hash>> {
    value
        .map(|hash| {
            hash.parse::<Hash>().map_err(|err| {
                Error::new(ErrorKind::Remote)
                    .with_message(format!("invalid {name} `{hash}` in response"))
                    .with_source(err)
            })
        })
        .transpose()
}
