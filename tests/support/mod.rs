//! Purpose: Loopback GraphQL node shared by the integration tests.
//! Role: Serve `nextArgs`/`publish` over HTTP from a `MemoryLog`, or fail on purpose.
//! Invariants: Binds 127.0.0.1:0 and lives as long as the test runtime.
//! Invariants: Chain logic is delegated to `MemoryLog`; the node only translates JSON.
#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bamboo_session::api::{
    ChainArgs, GQL_NEXT_ARGS, GQL_PUBLISH, GraphqlClient, MemoryLog, PublicKey, RemoteLog, ViewId,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Clone, Copy)]
pub enum Mode {
    Serve,
    GraphqlErrors,
    ServerError,
    BrokenArgs,
}

struct MockNode {
    log: MemoryLog,
    mode: Mode,
    requests: AtomicUsize,
}

pub struct TestNode {
    node: Arc<MockNode>,
    pub endpoint: String,
}

impl TestNode {
    pub async fn start(mode: Mode) -> TestResult<Self> {
        let node = Arc::new(MockNode {
            log: MemoryLog::new(),
            mode,
            requests: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/graphql", post(handle_graphql))
            .with_state(node.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self {
            node,
            endpoint: format!("http://{addr}/graphql"),
        })
    }

    pub fn requests(&self) -> usize {
        self.node.requests.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> &MemoryLog {
        &self.node.log
    }

    pub fn client(&self) -> TestResult<GraphqlClient> {
        Ok(GraphqlClient::new(&self.endpoint)?.with_timeout(Duration::from_secs(5)))
    }
}

async fn handle_graphql(State(node): State<Arc<MockNode>>, Json(body): Json<Value>) -> Response {
    node.requests.fetch_add(1, Ordering::SeqCst);
    match node.mode {
        Mode::Serve => {}
        Mode::GraphqlErrors => {
            return Json(json!({ "data": null, "errors": [{ "message": "schema not found" }] }))
                .into_response();
        }
        Mode::ServerError => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "errors": [{ "message": "database locked" }] })),
            )
                .into_response();
        }
        Mode::BrokenArgs => {
            return Json(json!({ "data": { "nextArgs": {
                "logId": "0", "seqNum": "2", "backlink": null, "skiplink": null
            }}}))
            .into_response();
        }
    }

    let query = body["query"].as_str().unwrap_or_default();
    let variables = &body["variables"];
    let result = if query == GQL_NEXT_ARGS {
        next_args(&node.log, variables)
            .await
            .map(|args| json!({ "nextArgs": args_json(&args) }))
    } else if query == GQL_PUBLISH {
        publish(&node.log, variables)
            .await
            .map(|args| json!({ "publish": args_json(&args) }))
    } else {
        Err(format!("unknown query: {query}"))
    };
    match result {
        Ok(data) => Json(json!({ "data": data })).into_response(),
        Err(message) => Json(json!({ "data": null, "errors": [{ "message": message }] }))
            .into_response(),
    }
}

async fn next_args(log: &MemoryLog, variables: &Value) -> Result<ChainArgs, String> {
    let public_key: PublicKey = variables["publicKey"]
        .as_str()
        .ok_or("publicKey must be a string")?
        .parse()
        .map_err(|err| format!("{err}"))?;
    let view_id = match variables["viewId"].as_str() {
        Some(raw) => Some(raw.parse::<ViewId>().map_err(|err| format!("{err}"))?),
        None => None,
    };
    log.next_args(&public_key, view_id.as_ref())
        .await
        .map_err(|err| format!("{err}"))
}

async fn publish(log: &MemoryLog, variables: &Value) -> Result<ChainArgs, String> {
    let entry = hex::decode(variables["entry"].as_str().ok_or("entry must be a string")?)
        .map_err(|err| format!("{err}"))?;
    let operation = hex::decode(
        variables["operation"]
            .as_str()
            .ok_or("operation must be a string")?,
    )
    .map_err(|err| format!("{err}"))?;
    log.publish(&entry, &operation)
        .await
        .map_err(|err| format!("{err}"))
}

fn args_json(args: &ChainArgs) -> Value {
    json!({
        "logId": args.log_id.to_string(),
        "seqNum": args.seq_num.to_string(),
        "backlink": args.backlink.map(|hash| hash.to_hex()),
        "skiplink": args.skiplink.map(|hash| hash.to_hex()),
    })
}
