//! Purpose: `bamboo` CLI entry point for publishing operations into Bamboo logs.
//! Role: Binary crate root; parses args, sets up tracing, runs commands, emits JSON on stdout.
//! Invariants: Commands emit one JSON document per result on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr; logs also go to stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All remote writes go through `api::Session` (cache + signing).
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use bamboo_session::api::{
    Ed25519Signer, Error, ErrorKind, Fields, GraphqlClient, Hash, KeyPair, PublicKey,
    PublishOptions, SchemaId, Session, ViewId, to_exit_code,
};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::InvalidInput)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `bamboo --help`."));
            }
        },
    };

    init_tracing(cli.verbose);

    let settings = Settings::from_cli(&cli);
    command_dispatch::dispatch_command(cli.command, settings).map_err(add_remote_hint)
}

#[derive(Parser)]
#[command(
    name = "bamboo",
    version,
    about = "Publish signed document operations into remote Bamboo logs",
    long_about = None,
    after_help = r#"EXAMPLES
  $ bamboo keygen > author.json
  $ export BAMBOO_ENDPOINT=http://localhost:2020/graphql
  $ bamboo --private-key <hex> --schema venues_v1 create --fields '{"name": "Plant Cafe"}'
  $ bamboo --private-key <hex> --schema venues_v1 update --previous <view-id> --fields '{"name": "Plant Bar"}'
  $ bamboo --private-key <hex> --schema venues_v1 delete --previous <view-id>

FIELDS
  Scalars are inferred (bool, integer, float, string). Relations use typed values:
    {"venue": {"type": "relation", "value": "<hash>"}}"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "BAMBOO_ENDPOINT",
        help = "GraphQL endpoint of the node (http or https)"
    )]
    endpoint: Option<String>,
    #[arg(
        long,
        global = true,
        value_hint = ValueHint::FilePath,
        conflicts_with = "private_key",
        help = "File holding the author's hex private key"
    )]
    key_file: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "BAMBOO_PRIVATE_KEY",
        hide_env_values = true,
        help = "Author's hex private key"
    )]
    private_key: Option<String>,
    #[arg(
        long,
        global = true,
        env = "BAMBOO_SCHEMA",
        help = "Default schema id for create/update/delete"
    )]
    schema: Option<String>,
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_TIMEOUT_MS,
        help = "Request timeout in milliseconds"
    )]
    timeout_ms: u64,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase log verbosity (-v, -vv)")]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Generate a new author key pair")]
    Keygen,
    #[command(about = "Show the chain args for the next entry")]
    NextArgs {
        #[arg(long, help = "Author public key (defaults to the configured key pair)")]
        public_key: Option<String>,
        #[arg(long, help = "Current document view id; omit for a new log")]
        view_id: Option<String>,
    },
    #[command(about = "Create a document")]
    Create {
        #[arg(long, help = "Fields as a JSON object")]
        fields: String,
    },
    #[command(about = "Update a document")]
    Update {
        #[arg(long, help = "View id the update builds on")]
        previous: String,
        #[arg(long, help = "Fields as a JSON object")]
        fields: String,
    },
    #[command(about = "Delete a document")]
    Delete {
        #[arg(long, help = "View id the delete builds on")]
        previous: String,
    },
    #[command(about = "Publish a pre-signed entry and its operation payload")]
    Publish {
        #[arg(long, help = "Hex-encoded entry bytes")]
        entry: String,
        #[arg(long, help = "Hex-encoded operation payload")]
        operation: String,
    },
    #[command(about = "Apply JSON-lines operations from stdin through one session")]
    Apply,
}

/// Global options after parsing; turned into a session on demand.
struct Settings {
    endpoint: Option<String>,
    key_file: Option<PathBuf>,
    private_key: Option<String>,
    schema: Option<String>,
    timeout: Duration,
}

impl Settings {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            endpoint: cli.endpoint.clone(),
            key_file: cli.key_file.clone(),
            private_key: cli.private_key.clone(),
            schema: cli.schema.clone(),
            timeout: Duration::from_millis(cli.timeout_ms),
        }
    }

    fn key_pair(&self) -> Result<Option<KeyPair>, Error> {
        if let Some(path) = &self.key_file {
            return KeyPair::from_key_file(path).map(Some);
        }
        self.private_key
            .as_deref()
            .map(KeyPair::from_private_key_hex)
            .transpose()
    }

    fn session(&self) -> Result<Session, Error> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            Error::new(ErrorKind::Configuration)
                .with_message("missing `endpoint` parameter for creating a session")
                .with_hint("Pass --endpoint or set BAMBOO_ENDPOINT.")
        })?;
        let remote = GraphqlClient::new(endpoint)?.with_timeout(self.timeout);
        let mut session = Session::with_parts(remote, Ed25519Signer);
        if let Some(key_pair) = self.key_pair()? {
            session.set_key_pair(key_pair);
        }
        if let Some(schema) = &self.schema {
            session.set_schema_id(SchemaId::new(schema.clone())?);
        }
        Ok(session)
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn parse_fields(raw: &str) -> Result<Fields, Error> {
    let value: Value = serde_json::from_str(raw).map_err(|err| {
        Error::new(ErrorKind::InvalidInput)
            .with_message("--fields is not valid JSON")
            .with_source(err)
    })?;
    Fields::from_json(value)
}

fn parse_view_id(raw: &str) -> Result<ViewId, Error> {
    raw.trim()
        .parse()
        .map_err(|err: Error| err.with_hint("View ids are hashes joined by `_`."))
}

fn parse_hex(flag: &str, raw: &str) -> Result<Vec<u8>, Error> {
    hex::decode(raw.trim()).map_err(|err| {
        Error::new(ErrorKind::InvalidInput)
            .with_message(format!("{flag} is not valid hex"))
            .with_source(err)
    })
}

fn view_id_json(view_id: &ViewId) -> Value {
    json!({ "view_id": view_id.to_string() })
}

fn emit_json(value: Value) {
    let pretty = io::stdout().is_terminal();
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn add_remote_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Remote || err.hint().is_some() {
        return err;
    }
    err.with_hint("The node rejected the request or was unreachable. Check --endpoint and retry.")
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Configuration => "configuration error".to_string(),
        ErrorKind::MissingParameter => "missing parameter".to_string(),
        ErrorKind::InvalidInput => "invalid input".to_string(),
        ErrorKind::Remote => "remote error".to_string(),
        ErrorKind::Signing => "signing failed".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(endpoint) = err.endpoint() {
        inner.insert("endpoint".to_string(), json!(endpoint));
    }
    if let Some(seq) = err.seq() {
        inner.insert("seq".to_string(), json!(seq));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(endpoint) = err.endpoint() {
        lines.push(format!("endpoint: {endpoint}"));
    }
    if let Some(seq) = err.seq() {
        lines.push(format!("seq: {seq}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
