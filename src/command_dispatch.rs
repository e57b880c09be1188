//! Purpose: Hold top-level CLI command dispatch for `bamboo`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every remote command builds exactly one session and one runtime.
//! Invariants: `apply` stops at the first failing line; earlier results are already emitted.

use super::*;
use serde::Deserialize;
use std::io::BufRead;

pub(super) fn dispatch_command(command: Command, settings: Settings) -> Result<RunOutcome, Error> {
    match command {
        Command::Keygen => {
            let key_pair = KeyPair::generate()?;
            emit_json(json!({
                "public_key": key_pair.public_key().to_hex(),
                "private_key": key_pair.private_key_hex(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::NextArgs {
            public_key,
            view_id,
        } => {
            let mut session = settings.session()?;
            let public_key = match public_key {
                Some(raw) => raw.trim().parse::<PublicKey>()?,
                None => session.key_pair()?.public_key(),
            };
            let view_id = view_id.as_deref().map(parse_view_id).transpose()?;
            let args = block_on(session.next_args(&public_key, view_id.as_ref()))?;
            let value = serde_json::to_value(args).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode chain args")
                    .with_source(err)
            })?;
            emit_json(value);
            Ok(RunOutcome::ok())
        }
        Command::Create { fields } => {
            let fields = parse_fields(&fields)?;
            let mut session = settings.session()?;
            let view_id = block_on(session.create(fields, PublishOptions::new()))?;
            emit_json(view_id_json(&view_id));
            Ok(RunOutcome::ok())
        }
        Command::Update { previous, fields } => {
            let previous = parse_view_id(&previous)?;
            let fields = parse_fields(&fields)?;
            let mut session = settings.session()?;
            let view_id = block_on(session.update(fields, &previous, PublishOptions::new()))?;
            emit_json(view_id_json(&view_id));
            Ok(RunOutcome::ok())
        }
        Command::Delete { previous } => {
            let previous = parse_view_id(&previous)?;
            let mut session = settings.session()?;
            let view_id = block_on(session.delete(&previous, PublishOptions::new()))?;
            emit_json(view_id_json(&view_id));
            Ok(RunOutcome::ok())
        }
        Command::Publish { entry, operation } => {
            let entry = parse_hex("--entry", &entry)?;
            let operation = parse_hex("--operation", &operation)?;
            let mut session = settings.session()?;
            let view_id = block_on(session.publish(&entry, &operation))?;
            emit_json(view_id_json(&view_id));
            Ok(RunOutcome::ok())
        }
        Command::Apply => {
            let mut session = settings.session()?;
            let runtime = runtime()?;
            let stdin = io::stdin();
            for (index, line) in stdin.lock().lines().enumerate() {
                let line = line.map_err(|err| {
                    Error::new(ErrorKind::InvalidInput)
                        .with_message("failed to read stdin")
                        .with_source(err)
                })?;
                if line.trim().is_empty() {
                    continue;
                }
                let view_id = runtime
                    .block_on(apply_line(&mut session, &line))
                    .map_err(|err| {
                        let hint = format!("Line {} was not applied.", index + 1);
                        err.with_hint(hint)
                    })?;
                emit_json(json!({ "line": index + 1, "view_id": view_id.to_string() }));
            }
            Ok(RunOutcome::ok())
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ApplyAction {
    Create,
    Update,
    Delete,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ApplyLine {
    action: ApplyAction,
    #[serde(default)]
    fields: Option<Value>,
    #[serde(default)]
    previous: Option<String>,
    #[serde(default)]
    schema: Option<String>,
}

impl ApplyLine {
    fn parse(line: &str) -> Result<Self, Error> {
        let parsed: Self = serde_json::from_str(line).map_err(|err| {
            Error::new(ErrorKind::InvalidInput)
                .with_message("invalid operation line")
                .with_source(err)
        })?;
        match parsed.action {
            ApplyAction::Create if parsed.previous.is_some() => {
                Err(Error::new(ErrorKind::InvalidInput)
                    .with_message("create line must not carry `previous`"))
            }
            ApplyAction::Delete if parsed.fields.is_some() => {
                Err(Error::new(ErrorKind::InvalidInput)
                    .with_message("delete line must not carry `fields`"))
            }
            _ => Ok(parsed),
        }
    }
}

async fn apply_line(session: &mut Session, line: &str) -> Result<ViewId, Error> {
    let parsed = ApplyLine::parse(line)?;

    let mut options = PublishOptions::new();
    if let Some(schema) = parsed.schema {
        options = options.with_schema_id(SchemaId::new(schema)?);
    }
    let fields = parsed.fields.map(Fields::from_json).transpose()?;
    let previous = parsed.previous.as_deref().map(parse_view_id).transpose()?;
    let previous: &[Hash] = previous.as_deref().unwrap_or_default();

    match parsed.action {
        ApplyAction::Create => session.create(fields.unwrap_or_default(), options).await,
        ApplyAction::Update => {
            session
                .update(fields.unwrap_or_default(), previous, options)
                .await
        }
        ApplyAction::Delete => session.delete(previous, options).await,
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start async runtime")
                .with_source(err)
        })
}

fn block_on<F, T>(future: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    runtime()?.block_on(future)
}

#[cfg(test)]
mod tests {
    use super::{ApplyAction, ApplyLine};
    use bamboo_session::api::ErrorKind;

    #[test]
    fn apply_lines_parse_by_action() {
        let line = ApplyLine::parse(r#"{"action": "update", "previous": "x", "fields": {"a": 1}}"#)
            .expect("update line");
        assert!(matches!(line.action, ApplyAction::Update));
        assert_eq!(line.previous.as_deref(), Some("x"));

        let err = ApplyLine::parse(r#"{"action": "rename"}"#).err().expect("unknown action");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = ApplyLine::parse(r#"{"action": "create", "extra": 1}"#)
            .err()
            .expect("unknown key");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn apply_lines_reject_keys_their_action_forbids() {
        let err = ApplyLine::parse(r#"{"action": "delete", "previous": "x", "fields": {"a": 1}}"#)
            .err()
            .expect("delete with fields");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = ApplyLine::parse(r#"{"action": "create", "previous": "x", "fields": {"a": 1}}"#)
            .err()
            .expect("create with previous");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
