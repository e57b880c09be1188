// Document operations (create/update/delete) carried as entry payloads.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::hash::Hash;

pub const OPERATION_VERSION: u64 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaId(String);

impl SchemaId {
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        if value.is_empty() {
            return Err(
                Error::new(ErrorKind::MissingParameter).with_message("schema id must not be empty")
            );
        }
        if value.chars().any(char::is_whitespace) {
            return Err(Error::new(ErrorKind::InvalidInput)
                .with_message(format!("schema id `{value}` contains whitespace")));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SchemaId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SchemaId> for String {
    fn from(value: SchemaId) -> Self {
        value.0
    }
}

impl FromStr for SchemaId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a materialised document state: the set of operation ids
/// forming its current tips. Always non-empty, sorted, and deduplicated.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ViewId(Vec<Hash>);

impl ViewId {
    pub fn new(operations: impl IntoIterator<Item = Hash>) -> Result<Self, Error> {
        let mut operations: Vec<Hash> = operations.into_iter().collect();
        if operations.is_empty() {
            return Err(Error::new(ErrorKind::MissingParameter)
                .with_message("view id needs at least one operation id"));
        }
        operations.sort();
        operations.dedup();
        Ok(Self(operations))
    }

    pub fn operations(&self) -> &[Hash] {
        &self.0
    }
}

impl From<Hash> for ViewId {
    fn from(hash: Hash) -> Self {
        Self(vec![hash])
    }
}

impl std::ops::Deref for ViewId {
    type Target = [Hash];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for ViewId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let operations = value
            .split('_')
            .map(str::parse)
            .collect::<Result<Vec<Hash>, _>>()?;
        Self::new(operations)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, hash) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("_")?;
            }
            write!(f, "{hash}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewId({self})")
    }
}

impl Serialize for ViewId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ViewId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Relation(Hash),
    RelationList(Vec<Hash>),
    PinnedRelation(ViewId),
    PinnedRelationList(Vec<ViewId>),
}

impl FieldValue {
    /// Plain JSON scalars are inferred (bool, int, float, string); objects
    /// must use the tagged `{"type": .., "value": ..}` form.
    pub fn from_json(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bool(flag) => Ok(FieldValue::Bool(flag)),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Ok(FieldValue::Int(int))
                } else if let Some(float) = number.as_f64() {
                    Ok(FieldValue::Float(float))
                } else {
                    Err(Error::new(ErrorKind::InvalidInput)
                        .with_message(format!("number {number} does not fit a field value")))
                }
            }
            Value::String(text) => Ok(FieldValue::Str(text)),
            Value::Object(_) => serde_json::from_value(value).map_err(|err| {
                Error::new(ErrorKind::InvalidInput)
                    .with_message("invalid typed field value")
                    .with_hint("Use {\"type\": \"relation\", \"value\": \"<hash>\"} style objects.")
                    .with_source(err)
            }),
            Value::Null | Value::Array(_) => Err(Error::new(ErrorKind::InvalidInput)
                .with_message("field values must be scalars or typed objects")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(name.into(), value)
    }

    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn from_json(value: Value) -> Result<Self, Error> {
        let Value::Object(map) = value else {
            return Err(
                Error::new(ErrorKind::InvalidInput).with_message("fields must be a JSON object")
            );
        };
        let mut fields = Fields::new();
        for (name, value) in map {
            if name.is_empty() {
                return Err(
                    Error::new(ErrorKind::InvalidInput).with_message("field names must not be empty")
                );
            }
            let value = FieldValue::from_json(value)
                .map_err(|err| err.with_hint(format!("while reading field `{name}`")))?;
            fields.insert(name, value);
        }
        Ok(fields)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    version: u64,
    action: Action,
    schema_id: SchemaId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous: Option<ViewId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fields: Option<Fields>,
}

impl Operation {
    pub fn create(schema_id: SchemaId, fields: Fields) -> Result<Self, Error> {
        Self::build(Action::Create, schema_id, None, Some(fields))
    }

    pub fn update(schema_id: SchemaId, previous: ViewId, fields: Fields) -> Result<Self, Error> {
        Self::build(Action::Update, schema_id, Some(previous), Some(fields))
    }

    pub fn delete(schema_id: SchemaId, previous: ViewId) -> Result<Self, Error> {
        Self::build(Action::Delete, schema_id, Some(previous), None)
    }

    fn build(
        action: Action,
        schema_id: SchemaId,
        previous: Option<ViewId>,
        fields: Option<Fields>,
    ) -> Result<Self, Error> {
        let operation = Self {
            version: OPERATION_VERSION,
            action,
            schema_id,
            previous,
            fields,
        };
        operation.validate()?;
        Ok(operation)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.version != OPERATION_VERSION {
            return Err(Error::new(ErrorKind::InvalidInput)
                .with_message(format!("unsupported operation version {}", self.version)));
        }
        let has_fields = self.fields.as_ref().is_some_and(|fields| !fields.is_empty());
        match self.action {
            Action::Create | Action::Update if !has_fields => {
                Err(Error::new(ErrorKind::MissingParameter)
                    .with_message(format!("{:?} operation requires fields", self.action)))
            }
            Action::Delete if self.fields.is_some() => Err(Error::new(ErrorKind::InvalidInput)
                .with_message("delete operation must not carry fields")),
            Action::Create if self.previous.is_some() => Err(Error::new(ErrorKind::InvalidInput)
                .with_message("create operation must not carry previous")),
            Action::Update | Action::Delete if self.previous.is_none() => {
                Err(Error::new(ErrorKind::MissingParameter)
                    .with_message(format!("{:?} operation requires previous", self.action)))
            }
            _ => Ok(()),
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn schema_id(&self) -> &SchemaId {
        &self.schema_id
    }

    pub fn previous(&self) -> Option<&ViewId> {
        self.previous.as_ref()
    }

    pub fn fields(&self) -> Option<&Fields> {
        self.fields.as_ref()
    }

    /// Canonical payload bytes; field order is fixed by the ordered map.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode operation")
                .with_source(err)
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let operation: Self = serde_json::from_slice(bytes).map_err(|err| {
            Error::new(ErrorKind::InvalidInput)
                .with_message("invalid operation payload")
                .with_source(err)
        })?;
        operation.validate()?;
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, FieldValue, Fields, Operation, SchemaId, ViewId};
    use crate::core::error::ErrorKind;
    use crate::core::hash::Hash;
    use serde_json::json;

    fn schema() -> SchemaId {
        SchemaId::new("venues_0020c65567ae37efea293e34a9c7d13f8f2bf23dbdc3b5c7b9ab46293111c48fc78b")
            .expect("schema")
    }

    fn fields() -> Fields {
        Fields::new()
            .with("name", FieldValue::Str("Plant Cafe".to_string()))
            .with("capacity", FieldValue::Int(42))
    }

    #[test]
    fn operation_invariants_per_action() {
        let previous = ViewId::from(Hash::digest(b"create"));

        assert!(Operation::create(schema(), fields()).is_ok());
        let err = Operation::create(schema(), Fields::new()).expect_err("no fields");
        assert_eq!(err.kind(), ErrorKind::MissingParameter);

        let update = Operation::update(schema(), previous.clone(), fields()).expect("update");
        assert_eq!(update.action(), Action::Update);
        assert_eq!(update.previous(), Some(&previous));

        let delete = Operation::delete(schema(), previous).expect("delete");
        assert!(delete.fields().is_none());
    }

    #[test]
    fn decode_rejects_inconsistent_payloads() {
        let payload = json!({
            "version": 1,
            "action": "delete",
            "schema_id": "venues",
            "previous": Hash::digest(b"a").to_hex(),
            "fields": {"name": {"type": "str", "value": "x"}},
        });
        let bytes = serde_json::to_vec(&payload).expect("json");
        let err = Operation::decode(&bytes).expect_err("fields on delete");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let payload = json!({"version": 1, "action": "update", "schema_id": "venues",
            "fields": {"name": {"type": "str", "value": "x"}}});
        let bytes = serde_json::to_vec(&payload).expect("json");
        let err = Operation::decode(&bytes).expect_err("no previous");
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
    }

    #[test]
    fn encode_is_canonical() {
        let a = Fields::new()
            .with("b", FieldValue::Bool(true))
            .with("a", FieldValue::Float(1.5));
        let b = Fields::new()
            .with("a", FieldValue::Float(1.5))
            .with("b", FieldValue::Bool(true));
        let left = Operation::create(schema(), a).expect("a").encode().expect("encode");
        let right = Operation::create(schema(), b).expect("b").encode().expect("encode");
        assert_eq!(left, right);
        assert_eq!(Operation::decode(&left).expect("decode").fields().map(Fields::len), Some(2));
    }

    #[test]
    fn view_id_is_sorted_and_round_trips() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        let view = ViewId::new([b, a, b]).expect("view");
        assert_eq!(view.len(), 2);
        assert!(view[0] < view[1]);
        let parsed: ViewId = view.to_string().parse().expect("parse");
        assert_eq!(parsed, view);

        let err = ViewId::new([]).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
    }

    #[test]
    fn fields_from_json_infers_scalars_and_typed_values() {
        let relation = Hash::digest(b"doc");
        let fields = Fields::from_json(json!({
            "title": "hello",
            "count": 3,
            "ratio": 0.25,
            "open": false,
            "venue": {"type": "relation", "value": relation.to_hex()},
        }))
        .expect("fields");
        assert_eq!(fields.get("title"), Some(&FieldValue::Str("hello".to_string())));
        assert_eq!(fields.get("count"), Some(&FieldValue::Int(3)));
        assert_eq!(fields.get("ratio"), Some(&FieldValue::Float(0.25)));
        assert_eq!(fields.get("open"), Some(&FieldValue::Bool(false)));
        assert_eq!(fields.get("venue"), Some(&FieldValue::Relation(relation)));

        let err = Fields::from_json(json!({"tags": ["a"]})).expect_err("array");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = Fields::from_json(json!(["a"])).expect_err("not object");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn schema_id_rejects_empty_and_whitespace() {
        assert_eq!(
            SchemaId::new("").expect_err("empty").kind(),
            ErrorKind::MissingParameter
        );
        assert_eq!(
            SchemaId::new("a b").expect_err("space").kind(),
            ErrorKind::InvalidInput
        );
    }
}
