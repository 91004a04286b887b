use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{schema_unavailable, PolybaseResult};

/// Parsed schema source. Mirrors the JSON emitted by the schema parser:
/// every node and item is an object keyed by its kind (`Collection`,
/// `Field`, `Function`); unknown kinds are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub nodes: Vec<RootNode>,
}

impl Program {
    /// Finds the collection declared under `name`.
    pub fn collection(&self, name: &str) -> Option<&CollectionAst> {
        self.nodes
            .iter()
            .filter_map(|node| node.collection.as_ref())
            .find(|collection| collection.name == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RootNode {
    #[serde(rename = "Collection", default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<CollectionAst>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionAst {
    pub name: String,
    #[serde(default)]
    pub items: Vec<CollectionItem>,
}

impl CollectionAst {
    pub fn fields(&self) -> impl Iterator<Item = &FieldAst> {
        self.items.iter().filter_map(|item| item.field.as_ref())
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionAst> {
        self.items.iter().filter_map(|item| item.function.as_ref())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionAst> {
        self.functions().find(|function| function.name == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionItem {
    #[serde(rename = "Field", default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldAst>,
    #[serde(rename = "Function", default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionAst>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldAst {
    pub name: String,
    #[serde(rename = "type_")]
    pub type_name: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// A declared function. Everything besides the name and parameter list is
/// kept verbatim for the code generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionAst {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterAst>,
    #[serde(flatten)]
    pub body: Map<String, JsonValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterAst {
    pub name: String,
    #[serde(rename = "type_")]
    pub type_name: String,
}

impl ParameterAst {
    pub fn kind(&self) -> ParameterKind {
        ParameterKind::parse(&self.type_name)
    }
}

/// Declared parameter type as seen by call argument checking. Names are
/// matched exactly; anything else is passed through unchecked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Number,
    Record,
    Unchecked,
}

impl ParameterKind {
    pub fn parse(type_name: &str) -> Self {
        match type_name {
            "String" => ParameterKind::String,
            "Number" => ParameterKind::Number,
            "Record" => ParameterKind::Record,
            _ => ParameterKind::Unchecked,
        }
    }
}

/// Value types understood by record validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Record,
    Array,
    Other,
}

impl ValueKind {
    pub fn parse(type_name: &str) -> Self {
        match type_name.to_ascii_lowercase().as_str() {
            "string" => ValueKind::String,
            "number" => ValueKind::Number,
            "boolean" => ValueKind::Boolean,
            "record" | "map" | "object" => ValueKind::Record,
            "array" => ValueKind::Array,
            _ => ValueKind::Other,
        }
    }

    fn matches(&self, value: &JsonValue) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Number => value.is_number(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Record => value.is_object(),
            ValueKind::Array => value.is_array(),
            ValueKind::Other => true,
        }
    }
}

/// Turns raw schema source into its abstract form.
pub trait SchemaParser: Send + Sync + 'static {
    fn parse(&self, code: &str) -> PolybaseResult<Program>;
}

pub type SchemaParserArc = Arc<dyn SchemaParser>;

/// Parser for schema sources that already hold the JSON encoded [`Program`].
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonProgramParser;

impl SchemaParser for JsonProgramParser {
    fn parse(&self, code: &str) -> PolybaseResult<Program> {
        serde_json::from_str(code)
            .map_err(|err| schema_unavailable(format!("Unable to parse collection schema: {err}")))
    }
}

/// Checks `record` against the fields declared by `collection`.
///
/// Required fields must be present, present fields must have their declared
/// type and undeclared fields are rejected. `id` and `$`-prefixed keys are
/// always accepted.
pub fn validate_record(collection: &CollectionAst, record: &JsonValue) -> Result<(), String> {
    let Some(object) = record.as_object() else {
        return Err("record must be an object".to_string());
    };

    for field in collection.fields() {
        match object.get(&field.name) {
            None | Some(JsonValue::Null) if field.required => {
                return Err(format!("missing required field `{}`", field.name));
            }
            Some(value) if !value.is_null() => {
                if !ValueKind::parse(&field.type_name).matches(value) {
                    return Err(format!(
                        "field `{}` must be of type {}",
                        field.name, field.type_name
                    ));
                }
            }
            _ => {}
        }
    }

    for key in object.keys() {
        if key == "id" || key.starts_with('$') {
            continue;
        }
        if !collection.fields().any(|field| &field.name == key) {
            return Err(format!("unexpected field `{key}`"));
        }
    }
    Ok(())
}
