use std::fmt::{Display, Formatter};
use std::str::FromStr;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{invalid_argument, PolybaseError};

/// Characters left untouched by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encodes a single path component. Slashes are encoded too, so a
/// namespaced collection id stays one component.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Delete,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Post => "POST",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Comparison operators accepted by `where_`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WhereOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl WhereOperator {
    /// Key used on the wire, or `None` for equality which stores the raw value.
    pub fn wire_key(&self) -> Option<&'static str> {
        match self {
            WhereOperator::Eq => None,
            WhereOperator::Gt => Some("$gt"),
            WhereOperator::Gte => Some("$gte"),
            WhereOperator::Lt => Some("$lt"),
            WhereOperator::Lte => Some("$lte"),
        }
    }

    pub(crate) fn filter_value(&self, value: JsonValue) -> JsonValue {
        match self.wire_key() {
            None => value,
            Some(key) => {
                let mut map = Map::new();
                map.insert(key.to_string(), value);
                JsonValue::Object(map)
            }
        }
    }
}

impl FromStr for WhereOperator {
    type Err = PolybaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(WhereOperator::Eq),
            ">" => Ok(WhereOperator::Gt),
            ">=" => Ok(WhereOperator::Gte),
            "<" => Ok(WhereOperator::Lt),
            "<=" => Ok(WhereOperator::Lte),
            other => Err(invalid_argument(format!("Unsupported where operator `{other}`"))),
        }
    }
}

/// One `(field, direction)` pair of a sort specification; serialized as a
/// two element JSON array.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortEntry(pub String, pub SortDirection);

/// Query parameters of a request.
///
/// The serialized form of this struct is part of the canonical query key, so
/// field order and the insertion order of `where_` are significant.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RequestParams {
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_: Option<Map<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

impl RequestParams {
    pub fn is_empty(&self) -> bool {
        *self == RequestParams::default()
    }

    /// Flattens the parameters into scalar query pairs. `where` and `sort`
    /// travel as JSON strings because senders only encode scalars.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(where_) = &self.where_ {
            pairs.push(("where".to_string(), JsonValue::Object(where_.clone()).to_string()));
        }
        if let Some(sort) = &self.sort {
            let encoded = serde_json::to_string(sort).unwrap_or_else(|_| "[]".to_string());
            pairs.push(("sort".to_string(), encoded));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(after) = &self.after {
            pairs.push(("after".to_string(), after.clone()));
        }
        if let Some(before) = &self.before {
            pairs.push(("before".to_string(), before.clone()));
        }
        if let Some(since) = &self.since {
            pairs.push(("since".to_string(), since.clone()));
        }
        pairs
    }
}

/// Transport independent description of what to fetch or mutate.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub path: String,
    pub method: Method,
    pub params: RequestParams,
    pub body: Option<JsonValue>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            params: RequestParams::default(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }
}
