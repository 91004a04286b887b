use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{internal_error, PolybaseResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
}

/// A single record as returned by the server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
    #[serde(default)]
    pub data: JsonValue,
}

impl CollectionDocument {
    /// Decodes the record data into `T`.
    pub fn decode<T>(&self) -> PolybaseResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.data.clone())
            .map_err(|err| internal_error(format!("Failed to decode record data: {err}")))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// A page of records plus the cursors to the neighbouring pages.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionList {
    #[serde(default)]
    pub data: Vec<CollectionDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl CollectionList {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The `$collections` record describing a collection: its id and schema source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub id: String,
    pub code: String,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

pub(crate) fn decode_payload<T>(payload: JsonValue, what: &str) -> PolybaseResult<T>
where
    T: DeserializeOwned,
{
    serde_json::from_value(payload)
        .map_err(|err| internal_error(format!("Failed to decode {what}: {err}")))
}
