use std::fmt;

use serde_json::{json, Map, Value as JsonValue};

use crate::client::{encode_component, Method, Request};
use crate::collection::api::Collection;
use crate::collection::subscription::ListenerRegistration;
use crate::collection::types::{decode_payload, CollectionDocument};
use crate::error::{invalid_argument, validation_failed, PolybaseResult};
use crate::util::Observer;

/// Reference to a single record of a collection.
#[derive(Clone)]
pub struct Doc {
    id: String,
    collection: Collection,
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc")
            .field("collection", &self.collection.id())
            .field("id", &self.id)
            .finish()
    }
}

impl Doc {
    pub(crate) fn new(id: impl Into<String>, collection: Collection) -> Self {
        Self {
            id: id.into(),
            collection,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Canonical key: `doc:<collection id>/<record id>`.
    pub fn key(&self) -> String {
        format!("doc:{}/{}", self.collection.id(), self.id)
    }

    fn path(&self) -> String {
        format!(
            "/data/{}/{}",
            encode_component(self.collection.id()),
            encode_component(&self.id)
        )
    }

    pub fn request(&self) -> Request {
        Request::get(self.path())
    }

    pub async fn get(&self) -> PolybaseResult<CollectionDocument> {
        let response = self
            .collection
            .client()
            .request(self.request())
            .send(false)
            .await?;
        decode_payload(response.data, "record")
    }

    /// Writes `data` as this record. The record id is added to the payload
    /// and `public_keys`, when given, travel as the comma separated `$pk`
    /// field. The merged record must pass schema validation.
    pub async fn set(
        &self,
        data: JsonValue,
        public_keys: Option<&[String]>,
    ) -> PolybaseResult<CollectionDocument> {
        let JsonValue::Object(fields) = data else {
            return Err(invalid_argument("Record data must be a JSON object"));
        };

        let mut record = Map::new();
        record.insert("id".to_string(), JsonValue::String(self.id.clone()));
        record.extend(fields);
        if let Some(keys) = public_keys {
            record.insert("$pk".to_string(), JsonValue::String(keys.join(",")));
        }
        let record = JsonValue::Object(record);

        if !self.collection.validate(&record).await? {
            return Err(validation_failed(format!(
                "Record `{}` is not valid for collection `{}`",
                self.id,
                self.collection.id()
            )));
        }

        let request = Request::new(Method::Put, self.path()).with_body(json!({ "data": record }));
        let response = self.collection.client().request(request).send(false).await?;
        decode_payload(response.data, "record")
    }

    pub async fn delete(&self) -> PolybaseResult<CollectionDocument> {
        let request = Request::new(Method::Delete, self.path());
        let response = self.collection.client().request(request).send(false).await?;
        decode_payload(response.data, "record")
    }

    /// Listens for changes to this record.
    pub fn on_snapshot(&self, observer: Observer<CollectionDocument>) -> ListenerRegistration {
        self.collection
            .doc_registry()
            .register(self.key(), self.request(), observer)
    }
}
