use std::fmt;

use serde_json::{Map, Value as JsonValue};

use crate::client::{
    encode_component, Request, RequestParams, SortDirection, SortEntry, WhereOperator,
};
use crate::collection::api::Collection;
use crate::collection::subscription::ListenerRegistration;
use crate::collection::types::{decode_payload, CollectionList};
use crate::error::PolybaseResult;
use crate::util::Observer;

/// Filtered, sorted and paginated view over a collection.
///
/// A query is a value: every builder method returns a new query and leaves
/// the receiver untouched.
#[derive(Clone)]
pub struct Query {
    collection: Collection,
    params: RequestParams,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("collection", &self.collection.id())
            .field("params", &self.params)
            .finish()
    }
}

impl Query {
    pub(crate) fn new(collection: Collection) -> Self {
        Self {
            collection,
            params: RequestParams::default(),
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    /// Adds a filter on `field`. Filtering the same field again replaces the
    /// previous filter in place.
    pub fn where_(&self, field: &str, op: WhereOperator, value: impl Into<JsonValue>) -> Query {
        let mut next = self.clone();
        next.params
            .where_
            .get_or_insert_with(Map::new)
            .insert(field.to_string(), op.filter_value(value.into()));
        next
    }

    /// Appends a sort on `field`; the direction defaults to ascending.
    pub fn sort(&self, field: &str, direction: impl Into<Option<SortDirection>>) -> Query {
        let mut next = self.clone();
        next.params.sort.get_or_insert_with(Vec::new).push(SortEntry(
            field.to_string(),
            direction.into().unwrap_or_default(),
        ));
        next
    }

    pub fn limit(&self, limit: u64) -> Query {
        let mut next = self.clone();
        next.params.limit = Some(limit);
        next
    }

    pub fn after(&self, cursor: impl Into<String>) -> Query {
        let mut next = self.clone();
        next.params.after = Some(cursor.into());
        next
    }

    pub fn before(&self, cursor: impl Into<String>) -> Query {
        let mut next = self.clone();
        next.params.before = Some(cursor.into());
        next
    }

    /// Canonical key: `query:<collection id>?<JSON of the parameters>`.
    pub fn key(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_else(|_| "{}".to_string());
        format!("query:{}?{}", self.collection.id(), params)
    }

    pub fn request(&self) -> Request {
        Request::get(format!("/{}", encode_component(self.collection.id())))
            .with_params(self.params.clone())
    }

    pub async fn get(&self) -> PolybaseResult<CollectionList> {
        let response = self
            .collection
            .client()
            .request(self.request())
            .send(false)
            .await?;
        decode_payload(response.data, "query results")
    }

    /// Listens for changes to the query results.
    pub fn on_snapshot(&self, observer: Observer<CollectionList>) -> ListenerRegistration {
        self.collection
            .query_registry()
            .register(self.key(), self.request(), observer)
    }
}
