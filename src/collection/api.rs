use std::fmt;
use std::sync::Arc;

use async_lock::OnceCell;
use futures::future::try_join_all;
use serde_json::{json, Value as JsonValue};

use crate::client::logger::LOGGER;
use crate::client::{encode_component, Client, Method, Request, SortDirection, WhereOperator};
use crate::collection::call::{
    check_arguments, execute_isolated, AuthContext, CallArg, FunctionCompilerArc,
};
use crate::collection::doc::Doc;
use crate::collection::query::Query;
use crate::collection::schema::{validate_record, CollectionAst, Program, SchemaParserArc};
use crate::collection::subscription::{ListenerRegistration, SubscriptionRegistry};
use crate::collection::types::{
    decode_payload, CollectionDocument, CollectionList, CollectionMeta,
};
use crate::error::{function_not_found, schema_unavailable, PolybaseError, PolybaseResult};
use crate::util::Observer;

/// Handle to a collection. Cheap to clone; clones share the schema cache and
/// the live subscription registries.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    id: String,
    client: Client,
    parser: SchemaParserArc,
    compiler: FunctionCompilerArc,
    meta: OnceCell<Arc<CollectionMeta>>,
    program: OnceCell<Arc<Program>>,
    query_subscriptions: SubscriptionRegistry<CollectionList>,
    doc_subscriptions: SubscriptionRegistry<CollectionDocument>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.inner.id)
            .field("schema_loaded", &self.inner.program.get().is_some())
            .finish()
    }
}

impl Collection {
    pub fn new(
        id: impl Into<String>,
        client: Client,
        parser: SchemaParserArc,
        compiler: FunctionCompilerArc,
    ) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                id: id.into(),
                query_subscriptions: SubscriptionRegistry::new(client.clone()),
                doc_subscriptions: SubscriptionRegistry::new(client.clone()),
                client,
                parser,
                compiler,
                meta: OnceCell::new(),
                program: OnceCell::new(),
            }),
        }
    }

    /// Full slash separated path, including the namespace.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Last path segment; the name the schema declares the collection under.
    pub fn short_name(&self) -> &str {
        self.inner
            .id
            .rsplit('/')
            .next()
            .unwrap_or(self.inner.id.as_str())
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Canonical key: `collection:<id>`.
    pub fn key(&self) -> String {
        format!("collection:{}", self.inner.id)
    }

    #[cfg(test)]
    pub(crate) fn shares_state_with(&self, other: &Collection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn query_registry(&self) -> &SubscriptionRegistry<CollectionList> {
        &self.inner.query_subscriptions
    }

    pub(crate) fn doc_registry(&self) -> &SubscriptionRegistry<CollectionDocument> {
        &self.inner.doc_subscriptions
    }

    pub fn doc(&self, id: impl Into<String>) -> Doc {
        Doc::new(id, self.clone())
    }

    /// Unfiltered base query.
    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }

    pub fn where_(&self, field: &str, op: WhereOperator, value: impl Into<JsonValue>) -> Query {
        self.query().where_(field, op, value)
    }

    pub fn sort(&self, field: &str, direction: impl Into<Option<SortDirection>>) -> Query {
        self.query().sort(field, direction)
    }

    pub fn limit(&self, limit: u64) -> Query {
        self.query().limit(limit)
    }

    pub fn after(&self, cursor: impl Into<String>) -> Query {
        self.query().after(cursor)
    }

    pub fn before(&self, cursor: impl Into<String>) -> Query {
        self.query().before(cursor)
    }

    /// Lists the records of the collection.
    pub async fn get(&self) -> PolybaseResult<CollectionList> {
        let path = format!("/data/{}", encode_component(&self.inner.id));
        let response = self.inner.client.request(Request::get(path)).send(false).await?;
        decode_payload(response.data, "collection records")
    }

    /// Listens for changes to the whole collection.
    pub fn on_snapshot(&self, observer: Observer<CollectionList>) -> ListenerRegistration {
        self.query().on_snapshot(observer)
    }

    /// The `$collections` record of this collection. Fetched once; concurrent
    /// callers share the same request and the result is cached for the
    /// lifetime of the handle.
    pub async fn get_meta(&self) -> PolybaseResult<Arc<CollectionMeta>> {
        self.inner
            .meta
            .get_or_try_init(|| self.fetch_meta())
            .await
            .map(Arc::clone)
    }

    async fn fetch_meta(&self) -> PolybaseResult<Arc<CollectionMeta>> {
        let path = format!("/data/$collections/{}", encode_component(&self.inner.id));
        LOGGER.debug(format!("fetching schema of {}", self.inner.id));
        let response = self
            .inner
            .client
            .request(Request::get(path))
            .send(false)
            .await
            .map_err(|err| self.schema_error(err))?;
        let record: CollectionDocument = decode_payload(response.data, "collection metadata")
            .map_err(|err| self.schema_error(err))?;
        let meta: CollectionMeta = record.decode().map_err(|err| self.schema_error(err))?;
        Ok(Arc::new(meta))
    }

    fn schema_error(&self, err: PolybaseError) -> PolybaseError {
        if err.is_cancelled() {
            return err;
        }
        let error = schema_unavailable(format!(
            "Unable to load schema of collection `{}`: {}",
            self.inner.id,
            err.message()
        ));
        match err.status() {
            Some(status) => error.with_status(status),
            None => error,
        }
    }

    /// Parsed schema program. Shares the single-flight cache of [`Self::get_meta`].
    pub async fn schema(&self) -> PolybaseResult<Arc<Program>> {
        self.inner
            .program
            .get_or_try_init(|| async {
                let meta = self.get_meta().await?;
                self.inner.parser.parse(&meta.code).map(Arc::new)
            })
            .await
            .map(Arc::clone)
    }

    /// Fetches and parses the schema ahead of the first validation or call.
    pub async fn load(&self) -> PolybaseResult<()> {
        self.schema().await.map(|_| ())
    }

    fn collection_ast<'a>(&self, program: &'a Program) -> Option<&'a CollectionAst> {
        program.collection(self.short_name())
    }

    /// Checks `record` against the schema. Only reports whether the record is
    /// valid; failures to load the schema are returned as errors.
    pub async fn validate(&self, record: &JsonValue) -> PolybaseResult<bool> {
        let program = self.schema().await?;
        let Some(collection) = self.collection_ast(&program) else {
            LOGGER.warn(format!(
                "schema of {} does not declare collection {}",
                self.inner.id,
                self.short_name()
            ));
            return Ok(false);
        };
        match validate_record(collection, record) {
            Ok(()) => Ok(true),
            Err(reason) => {
                LOGGER.debug(format!("record rejected by {}: {reason}", self.inner.id));
                Ok(false)
            }
        }
    }

    /// Calls a schema function.
    ///
    /// The function is first executed locally over the current state of the
    /// referenced records; the predicted result is then submitted with the
    /// call. The request is signed when `public_key` is given. Returns the
    /// post-call values of the structured arguments.
    pub async fn call(
        &self,
        function_name: &str,
        args: Vec<CallArg>,
        public_key: Option<&str>,
    ) -> PolybaseResult<Vec<JsonValue>> {
        let program = self.schema().await?;
        let function = self
            .collection_ast(&program)
            .and_then(|collection| collection.function(function_name))
            .ok_or_else(|| function_not_found(&self.inner.id, function_name))?;

        check_arguments(&function.parameters, &args)?;

        let resolved = try_join_all(args.iter().map(|arg| async move {
            match arg {
                CallArg::Doc(doc) => doc.get().await.map(|record| record.data),
                other => Ok(other.wire_value()),
            }
        }))
        .await?;

        let compiled = self.inner.compiler.compile(&self.inner.id, function)?;
        let auth = AuthContext {
            public_key: public_key.map(str::to_string),
        };
        let changed = execute_isolated(compiled.as_ref(), &auth, &resolved)?;

        let body = json!({
            "args": args.iter().map(CallArg::wire_value).collect::<Vec<_>>(),
            "result": JsonValue::Array(changed.clone()).to_string(),
        });
        let path = format!(
            "/call/{}/{}",
            encode_component(&self.inner.id),
            encode_component(function_name)
        );
        self.inner
            .client
            .request(Request::new(Method::Post, path).with_body(body))
            .send(public_key.is_some())
            .await?;

        Ok(changed
            .into_iter()
            .filter(|value| value.is_object() || value.is_array())
            .collect())
    }
}
