use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::{Arc, Mutex};

use url::Url;

use crate::client::constants::{BASE_URL_ENV, DEFAULT_BASE_URL, DEFAULT_POLL_INTERVAL};
use crate::client::{Client, ClientConfig, HttpSender, SenderArc};
use crate::collection::call::FunctionCompilerArc;
use crate::collection::schema::SchemaParserArc;
use crate::collection::{Collection, FunctionRegistry, JsonProgramParser};
use crate::error::{invalid_argument, PolybaseResult};
use crate::polybase::config::PolybaseConfig;

/// Entry point of the SDK. Owns the signed transport and hands out one
/// shared [`Collection`] per resolved path.
#[derive(Clone)]
pub struct Polybase {
    inner: Arc<PolybaseInner>,
}

struct PolybaseInner {
    client: Client,
    default_namespace: Option<String>,
    parser: SchemaParserArc,
    compiler: FunctionCompilerArc,
    collections: Mutex<HashMap<String, Collection>>,
}

impl fmt::Debug for Polybase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Polybase")
            .field("client", &self.inner.client)
            .field("default_namespace", &self.inner.default_namespace)
            .finish()
    }
}

impl Polybase {
    /// Builds a handle from `config`.
    ///
    /// # Errors
    /// Returns `polybase/invalid-argument` when the base URL is not an
    /// absolute URL.
    pub fn new(config: PolybaseConfig) -> PolybaseResult<Self> {
        let base_url = resolve_base_url(config.base_url)?;
        let sender: SenderArc = config
            .sender
            .unwrap_or_else(|| Arc::new(HttpSender::new()));
        let client = Client::new(
            sender,
            config.signer,
            ClientConfig {
                client_id: config.client_id,
                base_url: Some(base_url),
                request_timeout: config.request_timeout,
                poll_interval: config
                    .subscription_poll_interval
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
            },
        );

        Ok(Self {
            inner: Arc::new(PolybaseInner {
                client,
                default_namespace: config
                    .default_namespace
                    .map(|namespace| namespace.trim_end_matches('/').to_string())
                    .filter(|namespace| !namespace.is_empty()),
                parser: config.parser.unwrap_or_else(|| Arc::new(JsonProgramParser)),
                compiler: config
                    .compiler
                    .unwrap_or_else(|| Arc::new(FunctionRegistry::new())),
                collections: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn default_namespace(&self) -> Option<&str> {
        self.inner.default_namespace.as_deref()
    }

    /// Returns the collection at `path`, prefixed with the default namespace
    /// when one is configured. Repeated calls return the same collection.
    pub fn collection(&self, path: &str) -> Collection {
        let resolved = self.resolve_path(path);
        let mut collections = self.inner.collections.lock().unwrap();
        collections
            .entry(resolved.clone())
            .or_insert_with(|| {
                Collection::new(
                    resolved,
                    self.inner.client.clone(),
                    self.inner.parser.clone(),
                    self.inner.compiler.clone(),
                )
            })
            .clone()
    }

    fn resolve_path(&self, path: &str) -> String {
        match &self.inner.default_namespace {
            Some(namespace) => format!("{namespace}/{path}"),
            None => path.to_string(),
        }
    }
}

fn resolve_base_url(configured: Option<String>) -> PolybaseResult<String> {
    let base_url = configured
        .or_else(|| env::var(BASE_URL_ENV).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    Url::parse(&base_url)
        .map_err(|err| invalid_argument(format!("Invalid base URL `{base_url}`: {err}")))?;
    Ok(base_url.trim_end_matches('/').to_string())
}
