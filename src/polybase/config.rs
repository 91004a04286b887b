use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{Sender, SenderArc, Signer, SignerArc};
use crate::collection::call::FunctionCompilerArc;
use crate::collection::schema::SchemaParserArc;
use crate::collection::{FunctionCompiler, SchemaParser};

/// Settings for a [`Polybase`](crate::polybase::Polybase) handle. Every field
/// is optional; unset fields fall back to the defaults documented on them.
#[derive(Clone, Default)]
pub struct PolybaseConfig {
    /// API root. Defaults to `$POLYBASE_API_URL`, then the public testnet.
    pub base_url: Option<String>,
    /// Value of the `X-Polybase-Client` header. Defaults to `Polybase`.
    pub client_id: Option<String>,
    /// Prefix applied to every collection path.
    pub default_namespace: Option<String>,
    pub signer: Option<SignerArc>,
    /// Defaults to [`HttpSender`](crate::client::HttpSender).
    pub sender: Option<SenderArc>,
    /// Defaults to [`JsonProgramParser`](crate::collection::JsonProgramParser).
    pub parser: Option<SchemaParserArc>,
    /// Defaults to an empty [`FunctionRegistry`](crate::collection::FunctionRegistry).
    pub compiler: Option<FunctionCompilerArc>,
    pub request_timeout: Option<Duration>,
    /// Delay between live-update polls when the sender has no streaming mode.
    pub subscription_poll_interval: Option<Duration>,
}

impl fmt::Debug for PolybaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolybaseConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("default_namespace", &self.default_namespace)
            .field("signer", &self.signer.is_some())
            .field("sender", &self.sender.is_some())
            .field("parser", &self.parser.is_some())
            .field("compiler", &self.compiler.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("subscription_poll_interval", &self.subscription_poll_interval)
            .finish()
    }
}

impl PolybaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = Some(namespace.into());
        self
    }

    pub fn with_signer(mut self, signer: impl Signer) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    pub fn with_sender(mut self, sender: impl Sender) -> Self {
        self.sender = Some(Arc::new(sender));
        self
    }

    pub fn with_parser(mut self, parser: impl SchemaParser) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    pub fn with_compiler(mut self, compiler: impl FunctionCompiler) -> Self {
        self.compiler = Some(Arc::new(compiler));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_subscription_poll_interval(mut self, interval: Duration) -> Self {
        self.subscription_poll_interval = Some(interval);
        self
    }
}
