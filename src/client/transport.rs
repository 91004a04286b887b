use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender as ChannelSender};
use async_trait::async_trait;
use futures::future::{select, Either};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::Value as JsonValue;

use crate::client::request::Method;

/// Owner side of a cancellation signal. Aborting closes the channel, which
/// wakes every clone of the matching [`AbortSignal`].
#[derive(Debug)]
pub struct AbortController {
    sender: ChannelSender<()>,
    receiver: Receiver<()>,
}

impl AbortController {
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::bounded(1);
        Self { sender, receiver }
    }

    pub fn abort(&self) {
        self.sender.close();
    }

    pub fn is_aborted(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receiver: self.receiver.clone(),
        }
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct AbortSignal {
    receiver: Receiver<()>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.receiver.is_closed()
    }

    /// Resolves once the owning controller aborts.
    pub async fn aborted(&self) {
        while self.receiver.recv().await.is_ok() {}
    }

    /// Runs `future` to completion unless the signal fires first, in which
    /// case the future is dropped and `None` is returned.
    pub async fn guard<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        if self.is_aborted() {
            return None;
        }
        let aborted = self.aborted();
        futures::pin_mut!(future);
        futures::pin_mut!(aborted);
        match select(future, aborted).await {
            Either::Left((output, _)) => Some(output),
            Either::Right(_) => None,
        }
    }
}

/// Concrete request handed to a [`Sender`]. Each attempt owns its own copy.
#[derive(Clone, Debug, PartialEq)]
pub struct SenderRequest {
    pub base_url: Option<String>,
    pub path: String,
    pub method: Method,
    pub params: Vec<(String, String)>,
    pub body: Option<JsonValue>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl SenderRequest {
    pub fn url(&self) -> String {
        match self.base_url.as_deref() {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                self.path.trim_start_matches('/')
            ),
            None => self.path.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SenderResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: BTreeMap<String, String>,
    pub data: JsonValue,
}

impl SenderResponse {
    pub fn new(status: u16, data: JsonValue) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            data,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Failure reported by a [`Sender`].
#[derive(Clone, Debug, PartialEq)]
pub enum SenderError {
    Cancelled,
    Status {
        status: u16,
        body: Option<JsonValue>,
    },
    Network {
        message: String,
        code: Option<String>,
    },
}

impl Display for SenderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderError::Cancelled => f.write_str("request cancelled"),
            SenderError::Status { status, .. } => write!(f, "request failed with status {status}"),
            SenderError::Network { message, .. } => f.write_str(message),
        }
    }
}

impl std::error::Error for SenderError {}

#[cfg(not(target_arch = "wasm32"))]
pub type SenderStream =
    futures::stream::BoxStream<'static, Result<SenderResponse, SenderError>>;

#[cfg(target_arch = "wasm32")]
pub type SenderStream =
    futures::stream::LocalBoxStream<'static, Result<SenderResponse, SenderError>>;

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn box_stream<S, T>(stream: S) -> futures::stream::BoxStream<'static, T>
where
    S: Stream<Item = T> + Send + 'static,
{
    stream.boxed()
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn box_stream<S, T>(stream: S) -> futures::stream::LocalBoxStream<'static, T>
where
    S: Stream<Item = T> + 'static,
{
    stream.boxed_local()
}

/// The wire transport. Implementations must honour `signal` cooperatively;
/// callers additionally stop waiting as soon as it fires.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Sender: Send + Sync + 'static {
    async fn send(
        &self,
        request: SenderRequest,
        signal: AbortSignal,
    ) -> Result<SenderResponse, SenderError>;

    /// Native streaming mode for live updates. Returning `None` makes the
    /// client fall back to long-polling through [`Sender::send`].
    fn open_stream(&self, _request: SenderRequest) -> Option<SenderStream> {
        None
    }
}

pub type SenderArc = Arc<dyn Sender>;

/// [`Sender`] backed by `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &SenderRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, request.url());
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }

    async fn exchange(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<SenderResponse, SenderError> {
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect::<BTreeMap<_, _>>();
        let text = response.text().await.map_err(map_reqwest_error)?;
        let data = if text.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        };

        if !status.is_success() {
            return Err(SenderError::Status {
                status: status.as_u16(),
                body: (!data.is_null()).then_some(data),
            });
        }
        Ok(SenderResponse {
            status: status.as_u16(),
            headers,
            data,
        })
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Sender for HttpSender {
    async fn send(
        &self,
        request: SenderRequest,
        signal: AbortSignal,
    ) -> Result<SenderResponse, SenderError> {
        let builder = self.build(&request);
        signal
            .guard(self.exchange(builder))
            .await
            .unwrap_or(Err(SenderError::Cancelled))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> SenderError {
    let code = if err.is_timeout() {
        Some("timeout")
    } else if err.is_decode() {
        Some("decode")
    } else if err.is_request() {
        Some("request")
    } else {
        None
    };
    #[cfg(not(target_arch = "wasm32"))]
    let code = code.or_else(|| err.is_connect().then_some("connect"));
    SenderError::Network {
        message: err.to_string(),
        code: code.map(str::to_string),
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::client::constants::CLIENT_HEADER;
    use crate::test_support::start_mock_server;
    use httpmock::Method::{GET, PUT};
    use serde_json::json;

    fn sender_request(base_url: String, method: Method, path: &str) -> SenderRequest {
        SenderRequest {
            base_url: Some(base_url),
            path: path.into(),
            method,
            params: Vec::new(),
            body: None,
            headers: BTreeMap::new(),
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn http_sender_sends_params_headers_and_body() {
        let Some(server) = start_mock_server() else {
            eprintln!("Skipping http_sender_sends_params_headers_and_body: unable to bind mock server");
            return;
        };
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/v0/data/users/a")
                .query_param("limit", "2")
                .header("x-polybase-client", "tests")
                .json_body(json!({ "data": { "id": "a" } }));
            then.status(200)
                .header("X-Polybase-Timestamp", "1700000000")
                .json_body(json!({ "data": { "id": "a" } }));
        });

        let mut request = sender_request(server.url("/v0"), Method::Put, "/data/users/a");
        request.params.push(("limit".into(), "2".into()));
        request
            .headers
            .insert(CLIENT_HEADER.into(), "tests".into());
        request.body = Some(json!({ "data": { "id": "a" } }));

        let response = HttpSender::new()
            .send(request, AbortController::new().signal())
            .await
            .unwrap();

        mock.assert();
        assert_eq!(response.status, 200);
        assert_eq!(response.data, json!({ "data": { "id": "a" } }));
        assert_eq!(response.header("x-polybase-timestamp"), Some("1700000000"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn http_sender_reports_error_status_with_body() {
        let Some(server) = start_mock_server() else {
            eprintln!("Skipping http_sender_reports_error_status_with_body: unable to bind mock server");
            return;
        };
        server.mock(|when, then| {
            when.method(GET).path("/data/users/a");
            then.status(401)
                .json_body(json!({ "error": { "reason": "auth/invalid-signature" } }));
        });

        let err = HttpSender::new()
            .send(
                sender_request(server.base_url(), Method::Get, "/data/users/a"),
                AbortController::new().signal(),
            )
            .await
            .unwrap_err();

        match err {
            SenderError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(
                    body,
                    Some(json!({ "error": { "reason": "auth/invalid-signature" } }))
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn http_sender_honours_abort_signal() {
        let Some(server) = start_mock_server() else {
            eprintln!("Skipping http_sender_honours_abort_signal: unable to bind mock server");
            return;
        };
        server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_secs(5));
        });
        let controller = AbortController::new();
        controller.abort();

        let err = HttpSender::new()
            .send(
                sender_request(server.base_url(), Method::Get, "/slow"),
                controller.signal(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SenderError::Cancelled));
    }

    #[test]
    fn url_joins_base_and_path() {
        let request = SenderRequest {
            base_url: Some("https://example.com/v0/".into()),
            path: "/data/users".into(),
            method: Method::Get,
            params: Vec::new(),
            body: None,
            headers: BTreeMap::new(),
            timeout: None,
        };
        assert_eq!(request.url(), "https://example.com/v0/data/users");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn guard_returns_none_once_aborted() {
        let controller = AbortController::new();
        let signal = controller.signal();

        assert_eq!(signal.guard(async { 7 }).await, Some(7));

        let pending = signal.guard(futures::future::pending::<()>());
        let abort = async {
            tokio::task::yield_now().await;
            controller.abort();
        };
        let (result, _) = futures::join!(pending, abort);
        assert!(result.is_none());
        assert!(signal.is_aborted());
    }

    #[test]
    fn response_headers_are_case_insensitive() {
        let response =
            SenderResponse::new(200, JsonValue::Null).with_header("X-Polybase-Timestamp", "12");
        assert_eq!(response.header("x-polybase-timestamp"), Some("12"));
    }
}
