use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value as JsonValue;

use crate::client::constants::{
    CLIENT_HEADER, DEFAULT_CLIENT_ID, DEFAULT_POLL_INTERVAL, NOT_MODIFIED, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
use crate::client::logger::LOGGER;
use crate::client::request::Request;
use crate::client::rpc_error::map_sender_error;
use crate::client::signer::{SignatureEnvelope, SignerArc};
use crate::client::transport::{
    box_stream, AbortController, SenderArc, SenderRequest, SenderResponse,
};
use crate::error::{request_cancelled, PolybaseErrorCode, PolybaseResult};
use crate::platform::runtime::sleep;

#[cfg(not(target_arch = "wasm32"))]
pub type LiveStream = futures::stream::BoxStream<'static, PolybaseResult<JsonValue>>;

#[cfg(target_arch = "wasm32")]
pub type LiveStream = futures::stream::LocalBoxStream<'static, PolybaseResult<JsonValue>>;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub client_id: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            base_url: None,
            request_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Entry point of the signed transport: turns request descriptors into
/// [`ClientRequest`] units of work and opens live-update streams.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    sender: SenderArc,
    signer: Option<SignerArc>,
    config: ClientConfig,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("signer", &self.inner.signer.is_some())
            .finish()
    }
}

impl Client {
    pub fn new(sender: SenderArc, signer: Option<SignerArc>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                sender,
                signer,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn has_signer(&self) -> bool {
        self.inner.signer.is_some()
    }

    /// Builds an unsent request. Construction has no side effects.
    pub fn request(&self, request: Request) -> ClientRequest {
        ClientRequest::new(
            self.inner.sender.clone(),
            self.sender_request(request),
            self.inner.signer.clone(),
        )
    }

    fn sender_request(&self, request: Request) -> SenderRequest {
        let config = &self.inner.config;
        let mut headers = BTreeMap::new();
        headers.insert(
            CLIENT_HEADER.to_string(),
            config
                .client_id
                .clone()
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
        );
        SenderRequest {
            base_url: config.base_url.clone(),
            path: request.path,
            method: request.method,
            params: request.params.to_query_pairs(),
            body: request.body,
            headers,
            timeout: config.request_timeout,
        }
    }

    /// Opens a live-update stream over the same path and parameters as
    /// `request`. Uses the sender's streaming mode when it has one and
    /// long-polls through signed requests otherwise.
    pub fn stream(&self, request: Request) -> LiveStream {
        if let Some(stream) = self
            .inner
            .sender
            .open_stream(self.sender_request(request.clone()))
        {
            return box_stream(stream.map(|item| {
                item.map(|response| response.data)
                    .map_err(map_sender_error)
            }));
        }
        self.long_poll(request)
    }

    fn long_poll(&self, request: Request) -> LiveStream {
        let state = PollState {
            client: self.clone(),
            request,
            since: None,
            first: true,
        };
        box_stream(stream::unfold(state, |mut state| async move {
            loop {
                if !state.first {
                    sleep(state.client.inner.config.poll_interval).await;
                }
                state.first = false;

                let mut request = state.request.clone();
                request.params.since = state.since.clone();
                match state.client.request(request).send(false).await {
                    Ok(response) => {
                        state.since = Some(
                            response
                                .header(TIMESTAMP_HEADER)
                                .map(str::to_string)
                                .unwrap_or_else(now_seconds),
                        );
                        return Some((Ok(response.data), state));
                    }
                    Err(err) if err.status() == Some(NOT_MODIFIED) => continue,
                    Err(err) => {
                        LOGGER.debug(format!(
                            "live update poll of {} failed: {err}",
                            state.request.path
                        ));
                        return Some((Err(err), state));
                    }
                }
            }
        }))
    }
}

struct PollState {
    client: Client,
    request: Request,
    since: Option<String>,
    first: bool,
}

fn now_seconds() -> String {
    format!("{}", Utc::now().timestamp_millis() as f64 / 1000.0)
}

/// Lifecycle of a [`ClientRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Sent { authenticated: bool },
    Completed,
    Cancelled,
}

/// One abortable unit of work. `send` may be called repeatedly; every call
/// runs the full protocol, including the single authenticated retry.
pub struct ClientRequest {
    sender: SenderArc,
    request: SenderRequest,
    signer: Option<SignerArc>,
    controller: AbortController,
    state: Mutex<RequestState>,
}

impl fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequest")
            .field("request", &self.request)
            .field("state", &self.state())
            .finish()
    }
}

impl ClientRequest {
    fn new(sender: SenderArc, request: SenderRequest, signer: Option<SignerArc>) -> Self {
        Self {
            sender,
            request,
            signer,
            controller: AbortController::new(),
            state: Mutex::new(RequestState::Created),
        }
    }

    pub fn request(&self) -> &SenderRequest {
        &self.request
    }

    pub fn state(&self) -> RequestState {
        *self.state.lock().unwrap()
    }

    /// Cancels the in-flight attempt, if any. No effect once completed.
    pub fn abort(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == RequestState::Completed {
                return;
            }
            *state = RequestState::Cancelled;
        }
        self.controller.abort();
    }

    pub async fn send(&self, with_auth: bool) -> PolybaseResult<SenderResponse> {
        let result = match self.attempt(with_auth).await {
            Err(err)
                if err.code == PolybaseErrorCode::Unauthorized
                    && !with_auth
                    && self.signer.is_some() =>
            {
                LOGGER.debug(format!(
                    "{} {} returned 401, retrying with signature",
                    self.request.method, self.request.path
                ));
                self.attempt(true).await
            }
            other => other,
        };

        let mut state = self.state.lock().unwrap();
        *state = match &result {
            Err(err) if err.is_cancelled() => RequestState::Cancelled,
            _ => RequestState::Completed,
        };
        result
    }

    async fn attempt(&self, with_auth: bool) -> PolybaseResult<SenderResponse> {
        let signal = self.controller.signal();
        if signal.is_aborted() {
            return Err(request_cancelled());
        }
        *self.state.lock().unwrap() = RequestState::Sent {
            authenticated: with_auth,
        };

        let exchange = async {
            let mut request = self.request.clone();
            if with_auth {
                if let Some(signer) = &self.signer {
                    if let Some(envelope) =
                        SignatureEnvelope::sign(signer.as_ref(), request.body.as_ref()).await?
                    {
                        request
                            .headers
                            .insert(SIGNATURE_HEADER.to_string(), envelope.to_string());
                    }
                }
            }
            self.sender
                .send(request, signal.clone())
                .await
                .map_err(map_sender_error)
        };

        signal
            .guard(exchange)
            .await
            .unwrap_or_else(|| Err(request_cancelled()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::request::{Method, RequestParams};
    use crate::client::signer::SignerResponse;
    use crate::client::transport::SenderError;
    use crate::test_support::{ok_response, signer, MockSender};
    use serde_json::json;

    fn client_with(sender: Arc<MockSender>, signed: bool) -> Client {
        Client::new(
            sender,
            signed.then(signer),
            ClientConfig {
                client_id: Some("tests".into()),
                base_url: Some("https://polybase.test/v0".into()),
                ..Default::default()
            },
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn attaches_client_header_and_encoded_params() {
        let sender = Arc::new(MockSender::new(|_| Ok(ok_response(json!({ "data": [] })))));
        let client = client_with(sender.clone(), false);

        let request = Request::get("/users").with_params(RequestParams {
            limit: Some(5),
            ..Default::default()
        });
        client.request(request).send(false).await.unwrap();

        let sent = sender.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header(CLIENT_HEADER), Some("tests"));
        assert_eq!(sent[0].param("limit"), Some("5"));
        assert_eq!(sent[0].url(), "https://polybase.test/v0/users");
        assert!(sent[0].header(SIGNATURE_HEADER).is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn escalates_to_signed_request_once_after_401() {
        let sender = Arc::new(MockSender::new(|request| {
            if request.header(SIGNATURE_HEADER).is_some() {
                Ok(ok_response(json!({ "ok": true })))
            } else {
                Err(SenderError::Status {
                    status: 401,
                    body: None,
                })
            }
        }));
        let client = client_with(sender.clone(), true);
        let request = client.request(Request::get("/data/users"));

        let response = request.send(false).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(request.state(), RequestState::Completed);
        let sent = sender.requests();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].header(SIGNATURE_HEADER).is_none());
        let signature = sent[1].header(SIGNATURE_HEADER).unwrap();
        assert!(signature.starts_with("v=0,t="));
        assert!(signature.ends_with(",h=hash,sig=signature"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn authenticated_401_is_terminal() {
        let sender = Arc::new(MockSender::new(|_| {
            Err(SenderError::Status {
                status: 401,
                body: None,
            })
        }));
        let client = client_with(sender.clone(), true);

        let err = client
            .request(Request::get("/data/users"))
            .send(true)
            .await
            .unwrap_err();

        assert_eq!(err.code, PolybaseErrorCode::Unauthorized);
        assert_eq!(sender.requests().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn no_escalation_without_signer() {
        let sender = Arc::new(MockSender::new(|_| {
            Err(SenderError::Status {
                status: 401,
                body: None,
            })
        }));
        let client = client_with(sender.clone(), false);

        let err = client
            .request(Request::get("/data/users"))
            .send(false)
            .await
            .unwrap_err();

        assert_eq!(err.code, PolybaseErrorCode::Unauthorized);
        assert_eq!(sender.requests().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn other_failures_are_not_retried() {
        let sender = Arc::new(MockSender::new(|_| {
            Err(SenderError::Status {
                status: 500,
                body: Some(json!({ "error": { "message": "boom" } })),
            })
        }));
        let client = client_with(sender.clone(), true);

        let err = client
            .request(Request::get("/data/users"))
            .send(false)
            .await
            .unwrap_err();

        assert_eq!(err.code, PolybaseErrorCode::TransportError);
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.message(), "boom");
        assert_eq!(sender.requests().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn signature_covers_request_body() {
        let sender = Arc::new(MockSender::new(|_| Ok(ok_response(JsonValue::Null))));
        let seen = Arc::new(Mutex::new(String::new()));
        let captured = seen.clone();
        let signer: SignerArc = Arc::new(move |message: &str| {
            *captured.lock().unwrap() = message.to_string();
            Some(SignerResponse::new("h", "s").with_public_key("0xpk"))
        });
        let client = Client::new(sender.clone(), Some(signer), ClientConfig::default());

        let body = json!({ "data": { "id": "a" } });
        client
            .request(Request::new(Method::Put, "/data/users/a").with_body(body))
            .send(true)
            .await
            .unwrap();

        let message = seen.lock().unwrap().clone();
        let (timestamp, signed_body) = message.split_once('.').unwrap();
        assert_eq!(signed_body, r#"{"data":{"id":"a"}}"#);
        let header = sender.requests()[0]
            .header(SIGNATURE_HEADER)
            .unwrap()
            .to_string();
        assert_eq!(header, format!("v=0,t={timestamp},h=h,sig=s,pk=0xpk"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn send_reexecutes_protocol() {
        let sender = Arc::new(MockSender::new(|_| Ok(ok_response(JsonValue::Null))));
        let client = client_with(sender.clone(), false);
        let request = client.request(Request::get("/data/users"));

        request.send(false).await.unwrap();
        request.send(false).await.unwrap();

        assert_eq!(sender.requests().len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn abort_resolves_pending_send_with_cancellation() {
        let sender = Arc::new(MockSender::hanging());
        let client = client_with(sender.clone(), false);
        let request = client.request(Request::get("/data/users"));
        assert_eq!(request.state(), RequestState::Created);

        let abort = async {
            tokio::task::yield_now().await;
            request.abort();
        };
        let (result, _) = futures::join!(request.send(false), abort);

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(request.state(), RequestState::Cancelled);
        assert!(request.send(false).await.unwrap_err().is_cancelled());
        assert_eq!(sender.requests().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sender_cancellation_maps_to_request_cancelled() {
        let sender = Arc::new(MockSender::new(|_| Err(SenderError::Cancelled)));
        let client = client_with(sender, true);

        let err = client
            .request(Request::get("/data/users"))
            .send(false)
            .await
            .unwrap_err();
        assert_eq!(err.code, PolybaseErrorCode::RequestCancelled);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn abort_after_completion_has_no_effect() {
        let sender = Arc::new(MockSender::new(|_| Ok(ok_response(JsonValue::Null))));
        let client = client_with(sender, false);
        let request = client.request(Request::get("/data/users"));

        request.send(false).await.unwrap();
        request.abort();

        assert_eq!(request.state(), RequestState::Completed);
        assert!(request.send(false).await.is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn long_poll_carries_server_timestamp_and_skips_not_modified() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sender = Arc::new(MockSender::new(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(ok_response(json!({ "n": 1 })).with_header(TIMESTAMP_HEADER, "100")),
                1 => Err(SenderError::Status {
                    status: 304,
                    body: None,
                }),
                _ => Ok(ok_response(json!({ "n": 2 })).with_header(TIMESTAMP_HEADER, "200")),
            }
        }));
        let client = Client::new(
            sender.clone(),
            None,
            ClientConfig {
                poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
        );

        let mut stream = client.stream(Request::get("/data/users/a"));
        assert_eq!(stream.next().await.unwrap().unwrap(), json!({ "n": 1 }));
        assert_eq!(stream.next().await.unwrap().unwrap(), json!({ "n": 2 }));

        let sent = sender.requests();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].param("since"), None);
        assert_eq!(sent[1].param("since"), Some("100"));
        assert_eq!(sent[2].param("since"), Some("100"));
    }
}
