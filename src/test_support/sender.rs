use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::client::signer::{SignerArc, SignerResponse};
use crate::client::transport::{
    box_stream, AbortSignal, Sender, SenderError, SenderRequest, SenderResponse, SenderStream,
};

type Handler = Box<dyn Fn(&SenderRequest) -> Result<SenderResponse, SenderError> + Send + Sync>;

/// Recording [`Sender`] whose replies come from a closure. With streaming
/// enabled every `open_stream` call hands out a [`MockStream`] the test can
/// push events into.
pub struct MockSender {
    handler: Handler,
    hang: bool,
    streaming: bool,
    requests: Mutex<Vec<SenderRequest>>,
    streams: Mutex<Vec<MockStream>>,
}

impl MockSender {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&SenderRequest) -> Result<SenderResponse, SenderError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            hang: false,
            streaming: false,
            requests: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
        }
    }

    /// A sender whose requests never complete.
    pub fn hanging() -> Self {
        let mut sender = Self::new(|_| Err(SenderError::Cancelled));
        sender.hang = true;
        sender
    }

    pub fn with_streams(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn requests(&self) -> Vec<SenderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn streams(&self) -> Vec<MockStream> {
        self.streams.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sender for MockSender {
    async fn send(
        &self,
        request: SenderRequest,
        _signal: AbortSignal,
    ) -> Result<SenderResponse, SenderError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.hang {
            futures::future::pending::<()>().await;
        }
        (self.handler)(&request)
    }

    fn open_stream(&self, request: SenderRequest) -> Option<SenderStream> {
        if !self.streaming {
            return None;
        }
        let (events, receiver) = async_channel::unbounded();
        self.streams.lock().unwrap().push(MockStream { request, events });
        Some(box_stream(receiver))
    }
}

#[derive(Clone)]
pub struct MockStream {
    pub request: SenderRequest,
    events: async_channel::Sender<Result<SenderResponse, SenderError>>,
}

impl MockStream {
    pub fn emit(&self, data: JsonValue) {
        let _ = self.events.try_send(Ok(ok_response(data)));
    }

    pub fn fail(&self, error: SenderError) {
        let _ = self.events.try_send(Err(error));
    }

    /// Ends the stream as a server-closed connection would.
    pub fn close(&self) {
        self.events.close();
    }

    /// True once the consuming side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

pub fn ok_response(data: JsonValue) -> SenderResponse {
    SenderResponse::new(200, data)
}

pub fn signer() -> SignerArc {
    Arc::new(|_: &str| Some(SignerResponse::new("hash", "signature")))
}

/// Yields to the runtime until `condition` holds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was not reached");
}
