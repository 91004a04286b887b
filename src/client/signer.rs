use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::PolybaseResult;

const SIGNATURE_VERSION: &str = "0";

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Output of the signing primitive: a hash of the signed message, the
/// signature itself and an optional hint identifying the public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerResponse {
    pub h: String,
    pub sig: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk: Option<String>,
}

impl SignerResponse {
    pub fn new(h: impl Into<String>, sig: impl Into<String>) -> Self {
        Self {
            h: h.into(),
            sig: sig.into(),
            pk: None,
        }
    }

    pub fn with_public_key(mut self, pk: impl Into<String>) -> Self {
        self.pk = Some(pk.into());
        self
    }
}

/// Signs canonicalized request messages. Returning `Ok(None)` means the
/// request goes out without a signature header.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Signer: Send + Sync + 'static {
    async fn sign(&self, message: &str) -> PolybaseResult<Option<SignerResponse>>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl<F> Signer for F
where
    F: Fn(&str) -> Option<SignerResponse> + Send + Sync + 'static,
{
    async fn sign(&self, message: &str) -> PolybaseResult<Option<SignerResponse>> {
        Ok(self(message))
    }
}

pub type SignerArc = Arc<dyn Signer>;

/// Signature attached to authenticated requests as `X-Polybase-Signature`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureEnvelope {
    pub timestamp: i64,
    pub hash: String,
    pub signature: String,
    pub public_key: Option<String>,
}

impl SignatureEnvelope {
    /// Signs `"<timestamp>.<json body>"` (empty body when there is none).
    pub async fn sign(
        signer: &dyn Signer,
        body: Option<&JsonValue>,
    ) -> PolybaseResult<Option<SignatureEnvelope>> {
        let timestamp = next_timestamp_micros();
        let message = signing_message(timestamp, body);
        let Some(response) = signer.sign(&message).await? else {
            return Ok(None);
        };
        Ok(Some(SignatureEnvelope {
            timestamp,
            hash: response.h,
            signature: response.sig,
            public_key: response.pk,
        }))
    }
}

impl Display for SignatureEnvelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "v={SIGNATURE_VERSION},t={},h={},sig={}",
            self.timestamp, self.hash, self.signature
        )?;
        if let Some(pk) = &self.public_key {
            write!(f, ",pk={pk}")?;
        }
        Ok(())
    }
}

pub(crate) fn signing_message(timestamp: i64, body: Option<&JsonValue>) -> String {
    let body = body.map(JsonValue::to_string).unwrap_or_default();
    format!("{timestamp}.{body}")
}

/// Microseconds since the epoch, strictly increasing within this process.
pub(crate) fn next_timestamp_micros() -> i64 {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_TIMESTAMP.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_TIMESTAMP.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}
