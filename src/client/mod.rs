//! Signed transport: request descriptors, the pluggable sender and signer,
//! and the [`ClientRequest`] unit of work with its single authenticated retry.

mod api;
pub mod constants;
pub(crate) mod logger;
pub mod request;
mod rpc_error;
pub mod signer;
pub mod transport;

pub use api::{Client, ClientConfig, ClientRequest, LiveStream, RequestState};
pub use request::{
    encode_component, Method, Request, RequestParams, SortDirection, SortEntry, WhereOperator,
};
pub use signer::{SignatureEnvelope, Signer, SignerArc, SignerResponse};
pub use transport::{
    AbortController, AbortSignal, HttpSender, Sender, SenderArc, SenderError, SenderRequest,
    SenderResponse, SenderStream,
};
