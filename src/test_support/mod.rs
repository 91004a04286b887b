//! Test utilities shared across crate-level unit tests.

pub mod collection;
pub mod http;
pub mod sender;

pub use collection::{
    collection_for_client, collection_with, collection_with_functions, meta_response,
    users_program,
};
pub use http::start_mock_server;
pub use sender::{ok_response, signer, wait_until, MockSender};
