//! # polybase-rs-sdk
//!
//! Client for Polybase style collection databases: collections and records
//! addressed by path, filtered and sorted queries, live updates shared per
//! query, writes authenticated by message signatures, and schema functions
//! whose effects are computed locally before the call is submitted.
//!
//! ```no_run
//! use polybase_rs_sdk::client::WhereOperator;
//! use polybase_rs_sdk::polybase::{Polybase, PolybaseConfig};
//!
//! # async fn demo() -> polybase_rs_sdk::error::PolybaseResult<()> {
//! let polybase = Polybase::new(PolybaseConfig::new().with_default_namespace("demo/app"))?;
//! let adults = polybase
//!     .collection("users")
//!     .where_("age", WhereOperator::Gte, 18)
//!     .sort("age", None)
//!     .get()
//!     .await?;
//! println!("{} adults", adults.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod collection;
pub mod error;
pub mod logger;
pub mod platform;
pub mod polybase;
pub mod util;

#[cfg(all(test, not(target_arch = "wasm32")))]
pub(crate) mod test_support;
