//! Collection, document and query references together with the schema
//! cache, record validation, speculative function calls and live updates.

mod api;
pub mod call;
mod doc;
mod query;
pub mod schema;
pub mod subscription;
pub mod types;

pub use api::Collection;
pub use call::{AuthContext, CallArg, CompiledFunction, FunctionCompiler, FunctionRegistry};
pub use doc::Doc;
pub use query::Query;
pub use schema::{JsonProgramParser, Program, SchemaParser};
pub use subscription::{ListenerRegistration, SubscriptionRegistry};
pub use types::{Block, CollectionDocument, CollectionList, CollectionMeta, Cursor};
