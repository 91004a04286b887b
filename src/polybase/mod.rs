mod api;
mod config;

pub use api::Polybase;
pub use config::PolybaseConfig;
