use std::time::Duration;

pub const SIGNATURE_HEADER: &str = "X-Polybase-Signature";
pub const CLIENT_HEADER: &str = "X-Polybase-Client";
pub const TIMESTAMP_HEADER: &str = "x-polybase-timestamp";

pub const DEFAULT_CLIENT_ID: &str = "Polybase";
pub const DEFAULT_BASE_URL: &str = "https://testnet.polybase.xyz/v0";
pub const BASE_URL_ENV: &str = "POLYBASE_API_URL";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const NOT_MODIFIED: u16 = 304;
pub const UNAUTHORIZED: u16 = 401;
