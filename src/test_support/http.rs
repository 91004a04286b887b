use std::panic;

use httpmock::MockServer;

/// Start a fresh `httpmock::MockServer`, or `None` when the environment does
/// not allow binding a local port.
pub fn start_mock_server() -> Option<MockServer> {
    panic::catch_unwind(MockServer::start).ok()
}
