//! Mock-server startup that degrades to a skip in sandboxes without sockets.
//!
//! Set `PAPERNET_REQUIRE_SOCKET_TESTS=1` to turn a skip into a failure (CI).

use wiremock::MockServer;

const REQUIRE_SOCKET_TESTS_ENV: &str = "PAPERNET_REQUIRE_SOCKET_TESTS";

fn sockets_required() -> bool {
    std::env::var(REQUIRE_SOCKET_TESTS_ENV)
        .is_ok_and(|value| matches!(value.trim(), "1" | "true" | "yes"))
}

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Starts a wiremock server, or returns `None` when local sockets are unavailable.
///
/// # Panics
///
/// Panics when sockets are unavailable and `PAPERNET_REQUIRE_SOCKET_TESTS` is set.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if can_bind_localhost() {
        return Some(MockServer::start().await);
    }
    assert!(
        !sockets_required(),
        "{REQUIRE_SOCKET_TESTS_ENV} is set but binding 127.0.0.1 failed"
    );
    eprintln!("skipping: cannot bind a local socket for the mock server");
    None
}
