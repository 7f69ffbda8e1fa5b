//! Loopback connectivity probe
//!
//! Verifies that something is listening on the local side of a tunnel. For
//! reverse tunnels this only covers the local service; the listener on the
//! SSH server cannot be probed from here.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Attempt a bounded TCP connect to `127.0.0.1:port`.
///
/// Reports reachability only; no tunnel state is touched.
pub async fn probe_local_port(port: u16) -> std::io::Result<()> {
    match timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_elapsed) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connect to 127.0.0.1:{} timed out", port),
        )),
    }
}
