//! Downstream TCP connector primitive.
//!
//! Each controller or camera endpoint is one [`TcpTarget`]. The connector
//! makes a single attempt per call; the owning task decides the retry pace
//! (its configured reconnect interval) and owns the resulting stream
//! exclusively, so there is never more than one reader or writer per
//! socket.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Read ceiling per poll: one Ethernet MTU. VISCA packets are far smaller;
/// anything larger than this in one read is multiple packets batched by the
/// kernel, which the gateway forwards as-is.
pub const MTU: usize = 1500;

/// Address of one downstream TCP endpoint plus its retry pacing.
#[derive(Debug, Clone)]
pub struct TcpTarget {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub reconnect_interval: Duration,
}

impl TcpTarget {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// One connection attempt. Nagle is disabled: VISCA exchanges are tiny
    /// request/reply packets and latency matters more than throughput.
    pub async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        debug!(endpoint = %self.name, addr = %self.addr(), "TCP connected");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_a_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let target = TcpTarget {
            name: "test".to_owned(),
            host: "127.0.0.1".to_owned(),
            port,
            reconnect_interval: Duration::from_millis(100),
        };

        let (stream, accepted) = tokio::join!(target.connect(), listener.accept());
        assert!(stream.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn refused_connection_surfaces_as_error() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = TcpTarget {
            name: "test".to_owned(),
            host: "127.0.0.1".to_owned(),
            port,
            reconnect_interval: Duration::from_millis(100),
        };
        assert!(target.connect().await.is_err());
    }
}
