//! SRT channel endpoints (caller and listener roles).
//!
//! Built on `srt-tokio`: each endpoint owns one SRT connection carrying
//! whole datagrams (one wire frame per datagram, never split). The socket is
//! closed exactly once, either explicitly via [`SrtEndpoint::close`] /
//! [`SrtSender::close`] or when the owning half is dropped.
//!
//! [`SrtEndpoint::split`] separates the connection into an [`SrtSender`] and
//! an [`SrtReceiver`] so egress and ingress can live on different tasks;
//! each half still has exactly one owner.

use std::time::Instant;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use srt_tokio::options::{DataRate, LiveBandwidthMode};
use srt_tokio::{SrtIncoming, SrtListener, SrtSocket};
use tracing::{debug, info};

use viscalink_core::config::SrtSettings;

use crate::TransportError;

// ── Connected endpoint ────────────────────────────────────────────────────────

/// One connected SRT channel (either role).
pub struct SrtEndpoint {
    socket: SrtSocket,
    peer: String,
}

impl SrtEndpoint {
    /// Caller role: dial `host:port` with the configured options.
    pub async fn connect(
        host: &str,
        port: u16,
        settings: &SrtSettings,
    ) -> Result<Self, TransportError> {
        let remote = format!("{host}:{port}");
        let mut builder = SrtSocket::builder().latency(settings.latency());
        if let Some(max_bw) = settings.max_bw {
            builder = builder.bandwidth(LiveBandwidthMode::Max(DataRate(max_bw)));
        }
        let socket = builder
            .call(remote.as_str(), None)
            .await
            .map_err(|e| TransportError::ConnectFailed {
                detail: format!("{remote}: {e}"),
            })?;
        info!(peer = %remote, "SRT channel connected");
        Ok(Self {
            socket,
            peer: remote,
        })
    }

    /// Peer address, for logging.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send one datagram; resolves once the sender buffer admits it.
    pub async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        SinkExt::send(&mut self.socket, (Instant::now(), payload))
            .await
            .map_err(|e| TransportError::SendFailed {
                detail: e.to_string(),
            })
    }

    /// Receive one whole datagram.
    pub async fn recv(&mut self) -> Result<Bytes, TransportError> {
        match self.socket.next().await {
            Some(Ok((_stamp, payload))) => Ok(payload),
            Some(Err(e)) => Err(TransportError::RecvClosed {
                detail: e.to_string(),
            }),
            None => Err(TransportError::RecvClosed {
                detail: "closed by peer".to_owned(),
            }),
        }
    }

    /// Split into independently owned send and receive halves.
    pub fn split(self) -> (SrtSender, SrtReceiver) {
        let (sink, stream) = StreamExt::split(self.socket);
        (
            SrtSender {
                sink,
                peer: self.peer.clone(),
            },
            SrtReceiver {
                stream,
                peer: self.peer,
            },
        )
    }

    /// Flush and close the channel.
    pub async fn close(mut self) {
        if let Err(e) = SinkExt::close(&mut self.socket).await {
            debug!(peer = %self.peer, error = %e, "SRT close");
        }
    }
}

/// Write half of a split [`SrtEndpoint`].
pub struct SrtSender {
    sink: SplitSink<SrtSocket, (Instant, Bytes)>,
    peer: String,
}

impl SrtSender {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.sink
            .send((Instant::now(), payload))
            .await
            .map_err(|e| TransportError::SendFailed {
                detail: e.to_string(),
            })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(peer = %self.peer, error = %e, "SRT close");
        }
    }
}

/// Read half of a split [`SrtEndpoint`].
pub struct SrtReceiver {
    stream: SplitStream<SrtSocket>,
    peer: String,
}

impl SrtReceiver {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn recv(&mut self) -> Result<Bytes, TransportError> {
        match self.stream.next().await {
            Some(Ok((_stamp, payload))) => Ok(payload),
            Some(Err(e)) => Err(TransportError::RecvClosed {
                detail: e.to_string(),
            }),
            None => Err(TransportError::RecvClosed {
                detail: "closed by peer".to_owned(),
            }),
        }
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Listener role: bound SRT socket handing out per-client endpoints.
///
/// Accepted connections inherit the listener's latency option. Concurrency
/// limiting (`max_clients`) is the accept loop's job; the acceptor itself
/// hands out every handshake that completes.
pub struct SrtAcceptor {
    _listener: SrtListener,
    incoming: SrtIncoming,
    local: String,
}

impl SrtAcceptor {
    /// Bind and listen on `bind_address:port`. Fatal on failure.
    pub async fn bind(
        bind_address: &str,
        port: u16,
        settings: &SrtSettings,
    ) -> Result<Self, TransportError> {
        let local = format!("{bind_address}:{port}");
        let (listener, incoming) = SrtListener::builder()
            .latency(settings.latency())
            .bind(local.as_str())
            .await
            .map_err(|e| TransportError::BindFailed {
                detail: format!("{local}: {e}"),
            })?;
        info!(addr = %local, "SRT listener bound");
        Ok(Self {
            _listener: listener,
            incoming,
            local,
        })
    }

    /// Wait for the next client handshake and accept it.
    pub async fn accept(&mut self) -> Result<SrtEndpoint, TransportError> {
        let request = self.incoming.incoming().next().await.ok_or_else(|| {
            TransportError::ListenFailed {
                detail: format!("{}: listener shut down", self.local),
            }
        })?;
        let peer = request.remote().to_string();
        let socket = request
            .accept(None)
            .await
            .map_err(|e| TransportError::AcceptFailed {
                detail: format!("{peer}: {e}"),
            })?;
        debug!(%peer, "accepted SRT client");
        Ok(SrtEndpoint { socket, peer })
    }
}
