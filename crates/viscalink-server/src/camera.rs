//! Per-camera worker tasks.
//!
//! Each configured camera gets exactly one task that owns its TCP socket and
//! its bounded command queue. Everything written to a camera, controller
//! VISCA traffic and tally commands alike, goes through that queue, which
//! makes per-camera ordering strict FIFO and leaves the socket with a single
//! reader and a single writer by construction.
//!
//! ```text
//! SRT sessions ──┐
//!                ├── mpsc(64) ──► worker ── TCP ──► camera
//! tally ticker ──┘                  │
//!                                   └── reply frames ──► originating session
//! ```
//!
//! While the camera is unreachable the worker reconnects on the configured
//! interval and drops whatever arrives in the meantime: VISCA is realtime,
//! and a stale command is worse than a missed one.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use viscalink_core::config::{CameraConfig, NdiMapping};
use viscalink_core::{Message, RoutingError, TallyState, ViscaFrame, ViscaType};
use viscalink_transport::{TcpTarget, MTU};

/// Bound on queued commands per camera; overflow drops the incoming command.
pub const COMMAND_QUEUE_DEPTH: usize = 64;

/// Poll period for unsolicited camera bytes and shutdown responsiveness.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ── Commands and handles ──────────────────────────────────────────────────────

/// Work item for a camera worker.
pub enum CameraCommand {
    /// Forward a VISCA frame; commands and inquiries get a bounded wait for
    /// the camera's reply, which is framed and sent to `reply`.
    Visca {
        frame: ViscaFrame,
        reply: mpsc::Sender<Bytes>,
    },
    /// Raw tally transition bytes resolved by the translator.
    Tally { state: TallyState, command: Bytes },
}

/// Shared handle to one camera worker.
pub struct CameraHandle {
    pub id: u8,
    pub name: String,
    pub mapping: Option<NdiMapping>,
    tx: mpsc::Sender<CameraCommand>,
    connected: Arc<AtomicBool>,
    current_tally: Arc<AtomicU8>,
}

impl CameraHandle {
    /// Enqueue a command without blocking. Disconnected cameras and full
    /// queues both drop the message.
    pub fn dispatch(&self, command: CameraCommand) -> Result<(), RoutingError> {
        if !self.connected() {
            return Err(RoutingError::Disconnected(self.id));
        }
        self.tx
            .try_send(command)
            .map_err(|_| RoutingError::QueueFull(self.id))
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Last tally state successfully written to the camera (or advanced past
    /// a suppressed transition).
    pub fn current_tally(&self) -> TallyState {
        TallyState::from_wire(self.current_tally.load(Ordering::Relaxed))
    }

    /// Advance the tally state without a write; used when a transition's
    /// command is suppressed so it is not retried every tick.
    pub fn advance_tally(&self, state: TallyState) {
        self.current_tally.store(state.to_wire(), Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn for_queue(
        id: u8,
        name: &str,
        mapping: Option<NdiMapping>,
        tx: mpsc::Sender<CameraCommand>,
    ) -> Self {
        Self {
            id,
            name: name.to_owned(),
            mapping,
            tx,
            connected: Arc::new(AtomicBool::new(true)),
            current_tally: Arc::new(AtomicU8::new(TallyState::Off.to_wire())),
        }
    }
}

/// Spawn the worker for one configured camera.
///
/// Returns the shared handle plus the worker task. The supervisor may drop
/// the task handle; workers exit on the shutdown signal (or when every
/// command sender is gone) and are otherwise observed through their socket.
pub fn spawn(
    config: CameraConfig,
    shutdown: watch::Receiver<bool>,
) -> (CameraHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let connected = Arc::new(AtomicBool::new(false));
    let current_tally = Arc::new(AtomicU8::new(TallyState::Off.to_wire()));

    let handle = CameraHandle {
        id: config.id,
        name: config.name.clone(),
        mapping: config.ndi_mapping.clone(),
        tx,
        connected: Arc::clone(&connected),
        current_tally: Arc::clone(&current_tally),
    };

    let worker = Worker {
        target: TcpTarget {
            name: config.name.clone(),
            host: config.ip_address.clone(),
            port: config.port,
            reconnect_interval: config.reconnect_interval(),
        },
        config,
        connected,
        current_tally,
        last_tally_update: None,
        scratch: vec![0u8; MTU],
    };
    let task = tokio::spawn(worker.run(rx, shutdown));

    (handle, task)
}

// ── Worker ────────────────────────────────────────────────────────────────────

struct Worker {
    config: CameraConfig,
    target: TcpTarget,
    connected: Arc<AtomicBool>,
    current_tally: Arc<AtomicU8>,
    last_tally_update: Option<Instant>,
    scratch: Vec<u8>,
}

impl Worker {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<CameraCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        'reconnect: loop {
            self.connected.store(false, Ordering::Relaxed);

            // Disconnected: pace connection attempts, rejecting commands
            // that arrive in between.
            let mut stream = loop {
                match self.target.connect().await {
                    Ok(stream) => break stream,
                    Err(e) => debug!(
                        camera = %self.config.name,
                        addr = %self.target.addr(),
                        error = %e,
                        "camera connect failed"
                    ),
                }
                let retry = tokio::time::sleep(self.target.reconnect_interval);
                tokio::pin!(retry);
                loop {
                    tokio::select! {
                        _ = &mut retry => break,
                        _ = shutdown.changed() => if *shutdown.borrow() { return },
                        cmd = rx.recv() => match cmd {
                            Some(cmd) => self.reject_while_down(cmd),
                            None => return,
                        },
                    }
                }
            };
            self.connected.store(true, Ordering::Relaxed);
            info!(camera = %self.config.name, addr = %self.target.addr(), "camera connected");

            // Connected: serve the queue, poll for unsolicited bytes.
            loop {
                tokio::select! {
                    cmd = rx.recv() => {
                        let Some(cmd) = cmd else { return };
                        if let Err(e) = self.serve(&mut stream, cmd).await {
                            warn!(camera = %self.config.name, error = %e, "camera i/o failed");
                            continue 'reconnect;
                        }
                    }
                    _ = tokio::time::sleep(POLL_INTERVAL) => {
                        if !self.drain_unsolicited(&stream) {
                            continue 'reconnect;
                        }
                    }
                    _ = shutdown.changed() => if *shutdown.borrow() { return },
                }
            }
        }
    }

    fn reject_while_down(&self, command: CameraCommand) {
        match command {
            CameraCommand::Visca { frame, .. } => warn!(
                camera = %self.config.name,
                sequence = frame.sequence,
                error = %RoutingError::Disconnected(self.config.id),
                "dropping VISCA frame"
            ),
            CameraCommand::Tally { state, .. } => debug!(
                camera = %self.config.name,
                %state,
                "camera down, tally transition deferred"
            ),
        }
    }

    async fn serve(&mut self, stream: &mut TcpStream, command: CameraCommand) -> io::Result<()> {
        match command {
            CameraCommand::Visca { frame, reply } => self.serve_visca(stream, frame, reply).await,
            CameraCommand::Tally { state, command } => {
                self.serve_tally(stream, state, &command).await
            }
        }
    }

    async fn serve_visca(
        &mut self,
        stream: &mut TcpStream,
        frame: ViscaFrame,
        reply: mpsc::Sender<Bytes>,
    ) -> io::Result<()> {
        stream.write_all(&frame.payload).await?;
        if !frame.visca_type.expects_reply() {
            // Responses and errors from proxied multi-hop controllers are
            // forwarded without waiting.
            return Ok(());
        }

        match timeout(self.config.command_timeout(), stream.read(&mut self.scratch)).await {
            Ok(Ok(0)) => Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(Ok(n)) => {
                let response = Message::Visca(ViscaFrame {
                    visca_type: ViscaType::Response,
                    camera_id: frame.camera_id,
                    sequence: frame.sequence,
                    payload: Bytes::copy_from_slice(&self.scratch[..n]),
                });
                if reply.try_send(response.encode()).is_err() {
                    debug!(camera = %self.config.name, "client session gone, dropping reply");
                }
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => {
                // No reply frame; the controller's request simply times out.
                warn!(
                    camera = %self.config.name,
                    sequence = frame.sequence,
                    timeout_ms = self.config.command_timeout_ms,
                    "camera reply timed out"
                );
                Ok(())
            }
        }
    }

    async fn serve_tally(
        &mut self,
        stream: &mut TcpStream,
        state: TallyState,
        command: &Bytes,
    ) -> io::Result<()> {
        if TallyState::from_wire(self.current_tally.load(Ordering::Relaxed)) == state {
            return Ok(());
        }
        stream.write_all(command).await?;
        self.current_tally.store(state.to_wire(), Ordering::Relaxed);
        let since_last = self.last_tally_update.map(|t| t.elapsed());
        self.last_tally_update = Some(Instant::now());
        info!(
            camera = %self.config.name,
            %state,
            since_last = ?since_last,
            "tally state applied"
        );
        Ok(())
    }

    /// Drain bytes the camera sent on its own. There is no originating
    /// client to correlate them to, so they are dropped. Returns false when
    /// the connection is gone.
    fn drain_unsolicited(&self, stream: &TcpStream) -> bool {
        let mut buf = [0u8; MTU];
        loop {
            match stream.try_read(&mut buf) {
                Ok(0) => {
                    info!(camera = %self.config.name, "camera closed connection");
                    return false;
                }
                Ok(n) => {
                    debug!(camera = %self.config.name, bytes = n, "dropping unsolicited camera bytes")
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) => {
                    warn!(camera = %self.config.name, error = %e, "camera read failed");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::sleep;

    fn test_config(port: u16, command_timeout_ms: u64) -> CameraConfig {
        CameraConfig {
            id: 3,
            name: "test-cam".to_owned(),
            ip_address: "127.0.0.1".to_owned(),
            port,
            reconnect_interval_ms: 50,
            command_timeout_ms,
            ndi_mapping: None,
        }
    }

    async fn wait_connected(handle: &CameraHandle) {
        timeout(Duration::from_secs(2), async {
            while !handle.connected() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker should connect to the local listener");
    }

    fn pan_command(sequence: u16) -> ViscaFrame {
        ViscaFrame {
            visca_type: ViscaType::Command,
            camera_id: 3,
            sequence,
            payload: Bytes::from_static(&[
                0x81, 0x01, 0x06, 0x01, 0x0A, 0x0A, 0x03, 0x01, 0xFF,
            ]),
        }
    }

    #[tokio::test]
    async fn command_reply_echoes_the_request_sequence() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let camera = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(
                &buf[..n],
                &[0x81, 0x01, 0x06, 0x01, 0x0A, 0x0A, 0x03, 0x01, 0xFF]
            );
            stream.write_all(&[0x90, 0x41, 0xFF]).await.unwrap();
            // Keep the socket open until the test finishes.
            sleep(Duration::from_secs(1)).await;
        });

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _worker) = spawn(test_config(port, 500), shutdown_rx);
        wait_connected(&handle).await;

        let (reply_tx, mut reply_rx) = mpsc::channel(4);
        handle
            .dispatch(CameraCommand::Visca {
                frame: pan_command(7),
                reply: reply_tx,
            })
            .unwrap();

        let wire = timeout(Duration::from_secs(1), reply_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match Message::decode(wire).unwrap() {
            Message::Visca(frame) => {
                assert_eq!(frame.visca_type, ViscaType::Response);
                assert_eq!(frame.camera_id, 3);
                assert_eq!(frame.sequence, 7);
                assert_eq!(frame.payload.as_ref(), &[0x90, 0x41, 0xFF]);
            }
            other => panic!("unexpected {other:?}"),
        }
        camera.abort();
    }

    #[tokio::test]
    async fn silent_camera_times_out_without_a_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let camera = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            // Read the command but never answer.
            let _ = stream.read(&mut buf).await;
            sleep(Duration::from_secs(2)).await;
        });

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _worker) = spawn(test_config(port, 50), shutdown_rx);
        wait_connected(&handle).await;

        let (reply_tx, mut reply_rx) = mpsc::channel(4);
        handle
            .dispatch(CameraCommand::Visca {
                frame: pan_command(9),
                reply: reply_tx,
            })
            .unwrap();

        assert!(
            timeout(Duration::from_millis(300), reply_rx.recv())
                .await
                .is_err(),
            "timed-out request must not produce a response frame"
        );
        camera.abort();
    }

    #[tokio::test]
    async fn dispatch_to_a_disconnected_camera_is_a_routing_error() {
        // Nothing listens on this port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _worker) = spawn(test_config(port, 100), shutdown_rx);

        let (reply_tx, _reply_rx) = mpsc::channel(4);
        let err = handle
            .dispatch(CameraCommand::Visca {
                frame: pan_command(1),
                reply: reply_tx,
            })
            .unwrap_err();
        assert_eq!(err, RoutingError::Disconnected(3));
    }

    #[tokio::test]
    async fn worker_reconnects_once_the_camera_comes_back() {
        // Reserve a port, then leave it unbound so the first attempts fail.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _worker) = spawn(test_config(addr.port(), 500), shutdown_rx);

        // While the camera is away, frames are dropped with a routing error.
        let (reply_tx, mut reply_rx) = mpsc::channel(4);
        let err = handle
            .dispatch(CameraCommand::Visca {
                frame: pan_command(1),
                reply: reply_tx.clone(),
            })
            .unwrap_err();
        assert_eq!(err, RoutingError::Disconnected(3));

        // The camera comes back on the same address; the worker's retry
        // pacing picks it up and service resumes.
        let listener = TcpListener::bind(addr).await.unwrap();
        let camera = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(&[0x90, 0x41, 0xFF]).await.unwrap();
            sleep(Duration::from_secs(1)).await;
        });

        wait_connected(&handle).await;
        handle
            .dispatch(CameraCommand::Visca {
                frame: pan_command(2),
                reply: reply_tx,
            })
            .unwrap();

        let wire = timeout(Duration::from_secs(1), reply_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match Message::decode(wire).unwrap() {
            Message::Visca(frame) => {
                assert_eq!(frame.visca_type, ViscaType::Response);
                assert_eq!(frame.sequence, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        camera.abort();
    }

    #[tokio::test]
    async fn worker_terminates_promptly_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let camera = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            sleep(Duration::from_secs(2)).await;
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, worker) = spawn(test_config(port, 100), shutdown_rx);
        wait_connected(&handle).await;

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_millis(500), worker)
            .await
            .expect("worker must stop within the poll interval")
            .unwrap();
        camera.abort();
    }

    #[tokio::test]
    async fn disconnected_worker_also_terminates_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_handle, worker) = spawn(test_config(port, 100), shutdown_rx);

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_millis(500), worker)
            .await
            .expect("retry loop must observe shutdown")
            .unwrap();
    }
}
