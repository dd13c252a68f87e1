//! Client-role multiplexer: controller TCP ingress → SRT egress, SRT
//! ingress → controller TCP writes.
//!
//! One task per controller endpoint owns that endpoint's socket (reads and
//! writes both); the SRT channel lives in the main gateway loop, which
//! redials the server whenever the channel drops. A single wrapping
//! sequence counter is shared by all endpoints and stamped onto every
//! outbound command so replies can be correlated by the far side.
//!
//! Nothing is queued across an outage: while the SRT channel or a
//! controller socket is down, traffic headed for it is dropped. Stale VISCA
//! is worse than missed VISCA.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use viscalink_core::config::{ClientConfig, EndpointConfig};
use viscalink_core::{Message, RoutingError, ViscaFrame, ViscaType};
use viscalink_transport::{SrtEndpoint, TcpTarget, MTU};

/// Pause between SRT redial attempts.
const SRT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on frames waiting for the SRT sender.
const SRT_EGRESS_DEPTH: usize = 256;

/// Bound on reply payloads waiting for one controller socket.
const CONTROLLER_WRITE_DEPTH: usize = 64;

/// Run the client gateway until shutdown.
pub async fn run(config: ClientConfig, mut shutdown: watch::Receiver<bool>) {
    let sequence = Arc::new(AtomicU16::new(0));
    let (egress_tx, mut egress_rx) = mpsc::channel::<Bytes>(SRT_EGRESS_DEPTH);

    // Endpoint tasks outlive SRT sessions; the write senders double as the
    // ingress routing table.
    let mut writers: HashMap<u8, mpsc::Sender<Bytes>> = HashMap::new();
    for endpoint in &config.endpoints {
        let (write_tx, write_rx) = mpsc::channel(CONTROLLER_WRITE_DEPTH);
        writers.insert(endpoint.camera_id, write_tx);
        tokio::spawn(endpoint_task(
            endpoint.clone(),
            Arc::clone(&sequence),
            egress_tx.clone(),
            write_rx,
            shutdown.clone(),
        ));
    }

    if let Some(port) = config.ndi_settings.tally_listen_port {
        tokio::spawn(tally_ingress_task(port, egress_tx.clone(), shutdown.clone()));
    }

    // Dial, serve, redial. A lost channel is recoverable; only shutdown
    // ends the loop.
    loop {
        if *shutdown.borrow() {
            return;
        }
        match SrtEndpoint::connect(
            &config.srt_server.host,
            config.srt_server.port,
            &config.srt_settings,
        )
        .await
        {
            Ok(endpoint) => {
                run_srt_session(endpoint, &writers, &mut egress_rx, &mut shutdown).await
            }
            Err(e) => warn!(error = %e, "SRT connect failed"),
        }

        // Wait out the redial pause, dropping whatever the controllers
        // produce while the peer is unreachable.
        let retry = sleep(SRT_RECONNECT_INTERVAL);
        tokio::pin!(retry);
        loop {
            tokio::select! {
                _ = &mut retry => break,
                _ = shutdown.wait_for(|stop| *stop) => return,
                Some(payload) = egress_rx.recv() => {
                    debug!(bytes = payload.len(), "SRT channel down, dropping frame");
                }
            }
        }
    }
}

/// Serve one connected SRT channel until it drops or shutdown.
async fn run_srt_session(
    endpoint: SrtEndpoint,
    writers: &HashMap<u8, mpsc::Sender<Bytes>>,
    egress_rx: &mut mpsc::Receiver<Bytes>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let peer = endpoint.peer().to_owned();
    let (mut sender, mut receiver) = endpoint.split();
    loop {
        tokio::select! {
            incoming = receiver.recv() => match incoming {
                Ok(datagram) => route_response(datagram, writers),
                Err(e) => {
                    warn!(%peer, reason = %e, "SRT channel lost");
                    break;
                }
            },
            Some(payload) = egress_rx.recv() => {
                if let Err(e) = sender.send(payload).await {
                    warn!(reason = %e, "SRT send failed, redialling");
                    break;
                }
            }
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }
    sender.close().await;
}

/// Hand an inbound frame's payload to the controller it belongs to.
fn route_response(datagram: Bytes, writers: &HashMap<u8, mpsc::Sender<Bytes>>) {
    match Message::decode(datagram) {
        Ok(Message::Visca(frame)) => match writers.get(&frame.camera_id) {
            Some(write_tx) => {
                if write_tx.try_send(frame.payload).is_err() {
                    warn!(
                        camera_id = frame.camera_id,
                        "controller write queue full, dropping response"
                    );
                }
            }
            None => warn!(
                error = %RoutingError::UnknownCamera(frame.camera_id),
                "dropping response frame"
            ),
        },
        Ok(Message::NdiTally(frame)) => {
            debug!(source = %frame.source_name, "ignoring tally frame from server")
        }
        Err(e) => warn!(error = %e, "dropping malformed frame"),
    }
}

// ── Controller endpoints ──────────────────────────────────────────────────────

/// Own one controller's TCP socket: forward its bytes as sequence-stamped
/// command frames, write reply payloads back, reconnect on failure.
async fn endpoint_task(
    config: EndpointConfig,
    sequence: Arc<AtomicU16>,
    egress: mpsc::Sender<Bytes>,
    mut writes: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let target = TcpTarget {
        name: config.name.clone(),
        host: config.ip_address.clone(),
        port: config.port,
        reconnect_interval: config.reconnect_interval(),
    };
    let mut buf = vec![0u8; MTU];

    'reconnect: loop {
        // Disconnected: pace attempts, dropping replies that arrive.
        let mut stream = loop {
            match target.connect().await {
                Ok(stream) => break stream,
                Err(e) => debug!(
                    endpoint = %config.name,
                    addr = %target.addr(),
                    error = %e,
                    "controller connect failed"
                ),
            }
            let retry = sleep(target.reconnect_interval);
            tokio::pin!(retry);
            loop {
                tokio::select! {
                    _ = &mut retry => break,
                    _ = shutdown.changed() => if *shutdown.borrow() { return },
                    incoming = writes.recv() => match incoming {
                        Some(payload) => debug!(
                            endpoint = %config.name,
                            bytes = payload.len(),
                            "controller down, dropping response"
                        ),
                        None => return,
                    },
                }
            }
        };
        info!(
            endpoint = %config.name,
            camera_id = config.camera_id,
            "controller connected"
        );

        loop {
            tokio::select! {
                read = stream.read(&mut buf) => match read {
                    Ok(0) => {
                        info!(endpoint = %config.name, "controller closed connection");
                        continue 'reconnect;
                    }
                    Ok(n) => forward_command(&config, &sequence, &egress, &buf[..n]),
                    Err(e) => {
                        warn!(endpoint = %config.name, error = %e, "controller read failed");
                        continue 'reconnect;
                    }
                },
                incoming = writes.recv() => match incoming {
                    Some(payload) => {
                        if let Err(e) = stream.write_all(&payload).await {
                            warn!(endpoint = %config.name, error = %e, "controller write failed");
                            continue 'reconnect;
                        }
                    }
                    None => return,
                },
                _ = shutdown.changed() => if *shutdown.borrow() { return },
            }
        }
    }
}

/// Wrap controller bytes in a command frame and hand it to the SRT egress
/// queue. Full queue means the channel is down or saturated; drop.
fn forward_command(
    config: &EndpointConfig,
    sequence: &AtomicU16,
    egress: &mpsc::Sender<Bytes>,
    payload: &[u8],
) {
    let frame = Message::Visca(ViscaFrame {
        visca_type: ViscaType::Command,
        camera_id: config.camera_id,
        sequence: next_sequence(sequence),
        payload: Bytes::copy_from_slice(payload),
    });
    if egress.try_send(frame.encode()).is_err() {
        warn!(endpoint = %config.name, "SRT egress queue full, dropping command");
    }
}

/// Wrapping counter shared across all endpoints; the first stamped value
/// is 1, leaving 0 for unsolicited frames.
fn next_sequence(counter: &AtomicU16) -> u16 {
    counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

// ── Tally ingress ─────────────────────────────────────────────────────────────

/// Accept tally wire frames on a local UDP port and forward them over SRT
/// unchanged. Anything that does not decode as a tally frame is discarded.
async fn tally_ingress_task(
    port: u16,
    egress: mpsc::Sender<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match UdpSocket::bind(("0.0.0.0", port)).await {
        Ok(socket) => socket,
        Err(e) => {
            error!(port, error = %e, "failed to bind tally ingress port");
            return;
        }
    };
    info!(port, "tally ingress listening");

    let mut buf = vec![0u8; MTU];
    loop {
        tokio::select! {
            incoming = socket.recv_from(&mut buf) => match incoming {
                Ok((n, from)) => {
                    let datagram = Bytes::copy_from_slice(&buf[..n]);
                    match Message::decode(datagram.clone()) {
                        Ok(Message::NdiTally(frame)) => {
                            debug!(
                                source = %frame.source_name,
                                state = %frame.state,
                                %from,
                                "forwarding tally update"
                            );
                            if egress.try_send(datagram).is_err() {
                                warn!("SRT egress queue full, dropping tally update");
                            }
                        }
                        Ok(Message::Visca(_)) => {
                            debug!(%from, "ignoring VISCA frame on tally port")
                        }
                        Err(e) => debug!(%from, error = %e, "discarding malformed tally datagram"),
                    }
                }
                Err(e) => warn!(error = %e, "tally ingress read failed"),
            },
            _ = shutdown.changed() => if *shutdown.borrow() { return },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn endpoint_config(port: u16, camera_id: u8) -> EndpointConfig {
        EndpointConfig {
            name: "desk".to_owned(),
            ip_address: "127.0.0.1".to_owned(),
            port,
            camera_id,
            reconnect_interval_ms: 50,
            command_timeout_ms: 100,
        }
    }

    #[test]
    fn sequence_starts_at_one_and_wraps() {
        let counter = AtomicU16::new(0);
        assert_eq!(next_sequence(&counter), 1);
        assert_eq!(next_sequence(&counter), 2);

        counter.store(u16::MAX - 1, Ordering::Relaxed);
        assert_eq!(next_sequence(&counter), u16::MAX);
        assert_eq!(next_sequence(&counter), 0);
        assert_eq!(next_sequence(&counter), 1);
    }

    #[tokio::test]
    async fn forward_command_stamps_tag_type_id_and_sequence() {
        let config = endpoint_config(0, 3);
        let sequence = AtomicU16::new(0);
        let (egress_tx, mut egress_rx) = mpsc::channel(4);

        forward_command(
            &config,
            &sequence,
            &egress_tx,
            &[0x81, 0x01, 0x06, 0x01, 0x0A, 0x0A, 0x03, 0x01, 0xFF],
        );

        let wire = egress_rx.try_recv().unwrap();
        assert_eq!(
            wire.as_ref(),
            &[
                0x01, 0x01, 0x03, 0x00, 0x01, 0x00, 0x09, // tag, type, id, seq, len
                0x81, 0x01, 0x06, 0x01, 0x0A, 0x0A, 0x03, 0x01, 0xFF,
            ]
        );
    }

    #[tokio::test]
    async fn route_response_reaches_only_the_owning_controller() {
        let (tx3, mut rx3) = mpsc::channel(4);
        let (tx5, mut rx5) = mpsc::channel(4);
        let mut writers = HashMap::new();
        writers.insert(3u8, tx3);
        writers.insert(5u8, tx5);

        let datagram = Message::Visca(ViscaFrame {
            visca_type: ViscaType::Response,
            camera_id: 3,
            sequence: 1,
            payload: Bytes::from_static(&[0x90, 0x41, 0xFF]),
        })
        .encode();
        route_response(datagram, &writers);

        assert_eq!(rx3.try_recv().unwrap().as_ref(), &[0x90, 0x41, 0xFF]);
        assert!(rx5.try_recv().is_err());

        // Unknown camera id: dropped, nothing delivered anywhere.
        let datagram = Message::Visca(ViscaFrame {
            visca_type: ViscaType::Response,
            camera_id: 9,
            sequence: 2,
            payload: Bytes::from_static(&[0x90, 0x41, 0xFF]),
        })
        .encode();
        route_response(datagram, &writers);
        assert!(rx3.try_recv().is_err());
        assert!(rx5.try_recv().is_err());
    }

    #[tokio::test]
    async fn endpoint_task_bridges_both_directions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let sequence = Arc::new(AtomicU16::new(0));
        let (egress_tx, mut egress_rx) = mpsc::channel(16);
        let (write_tx, write_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(endpoint_task(
            endpoint_config(port, 3),
            sequence,
            egress_tx,
            write_rx,
            shutdown_rx,
        ));

        let (mut controller, _) = listener.accept().await.unwrap();

        // Controller bytes become a stamped frame on the SRT egress queue.
        controller
            .write_all(&[0x81, 0x01, 0x06, 0x01, 0x0A, 0x0A, 0x03, 0x01, 0xFF])
            .await
            .unwrap();
        let wire = timeout(Duration::from_secs(1), egress_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match Message::decode(wire).unwrap() {
            Message::Visca(frame) => {
                assert_eq!(frame.visca_type, ViscaType::Command);
                assert_eq!(frame.camera_id, 3);
                assert_eq!(frame.sequence, 1);
                assert_eq!(
                    frame.payload.as_ref(),
                    &[0x81, 0x01, 0x06, 0x01, 0x0A, 0x0A, 0x03, 0x01, 0xFF]
                );
            }
            other => panic!("unexpected {other:?}"),
        }

        // Reply payloads queued for the endpoint reach the controller
        // byte-for-byte.
        write_tx
            .send(Bytes::from_static(&[0x90, 0x41, 0xFF]))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(1), controller.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], &[0x90, 0x41, 0xFF]);
    }

    #[tokio::test]
    async fn endpoint_task_terminates_promptly_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let sequence = Arc::new(AtomicU16::new(0));
        let (egress_tx, _egress_rx) = mpsc::channel(16);
        let (_write_tx, write_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(endpoint_task(
            endpoint_config(port, 3),
            sequence,
            egress_tx,
            write_rx,
            shutdown_rx,
        ));
        let (_controller, _) = listener.accept().await.unwrap();

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_millis(500), task)
            .await
            .expect("endpoint task must stop once shutdown is signalled")
            .unwrap();
    }
}
