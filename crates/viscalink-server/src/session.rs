//! One task per accepted SRT client.
//!
//! The session owns both halves of its SRT connection: ingress frames are
//! decoded and dispatched (VISCA to the camera workers, tally to the table),
//! and reply frames produced by the workers come back through the session's
//! egress queue. A malformed or unroutable frame is dropped with a log line;
//! nothing a client sends can end the session except closing it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use viscalink_core::{visca, Message, RoutingError, ViscaType};
use viscalink_transport::SrtEndpoint;

use crate::camera::{CameraCommand, CameraHandle};
use crate::tally::TallyTable;

/// Bound on reply frames waiting for the SRT sender.
const EGRESS_QUEUE_DEPTH: usize = 256;

/// Serve one SRT client until it disconnects or the peer shuts down.
pub async fn run(
    endpoint: SrtEndpoint,
    cameras: Arc<HashMap<u8, CameraHandle>>,
    table: Arc<TallyTable>,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = endpoint.peer().to_owned();
    info!(%peer, "SRT session started");
    let (mut sender, mut receiver) = endpoint.split();
    let (egress_tx, mut egress_rx) = mpsc::channel::<Bytes>(EGRESS_QUEUE_DEPTH);

    loop {
        tokio::select! {
            incoming = receiver.recv() => match incoming {
                Ok(datagram) => dispatch_frame(&peer, datagram, &cameras, &table, &egress_tx),
                Err(e) => {
                    info!(%peer, reason = %e, "SRT session ended");
                    break;
                }
            },
            Some(payload) = egress_rx.recv() => {
                if let Err(e) = sender.send(payload).await {
                    info!(%peer, reason = %e, "SRT session ended");
                    break;
                }
            }
            _ = shutdown.changed() => if *shutdown.borrow() { break },
        }
    }
    sender.close().await;
}

/// Decode one datagram and route it. Every failure mode here is
/// per-message: drop, log, keep serving.
fn dispatch_frame(
    peer: &str,
    datagram: Bytes,
    cameras: &HashMap<u8, CameraHandle>,
    table: &TallyTable,
    egress_tx: &mpsc::Sender<Bytes>,
) {
    match Message::decode(datagram) {
        Ok(Message::Visca(frame)) => {
            if !visca::is_well_formed(&frame.payload) {
                warn!(
                    %peer,
                    camera_id = frame.camera_id,
                    "dropping structurally invalid VISCA payload"
                );
                return;
            }
            if let ViscaType::Unknown(value) = frame.visca_type {
                debug!(%peer, value, "forwarding VISCA frame with unknown subtype");
            }
            let camera_id = frame.camera_id;
            let Some(camera) = cameras.get(&camera_id) else {
                warn!(%peer, error = %RoutingError::UnknownCamera(camera_id), "dropping VISCA frame");
                return;
            };
            let command = CameraCommand::Visca {
                frame,
                reply: egress_tx.clone(),
            };
            if let Err(e) = camera.dispatch(command) {
                warn!(%peer, camera_id, error = %e, "dropping VISCA frame");
            }
        }
        Ok(Message::NdiTally(frame)) => {
            info!(
                %peer,
                source = %frame.source_name,
                state = %frame.state,
                timestamp = frame.timestamp,
                "tally update"
            );
            table.update(&frame.source_name, frame.state);
        }
        Err(e) => warn!(%peer, error = %e, "dropping malformed frame"),
    }
}
