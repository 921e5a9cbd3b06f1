//! # ingest_hub
//!
//! Gateway ingest: receives measurement batches over UDP and hands each one
//! to the position engine.
//!
//! ## Behaviour
//! Runs as its own Tokio task next to the HTTP server. It:
//!   1. Binds a UDP socket on `INGEST_UDP_PORT` (default 5555)
//!   2. Decodes one JSON `MeasurementBatch` per datagram
//!   3. Validates the batch (gateway id, size, distance sanity)
//!   4. Spawns `process_batch` so a slow store never stalls the receive loop
//!
//! Malformed or invalid datagrams are logged and dropped; socket errors
//! never stop the listener.

use std::net::SocketAddr;
use std::sync::Arc;

use position_types::MeasurementBatch;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::engine::PositionEngine;

/// Largest UDP payload we accept.
const MAX_DATAGRAM: usize = 65_536;

/// Start the UDP listener. Returns only if the port cannot be bound.
pub async fn start_ingest_hub(port: u16, engine: Arc<PositionEngine>) {
    let addr = format!("0.0.0.0:{port}");
    let socket = match UdpSocket::bind(&addr).await {
        Ok(s) => {
            info!("📡 Ingest hub listening on UDP {addr}");
            s
        }
        Err(e) => {
            warn!("Ingest hub: could not bind UDP {addr}: {e} (HTTP ingest still available)");
            return;
        }
    };

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let Some(batch) = decode_datagram(&buf[..len], src) else {
                    continue;
                };
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.process_batch(batch).await;
                });
            }
            Err(e) => warn!("Ingest hub: UDP recv error: {e}"),
        }
    }
}

/// Parse and validate one datagram; `None` means it was dropped.
pub fn decode_datagram(data: &[u8], src: SocketAddr) -> Option<MeasurementBatch> {
    let batch: MeasurementBatch = match serde_json::from_slice(data) {
        Ok(b) => b,
        Err(e) => {
            debug!("Ingest: malformed datagram from {src}: {e}");
            return None;
        }
    };
    if let Err(e) = batch.validate() {
        warn!("Ingest: rejected batch from {src} (gateway '{}'): {e}", batch.gateway_id);
        return None;
    }
    debug!(
        "Ingest: batch from {} via {src} with {} measurements",
        batch.gateway_id,
        batch.measurements.len()
    );
    Some(batch)
}
