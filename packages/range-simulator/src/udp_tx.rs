//! udp_tx.rs: sends measurement batches to the ingest hub
//!
//! One JSON `MeasurementBatch` per datagram. Send errors are logged and never
//! stop the simulator.

use std::net::UdpSocket;
use tracing::{debug, warn};

use position_types::MeasurementBatch;

/// Datagrams above this size risk fragmentation loss.
const SAFE_DATAGRAM_BYTES: usize = 60_000;

pub struct UdpTransmitter {
    socket: UdpSocket,
    hub_addr: String,
}

impl UdpTransmitter {
    pub fn new(hub_addr: &str) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self { socket, hub_addr: hub_addr.to_string() })
    }

    pub fn send_batch(&self, batch: &MeasurementBatch) {
        let bytes = match serde_json::to_vec(batch) {
            Ok(b) => b,
            Err(e) => {
                warn!("UDP: serialize failed: {e}");
                return;
            }
        };
        if bytes.len() > SAFE_DATAGRAM_BYTES {
            warn!("UDP: batch of {} bytes exceeds {SAFE_DATAGRAM_BYTES}, sending anyway", bytes.len());
        }
        match self.socket.send_to(&bytes, &self.hub_addr) {
            Ok(_) => debug!(
                "UDP → {} gateway={} measurements={}",
                self.hub_addr,
                batch.gateway_id,
                batch.measurements.len()
            ),
            Err(e) => warn!("UDP: send to {} failed: {e}", self.hub_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use position_types::RangeMeasurement;

    #[test]
    fn batch_arrives_as_one_json_datagram() {
        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        let tx = UdpTransmitter::new(&rx.local_addr().unwrap().to_string()).unwrap();
        let batch = MeasurementBatch {
            gateway_id: "GW".into(),
            collected_at: Utc::now(),
            measurements: vec![RangeMeasurement::new("A1", "T1", 4.2)],
        };
        tx.send_batch(&batch);

        let mut buf = [0u8; 2048];
        let (len, _) = rx.recv_from(&mut buf).unwrap();
        let got: MeasurementBatch = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(got, batch);
    }
}
