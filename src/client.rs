//! One-exchange SNTP client session.
//!
//! Sends a single mode-3 request and computes clock offset and
//! round-trip delay from the four protocol timestamps:
//!
//! ```text
//! Timestamp Name          ID   When Generated
//! ------------------------------------------------------------
//! Originate Timestamp     T1   time request sent by client
//! Receive Timestamp       T2   time request received by server
//! Transmit Timestamp      T3   time reply sent by server
//! Destination Timestamp   T4   time reply received by client
//! ```
//!
//! There are no retries; a failed exchange is reported to the caller,
//! who owns any retry policy.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::Instant;

use crate::packets::{DecodeError, EncodeError, NtpPacket};
use crate::time::NtpTimestamp;

/// Result of a completed exchange.
#[derive(Debug, Clone, Copy)]
pub struct SyncResult {
    /// Estimated clock offset between server and client, seconds.
    pub offset: f64,
    /// Round-trip delay of the exchange, seconds.
    pub round_trip: f64,
    /// The decoded reply, with `dest_timestamp` stamped.
    pub packet: NtpPacket,
}

/// Errors raised by a client exchange.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No matching reply arrived within the receive timeout.
    #[error("no response received from {0}")]
    Timeout(String),
    /// The host name did not resolve to any address.
    #[error("cannot resolve {0}")]
    Resolve(String),
    /// The reply could not be decoded.
    #[error("malformed reply: {0}")]
    Protocol(#[from] DecodeError),
    /// The request could not be encoded.
    #[error("cannot encode request: {0}")]
    Encode(#[from] EncodeError),
    /// Resolution or socket I/O failed.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

/// Computes clock offset and round-trip delay from the four exchange
/// timestamps, in seconds:
/// `offset = ((T2 - T1) + (T3 - T4)) / 2`,
/// `round_trip = (T4 - T1) - (T3 - T2)`.
pub fn offset_and_round_trip(
    t1: NtpTimestamp,
    t2: NtpTimestamp,
    t3: NtpTimestamp,
    t4: NtpTimestamp,
) -> (f64, f64) {
    let offset = (t2.seconds_since(t1) + t3.seconds_since(t4)) / 2.0;
    let round_trip = t4.seconds_since(t1) - t3.seconds_since(t2);
    (offset, round_trip)
}

/// Performs one SNTP exchange with `host:port`.
///
/// Binds an ephemeral local UDP socket, sends a mode-3 request with the
/// given protocol `version`, and waits up to `wait` for a reply from
/// the resolved server address. Datagrams arriving from any other
/// source are discarded and the wait continues; the overall deadline
/// is unchanged by strays.
///
/// The socket lives only inside this function and is closed on every
/// exit path.
pub async fn request(
    host: &str,
    port: u16,
    version: u8,
    wait: Duration,
) -> Result<SyncResult, ClientError> {
    let server_addr: SocketAddr = lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| ClientError::Resolve(host.to_string()))?;

    let local_addr: &str = if server_addr.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };
    let socket = UdpSocket::bind(local_addr).await?;

    let t1 = NtpTimestamp::now();
    let request = NtpPacket::client_request(version, t1);
    socket.send_to(&request.encode()?, server_addr).await?;
    log::debug!("request sent to {}", server_addr);

    let deadline = Instant::now() + wait;
    let mut buf = [0u8; 1024];
    let (len, t4) = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ClientError::Timeout(host.to_string()));
        }
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, src))) if src == server_addr => {
                // T4 is stamped on receipt, before any decoding work.
                break (len, NtpTimestamp::now());
            }
            Ok(Ok((_, src))) => {
                log::debug!("ignoring datagram from unexpected source {}", src);
            }
            Ok(Err(e)) => return Err(ClientError::Network(e)),
            Err(_) => return Err(ClientError::Timeout(host.to_string())),
        }
    };

    let mut reply = NtpPacket::decode(&buf[..len])?;
    reply.dest_timestamp = t4;

    // T1 is taken from the echoed originate timestamp; a server that
    // echoes something else is an anomaly worth noting, not an error.
    if reply.orig_timestamp != request.tx_timestamp {
        log::warn!(
            "reply from {} echoes originate timestamp {:#018x}, expected {:#018x}",
            server_addr,
            reply.orig_timestamp.to_bits(),
            request.tx_timestamp.to_bits()
        );
    }

    let (offset, round_trip) =
        offset_and_round_trip(reply.orig_timestamp, reply.recv_timestamp, reply.tx_timestamp, t4);

    Ok(SyncResult {
        offset,
        round_trip,
        packet: reply,
    })
}
