//! Lying SNTP test server.
//!
//! A [`ServerDispatcher`] owns one receive task and a fixed pool of
//! worker tasks connected by a bounded FIFO queue. Replies report
//! server timestamps shifted by a configured lie offset, so downstream
//! time-sync consumers can be exercised against a skewed clock.
//!
//! Every blocking wait inside the dispatcher is bounded by
//! [`POLL_INTERVAL`] and every task re-checks the shared stop flag on
//! each loop iteration, so [`ServerDispatcher::stop`] completes within
//! roughly one polling interval.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::packets::{NtpPacket, MODE_SERVER};
use crate::time::NtpTimestamp;

/// Upper bound on every blocking wait inside dispatcher tasks; also the
/// cancellation-latency bound of [`ServerDispatcher::stop`].
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Seconds the reported reference timestamp lags the receive timestamp.
const REF_TIMESTAMP_LAG: f64 = 5.0;

/// Fixed reply parameters and pool sizing for a dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Seconds subtracted from every reported server timestamp.
    pub lie_offset: f64,
    /// Stratum advertised in replies.
    pub stratum: u8,
    /// Poll exponent advertised in replies.
    pub poll: i8,
    /// Number of worker tasks.
    pub workers: usize,
    /// Capacity of the work queue; the receive task blocks when full.
    pub queue_depth: usize,
}

impl ServerConfig {
    /// Creates a configuration with the given lie offset and the
    /// default reply parameters (stratum 2, poll 10) and pool sizing.
    pub fn new(lie_offset: f64) -> Self {
        ServerConfig {
            lie_offset,
            stratum: 2,
            poll: 10,
            workers: 4,
            queue_depth: 64,
        }
    }
}

/// One received datagram queued for a worker.
struct WorkItem {
    payload: Vec<u8>,
    source: SocketAddr,
    recv_timestamp: NtpTimestamp,
}

/// A running SNTP server.
///
/// The lifecycle is encoded in the type: [`ServerDispatcher::start`]
/// is the only way to obtain a value (Idle ends there) and
/// [`ServerDispatcher::stop`] consumes it (Stopped has no value to
/// misuse), so double starts and double stops do not compile.
pub struct ServerDispatcher {
    stop_flag: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    socket: Arc<UdpSocket>,
}

impl ServerDispatcher {
    /// Spawns the receive task and worker pool over an already-bound
    /// socket and returns the running dispatcher.
    pub fn start(socket: UdpSocket, config: ServerConfig) -> ServerDispatcher {
        let socket = Arc::new(socket);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let workers = config.workers.max(1);
        let (queue_tx, queue_rx) = mpsc::channel::<WorkItem>(config.queue_depth.max(1));
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut tasks = Vec::with_capacity(workers + 1);
        tasks.push(tokio::spawn(receive_loop(
            socket.clone(),
            queue_tx,
            stop_flag.clone(),
        )));
        for id in 0..workers {
            tasks.push(tokio::spawn(worker_loop(
                id,
                socket.clone(),
                queue_rx.clone(),
                stop_flag.clone(),
                config,
            )));
        }

        log::info!(
            "dispatcher running with {} workers, lie offset {} s",
            workers,
            config.lie_offset
        );
        ServerDispatcher {
            stop_flag,
            tasks,
            socket,
        }
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Requests cancellation and waits for every task to terminate.
    ///
    /// The socket is released only after the receive task has exited;
    /// nothing can still be reading it when it closes.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log::warn!("dispatcher task panicked: {}", e);
            }
        }
        log::info!("dispatcher stopped");
    }
}

/// Builds the lie-shifted reply to `request`.
///
/// `recv_timestamp` is the unshifted time the request arrived; `now`
/// is the unshifted transmit time, passed in so tests can inject a
/// fixed clock. The originate timestamp is the request's transmit
/// timestamp copied bit-for-bit.
fn build_reply(
    request: &NtpPacket,
    recv_timestamp: NtpTimestamp,
    now: NtpTimestamp,
    config: &ServerConfig,
) -> NtpPacket {
    NtpPacket {
        version: 4,
        mode: MODE_SERVER,
        stratum: config.stratum,
        poll: config.poll,
        orig_timestamp: request.tx_timestamp,
        recv_timestamp: recv_timestamp.sub_seconds(config.lie_offset),
        tx_timestamp: now.sub_seconds(config.lie_offset),
        ref_timestamp: recv_timestamp.sub_seconds(REF_TIMESTAMP_LAG),
        ..NtpPacket::default()
    }
}

/// Polls the socket with a bounded wait, stamps each datagram's receive
/// time, and enqueues it in receipt order. A full queue blocks the
/// receive task (still in poll-sized slices) rather than dropping.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    queue: mpsc::Sender<WorkItem>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 1024];
    while !stop_flag.load(Ordering::Relaxed) {
        let (len, source) =
            match tokio::time::timeout(POLL_INTERVAL, socket.recv_from(&mut buf)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    log::warn!("receive error: {}", e);
                    continue;
                }
                Err(_) => continue, // poll expired, re-check the stop flag
            };

        let mut pending = Some(WorkItem {
            payload: buf[..len].to_vec(),
            source,
            recv_timestamp: NtpTimestamp::now(),
        });
        while let Some(item) = pending.take() {
            if stop_flag.load(Ordering::Relaxed) {
                log::debug!("receive task exited");
                return;
            }
            match tokio::time::timeout(POLL_INTERVAL, queue.reserve()).await {
                Ok(Ok(permit)) => permit.send(item),
                Ok(Err(_)) => return, // every worker is gone
                Err(_) => pending = Some(item), // queue still full, wait again
            }
        }
    }
    log::debug!("receive task exited");
}

/// Dequeues items with a bounded wait and answers each one. Malformed
/// datagrams are dropped and logged; the worker keeps running.
async fn worker_loop(
    id: usize,
    socket: Arc<UdpSocket>,
    queue: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    stop_flag: Arc<AtomicBool>,
    config: ServerConfig,
) {
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }
        let mut rx = queue.lock().await;
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }
        let item = match tokio::time::timeout(POLL_INTERVAL, rx.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => break, // receive task is gone
            Err(_) => continue, // re-check the stop flag
        };
        drop(rx);

        let request = match NtpPacket::decode(&item.payload) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("dropping malformed datagram from {}: {}", item.source, e);
                continue;
            }
        };
        let reply = build_reply(&request, item.recv_timestamp, NtpTimestamp::now(), &config);
        let bytes = match reply.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("cannot encode reply for {}: {}", item.source, e);
                continue;
            }
        };
        match socket.send_to(&bytes, item.source).await {
            Ok(_) => log::debug!("worker {} replied to {}", id, item.source),
            Err(e) => log::warn!("cannot send reply to {}: {}", item.source, e),
        }
    }
    log::debug!("worker {} exited", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::unix_to_ntp_seconds;

    fn client_request_with_tx(tx: NtpTimestamp) -> NtpPacket {
        NtpPacket::client_request(4, tx)
    }

    #[test]
    fn reply_has_server_mode_and_configured_fields() {
        let config = ServerConfig::new(0.0);
        let request = client_request_with_tx(NtpTimestamp::new(100, 0));
        let now = NtpTimestamp::new(200, 0);
        let reply = build_reply(&request, NtpTimestamp::new(150, 0), now, &config);

        assert_eq!(reply.version, 4);
        assert_eq!(reply.mode, MODE_SERVER);
        assert_eq!(reply.stratum, 2);
        assert_eq!(reply.poll, 10);
        assert_eq!(reply.leap, 0);
        assert_eq!(reply.root_delay, 0.0);
        assert_eq!(reply.root_dispersion, 0.0);
    }

    #[test]
    fn reply_echoes_originate_timestamp_exactly() {
        // Fraction chosen to be lossy under double rounding.
        let tx = NtpTimestamp::new(0xD8E72FA6, 0x5A5A5A5A);
        let config = ServerConfig::new(3.25);
        let reply = build_reply(
            &client_request_with_tx(tx),
            NtpTimestamp::now(),
            NtpTimestamp::now(),
            &config,
        );
        assert_eq!(reply.orig_timestamp.to_bits(), tx.to_bits());
    }

    #[test]
    fn reply_applies_lie_offset_to_both_server_timestamps() {
        let config = ServerConfig::new(100.0);
        let t = 1_700_000_000.5; // Unix seconds
        let stamped = NtpTimestamp::from_unix_seconds(t);
        let request = client_request_with_tx(NtpTimestamp::new(1, 0));
        let reply = build_reply(&request, stamped, stamped, &config);

        let expected = unix_to_ntp_seconds(t) - 100.0;
        let resolution = 2.0 / 4294967296.0;
        assert!((reply.recv_timestamp.as_ntp_seconds() - expected).abs() < resolution);
        assert!((reply.tx_timestamp.as_ntp_seconds() - expected).abs() < resolution);
    }

    #[test]
    fn reply_reference_timestamp_lags_receive_time() {
        let config = ServerConfig::new(0.0);
        let stamped = NtpTimestamp::new(1000, 0x8000_0000);
        let request = client_request_with_tx(NtpTimestamp::new(1, 0));
        let reply = build_reply(&request, stamped, stamped, &config);

        assert_eq!(reply.ref_timestamp.seconds(), 995);
        assert_eq!(reply.ref_timestamp.fraction(), 0x8000_0000);
    }

    #[test]
    fn negative_lie_offset_moves_clock_forward() {
        let config = ServerConfig::new(-2.0);
        let stamped = NtpTimestamp::new(1000, 0);
        let request = client_request_with_tx(NtpTimestamp::new(1, 0));
        let reply = build_reply(&request, stamped, stamped, &config);

        assert_eq!(reply.recv_timestamp.seconds(), 1002);
        assert_eq!(reply.tx_timestamp.seconds(), 1002);
    }

    #[test]
    fn config_defaults_match_reply_policy() {
        let config = ServerConfig::new(1.5);
        assert_eq!(config.lie_offset, 1.5);
        assert_eq!(config.stratum, 2);
        assert_eq!(config.poll, 10);
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_depth, 64);
    }
}
