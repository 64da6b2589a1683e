//! SNTP packet structure as defined in RFC 4330.
//!
//! A single 48-byte header serves both directions of the protocol;
//! client requests and server replies differ only in field values.
//! Serialization is explicit big-endian with truncating fixed-point
//! fractions, matching RFC 4330 Section 4.
//!
//! Wire format:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |LI | VN  |Mode |    Stratum    |     Poll      |   Precision   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Root Delay                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Root Dispersion                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Reference Identifier                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Reference Timestamp (64)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Originate Timestamp (64)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Receive Timestamp (64)                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Transmit Timestamp (64)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use thiserror::Error;

use crate::time::{from_short_format, to_short_format, NtpTimestamp};

/// Size of the SNTP header in bytes.
pub const PACKET_SIZE: usize = 48;

/// Mode value for a client request.
pub const MODE_CLIENT: u8 = 3;
/// Mode value for a server reply.
pub const MODE_SERVER: u8 = 4;

/// An SNTP packet.
///
/// One instance is built fresh per exchange direction, populated either
/// programmatically (outbound) or by [`NtpPacket::decode`] (inbound),
/// and discarded after use. `Default` yields the all-zero skeleton that
/// RFC 4330 prescribes for client messages.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct NtpPacket {
    /// Leap second indicator (2 bits).
    pub leap: u8,
    /// Protocol version (3 bits).
    pub version: u8,
    /// Association mode (3 bits); 3 = client, 4 = server.
    pub mode: u8,
    /// Server clock stratum.
    pub stratum: u8,
    /// Poll interval exponent.
    pub poll: i8,
    /// Clock precision exponent.
    pub precision: i8,
    /// Round-trip delay to the reference clock, seconds (16.16 on the wire).
    pub root_delay: f64,
    /// Dispersion to the reference clock, seconds (16.16 on the wire).
    pub root_dispersion: f64,
    /// Reference identifier.
    pub ref_id: u32,
    /// Time the server clock was last set or corrected.
    pub ref_timestamp: NtpTimestamp,
    /// Time the request departed the client (echoed by the server).
    pub orig_timestamp: NtpTimestamp,
    /// Time the request arrived at the server.
    pub recv_timestamp: NtpTimestamp,
    /// Time the packet departed its sender.
    pub tx_timestamp: NtpTimestamp,
    /// Time the reply arrived back at the client. Stamped locally on
    /// receipt; never part of the wire format.
    pub dest_timestamp: NtpTimestamp,
}

/// Errors raised when a packet field cannot be represented on the wire.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Leap indicator does not fit in 2 bits.
    #[error("leap indicator {0} does not fit in 2 bits")]
    LeapOutOfRange(u8),
    /// Version does not fit in 3 bits.
    #[error("version {0} does not fit in 3 bits")]
    VersionOutOfRange(u8),
    /// Mode does not fit in 3 bits.
    #[error("mode {0} does not fit in 3 bits")]
    ModeOutOfRange(u8),
    /// A 16.16 field is negative or exceeds 16 integer bits.
    #[error("{field} value {value} is not representable in 16.16 fixed point")]
    ShortFormatOutOfRange { field: &'static str, value: f64 },
}

/// Errors raised when a buffer cannot be decoded as a packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer holds fewer than [`PACKET_SIZE`] bytes.
    #[error("buffer too small for NTP packet: need {PACKET_SIZE} bytes, got {0}")]
    BufferTooSmall(usize),
}

impl NtpPacket {
    /// Builds the mode-3 request skeleton: every field zero except the
    /// version and the transmit timestamp.
    pub fn client_request(version: u8, tx_timestamp: NtpTimestamp) -> Self {
        NtpPacket {
            version,
            mode: MODE_CLIENT,
            tx_timestamp,
            ..NtpPacket::default()
        }
    }

    /// Serializes the packet to its 48-byte big-endian wire format.
    ///
    /// # Errors
    /// Returns an error if leap, version or mode exceed their bit
    /// widths, or if root delay/dispersion fall outside [0, 2^16).
    pub fn encode(&self) -> Result<[u8; PACKET_SIZE], EncodeError> {
        if self.leap > 0x3 {
            return Err(EncodeError::LeapOutOfRange(self.leap));
        }
        if self.version > 0x7 {
            return Err(EncodeError::VersionOutOfRange(self.version));
        }
        if self.mode > 0x7 {
            return Err(EncodeError::ModeOutOfRange(self.mode));
        }
        let root_delay =
            to_short_format(self.root_delay).ok_or(EncodeError::ShortFormatOutOfRange {
                field: "root delay",
                value: self.root_delay,
            })?;
        let root_dispersion =
            to_short_format(self.root_dispersion).ok_or(EncodeError::ShortFormatOutOfRange {
                field: "root dispersion",
                value: self.root_dispersion,
            })?;

        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = self.leap << 6 | self.version << 3 | self.mode;
        buf[1] = self.stratum;
        buf[2] = self.poll as u8;
        buf[3] = self.precision as u8;
        buf[4..8].copy_from_slice(&root_delay.to_be_bytes());
        buf[8..12].copy_from_slice(&root_dispersion.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ref_id.to_be_bytes());
        buf[16..24].copy_from_slice(&self.ref_timestamp.to_bits().to_be_bytes());
        buf[24..32].copy_from_slice(&self.orig_timestamp.to_bits().to_be_bytes());
        buf[32..40].copy_from_slice(&self.recv_timestamp.to_bits().to_be_bytes());
        buf[40..48].copy_from_slice(&self.tx_timestamp.to_bits().to_be_bytes());
        Ok(buf)
    }

    /// Deserializes a packet from the first 48 bytes of `buf`.
    ///
    /// Only the size check is performed here; semantic validation of
    /// mode or stratum is left to callers.
    ///
    /// # Errors
    /// Returns an error if the buffer is smaller than 48 bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < PACKET_SIZE {
            return Err(DecodeError::BufferTooSmall(buf.len()));
        }
        Ok(NtpPacket {
            leap: buf[0] >> 6 & 0x3,
            version: buf[0] >> 3 & 0x7,
            mode: buf[0] & 0x7,
            stratum: buf[1],
            poll: buf[2] as i8,
            precision: buf[3] as i8,
            root_delay: from_short_format(u32::from_be_bytes(buf[4..8].try_into().unwrap())),
            root_dispersion: from_short_format(u32::from_be_bytes(
                buf[8..12].try_into().unwrap(),
            )),
            ref_id: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            ref_timestamp: NtpTimestamp::from_bits(u64::from_be_bytes(
                buf[16..24].try_into().unwrap(),
            )),
            orig_timestamp: NtpTimestamp::from_bits(u64::from_be_bytes(
                buf[24..32].try_into().unwrap(),
            )),
            recv_timestamp: NtpTimestamp::from_bits(u64::from_be_bytes(
                buf[32..40].try_into().unwrap(),
            )),
            tx_timestamp: NtpTimestamp::from_bits(u64::from_be_bytes(
                buf[40..48].try_into().unwrap(),
            )),
            dest_timestamp: NtpTimestamp::default(),
        })
    }
}
