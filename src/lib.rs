//! SNTP Suite - Simple Network Time Protocol codec, client and test server.
//!
//! This crate implements the SNTP wire protocol according to RFC 4330:
//! the 48-byte packet codec, a one-exchange client that measures clock
//! offset and round-trip delay, and a test server that deliberately
//! lies about its clock by a configured offset so downstream time-sync
//! consumers can be exercised against known skew.
//!
//! # Usage
//!
//! Query a server (client):
//! ```bash
//! sntp pool.ntp.org
//! ```
//!
//! Run the lying test server:
//! ```bash
//! sntpd --lie-offset 100.0 --local-port 123
//! ```

/// One-exchange SNTP client session.
pub mod client;
/// SNTP packet structure and serialization.
pub mod packets;
/// Lying SNTP server dispatcher.
pub mod server;
/// NTP timestamp representation and conversions.
pub mod time;
