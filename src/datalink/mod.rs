//! BACnet/IP Data Link Layer
//!
//! BACnet/IP carries NPDUs over UDP inside a small link envelope, the
//! BACnet Virtual Link Control header. This module provides the envelope
//! codec; the [`bip`] submodule holds the B/IP specifics.

use thiserror::Error;

use crate::network::NetworkError;

pub mod bip;

pub use bip::{Bvlc, BvlcFunction, BACNET_IP_PORT};

/// Result type for data link operations
pub type Result<T> = core::result::Result<T, DataLinkError>;

/// Errors that can occur during data link layer operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataLinkError {
    /// First octet is not the BACnet/IP type marker 0x81
    #[error("frame is not BACnet/IP (type octet {0:#04x})")]
    NotBacnetIp(u8),
    /// Declared length exceeds the received datagram
    #[error("frame runs past the declared or available length")]
    Truncated,
    /// BVLC function outside the defined table
    #[error("unknown BVLC function {0:#04x}")]
    UnknownFunction(u8),
    /// Defined BVLC function that does not carry an NPDU
    #[error("BVLC function {0:#04x} carries no NPDU")]
    UnsupportedFunction(u8),
    /// The carried NPDU failed to decode
    #[error(transparent)]
    Network(#[from] NetworkError),
}
