//! BACnet Virtual Link Control for BACnet/IP (ASHRAE 135 Annex J).
//!
//! Every B/IP datagram starts with a four-octet header: the type marker
//! 0x81, a function code, and a 16-bit length covering the whole frame.
//! The client originates Original-Unicast and Original-Broadcast frames
//! and additionally understands Forwarded-NPDU, which a broadcast
//! management device emits on behalf of a device on another subnet with
//! the original sender's address prepended.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::datalink::{DataLinkError, Result};
use crate::network::Npdu;

/// BACnet/IP well-known UDP port (0xBAC0).
pub const BACNET_IP_PORT: u16 = 47808;

/// BVLC type marker for BACnet/IP.
pub const BVLC_TYPE_BACNET_IP: u8 = 0x81;

/// Size of the fixed BVLC header.
const HEADER_LEN: usize = 4;

/// Size of the B/IP address prepended to a Forwarded-NPDU.
const ORIGIN_LEN: usize = 6;

/// BVLC function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BvlcFunction {
    Result = 0x00,
    WriteBroadcastDistributionTable = 0x01,
    ReadBroadcastDistributionTable = 0x02,
    ReadBroadcastDistributionTableAck = 0x03,
    ForwardedNpdu = 0x04,
    RegisterForeignDevice = 0x05,
    ReadForeignDeviceTable = 0x06,
    ReadForeignDeviceTableAck = 0x07,
    DeleteForeignDeviceTableEntry = 0x08,
    DistributeBroadcastToNetwork = 0x09,
    OriginalUnicast = 0x0A,
    OriginalBroadcast = 0x0B,
}

impl BvlcFunction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(BvlcFunction::Result),
            0x01 => Some(BvlcFunction::WriteBroadcastDistributionTable),
            0x02 => Some(BvlcFunction::ReadBroadcastDistributionTable),
            0x03 => Some(BvlcFunction::ReadBroadcastDistributionTableAck),
            0x04 => Some(BvlcFunction::ForwardedNpdu),
            0x05 => Some(BvlcFunction::RegisterForeignDevice),
            0x06 => Some(BvlcFunction::ReadForeignDeviceTable),
            0x07 => Some(BvlcFunction::ReadForeignDeviceTableAck),
            0x08 => Some(BvlcFunction::DeleteForeignDeviceTableEntry),
            0x09 => Some(BvlcFunction::DistributeBroadcastToNetwork),
            0x0A => Some(BvlcFunction::OriginalUnicast),
            0x0B => Some(BvlcFunction::OriginalBroadcast),
            _ => None,
        }
    }
}

/// A BACnet/IP link frame: the BVLC envelope around an NPDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Bvlc {
    pub function: BvlcFunction,
    /// Original sender, present on Forwarded-NPDU frames.
    pub origin: Option<SocketAddrV4>,
    pub npdu: Npdu,
}

impl Bvlc {
    /// Frame for unicast delivery.
    pub fn unicast(npdu: Npdu) -> Self {
        Self {
            function: BvlcFunction::OriginalUnicast,
            origin: None,
            npdu,
        }
    }

    /// Frame for subnet broadcast delivery.
    pub fn broadcast(npdu: Npdu) -> Self {
        Self {
            function: BvlcFunction::OriginalBroadcast,
            origin: None,
            npdu,
        }
    }

    /// Encode the frame. The length field is stamped once the NPDU size
    /// is known.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![BVLC_TYPE_BACNET_IP, self.function as u8, 0, 0];
        if self.function == BvlcFunction::ForwardedNpdu {
            let origin = self.origin.ok_or_else(|| {
                DataLinkError::UnsupportedFunction(BvlcFunction::ForwardedNpdu as u8)
            })?;
            buffer.extend_from_slice(&origin.ip().octets());
            buffer.extend_from_slice(&origin.port().to_be_bytes());
        }
        self.npdu.encode(&mut buffer)?;
        let length = u16::try_from(buffer.len()).map_err(|_| DataLinkError::Truncated)?;
        buffer[2..4].copy_from_slice(&length.to_be_bytes());
        Ok(buffer)
    }

    /// Decode a received datagram.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = data.get(..HEADER_LEN).ok_or(DataLinkError::Truncated)?;
        if header[0] != BVLC_TYPE_BACNET_IP {
            return Err(DataLinkError::NotBacnetIp(header[0]));
        }
        let function =
            BvlcFunction::from_u8(header[1]).ok_or(DataLinkError::UnknownFunction(header[1]))?;
        let length = u16::from_be_bytes([header[2], header[3]]) as usize;
        let frame = data.get(..length).ok_or(DataLinkError::Truncated)?;

        let (origin, npdu_offset) = match function {
            BvlcFunction::OriginalUnicast | BvlcFunction::OriginalBroadcast => {
                (None, HEADER_LEN)
            }
            BvlcFunction::ForwardedNpdu => {
                let bytes = frame
                    .get(HEADER_LEN..HEADER_LEN + ORIGIN_LEN)
                    .ok_or(DataLinkError::Truncated)?;
                let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
                let port = u16::from_be_bytes([bytes[4], bytes[5]]);
                (
                    Some(SocketAddrV4::new(ip, port)),
                    HEADER_LEN + ORIGIN_LEN,
                )
            }
            other => return Err(DataLinkError::UnsupportedFunction(other as u8)),
        };

        Ok(Bvlc {
            function,
            origin,
            npdu: Npdu::decode(&frame[npdu_offset..])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Apdu, UnconfirmedRequest};
    use crate::service::WhoIs;

    fn whois_npdu() -> Npdu {
        Npdu::local(Apdu::UnconfirmedRequest {
            request: UnconfirmedRequest::WhoIs(WhoIs::new()),
        })
    }

    #[test]
    fn broadcast_frame_layout() {
        let frame = Bvlc::broadcast(whois_npdu());
        let encoded = frame.encode().unwrap();
        // 0x81, Original-Broadcast, length, version 1, control 0,
        // unconfirmed who-is.
        assert_eq!(encoded, [0x81, 0x0B, 0x00, 0x08, 0x01, 0x00, 0x10, 0x08]);
    }

    #[test]
    fn length_field_covers_whole_frame() {
        let encoded = Bvlc::unicast(whois_npdu()).encode().unwrap();
        let length = u16::from_be_bytes([encoded[2], encoded[3]]) as usize;
        assert_eq!(length, encoded.len());
    }

    #[test]
    fn frames_round_trip() {
        for frame in [
            Bvlc::unicast(whois_npdu()),
            Bvlc::broadcast(whois_npdu()),
            Bvlc {
                function: BvlcFunction::ForwardedNpdu,
                origin: Some(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 9), 47808)),
                npdu: whois_npdu(),
            },
        ] {
            let encoded = frame.encode().unwrap();
            assert_eq!(Bvlc::decode(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn non_bacnet_datagram_is_rejected() {
        assert_eq!(
            Bvlc::decode(&[0x00, 0x00]),
            Err(DataLinkError::Truncated)
        );
        assert_eq!(
            Bvlc::decode(&[0x47, 0x0A, 0x00, 0x04]),
            Err(DataLinkError::NotBacnetIp(0x47))
        );
    }

    #[test]
    fn short_declared_length_is_rejected() {
        let mut encoded = Bvlc::unicast(whois_npdu()).encode().unwrap();
        // Claim one more octet than the datagram carries.
        let bogus = (encoded.len() + 1) as u16;
        encoded[2..4].copy_from_slice(&bogus.to_be_bytes());
        assert_eq!(Bvlc::decode(&encoded), Err(DataLinkError::Truncated));
    }

    #[test]
    fn register_foreign_device_is_not_an_npdu() {
        let data = [0x81, 0x05, 0x00, 0x06, 0x00, 0x3C];
        assert_eq!(
            Bvlc::decode(&data),
            Err(DataLinkError::UnsupportedFunction(0x05))
        );
    }
}
