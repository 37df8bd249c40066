//! BACnet Network Layer
//!
//! The network layer wraps an APDU in routing and priority information: a
//! control octet, optional destination and source specifiers (network
//! number plus link-layer MAC), and a hop count. A control bit can replace
//! the APDU with a network-layer message; the client logs and ignores
//! those but decodes them fully.
//!
//! This module also defines [`Address`], the link-layer address form used
//! throughout the client. For BACnet/IP the MAC is the concatenation of a
//! one-octet IP length tag (4 or 16), the IP octets, and a big-endian
//! port.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;

use crate::app::{Apdu, ApplicationError};

/// Result type for network layer operations
pub type Result<T> = core::result::Result<T, NetworkError>;

/// NPDU protocol version defined by ASHRAE 135.
pub const PROTOCOL_VERSION: u8 = 1;

/// Hop count used when originating a routed frame.
pub const DEFAULT_HOP_COUNT: u8 = 255;

/// Errors that can occur in network layer operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Structurally invalid NPDU
    #[error("invalid NPDU: {0}")]
    InvalidNpdu(String),
    /// NPDU runs past the end of the buffer
    #[error("NPDU runs past the end of the buffer")]
    Truncated,
    /// Link-layer address is not a valid B/IP address
    #[error("malformed link-layer address")]
    MalformedAddress,
    /// The carried APDU failed to decode
    #[error(transparent)]
    Application(#[from] ApplicationError),
}

/// Network priority carried in the low two bits of the control octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Priority {
    #[default]
    Normal = 0,
    Urgent = 1,
    CriticalEquipment = 2,
    LifeSafety = 3,
}

impl Priority {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Priority::Normal,
            1 => Priority::Urgent,
            2 => Priority::CriticalEquipment,
            _ => Priority::LifeSafety,
        }
    }
}

/// Link-layer address of a device.
///
/// `net` is the BACnet network number (0 = local network, 0xFFFF =
/// broadcast). `mac` is the address on the local link; `adr` is the
/// hardware address on the remote network when the device sits behind a
/// router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Address {
    pub net: u16,
    pub mac: Vec<u8>,
    pub adr: Vec<u8>,
}

impl Address {
    /// Build the B/IP address form `[ip_len, ip..., port_hi, port_lo]`
    /// from a UDP socket address.
    pub fn from_udp(addr: SocketAddr) -> Self {
        let mut mac = Vec::with_capacity(19);
        match addr.ip() {
            IpAddr::V4(ip) => {
                mac.push(4);
                mac.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                mac.push(16);
                mac.extend_from_slice(&ip.octets());
            }
        }
        mac.extend_from_slice(&addr.port().to_be_bytes());
        Self {
            net: 0,
            mac,
            adr: Vec::new(),
        }
    }

    /// Recover the UDP socket address from the B/IP MAC form.
    ///
    /// Total inverse of [`Address::from_udp`]: fails with
    /// [`NetworkError::MalformedAddress`] when the length tag is not 4 or
    /// 16 or the MAC is too short, rather than producing a zero address.
    pub fn to_udp(&self) -> Result<SocketAddr> {
        let (&ip_len, rest) = self.mac.split_first().ok_or(NetworkError::MalformedAddress)?;
        let ip_len = ip_len as usize;
        if ip_len != 4 && ip_len != 16 {
            return Err(NetworkError::MalformedAddress);
        }
        if rest.len() < ip_len + 2 {
            return Err(NetworkError::MalformedAddress);
        }
        let ip: IpAddr = if ip_len == 4 {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&rest[..4]);
            Ipv4Addr::from(octets).into()
        } else {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&rest[..16]);
            Ipv6Addr::from(octets).into()
        };
        let port = u16::from_be_bytes([rest[ip_len], rest[ip_len + 1]]);
        Ok(SocketAddr::new(ip, port))
    }

    /// The octets written into an NPDU specifier: the remote hardware
    /// address when present, the link MAC otherwise.
    fn link_bytes(&self) -> &[u8] {
        if self.adr.is_empty() {
            &self.mac
        } else {
            &self.adr
        }
    }
}

/// What an NPDU carries after its headers.
#[derive(Debug, Clone, PartialEq)]
pub enum NpduContent {
    /// An application PDU
    Application(Apdu),
    /// A network-layer message. Proprietary message types (0x80 and up)
    /// carry a vendor identifier.
    Network {
        message_type: u8,
        vendor_id: Option<u16>,
        data: Vec<u8>,
    },
}

/// Network Protocol Data Unit
#[derive(Debug, Clone, PartialEq)]
pub struct Npdu {
    pub priority: Priority,
    pub expecting_reply: bool,
    pub destination: Option<Address>,
    pub source: Option<Address>,
    /// Encoded only when a destination or source specifier is present.
    pub hop_count: u8,
    pub content: NpduContent,
}

impl Npdu {
    /// NPDU without routing specifiers, as used for local broadcasts and
    /// for replies on the local network.
    pub fn local(apdu: Apdu) -> Self {
        Self {
            priority: Priority::Normal,
            expecting_reply: false,
            destination: None,
            source: None,
            hop_count: DEFAULT_HOP_COUNT,
            content: NpduContent::Application(apdu),
        }
    }

    /// NPDU for a confirmed request to `destination`, announcing
    /// `source` as the reply address.
    pub fn confirmed(destination: Address, source: Address, apdu: Apdu) -> Self {
        Self {
            priority: Priority::Normal,
            expecting_reply: true,
            destination: Some(destination),
            source: Some(source),
            hop_count: DEFAULT_HOP_COUNT,
            content: NpduContent::Application(apdu),
        }
    }

    /// The carried APDU, if this is not a network-layer message.
    pub fn apdu(&self) -> Option<&Apdu> {
        match &self.content {
            NpduContent::Application(apdu) => Some(apdu),
            NpduContent::Network { .. } => None,
        }
    }

    fn control_octet(&self) -> u8 {
        let mut control = self.priority as u8;
        if matches!(self.content, NpduContent::Network { .. }) {
            control |= 0x80;
        }
        if self.destination.is_some() {
            control |= 0x20;
        }
        if self.source.is_some() {
            control |= 0x08;
        }
        if self.expecting_reply {
            control |= 0x04;
        }
        control
    }

    /// Append the encoded NPDU (headers plus content) to `buffer`.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.push(PROTOCOL_VERSION);
        buffer.push(self.control_octet());

        for specifier in [&self.destination, &self.source].into_iter().flatten() {
            buffer.extend_from_slice(&specifier.net.to_be_bytes());
            let link = specifier.link_bytes();
            buffer.push(link.len() as u8);
            buffer.extend_from_slice(link);
        }
        if self.destination.is_some() || self.source.is_some() {
            buffer.push(self.hop_count);
        }

        match &self.content {
            NpduContent::Network {
                message_type,
                vendor_id,
                data,
            } => {
                buffer.push(*message_type);
                if *message_type >= 0x80 {
                    let vendor = vendor_id.ok_or_else(|| {
                        NetworkError::InvalidNpdu(
                            "proprietary network message without vendor id".into(),
                        )
                    })?;
                    buffer.extend_from_slice(&vendor.to_be_bytes());
                }
                buffer.extend_from_slice(data);
            }
            NpduContent::Application(apdu) => {
                buffer.extend_from_slice(&apdu.encode()?);
            }
        }
        Ok(())
    }

    /// Decode an NPDU from `data`, which must contain exactly the NPDU
    /// (the link layer strips its own framing first).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let version = *data.first().ok_or(NetworkError::Truncated)?;
        if version != PROTOCOL_VERSION {
            return Err(NetworkError::InvalidNpdu(format!(
                "unsupported NPDU version {version}"
            )));
        }
        let control = *data.get(1).ok_or(NetworkError::Truncated)?;
        let mut pos = 2;

        let mut read_specifier = |pos: &mut usize| -> Result<Address> {
            let header = data.get(*pos..*pos + 3).ok_or(NetworkError::Truncated)?;
            let net = u16::from_be_bytes([header[0], header[1]]);
            let len = header[2] as usize;
            *pos += 3;
            let mac = data
                .get(*pos..*pos + len)
                .ok_or(NetworkError::Truncated)?
                .to_vec();
            *pos += len;
            Ok(Address {
                net,
                mac,
                adr: Vec::new(),
            })
        };

        let destination = if control & 0x20 != 0 {
            Some(read_specifier(&mut pos)?)
        } else {
            None
        };
        let source = if control & 0x08 != 0 {
            Some(read_specifier(&mut pos)?)
        } else {
            None
        };
        let hop_count = if destination.is_some() || source.is_some() {
            let hop = *data.get(pos).ok_or(NetworkError::Truncated)?;
            pos += 1;
            hop
        } else {
            DEFAULT_HOP_COUNT
        };

        let content = if control & 0x80 != 0 {
            let message_type = *data.get(pos).ok_or(NetworkError::Truncated)?;
            pos += 1;
            let vendor_id = if message_type >= 0x80 {
                let bytes = data.get(pos..pos + 2).ok_or(NetworkError::Truncated)?;
                pos += 2;
                Some(u16::from_be_bytes([bytes[0], bytes[1]]))
            } else {
                None
            };
            NpduContent::Network {
                message_type,
                vendor_id,
                data: data[pos..].to_vec(),
            }
        } else {
            NpduContent::Application(Apdu::decode(&data[pos..])?)
        };

        Ok(Npdu {
            priority: Priority::from_bits(control),
            expecting_reply: control & 0x04 != 0,
            destination,
            source,
            hop_count,
            content,
        })
    }
}
