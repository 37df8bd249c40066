//! BACnet Application Layer
//!
//! Application Protocol Data Units carry service requests, acknowledgments
//! and errors. The first octet packs the PDU type into the high nibble and
//! control bits into the low nibble; confirmed requests follow with a
//! max-segments / max-APDU negotiation octet and an invocation id, then the
//! service selector and the TLV payload.
//!
//! Payloads are typed: the decoder dispatches on the service selector into
//! the closed set of messages this client implements and rejects everything
//! else with [`ApplicationError::UnknownService`].
//!
//! Segmentation is negotiated but never used: the client refuses segmented
//! APDUs on decode and never sets the segmented bits on encode.

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::service::{
    ConfirmedServiceChoice, IAm, ProtocolError, ReadPropertyAck, ReadPropertyRequest,
    UnconfirmedServiceChoice, WhoIs, WritePropertyRequest,
};

/// Result type for application layer operations
pub type Result<T> = core::result::Result<T, ApplicationError>;

/// Errors that can occur in application layer operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    /// APDU shorter than its fixed header
    #[error("APDU runs past the end of the buffer")]
    Truncated,
    /// Service selector outside the implemented set
    #[error("unknown service selector {0}")]
    UnknownService(u8),
    /// Reserved PDU type or negotiation code
    #[error("unsupported APDU: {0}")]
    Unsupported(String),
    /// Segmented APDUs are declared unsupported by this client
    #[error("segmented APDUs are not supported")]
    Segmented,
    /// Payload failed to decode
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// APDU type codes (high nibble of the first octet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduType {
    ConfirmedRequest = 0,
    UnconfirmedRequest = 1,
    SimpleAck = 2,
    ComplexAck = 3,
    SegmentAck = 4,
    Error = 5,
    Reject = 6,
    Abort = 7,
}

/// Maximum segments accepted, bits 6-4 of the negotiation octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MaxSegments {
    #[default]
    Unspecified = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
    Sixteen = 4,
    ThirtyTwo = 5,
    SixtyFour = 6,
    GreaterThan64 = 7,
}

impl MaxSegments {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => MaxSegments::Unspecified,
            1 => MaxSegments::Two,
            2 => MaxSegments::Four,
            3 => MaxSegments::Eight,
            4 => MaxSegments::Sixteen,
            5 => MaxSegments::ThirtyTwo,
            6 => MaxSegments::SixtyFour,
            _ => MaxSegments::GreaterThan64,
        }
    }
}

/// Maximum APDU size accepted, bits 3-0 of the negotiation octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MaxApduSize {
    Up50 = 0,
    Up128 = 1,
    Up206 = 2,
    Up480 = 3,
    Up1024 = 4,
    #[default]
    Up1476 = 5,
}

impl MaxApduSize {
    /// The negotiated size in bytes.
    pub fn size(&self) -> usize {
        match self {
            MaxApduSize::Up50 => 50,
            MaxApduSize::Up128 => 128,
            MaxApduSize::Up206 => 206,
            MaxApduSize::Up480 => 480,
            MaxApduSize::Up1024 => 1024,
            MaxApduSize::Up1476 => 1476,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code & 0x0F {
            0 => Ok(MaxApduSize::Up50),
            1 => Ok(MaxApduSize::Up128),
            2 => Ok(MaxApduSize::Up206),
            3 => Ok(MaxApduSize::Up480),
            4 => Ok(MaxApduSize::Up1024),
            5 => Ok(MaxApduSize::Up1476),
            other => Err(ApplicationError::Unsupported(format!(
                "reserved max-APDU code {other}"
            ))),
        }
    }
}

/// A confirmed service request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmedRequest {
    ReadProperty(ReadPropertyRequest),
    WriteProperty(WritePropertyRequest),
}

impl ConfirmedRequest {
    /// The service selector this payload encodes under.
    pub fn choice(&self) -> ConfirmedServiceChoice {
        match self {
            ConfirmedRequest::ReadProperty(_) => ConfirmedServiceChoice::ReadProperty,
            ConfirmedRequest::WriteProperty(_) => ConfirmedServiceChoice::WriteProperty,
        }
    }

    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            ConfirmedRequest::ReadProperty(request) => request.encode(buffer)?,
            ConfirmedRequest::WriteProperty(request) => request.encode(buffer)?,
        }
        Ok(())
    }

    fn decode(choice: ConfirmedServiceChoice, data: &[u8]) -> Result<Self> {
        match choice {
            ConfirmedServiceChoice::ReadProperty => Ok(ConfirmedRequest::ReadProperty(
                ReadPropertyRequest::decode(data)?,
            )),
            ConfirmedServiceChoice::WriteProperty => Ok(ConfirmedRequest::WriteProperty(
                WritePropertyRequest::decode(data)?,
            )),
        }
    }
}

/// An unconfirmed service request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum UnconfirmedRequest {
    WhoIs(WhoIs),
    IAm(IAm),
}

impl UnconfirmedRequest {
    pub fn choice(&self) -> UnconfirmedServiceChoice {
        match self {
            UnconfirmedRequest::WhoIs(_) => UnconfirmedServiceChoice::WhoIs,
            UnconfirmedRequest::IAm(_) => UnconfirmedServiceChoice::IAm,
        }
    }

    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            UnconfirmedRequest::WhoIs(request) => request.encode(buffer),
            UnconfirmedRequest::IAm(request) => request.encode(buffer)?,
        }
        Ok(())
    }

    fn decode(choice: UnconfirmedServiceChoice, data: &[u8]) -> Result<Self> {
        match choice {
            UnconfirmedServiceChoice::WhoIs => Ok(UnconfirmedRequest::WhoIs(WhoIs::decode(data)?)),
            UnconfirmedServiceChoice::IAm => Ok(UnconfirmedRequest::IAm(IAm::decode(data)?)),
        }
    }
}

/// A complex acknowledgement payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceAck {
    ReadProperty(ReadPropertyAck),
}

impl ServiceAck {
    pub fn choice(&self) -> ConfirmedServiceChoice {
        match self {
            ServiceAck::ReadProperty(_) => ConfirmedServiceChoice::ReadProperty,
        }
    }

    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            ServiceAck::ReadProperty(ack) => ack.encode(buffer)?,
        }
        Ok(())
    }

    fn decode(choice: ConfirmedServiceChoice, data: &[u8]) -> Result<Self> {
        match choice {
            ConfirmedServiceChoice::ReadProperty => {
                Ok(ServiceAck::ReadProperty(ReadPropertyAck::decode(data)?))
            }
            other => Err(ApplicationError::Unsupported(format!(
                "complex ack for service {}",
                other as u8
            ))),
        }
    }
}

/// Application Protocol Data Unit
#[derive(Debug, Clone, PartialEq)]
pub enum Apdu {
    /// Confirmed service request
    ConfirmedRequest {
        segmented_response_accepted: bool,
        max_segments: MaxSegments,
        max_apdu: MaxApduSize,
        invoke_id: u8,
        request: ConfirmedRequest,
    },

    /// Unconfirmed service request
    UnconfirmedRequest { request: UnconfirmedRequest },

    /// Simple acknowledgment
    SimpleAck {
        invoke_id: u8,
        service_choice: ConfirmedServiceChoice,
    },

    /// Complex acknowledgment
    ComplexAck { invoke_id: u8, ack: ServiceAck },

    /// Segment acknowledgment
    SegmentAck {
        negative: bool,
        server: bool,
        invoke_id: u8,
        sequence_number: u8,
        window_size: u8,
    },

    /// Error PDU
    Error {
        invoke_id: u8,
        service_choice: ConfirmedServiceChoice,
        error: ProtocolError,
    },

    /// Reject PDU
    Reject { invoke_id: u8, reason: u8 },

    /// Abort PDU
    Abort {
        server: bool,
        invoke_id: u8,
        reason: u8,
    },
}

impl Apdu {
    /// The invocation id correlating this APDU with a confirmed request,
    /// when it has one.
    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            Apdu::ConfirmedRequest { invoke_id, .. }
            | Apdu::SimpleAck { invoke_id, .. }
            | Apdu::ComplexAck { invoke_id, .. }
            | Apdu::SegmentAck { invoke_id, .. }
            | Apdu::Error { invoke_id, .. }
            | Apdu::Reject { invoke_id, .. }
            | Apdu::Abort { invoke_id, .. } => Some(*invoke_id),
            Apdu::UnconfirmedRequest { .. } => None,
        }
    }

    /// Whether this APDU answers a confirmed request and should be routed
    /// to a waiting transaction.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Apdu::SimpleAck { .. }
                | Apdu::ComplexAck { .. }
                | Apdu::Error { .. }
                | Apdu::Reject { .. }
                | Apdu::Abort { .. }
        )
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        match self {
            Apdu::ConfirmedRequest {
                segmented_response_accepted,
                max_segments,
                max_apdu,
                invoke_id,
                request,
            } => {
                let mut first = (ApduType::ConfirmedRequest as u8) << 4;
                if *segmented_response_accepted {
                    first |= 0x02;
                }
                buffer.push(first);
                buffer.push(((*max_segments as u8) << 4) | (*max_apdu as u8));
                buffer.push(*invoke_id);
                buffer.push(request.choice() as u8);
                request.encode(&mut buffer)?;
            }

            Apdu::UnconfirmedRequest { request } => {
                buffer.push((ApduType::UnconfirmedRequest as u8) << 4);
                buffer.push(request.choice() as u8);
                request.encode(&mut buffer)?;
            }

            Apdu::SimpleAck {
                invoke_id,
                service_choice,
            } => {
                buffer.push((ApduType::SimpleAck as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*service_choice as u8);
            }

            Apdu::ComplexAck { invoke_id, ack } => {
                buffer.push((ApduType::ComplexAck as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(ack.choice() as u8);
                ack.encode(&mut buffer)?;
            }

            Apdu::SegmentAck {
                negative,
                server,
                invoke_id,
                sequence_number,
                window_size,
            } => {
                let mut first = (ApduType::SegmentAck as u8) << 4;
                if *negative {
                    first |= 0x02;
                }
                if *server {
                    first |= 0x01;
                }
                buffer.push(first);
                buffer.push(*invoke_id);
                buffer.push(*sequence_number);
                buffer.push(*window_size);
            }

            Apdu::Error {
                invoke_id,
                service_choice,
                error,
            } => {
                buffer.push((ApduType::Error as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*service_choice as u8);
                error.encode(&mut buffer)?;
            }

            Apdu::Reject { invoke_id, reason } => {
                buffer.push((ApduType::Reject as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*reason);
            }

            Apdu::Abort {
                server,
                invoke_id,
                reason,
            } => {
                let mut first = (ApduType::Abort as u8) << 4;
                if *server {
                    first |= 0x01;
                }
                buffer.push(first);
                buffer.push(*invoke_id);
                buffer.push(*reason);
            }
        }
        Ok(buffer)
    }

    /// Decode from bytes, dispatching the payload on the service selector.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let first = *data.first().ok_or(ApplicationError::Truncated)?;

        match first >> 4 {
            0 => {
                // segmented (0x08) and more-follows (0x04) are refused
                if first & 0x0C != 0 {
                    return Err(ApplicationError::Segmented);
                }
                let header = data.get(1..4).ok_or(ApplicationError::Truncated)?;
                let max_segments = MaxSegments::from_bits(header[0] >> 4);
                let max_apdu = MaxApduSize::from_code(header[0])?;
                let invoke_id = header[1];
                let choice = ConfirmedServiceChoice::from_u8(header[2])
                    .ok_or(ApplicationError::UnknownService(header[2]))?;
                Ok(Apdu::ConfirmedRequest {
                    segmented_response_accepted: first & 0x02 != 0,
                    max_segments,
                    max_apdu,
                    invoke_id,
                    request: ConfirmedRequest::decode(choice, &data[4..])?,
                })
            }

            1 => {
                let selector = *data.get(1).ok_or(ApplicationError::Truncated)?;
                let choice = UnconfirmedServiceChoice::from_u8(selector)
                    .ok_or(ApplicationError::UnknownService(selector))?;
                Ok(Apdu::UnconfirmedRequest {
                    request: UnconfirmedRequest::decode(choice, &data[2..])?,
                })
            }

            2 => {
                let header = data.get(1..3).ok_or(ApplicationError::Truncated)?;
                let service_choice = ConfirmedServiceChoice::from_u8(header[1])
                    .ok_or(ApplicationError::UnknownService(header[1]))?;
                Ok(Apdu::SimpleAck {
                    invoke_id: header[0],
                    service_choice,
                })
            }

            3 => {
                if first & 0x08 != 0 {
                    return Err(ApplicationError::Segmented);
                }
                let header = data.get(1..3).ok_or(ApplicationError::Truncated)?;
                let choice = ConfirmedServiceChoice::from_u8(header[1])
                    .ok_or(ApplicationError::UnknownService(header[1]))?;
                Ok(Apdu::ComplexAck {
                    invoke_id: header[0],
                    ack: ServiceAck::decode(choice, &data[3..])?,
                })
            }

            4 => {
                let header = data.get(1..4).ok_or(ApplicationError::Truncated)?;
                Ok(Apdu::SegmentAck {
                    negative: first & 0x02 != 0,
                    server: first & 0x01 != 0,
                    invoke_id: header[0],
                    sequence_number: header[1],
                    window_size: header[2],
                })
            }

            5 => {
                let header = data.get(1..3).ok_or(ApplicationError::Truncated)?;
                let service_choice = ConfirmedServiceChoice::from_u8(header[1])
                    .ok_or(ApplicationError::UnknownService(header[1]))?;
                Ok(Apdu::Error {
                    invoke_id: header[0],
                    service_choice,
                    error: ProtocolError::decode(&data[3..])?,
                })
            }

            6 => {
                let header = data.get(1..3).ok_or(ApplicationError::Truncated)?;
                Ok(Apdu::Reject {
                    invoke_id: header[0],
                    reason: header[1],
                })
            }

            7 => {
                let header = data.get(1..3).ok_or(ApplicationError::Truncated)?;
                Ok(Apdu::Abort {
                    server: first & 0x01 != 0,
                    invoke_id: header[0],
                    reason: header[1],
                })
            }

            other => Err(ApplicationError::Unsupported(format!(
                "PDU type {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::PropertyValue;
    use crate::object::{property_id, ObjectId, ObjectType, PropertyRef};

    fn read_request() -> Apdu {
        Apdu::ConfirmedRequest {
            segmented_response_accepted: false,
            max_segments: MaxSegments::Unspecified,
            max_apdu: MaxApduSize::Up1476,
            invoke_id: 7,
            request: ConfirmedRequest::ReadProperty(ReadPropertyRequest::new(
                ObjectId::new(ObjectType::AnalogInput, 1),
                property_id::PRESENT_VALUE,
            )),
        }
    }

    #[test]
    fn confirmed_request_header_layout() {
        let encoded = read_request().encode().unwrap();
        assert_eq!(encoded[0], 0x00);
        assert_eq!(encoded[1], 0x05); // no segments, up to 1476 octets
        assert_eq!(encoded[2], 7);
        assert_eq!(encoded[3], ConfirmedServiceChoice::ReadProperty as u8);
    }

    #[test]
    fn apdus_round_trip() {
        let apdus = [
            read_request(),
            Apdu::UnconfirmedRequest {
                request: UnconfirmedRequest::WhoIs(WhoIs::for_range(1, 99)),
            },
            Apdu::UnconfirmedRequest {
                request: UnconfirmedRequest::IAm(IAm {
                    device_id: ObjectId::new(ObjectType::Device, 99),
                    max_apdu: 480,
                    segmentation: crate::object::Segmentation::None,
                    vendor_id: 42,
                }),
            },
            Apdu::SimpleAck {
                invoke_id: 3,
                service_choice: ConfirmedServiceChoice::WriteProperty,
            },
            Apdu::ComplexAck {
                invoke_id: 7,
                ack: ServiceAck::ReadProperty(ReadPropertyAck {
                    object_id: ObjectId::new(ObjectType::AnalogInput, 1),
                    property: PropertyRef::new(property_id::PRESENT_VALUE),
                    value: PropertyValue::Real(23.5),
                }),
            },
            Apdu::SegmentAck {
                negative: true,
                server: true,
                invoke_id: 9,
                sequence_number: 2,
                window_size: 4,
            },
            Apdu::Error {
                invoke_id: 7,
                service_choice: ConfirmedServiceChoice::ReadProperty,
                error: ProtocolError { class: 1, code: 31 },
            },
            Apdu::Reject {
                invoke_id: 5,
                reason: 9,
            },
            Apdu::Abort {
                server: false,
                invoke_id: 5,
                reason: 4,
            },
        ];
        for apdu in apdus {
            let encoded = apdu.encode().unwrap();
            assert_eq!(Apdu::decode(&encoded).unwrap(), apdu, "{apdu:?}");
        }
    }

    #[test]
    fn unknown_service_is_rejected() {
        // Unconfirmed request with service selector 99.
        assert_eq!(
            Apdu::decode(&[0x10, 99]),
            Err(ApplicationError::UnknownService(99))
        );
    }

    #[test]
    fn segmented_request_is_refused() {
        // Confirmed request with the segmented bit set.
        let data = [0x08, 0x05, 0x01, 12];
        assert_eq!(Apdu::decode(&data), Err(ApplicationError::Segmented));
    }

    #[test]
    fn reply_classification() {
        assert!(Apdu::SimpleAck {
            invoke_id: 1,
            service_choice: ConfirmedServiceChoice::WriteProperty
        }
        .is_reply());
        assert!(!read_request().is_reply());
        assert!(!Apdu::UnconfirmedRequest {
            request: UnconfirmedRequest::WhoIs(WhoIs::new())
        }
        .is_reply());
    }
}
