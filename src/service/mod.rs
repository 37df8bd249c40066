//! BACnet Service Payloads
//!
//! The payloads carried by APDUs: the Who-Is discovery query and its I-Am
//! answer, ReadProperty request/ack, WriteProperty, and the error-class /
//! error-code pair of an Error PDU. Each payload encodes to and decodes
//! from the TLV stream that follows the APDU header octets.
//!
//! Service codecs use [`crate::encoding`] primitives throughout and report
//! failures as [`EncodingError`](crate::encoding::EncodingError).

use thiserror::Error;

use crate::encoding::{
    decode_context_enumerated, decode_context_object_id, decode_context_unsigned, decode_value,
    encode_closing_tag, encode_context_enumerated, encode_context_object_id,
    encode_context_unsigned, encode_opening_tag, take_constructed, EncodingError, PropertyValue,
    Result,
};
use crate::object::{ObjectId, PropertyRef, Segmentation};

/// Confirmed service selectors implemented by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfirmedServiceChoice {
    ReadProperty = 12,
    WriteProperty = 15,
}

impl ConfirmedServiceChoice {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            12 => Some(ConfirmedServiceChoice::ReadProperty),
            15 => Some(ConfirmedServiceChoice::WriteProperty),
            _ => None,
        }
    }
}

/// Unconfirmed service selectors implemented by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnconfirmedServiceChoice {
    IAm = 0,
    WhoIs = 8,
}

impl UnconfirmedServiceChoice {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(UnconfirmedServiceChoice::IAm),
            8 => Some(UnconfirmedServiceChoice::WhoIs),
            _ => None,
        }
    }
}

/// Who-Is broadcast query, optionally bounded to an instance range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WhoIs {
    pub low: Option<u32>,
    pub high: Option<u32>,
}

impl WhoIs {
    /// Query every device on the network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query a single device instance.
    pub fn for_device(instance: u32) -> Self {
        Self {
            low: Some(instance),
            high: Some(instance),
        }
    }

    /// Query devices with instances in `[low, high]`.
    pub fn for_range(low: u32, high: u32) -> Self {
        Self {
            low: Some(low),
            high: Some(high),
        }
    }

    /// Whether an announced instance falls inside the requested range.
    ///
    /// With no range every instance matches. Well-behaved devices filter
    /// themselves, but I-Am answers arrive by broadcast and may belong to
    /// someone else's query.
    pub fn matches(&self, instance: u32) -> bool {
        match (self.low, self.high) {
            (Some(low), Some(high)) => instance >= low && instance <= high,
            (Some(low), None) => instance >= low,
            (None, Some(high)) => instance <= high,
            (None, None) => true,
        }
    }

    /// Encode the query. The limits encode together or not at all.
    pub fn encode(&self, buffer: &mut Vec<u8>) {
        if let (Some(low), Some(high)) = (self.low, self.high) {
            encode_context_unsigned(buffer, 0, low);
            encode_context_unsigned(buffer, 1, high);
        }
    }

    /// Decode the query; an empty payload queries everything.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(WhoIs::new());
        }
        let (low, consumed) = decode_context_unsigned(data, 0)?;
        let (high, rest) = decode_context_unsigned(&data[consumed..], 1).map_err(|_| {
            EncodingError::Malformed("who-is has a low limit without a high limit".into())
        })?;
        if consumed + rest != data.len() {
            return Err(EncodingError::Malformed("trailing octets after who-is".into()));
        }
        Ok(WhoIs {
            low: Some(low),
            high: Some(high),
        })
    }
}

/// I-Am announcement: a device identifying itself and its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IAm {
    pub device_id: ObjectId,
    pub max_apdu: u32,
    pub segmentation: Segmentation,
    pub vendor_id: u32,
}

impl IAm {
    /// Encode as four application-tagged values.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        PropertyValue::ObjectId(self.device_id).encode(buffer)?;
        PropertyValue::Unsigned(self.max_apdu).encode(buffer)?;
        PropertyValue::Enumerated(self.segmentation as u32).encode(buffer)?;
        PropertyValue::Unsigned(self.vendor_id).encode(buffer)?;
        Ok(())
    }

    /// Decode the fixed application-tagged sequence.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let mut next = || -> Result<PropertyValue> {
            let (value, consumed) = decode_value(&data[pos..])?;
            pos += consumed;
            Ok(value)
        };
        let device_id = match next()? {
            PropertyValue::ObjectId(id) => id,
            _ => return Err(EncodingError::Malformed("i-am expects an object id".into())),
        };
        let max_apdu = match next()? {
            PropertyValue::Unsigned(value) => value,
            _ => return Err(EncodingError::Malformed("i-am expects max-apdu".into())),
        };
        let segmentation = match next()? {
            PropertyValue::Enumerated(value) => Segmentation::try_from(
                u8::try_from(value).map_err(|_| EncodingError::ValueOutOfRange)?,
            )?,
            _ => return Err(EncodingError::Malformed("i-am expects segmentation".into())),
        };
        let vendor_id = match next()? {
            PropertyValue::Unsigned(value) => value,
            _ => return Err(EncodingError::Malformed("i-am expects a vendor id".into())),
        };
        Ok(IAm {
            device_id,
            max_apdu,
            segmentation,
            vendor_id,
        })
    }
}

/// ReadProperty confirmed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPropertyRequest {
    pub object_id: ObjectId,
    pub property: PropertyRef,
}

impl ReadPropertyRequest {
    pub fn new(object_id: ObjectId, property_id: u32) -> Self {
        Self {
            object_id,
            property: PropertyRef::new(property_id),
        }
    }

    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_context_object_id(buffer, 0, self.object_id)?;
        encode_context_enumerated(buffer, 1, self.property.property_id);
        if let Some(index) = self.property.array_index {
            encode_context_unsigned(buffer, 2, index);
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (object_id, mut pos) = decode_context_object_id(data, 0)?;
        let (property_id, consumed) = decode_context_enumerated(&data[pos..], 1)?;
        pos += consumed;
        let array_index = match decode_context_unsigned(&data[pos..], 2) {
            Ok((index, _)) => Some(index),
            Err(_) => None,
        };
        Ok(Self {
            object_id,
            property: PropertyRef {
                property_id,
                array_index,
            },
        })
    }
}

/// ReadProperty acknowledgement, carrying the decoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPropertyAck {
    pub object_id: ObjectId,
    pub property: PropertyRef,
    pub value: PropertyValue,
}

impl ReadPropertyAck {
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_context_object_id(buffer, 0, self.object_id)?;
        encode_context_enumerated(buffer, 1, self.property.property_id);
        if let Some(index) = self.property.array_index {
            encode_context_unsigned(buffer, 2, index);
        }
        encode_opening_tag(buffer, 3);
        self.value.encode(buffer)?;
        encode_closing_tag(buffer, 3);
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (object_id, mut pos) = decode_context_object_id(data, 0)?;
        let (property_id, consumed) = decode_context_enumerated(&data[pos..], 1)?;
        pos += consumed;
        let array_index = match decode_context_unsigned(&data[pos..], 2) {
            Ok((index, consumed)) => {
                pos += consumed;
                Some(index)
            }
            Err(_) => None,
        };
        let (inner, _) = take_constructed(&data[pos..], 3)?;
        let (value, _) = decode_value(inner)?;
        Ok(Self {
            object_id,
            property: PropertyRef {
                property_id,
                array_index,
            },
            value,
        })
    }
}

/// WriteProperty confirmed request.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePropertyRequest {
    pub object_id: ObjectId,
    pub property: PropertyRef,
    pub value: PropertyValue,
    /// Command priority 1..=16; omitted for non-commandable properties.
    pub priority: Option<u8>,
}

impl WritePropertyRequest {
    pub fn new(object_id: ObjectId, property_id: u32, value: PropertyValue) -> Self {
        Self {
            object_id,
            property: PropertyRef::new(property_id),
            value,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_context_object_id(buffer, 0, self.object_id)?;
        encode_context_enumerated(buffer, 1, self.property.property_id);
        if let Some(index) = self.property.array_index {
            encode_context_unsigned(buffer, 2, index);
        }
        encode_opening_tag(buffer, 3);
        self.value.encode(buffer)?;
        encode_closing_tag(buffer, 3);
        if let Some(priority) = self.priority {
            encode_context_unsigned(buffer, 4, priority as u32);
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (object_id, mut pos) = decode_context_object_id(data, 0)?;
        let (property_id, consumed) = decode_context_enumerated(&data[pos..], 1)?;
        pos += consumed;
        let array_index = match decode_context_unsigned(&data[pos..], 2) {
            Ok((index, consumed)) => {
                pos += consumed;
                Some(index)
            }
            Err(_) => None,
        };
        let (inner, consumed) = take_constructed(&data[pos..], 3)?;
        let (value, _) = decode_value(inner)?;
        pos += consumed;
        let priority = match decode_context_unsigned(&data[pos..], 4) {
            Ok((priority, _)) => {
                Some(u8::try_from(priority).map_err(|_| EncodingError::ValueOutOfRange)?)
            }
            Err(_) => None,
        };
        Ok(Self {
            object_id,
            property: PropertyRef {
                property_id,
                array_index,
            },
            value,
            priority,
        })
    }
}

/// The error-class / error-code pair carried by an Error PDU.
///
/// Surfaced to callers unchanged when a device rejects a confirmed
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("device returned error class {class} code {code}")]
pub struct ProtocolError {
    pub class: u32,
    pub code: u32,
}

impl ProtocolError {
    /// Encode as two application-tagged enumerateds.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        PropertyValue::Enumerated(self.class).encode(buffer)?;
        PropertyValue::Enumerated(self.code).encode(buffer)?;
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (class, consumed) = match decode_value(data)? {
            (PropertyValue::Enumerated(class), consumed) => (class, consumed),
            _ => return Err(EncodingError::Malformed("expected error class".into())),
        };
        let code = match decode_value(&data[consumed..])? {
            (PropertyValue::Enumerated(code), _) => code,
            _ => return Err(EncodingError::Malformed("expected error code".into())),
        };
        Ok(ProtocolError { class, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{property_id, ObjectType};

    #[test]
    fn whois_range_encodes_context_tags() {
        let mut buffer = Vec::new();
        WhoIs::for_range(100, 200).encode(&mut buffer);
        // Context 0 unsigned 100, context 1 unsigned 200.
        assert_eq!(buffer, [0x09, 100, 0x19, 200]);
        assert_eq!(WhoIs::decode(&buffer).unwrap(), WhoIs::for_range(100, 200));
    }

    #[test]
    fn whois_for_one_device_collapses_the_range() {
        let mut buffer = Vec::new();
        WhoIs::for_device(1234).encode(&mut buffer);
        // Both limits carry the same instance: context 0 and context 1
        // unsigned 1234.
        assert_eq!(buffer, [0x0A, 0x04, 0xD2, 0x1A, 0x04, 0xD2]);
        assert_eq!(WhoIs::decode(&buffer).unwrap(), WhoIs::for_device(1234));

        let query = WhoIs::for_device(1234);
        assert!(query.matches(1234));
        assert!(!query.matches(1233));
        assert!(!query.matches(1235));
    }

    #[test]
    fn open_whois_is_empty() {
        let mut buffer = Vec::new();
        WhoIs::new().encode(&mut buffer);
        assert!(buffer.is_empty());
        assert_eq!(WhoIs::decode(&buffer).unwrap(), WhoIs::new());
    }

    #[test]
    fn lone_low_limit_is_rejected() {
        let mut buffer = Vec::new();
        encode_context_unsigned(&mut buffer, 0, 100);
        assert!(WhoIs::decode(&buffer).is_err());
    }

    #[test]
    fn whois_range_matching() {
        let range = WhoIs::for_range(100, 200);
        assert!(range.matches(100));
        assert!(range.matches(150));
        assert!(range.matches(200));
        assert!(!range.matches(50));
        assert!(!range.matches(201));
        assert!(WhoIs::new().matches(50));
    }

    #[test]
    fn iam_round_trips() {
        let iam = IAm {
            device_id: ObjectId::new(ObjectType::Device, 1234),
            max_apdu: 1476,
            segmentation: Segmentation::Both,
            vendor_id: 260,
        };
        let mut buffer = Vec::new();
        iam.encode(&mut buffer).unwrap();
        assert_eq!(IAm::decode(&buffer).unwrap(), iam);
    }

    #[test]
    fn iam_with_wrong_leading_tag_is_rejected() {
        let mut buffer = Vec::new();
        PropertyValue::Unsigned(12).encode(&mut buffer).unwrap();
        assert!(IAm::decode(&buffer).is_err());
    }

    #[test]
    fn read_property_request_round_trips() {
        let request = ReadPropertyRequest::new(
            ObjectId::new(ObjectType::AnalogInput, 1),
            property_id::PRESENT_VALUE,
        );
        let mut buffer = Vec::new();
        request.encode(&mut buffer).unwrap();
        // Context 0 object id, context 1 property.
        assert_eq!(buffer[0], 0x0C);
        assert_eq!(ReadPropertyRequest::decode(&buffer).unwrap(), request);
    }

    #[test]
    fn array_indexed_requests_round_trip() {
        // Element 3 of the device's object-list array.
        let property = PropertyRef::with_array_index(property_id::OBJECT_LIST, 3);
        let request = ReadPropertyRequest {
            object_id: ObjectId::new(ObjectType::Device, 99),
            property,
        };
        let mut buffer = Vec::new();
        request.encode(&mut buffer).unwrap();
        // Context 2 unsigned 3 follows the property identifier.
        assert_eq!(&buffer[buffer.len() - 2..], [0x29, 0x03]);
        assert_eq!(ReadPropertyRequest::decode(&buffer).unwrap(), request);

        let ack = ReadPropertyAck {
            object_id: request.object_id,
            property,
            value: PropertyValue::ObjectId(ObjectId::new(ObjectType::AnalogInput, 3)),
        };
        buffer.clear();
        ack.encode(&mut buffer).unwrap();
        assert_eq!(ReadPropertyAck::decode(&buffer).unwrap(), ack);

        let write = WritePropertyRequest {
            object_id: ObjectId::new(ObjectType::AnalogValue, 7),
            property: PropertyRef::with_array_index(property_id::PRESENT_VALUE, 1),
            value: PropertyValue::Real(4.0),
            priority: None,
        };
        buffer.clear();
        write.encode(&mut buffer).unwrap();
        assert_eq!(WritePropertyRequest::decode(&buffer).unwrap(), write);
    }

    #[test]
    fn read_property_ack_round_trips() {
        let ack = ReadPropertyAck {
            object_id: ObjectId::new(ObjectType::AnalogInput, 1),
            property: PropertyRef::new(property_id::PRESENT_VALUE),
            value: PropertyValue::Real(23.5),
        };
        let mut buffer = Vec::new();
        ack.encode(&mut buffer).unwrap();
        assert_eq!(ReadPropertyAck::decode(&buffer).unwrap(), ack);
    }

    #[test]
    fn write_property_round_trips_with_priority() {
        let request = WritePropertyRequest::new(
            ObjectId::new(ObjectType::AnalogValue, 7),
            property_id::PRESENT_VALUE,
            PropertyValue::Real(21.0),
        )
        .with_priority(8);
        let mut buffer = Vec::new();
        request.encode(&mut buffer).unwrap();
        assert_eq!(WritePropertyRequest::decode(&buffer).unwrap(), request);
    }

    #[test]
    fn protocol_error_round_trips() {
        let error = ProtocolError { class: 1, code: 31 };
        let mut buffer = Vec::new();
        error.encode(&mut buffer).unwrap();
        assert_eq!(buffer, [0x91, 0x01, 0x91, 0x1F]);
        assert_eq!(ProtocolError::decode(&buffer).unwrap(), error);
    }
}
