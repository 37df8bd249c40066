//! BACnet Object Identifiers and Device Records
//!
//! Objects are the addressable data points inside a BACnet device: every
//! sensor reading, setpoint, or schedule is an object named by an
//! [`ObjectId`], the pair of a 10-bit [`ObjectType`] and a 22-bit instance
//! number. This module defines those identifiers, the segmentation
//! capability advertised by devices, and the [`Device`] record returned by
//! discovery.
//!
//! # Examples
//!
//! ```
//! use bacip::object::{ObjectId, ObjectType};
//!
//! let sensor = ObjectId::new(ObjectType::AnalogInput, 1);
//! let packed = sensor.encode().unwrap();
//! assert_eq!(ObjectId::decode(packed).unwrap(), sensor);
//! ```

use thiserror::Error;

use crate::network::Address;

/// Result type for object operations
pub type Result<T> = core::result::Result<T, ObjectError>;

/// Largest encodable object instance number (22 bits).
pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

/// Number of bits reserved for the instance in a packed object identifier.
pub const INSTANCE_BITS: u32 = 22;

/// Largest encodable object type (10 bits).
pub const MAX_OBJECT_TYPE: u16 = 0x3FF;

/// Errors that can occur when working with object identifiers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    /// Instance number does not fit in 22 bits
    #[error("object instance {0} exceeds 22-bit maximum")]
    InvalidInstance(u32),
    /// Object type does not fit in 10 bits or is not a known type
    #[error("unknown or out-of-range object type {0}")]
    InvalidType(u16),
    /// Segmentation capability outside the enumerated set
    #[error("invalid segmentation support value {0}")]
    InvalidSegmentation(u8),
}

/// BACnet object types (ASHRAE 135 clause 21, `BACnetObjectType`).
///
/// Values 0x80..=0x3FF are reserved for vendor-proprietary types; the
/// client does not originate them and rejects them on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ObjectType {
    AnalogInput = 0x00,
    AnalogOutput = 0x01,
    AnalogValue = 0x02,
    BinaryInput = 0x03,
    BinaryOutput = 0x04,
    BinaryValue = 0x05,
    Calendar = 0x06,
    Command = 0x07,
    Device = 0x08,
    EventEnrollment = 0x09,
    File = 0x0A,
    Group = 0x0B,
    Loop = 0x0C,
    MultiStateInput = 0x0D,
    MultiStateOutput = 0x0E,
    NotificationClass = 0x0F,
    Program = 0x10,
    Schedule = 0x11,
    Averaging = 0x12,
    MultiStateValue = 0x13,
    TrendLog = 0x14,
    LifeSafetyPoint = 0x15,
    LifeSafetyZone = 0x16,
    Accumulator = 0x17,
    PulseConverter = 0x18,
    EventLog = 0x19,
    GlobalGroup = 0x1A,
    TrendLogMultiple = 0x1B,
    LoadControl = 0x1C,
    StructuredView = 0x1D,
    AccessDoor = 0x1E,
    Timer = 0x1F,
    AccessCredential = 0x20,
    AccessPoint = 0x21,
    AccessRights = 0x22,
    AccessUser = 0x23,
    AccessZone = 0x24,
    CredentialDataInput = 0x25,
    NetworkSecurity = 0x26,
    BitstringValue = 0x27,
    CharacterstringValue = 0x28,
    DatePatternValue = 0x29,
    DateValue = 0x2A,
    DatetimePatternValue = 0x2B,
    DatetimeValue = 0x2C,
    IntegerValue = 0x2D,
    LargeAnalogValue = 0x2E,
    OctetstringValue = 0x2F,
    PositiveIntegerValue = 0x30,
    TimePatternValue = 0x31,
    TimeValue = 0x32,
    NotificationForwarder = 0x33,
    AlertEnrollment = 0x34,
    Channel = 0x35,
    LightingOutput = 0x36,
    BinaryLightingOutput = 0x37,
    NetworkPort = 0x38,
}

impl TryFrom<u16> for ObjectType {
    type Error = ObjectError;

    fn try_from(value: u16) -> Result<Self> {
        let object_type = match value {
            0x00 => ObjectType::AnalogInput,
            0x01 => ObjectType::AnalogOutput,
            0x02 => ObjectType::AnalogValue,
            0x03 => ObjectType::BinaryInput,
            0x04 => ObjectType::BinaryOutput,
            0x05 => ObjectType::BinaryValue,
            0x06 => ObjectType::Calendar,
            0x07 => ObjectType::Command,
            0x08 => ObjectType::Device,
            0x09 => ObjectType::EventEnrollment,
            0x0A => ObjectType::File,
            0x0B => ObjectType::Group,
            0x0C => ObjectType::Loop,
            0x0D => ObjectType::MultiStateInput,
            0x0E => ObjectType::MultiStateOutput,
            0x0F => ObjectType::NotificationClass,
            0x10 => ObjectType::Program,
            0x11 => ObjectType::Schedule,
            0x12 => ObjectType::Averaging,
            0x13 => ObjectType::MultiStateValue,
            0x14 => ObjectType::TrendLog,
            0x15 => ObjectType::LifeSafetyPoint,
            0x16 => ObjectType::LifeSafetyZone,
            0x17 => ObjectType::Accumulator,
            0x18 => ObjectType::PulseConverter,
            0x19 => ObjectType::EventLog,
            0x1A => ObjectType::GlobalGroup,
            0x1B => ObjectType::TrendLogMultiple,
            0x1C => ObjectType::LoadControl,
            0x1D => ObjectType::StructuredView,
            0x1E => ObjectType::AccessDoor,
            0x1F => ObjectType::Timer,
            0x20 => ObjectType::AccessCredential,
            0x21 => ObjectType::AccessPoint,
            0x22 => ObjectType::AccessRights,
            0x23 => ObjectType::AccessUser,
            0x24 => ObjectType::AccessZone,
            0x25 => ObjectType::CredentialDataInput,
            0x26 => ObjectType::NetworkSecurity,
            0x27 => ObjectType::BitstringValue,
            0x28 => ObjectType::CharacterstringValue,
            0x29 => ObjectType::DatePatternValue,
            0x2A => ObjectType::DateValue,
            0x2B => ObjectType::DatetimePatternValue,
            0x2C => ObjectType::DatetimeValue,
            0x2D => ObjectType::IntegerValue,
            0x2E => ObjectType::LargeAnalogValue,
            0x2F => ObjectType::OctetstringValue,
            0x30 => ObjectType::PositiveIntegerValue,
            0x31 => ObjectType::TimePatternValue,
            0x32 => ObjectType::TimeValue,
            0x33 => ObjectType::NotificationForwarder,
            0x34 => ObjectType::AlertEnrollment,
            0x35 => ObjectType::Channel,
            0x36 => ObjectType::LightingOutput,
            0x37 => ObjectType::BinaryLightingOutput,
            0x38 => ObjectType::NetworkPort,
            _ => return Err(ObjectError::InvalidType(value)),
        };
        Ok(object_type)
    }
}

/// Object identifier: the type of an object and its instance number.
///
/// Packs into a single 32-bit integer on the wire: type in the high 10
/// bits, instance in the low 22.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectId {
    /// Create a new object identifier.
    ///
    /// The instance bound is enforced by [`ObjectId::encode`], not here, so
    /// an out-of-range identifier can exist in memory but never reaches the
    /// wire.
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    /// Pack into the 32-bit wire form.
    pub fn encode(&self) -> Result<u32> {
        if self.instance > MAX_INSTANCE {
            return Err(ObjectError::InvalidInstance(self.instance));
        }
        Ok(((self.object_type as u32) << INSTANCE_BITS) | self.instance)
    }

    /// Unpack from the 32-bit wire form.
    pub fn decode(value: u32) -> Result<Self> {
        let object_type = ObjectType::try_from((value >> INSTANCE_BITS) as u16)?;
        Ok(Self {
            object_type,
            instance: value & MAX_INSTANCE,
        })
    }
}

/// Segmentation capability advertised in I-Am announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Segmentation {
    Both = 0,
    TransmitOnly = 1,
    ReceiveOnly = 2,
    None = 3,
}

impl TryFrom<u8> for Segmentation {
    type Error = ObjectError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Segmentation::Both),
            1 => Ok(Segmentation::TransmitOnly),
            2 => Ok(Segmentation::ReceiveOnly),
            3 => Ok(Segmentation::None),
            other => Err(ObjectError::InvalidSegmentation(other)),
        }
    }
}

/// Reference to one property of an object, as used by read and write
/// requests. `array_index` selects a single element of an array property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRef {
    pub property_id: u32,
    pub array_index: Option<u32>,
}

impl PropertyRef {
    pub fn new(property_id: u32) -> Self {
        Self {
            property_id,
            array_index: None,
        }
    }

    pub fn with_array_index(property_id: u32, array_index: u32) -> Self {
        Self {
            property_id,
            array_index: Some(array_index),
        }
    }
}

/// Common property identifiers (ASHRAE 135 clause 21,
/// `BACnetPropertyIdentifier`).
pub mod property_id {
    pub const DESCRIPTION: u32 = 28;
    pub const OBJECT_IDENTIFIER: u32 = 75;
    pub const OBJECT_LIST: u32 = 76;
    pub const OBJECT_NAME: u32 = 77;
    pub const OBJECT_TYPE: u32 = 79;
    pub const PRESENT_VALUE: u32 = 85;
    pub const STATUS_FLAGS: u32 = 111;
    pub const UNITS: u32 = 117;
    pub const VENDOR_IDENTIFIER: u32 = 120;
    pub const VENDOR_NAME: u32 = 121;
}

/// A discovered BACnet device.
///
/// A device contains objects; only the device itself has a link-layer
/// [`Address`]. The remaining fields are taken verbatim from the device's
/// I-Am announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Device object identifier (type is always [`ObjectType::Device`])
    pub id: ObjectId,
    /// Largest APDU the device accepts, in bytes
    pub max_apdu: u32,
    /// Segmentation capability
    pub segmentation: Segmentation,
    /// Vendor identifier
    pub vendor_id: u32,
    /// Link-layer address the device answers on
    pub addr: Address,
}
