//! BACnet Application-Layer Encoding
//!
//! The application layer carries values in a tag-length-value scheme: each
//! value begins with one or more octets holding a 4-bit tag number, a class
//! bit (application vs context-specific), and a 3-bit length/value field.
//! Tag numbers of 15 and above spill into an extra octet; lengths of 5 and
//! above spill into 1, 2 or 4 extra octets. Constructed context-tagged
//! values are bracketed by opening and closing markers with matching tag
//! numbers.
//!
//! Decoders return `(value, consumed)` so callers can walk a buffer of
//! concatenated values.
//!
//! # Examples
//!
//! ```
//! use bacip::encoding::{PropertyValue, decode_value};
//!
//! let mut buffer = Vec::new();
//! PropertyValue::Real(23.5).encode(&mut buffer).unwrap();
//! let (value, consumed) = decode_value(&buffer).unwrap();
//! assert_eq!(value, PropertyValue::Real(23.5));
//! assert_eq!(consumed, buffer.len());
//! ```

use thiserror::Error;

use crate::object::ObjectId;

/// Result type for encoding operations
pub type Result<T> = core::result::Result<T, EncodingError>;

/// Wildcard octet used in date and time fields.
pub const WILDCARD: u8 = 0xFF;

/// Errors that can occur during encoding/decoding operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// A declared length runs past the end of the buffer
    #[error("encoded value runs past the end of the buffer")]
    Truncated,
    /// Structurally invalid encoding
    #[error("malformed encoding: {0}")]
    Malformed(String),
    /// Application tag outside the supported set
    #[error("unsupported application tag {0}")]
    UnsupportedTag(u8),
    /// An opening tag without a matching closing tag
    #[error("opening tag {0} has no matching closing tag")]
    MismatchedBracket(u8),
    /// Value cannot be represented in its wire form
    #[error("value out of encodable range")]
    ValueOutOfRange,
    /// Invalid object identifier inside a value
    #[error(transparent)]
    Object(#[from] crate::object::ObjectError),
}

/// BACnet application tag numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApplicationTag {
    Null = 0,
    Boolean = 1,
    UnsignedInt = 2,
    SignedInt = 3,
    Real = 4,
    Double = 5,
    OctetString = 6,
    CharacterString = 7,
    BitString = 8,
    Enumerated = 9,
    Date = 10,
    Time = 11,
    ObjectIdentifier = 12,
}

impl TryFrom<u8> for ApplicationTag {
    type Error = EncodingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ApplicationTag::Null),
            1 => Ok(ApplicationTag::Boolean),
            2 => Ok(ApplicationTag::UnsignedInt),
            3 => Ok(ApplicationTag::SignedInt),
            4 => Ok(ApplicationTag::Real),
            5 => Ok(ApplicationTag::Double),
            6 => Ok(ApplicationTag::OctetString),
            7 => Ok(ApplicationTag::CharacterString),
            8 => Ok(ApplicationTag::BitString),
            9 => Ok(ApplicationTag::Enumerated),
            10 => Ok(ApplicationTag::Date),
            11 => Ok(ApplicationTag::Time),
            12 => Ok(ApplicationTag::ObjectIdentifier),
            other => Err(EncodingError::UnsupportedTag(other)),
        }
    }
}

/// What the length/value field of a decoded tag means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Primitive content of the given length follows. For the application
    /// Boolean tag the "length" carries the value itself and no content
    /// octets follow.
    Length(usize),
    /// Opening marker of a constructed context value
    Opening,
    /// Closing marker of a constructed context value
    Closing,
}

/// A decoded tag octet (plus any escape octets)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub number: u8,
    pub context: bool,
    pub kind: TagKind,
}

/// Encode a tag, escaping large tag numbers and lengths as required.
pub fn encode_tag(buffer: &mut Vec<u8>, number: u8, context: bool, kind: TagKind) {
    let class_bit = if context { 0x08 } else { 0x00 };
    let lvt: u8 = match kind {
        TagKind::Opening => 6,
        TagKind::Closing => 7,
        TagKind::Length(len) if len < 5 => len as u8,
        TagKind::Length(_) => 5,
    };

    if number < 15 {
        buffer.push((number << 4) | class_bit | lvt);
    } else {
        buffer.push(0xF0 | class_bit | lvt);
        buffer.push(number);
    }

    if let TagKind::Length(len) = kind {
        if len >= 5 {
            if len < 254 {
                buffer.push(len as u8);
            } else if len < 65536 {
                buffer.push(254);
                buffer.extend_from_slice(&(len as u16).to_be_bytes());
            } else {
                buffer.push(255);
                buffer.extend_from_slice(&(len as u32).to_be_bytes());
            }
        }
    }
}

/// Decode a tag, returning the tag and the number of octets consumed.
pub fn decode_tag(data: &[u8]) -> Result<(Tag, usize)> {
    let first = *data.first().ok_or(EncodingError::Truncated)?;
    let context = (first & 0x08) != 0;
    let lvt = first & 0x07;
    let mut consumed = 1;

    let number = if (first >> 4) == 0x0F {
        let escaped = *data.get(1).ok_or(EncodingError::Truncated)?;
        consumed += 1;
        escaped
    } else {
        first >> 4
    };

    let kind = match lvt {
        6 if context => TagKind::Opening,
        7 if context => TagKind::Closing,
        5 => {
            let len_byte = *data.get(consumed).ok_or(EncodingError::Truncated)?;
            consumed += 1;
            let length = match len_byte {
                254 => {
                    let bytes = data
                        .get(consumed..consumed + 2)
                        .ok_or(EncodingError::Truncated)?;
                    consumed += 2;
                    u16::from_be_bytes([bytes[0], bytes[1]]) as usize
                }
                255 => {
                    let bytes = data
                        .get(consumed..consumed + 4)
                        .ok_or(EncodingError::Truncated)?;
                    consumed += 4;
                    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                }
                short => short as usize,
            };
            TagKind::Length(length)
        }
        short => TagKind::Length(short as usize),
    };

    Ok((
        Tag {
            number,
            context,
            kind,
        },
        consumed,
    ))
}

fn content_at(data: &[u8], offset: usize, length: usize) -> Result<&[u8]> {
    data.get(offset..offset + length)
        .ok_or(EncodingError::Truncated)
}

/// Minimum big-endian representation of an unsigned integer (at least one
/// octet).
fn unsigned_content(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take(3).take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

fn read_unsigned_content(content: &[u8]) -> Result<u32> {
    if content.is_empty() || content.len() > 4 {
        return Err(EncodingError::Malformed(format!(
            "unsigned content of {} octets",
            content.len()
        )));
    }
    let mut value = 0u32;
    for &byte in content {
        value = (value << 8) | byte as u32;
    }
    Ok(value)
}

/// Minimum big-endian representation of a signed integer, preserving the
/// sign bit.
fn signed_content(value: i32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut skip = 0;
    while skip < 3 {
        // An octet is redundant when it is pure sign extension and the next
        // octet carries the same sign bit.
        let redundant = (bytes[skip] == 0x00 && bytes[skip + 1] & 0x80 == 0)
            || (bytes[skip] == 0xFF && bytes[skip + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        skip += 1;
    }
    bytes[skip..].to_vec()
}

fn read_signed_content(content: &[u8]) -> Result<i32> {
    if content.is_empty() || content.len() > 4 {
        return Err(EncodingError::Malformed(format!(
            "signed content of {} octets",
            content.len()
        )));
    }
    let sign_extend = if content[0] & 0x80 != 0 { 0xFFu8 } else { 0x00 };
    let mut bytes = [sign_extend; 4];
    bytes[4 - content.len()..].copy_from_slice(content);
    Ok(i32::from_be_bytes(bytes))
}

/// A date, with [`WILDCARD`] (0xFF) allowed per field. The year is stored
/// as-is; 255 means "any year".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub weekday: u8,
}

/// A time of day, with [`WILDCARD`] (0xFF) allowed per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

/// A decoded application-tagged value.
///
/// This is the closed sum over the primitive kinds the application layer
/// can carry; service codecs place these inside context brackets as
/// needed.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString(Vec<bool>),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectId(ObjectId),
}

impl PropertyValue {
    /// The application tag this value encodes under.
    pub fn tag(&self) -> ApplicationTag {
        match self {
            PropertyValue::Null => ApplicationTag::Null,
            PropertyValue::Boolean(_) => ApplicationTag::Boolean,
            PropertyValue::Unsigned(_) => ApplicationTag::UnsignedInt,
            PropertyValue::Signed(_) => ApplicationTag::SignedInt,
            PropertyValue::Real(_) => ApplicationTag::Real,
            PropertyValue::Double(_) => ApplicationTag::Double,
            PropertyValue::OctetString(_) => ApplicationTag::OctetString,
            PropertyValue::CharacterString(_) => ApplicationTag::CharacterString,
            PropertyValue::BitString(_) => ApplicationTag::BitString,
            PropertyValue::Enumerated(_) => ApplicationTag::Enumerated,
            PropertyValue::Date(_) => ApplicationTag::Date,
            PropertyValue::Time(_) => ApplicationTag::Time,
            PropertyValue::ObjectId(_) => ApplicationTag::ObjectIdentifier,
        }
    }

    /// Encode as an application-tagged value.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let tag = self.tag() as u8;
        match self {
            PropertyValue::Null => {
                encode_tag(buffer, tag, false, TagKind::Length(0));
            }
            PropertyValue::Boolean(value) => {
                // The boolean value lives in the length field.
                encode_tag(buffer, tag, false, TagKind::Length(usize::from(*value)));
            }
            PropertyValue::Unsigned(value) | PropertyValue::Enumerated(value) => {
                let content = unsigned_content(*value);
                encode_tag(buffer, tag, false, TagKind::Length(content.len()));
                buffer.extend_from_slice(&content);
            }
            PropertyValue::Signed(value) => {
                let content = signed_content(*value);
                encode_tag(buffer, tag, false, TagKind::Length(content.len()));
                buffer.extend_from_slice(&content);
            }
            PropertyValue::Real(value) => {
                encode_tag(buffer, tag, false, TagKind::Length(4));
                buffer.extend_from_slice(&value.to_be_bytes());
            }
            PropertyValue::Double(value) => {
                encode_tag(buffer, tag, false, TagKind::Length(8));
                buffer.extend_from_slice(&value.to_be_bytes());
            }
            PropertyValue::OctetString(value) => {
                encode_tag(buffer, tag, false, TagKind::Length(value.len()));
                buffer.extend_from_slice(value);
            }
            PropertyValue::CharacterString(value) => {
                encode_tag(buffer, tag, false, TagKind::Length(value.len() + 1));
                buffer.push(0); // Character set: ANSI X3.4 (UTF-8)
                buffer.extend_from_slice(value.as_bytes());
            }
            PropertyValue::BitString(bits) => {
                let octets = bits.len().div_ceil(8);
                let unused = octets * 8 - bits.len();
                encode_tag(buffer, tag, false, TagKind::Length(octets + 1));
                buffer.push(unused as u8);
                let mut current = 0u8;
                for (i, &bit) in bits.iter().enumerate() {
                    if bit {
                        current |= 1 << (7 - i % 8);
                    }
                    if i % 8 == 7 {
                        buffer.push(current);
                        current = 0;
                    }
                }
                if bits.len() % 8 != 0 {
                    buffer.push(current);
                }
            }
            PropertyValue::Date(date) => {
                let year_octet = if date.year == WILDCARD as u16 {
                    WILDCARD
                } else {
                    u8::try_from(
                        date.year
                            .checked_sub(1900)
                            .ok_or(EncodingError::ValueOutOfRange)?,
                    )
                    .map_err(|_| EncodingError::ValueOutOfRange)?
                };
                encode_tag(buffer, tag, false, TagKind::Length(4));
                buffer.extend_from_slice(&[year_octet, date.month, date.day, date.weekday]);
            }
            PropertyValue::Time(time) => {
                encode_tag(buffer, tag, false, TagKind::Length(4));
                buffer.extend_from_slice(&[time.hour, time.minute, time.second, time.hundredths]);
            }
            PropertyValue::ObjectId(id) => {
                encode_tag(buffer, tag, false, TagKind::Length(4));
                buffer.extend_from_slice(&id.encode()?.to_be_bytes());
            }
        }
        Ok(())
    }
}

/// Decode one application-tagged value, returning it together with the
/// number of octets consumed.
pub fn decode_value(data: &[u8]) -> Result<(PropertyValue, usize)> {
    let (tag, header) = decode_tag(data)?;
    if tag.context {
        return Err(EncodingError::Malformed(
            "expected application-tagged value".into(),
        ));
    }
    let length = match tag.kind {
        TagKind::Length(length) => length,
        TagKind::Opening | TagKind::Closing => {
            return Err(EncodingError::Malformed(
                "unexpected constructed marker".into(),
            ))
        }
    };

    let value = match ApplicationTag::try_from(tag.number)? {
        ApplicationTag::Null => {
            if length != 0 {
                return Err(EncodingError::Malformed("null with content".into()));
            }
            return Ok((PropertyValue::Null, header));
        }
        ApplicationTag::Boolean => {
            let value = match length {
                0 => false,
                1 => true,
                other => {
                    return Err(EncodingError::Malformed(format!(
                        "boolean length/value {other}"
                    )))
                }
            };
            return Ok((PropertyValue::Boolean(value), header));
        }
        ApplicationTag::UnsignedInt => {
            PropertyValue::Unsigned(read_unsigned_content(content_at(data, header, length)?)?)
        }
        ApplicationTag::Enumerated => {
            PropertyValue::Enumerated(read_unsigned_content(content_at(data, header, length)?)?)
        }
        ApplicationTag::SignedInt => {
            PropertyValue::Signed(read_signed_content(content_at(data, header, length)?)?)
        }
        ApplicationTag::Real => {
            if length != 4 {
                return Err(EncodingError::Malformed("real is 4 octets".into()));
            }
            let content = content_at(data, header, 4)?;
            PropertyValue::Real(f32::from_be_bytes([
                content[0], content[1], content[2], content[3],
            ]))
        }
        ApplicationTag::Double => {
            if length != 8 {
                return Err(EncodingError::Malformed("double is 8 octets".into()));
            }
            let content = content_at(data, header, 8)?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(content);
            PropertyValue::Double(f64::from_be_bytes(bytes))
        }
        ApplicationTag::OctetString => {
            PropertyValue::OctetString(content_at(data, header, length)?.to_vec())
        }
        ApplicationTag::CharacterString => {
            let content = content_at(data, header, length)?;
            let (charset, text) = content
                .split_first()
                .ok_or_else(|| EncodingError::Malformed("empty character string".into()))?;
            if *charset != 0 {
                return Err(EncodingError::Malformed(format!(
                    "unsupported character set {charset}"
                )));
            }
            PropertyValue::CharacterString(
                String::from_utf8(text.to_vec())
                    .map_err(|_| EncodingError::Malformed("invalid UTF-8".into()))?,
            )
        }
        ApplicationTag::BitString => {
            let content = content_at(data, header, length)?;
            let (&unused, octets) = content
                .split_first()
                .ok_or_else(|| EncodingError::Malformed("empty bit string".into()))?;
            if unused > 7 || (octets.is_empty() && unused != 0) {
                return Err(EncodingError::Malformed("bad unused-bit count".into()));
            }
            let mut bits = Vec::with_capacity(octets.len() * 8);
            for (i, &octet) in octets.iter().enumerate() {
                let take = if i == octets.len() - 1 {
                    8 - unused as usize
                } else {
                    8
                };
                for bit in 0..take {
                    bits.push(octet & (1 << (7 - bit)) != 0);
                }
            }
            PropertyValue::BitString(bits)
        }
        ApplicationTag::Date => {
            if length != 4 {
                return Err(EncodingError::Malformed("date is 4 octets".into()));
            }
            let content = content_at(data, header, 4)?;
            let year = if content[0] == WILDCARD {
                WILDCARD as u16
            } else {
                1900 + content[0] as u16
            };
            PropertyValue::Date(Date {
                year,
                month: content[1],
                day: content[2],
                weekday: content[3],
            })
        }
        ApplicationTag::Time => {
            if length != 4 {
                return Err(EncodingError::Malformed("time is 4 octets".into()));
            }
            let content = content_at(data, header, 4)?;
            PropertyValue::Time(Time {
                hour: content[0],
                minute: content[1],
                second: content[2],
                hundredths: content[3],
            })
        }
        ApplicationTag::ObjectIdentifier => {
            if length != 4 {
                return Err(EncodingError::Malformed("object identifier is 4 octets".into()));
            }
            let content = content_at(data, header, 4)?;
            PropertyValue::ObjectId(ObjectId::decode(u32::from_be_bytes([
                content[0], content[1], content[2], content[3],
            ]))?)
        }
    };

    Ok((value, header + length))
}

/// Encode a context-tagged unsigned integer.
pub fn encode_context_unsigned(buffer: &mut Vec<u8>, number: u8, value: u32) {
    let content = unsigned_content(value);
    encode_tag(buffer, number, true, TagKind::Length(content.len()));
    buffer.extend_from_slice(&content);
}

/// Decode a context-tagged unsigned integer with the expected tag number.
pub fn decode_context_unsigned(data: &[u8], number: u8) -> Result<(u32, usize)> {
    let (tag, header) = decode_tag(data)?;
    let length = match (tag.context, tag.number, tag.kind) {
        (true, n, TagKind::Length(length)) if n == number => length,
        _ => {
            return Err(EncodingError::Malformed(format!(
                "expected context tag {number}"
            )))
        }
    };
    let value = read_unsigned_content(content_at(data, header, length)?)?;
    Ok((value, header + length))
}

/// Encode a context-tagged enumerated value.
pub fn encode_context_enumerated(buffer: &mut Vec<u8>, number: u8, value: u32) {
    encode_context_unsigned(buffer, number, value);
}

/// Decode a context-tagged enumerated value.
pub fn decode_context_enumerated(data: &[u8], number: u8) -> Result<(u32, usize)> {
    decode_context_unsigned(data, number)
}

/// Encode a context-tagged object identifier.
pub fn encode_context_object_id(buffer: &mut Vec<u8>, number: u8, id: ObjectId) -> Result<()> {
    encode_tag(buffer, number, true, TagKind::Length(4));
    buffer.extend_from_slice(&id.encode()?.to_be_bytes());
    Ok(())
}

/// Decode a context-tagged object identifier.
pub fn decode_context_object_id(data: &[u8], number: u8) -> Result<(ObjectId, usize)> {
    let (tag, header) = decode_tag(data)?;
    match (tag.context, tag.number, tag.kind) {
        (true, n, TagKind::Length(4)) if n == number => {}
        _ => {
            return Err(EncodingError::Malformed(format!(
                "expected context object identifier with tag {number}"
            )))
        }
    }
    let content = content_at(data, header, 4)?;
    let id = ObjectId::decode(u32::from_be_bytes([
        content[0], content[1], content[2], content[3],
    ]))?;
    Ok((id, header + 4))
}

/// Write the opening marker of a constructed context value.
pub fn encode_opening_tag(buffer: &mut Vec<u8>, number: u8) {
    encode_tag(buffer, number, true, TagKind::Opening);
}

/// Write the closing marker of a constructed context value.
pub fn encode_closing_tag(buffer: &mut Vec<u8>, number: u8) {
    encode_tag(buffer, number, true, TagKind::Closing);
}

/// Extract the contents of a constructed context value.
///
/// `data` must begin with the opening tag for `number`. Returns the inner
/// octets (brackets excluded) and the total octets consumed including both
/// markers. Nested constructed values are skipped whole; a missing closing
/// marker fails with [`EncodingError::MismatchedBracket`].
pub fn take_constructed(data: &[u8], number: u8) -> Result<(&[u8], usize)> {
    let (tag, header) = decode_tag(data)?;
    if !tag.context || tag.number != number || tag.kind != TagKind::Opening {
        return Err(EncodingError::Malformed(format!(
            "expected opening tag {number}"
        )));
    }

    let mut pos = header;
    let mut depth = 0usize;
    loop {
        if pos >= data.len() {
            return Err(EncodingError::MismatchedBracket(number));
        }
        let (inner, consumed) = decode_tag(&data[pos..])?;
        match inner.kind {
            TagKind::Opening => {
                depth += 1;
                pos += consumed;
            }
            TagKind::Closing if depth == 0 && inner.number == number => {
                return Ok((&data[header..pos], pos + consumed));
            }
            TagKind::Closing => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(EncodingError::MismatchedBracket(number))?;
                pos += consumed;
            }
            TagKind::Length(len) => {
                // Application Boolean keeps its value in the length field
                // and has no content octets.
                let content = if !inner.context && inner.number == ApplicationTag::Boolean as u8 {
                    0
                } else {
                    len
                };
                if pos + consumed + content > data.len() {
                    return Err(EncodingError::Truncated);
                }
                pos += consumed + content;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;

    #[test]
    fn tag_octet_layout() {
        let mut buffer = Vec::new();
        encode_tag(&mut buffer, 2, false, TagKind::Length(1));
        assert_eq!(buffer, [0x21]);

        buffer.clear();
        encode_tag(&mut buffer, 5, true, TagKind::Length(10));
        assert_eq!(buffer, [0x5D, 0x0A]);

        let (tag, consumed) = decode_tag(&buffer).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(tag.number, 5);
        assert!(tag.context);
        assert_eq!(tag.kind, TagKind::Length(10));
    }

    #[test]
    fn large_tag_number_is_escaped() {
        let mut buffer = Vec::new();
        encode_tag(&mut buffer, 33, true, TagKind::Length(2));
        assert_eq!(buffer, [0xFA, 33]);
        let (tag, consumed) = decode_tag(&buffer).unwrap();
        assert_eq!((tag.number, consumed), (33, 2));
    }

    #[test]
    fn extended_lengths_round_trip() {
        for length in [5usize, 253, 254, 65535, 65536] {
            let mut buffer = Vec::new();
            encode_tag(&mut buffer, 6, false, TagKind::Length(length));
            let (tag, _) = decode_tag(&buffer).unwrap();
            assert_eq!(tag.kind, TagKind::Length(length), "length {length}");
        }
    }

    #[test]
    fn opening_closing_markers() {
        let mut buffer = Vec::new();
        encode_opening_tag(&mut buffer, 3);
        encode_closing_tag(&mut buffer, 3);
        assert_eq!(buffer, [0x3E, 0x3F]);
    }

    #[test]
    fn unsigned_uses_minimum_width() {
        let cases: [(u32, &[u8]); 5] = [
            (0, &[0x21, 0x00]),
            (255, &[0x21, 0xFF]),
            (256, &[0x22, 0x01, 0x00]),
            (65536, &[0x23, 0x01, 0x00, 0x00]),
            (u32::MAX, &[0x24, 0xFF, 0xFF, 0xFF, 0xFF]),
        ];
        for (value, expected) in cases {
            let mut buffer = Vec::new();
            PropertyValue::Unsigned(value).encode(&mut buffer).unwrap();
            assert_eq!(buffer, expected, "value {value}");
            let (decoded, consumed) = decode_value(&buffer).unwrap();
            assert_eq!(decoded, PropertyValue::Unsigned(value));
            assert_eq!(consumed, buffer.len());
        }
    }

    #[test]
    fn signed_preserves_sign_extension() {
        for value in [-8388608, -32769, -129, -128, -1, 0, 1, 127, 128, 8388607] {
            let mut buffer = Vec::new();
            PropertyValue::Signed(value).encode(&mut buffer).unwrap();
            let (decoded, _) = decode_value(&buffer).unwrap();
            assert_eq!(decoded, PropertyValue::Signed(value), "value {value}");
        }
        let mut buffer = Vec::new();
        PropertyValue::Signed(-1).encode(&mut buffer).unwrap();
        assert_eq!(buffer, [0x31, 0xFF]);
    }

    #[test]
    fn real_is_big_endian_single() {
        let mut buffer = Vec::new();
        PropertyValue::Real(23.5).encode(&mut buffer).unwrap();
        assert_eq!(buffer, [0x44, 0x41, 0xBC, 0x00, 0x00]);
    }

    #[test]
    fn values_round_trip() {
        let values = [
            PropertyValue::Null,
            PropertyValue::Boolean(true),
            PropertyValue::Boolean(false),
            PropertyValue::Unsigned(1476),
            PropertyValue::Signed(-273),
            PropertyValue::Real(3.14),
            PropertyValue::Double(-0.25),
            PropertyValue::OctetString(vec![0xDE, 0xAD, 0xBE, 0xEF]),
            PropertyValue::CharacterString("Zone 4 supply temp".into()),
            PropertyValue::BitString(vec![true, false, false, true, true]),
            PropertyValue::Enumerated(64),
            PropertyValue::Date(Date {
                year: 2024,
                month: 3,
                day: 15,
                weekday: 5,
            }),
            PropertyValue::Time(Time {
                hour: 14,
                minute: 30,
                second: 45,
                hundredths: 0,
            }),
            PropertyValue::ObjectId(ObjectId::new(ObjectType::AnalogInput, 42)),
        ];
        for value in values {
            let mut buffer = Vec::new();
            value.encode(&mut buffer).unwrap();
            let (decoded, consumed) = decode_value(&buffer).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buffer.len());
        }
    }

    #[test]
    fn wildcard_date_round_trips() {
        let date = Date {
            year: WILDCARD as u16,
            month: WILDCARD,
            day: WILDCARD,
            weekday: WILDCARD,
        };
        let mut buffer = Vec::new();
        PropertyValue::Date(date).encode(&mut buffer).unwrap();
        assert_eq!(&buffer[1..], [0xFF, 0xFF, 0xFF, 0xFF]);
        let (decoded, _) = decode_value(&buffer).unwrap();
        assert_eq!(decoded, PropertyValue::Date(date));
    }

    #[test]
    fn reserved_tag_is_rejected() {
        // Application tag 13 is reserved.
        let data = [0xD1, 0x00];
        assert_eq!(
            decode_value(&data),
            Err(EncodingError::UnsupportedTag(13))
        );
    }

    #[test]
    fn truncated_content_is_rejected() {
        // Declares 4 content octets, provides 2.
        let data = [0x24, 0x01, 0x02];
        assert_eq!(decode_value(&data), Err(EncodingError::Truncated));
    }

    #[test]
    fn context_scalars_round_trip() {
        let mut buffer = Vec::new();
        encode_context_unsigned(&mut buffer, 0, 100);
        encode_context_unsigned(&mut buffer, 1, 70000);
        let (low, consumed) = decode_context_unsigned(&buffer, 0).unwrap();
        let (high, _) = decode_context_unsigned(&buffer[consumed..], 1).unwrap();
        assert_eq!((low, high), (100, 70000));

        assert!(decode_context_unsigned(&buffer, 2).is_err());
    }

    #[test]
    fn constructed_extraction_matches_brackets() {
        let mut buffer = Vec::new();
        encode_opening_tag(&mut buffer, 3);
        PropertyValue::Real(1.0).encode(&mut buffer).unwrap();
        // A nested constructed value with the same tag number must not
        // terminate the outer one.
        encode_opening_tag(&mut buffer, 3);
        PropertyValue::Boolean(true).encode(&mut buffer).unwrap();
        encode_closing_tag(&mut buffer, 3);
        encode_closing_tag(&mut buffer, 3);

        let (inner, consumed) = take_constructed(&buffer, 3).unwrap();
        assert_eq!(consumed, buffer.len());
        assert_eq!(inner.len(), buffer.len() - 2);
    }

    #[test]
    fn missing_closing_tag_is_reported() {
        let mut buffer = Vec::new();
        encode_opening_tag(&mut buffer, 3);
        PropertyValue::Unsigned(5).encode(&mut buffer).unwrap();
        assert_eq!(
            take_constructed(&buffer, 3),
            Err(EncodingError::MismatchedBracket(3))
        );
    }
}
