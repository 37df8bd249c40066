//! # bacip: an asynchronous BACnet/IP client
//!
//! `bacip` speaks the client side of BACnet/IP (ASHRAE 135 Annex J): it
//! discovers devices on the local subnet with Who-Is broadcasts, reads
//! and writes object properties with confirmed requests, and correlates
//! the asynchronous replies back to their callers.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use bacip::{Client, ClientConfig, ReadPropertyRequest, WhoIs};
//! use bacip::object::{property_id, ObjectId, ObjectType};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), bacip::ClientError> {
//! let client = Client::bind(ClientConfig::new("eth0")).await?;
//!
//! let devices = client.who_is(WhoIs::new(), Duration::from_secs(3)).await?;
//! if let Some(device) = devices.first() {
//!     let request = ReadPropertyRequest::new(
//!         ObjectId::new(ObjectType::AnalogInput, 1),
//!         property_id::PRESENT_VALUE,
//!     );
//!     let cancel = CancellationToken::new();
//!     let value = client.read_property(device, request, &cancel).await?;
//!     println!("present value: {value:?}");
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate is layered the way the frames are:
//!
//! - [`object`]: object identifiers, segmentation capability, devices
//! - [`encoding`]: the application-layer tag-length-value codec
//! - [`service`]: Who-Is / I-Am / ReadProperty / WriteProperty payloads
//! - [`app`]: APDU framing with typed payload dispatch
//! - [`network`]: NPDU framing and link-layer addresses
//! - [`datalink`]: the BVLC envelope carried over UDP
//! - [`transaction`]: invocation-id allocation and reply correlation
//! - [`client`]: socket ownership, the reader task, discovery and
//!   confirmed request flows
//!
//! A single background task owns the receive half of the UDP socket.
//! Callers run on their own tasks and wait on per-transaction channels;
//! every wait respects a caller-supplied cancellation token. The client
//! hosts no objects and answers no queries: inbound requests are ignored.

/// APDU framing and typed service payload dispatch
pub mod app;

/// High-level client: socket, reader task, discovery, read/write
pub mod client;

/// BVLC link envelope for BACnet/IP
pub mod datalink;

/// Application-layer tag-length-value codec
pub mod encoding;

/// NPDU framing and link-layer addresses
pub mod network;

/// Object identifiers, devices, and property references
pub mod object;

/// Service payload codecs
pub mod service;

/// Invocation-id registry and transaction handles
pub mod transaction;

pub use client::{Client, ClientConfig, ClientError, Logger, NoopLogger, TracingLogger};
pub use datalink::BACNET_IP_PORT;
pub use encoding::PropertyValue;
pub use network::Address;
pub use object::{Device, ObjectId, ObjectType, Segmentation};
pub use service::{ProtocolError, ReadPropertyRequest, WhoIs, WritePropertyRequest};

/// NPDU protocol version implemented by this crate.
pub const PROTOCOL_VERSION: u8 = network::PROTOCOL_VERSION;

/// Largest application PDU this client negotiates.
pub const MAX_APDU: usize = 1476;
