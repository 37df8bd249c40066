//! BACnet/IP Client
//!
//! The client binds a UDP socket on a chosen interface, runs one
//! background reader task over the receive half, and exposes the three
//! operations a building-automation front end needs: [`Client::who_is`]
//! discovery, [`Client::read_property`], and [`Client::write_property`].
//!
//! Inbound datagrams are parsed by the reader; replies to confirmed
//! requests are routed to their waiting caller through the transaction
//! registry, unsolicited frames go to the discovery sink when one is
//! installed, and anything malformed is logged and dropped. The reader
//! never blocks on user code.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use bacip::{Client, ClientConfig, WhoIs};
//!
//! # async fn example() -> Result<(), bacip::ClientError> {
//! let client = Client::bind(ClientConfig::new("192.168.1.10/24")).await?;
//! let devices = client.who_is(WhoIs::new(), Duration::from_secs(3)).await?;
//! for device in &devices {
//!     println!("device {} vendor {}", device.id.instance, device.vendor_id);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::{Apdu, ConfirmedRequest, MaxApduSize, MaxSegments, ServiceAck, UnconfirmedRequest};
use crate::datalink::{Bvlc, DataLinkError, BACNET_IP_PORT};
use crate::encoding::PropertyValue;
use crate::network::{Address, NetworkError, Npdu, NpduContent};
use crate::object::Device;
use crate::service::{
    ConfirmedServiceChoice, ProtocolError, ReadPropertyRequest, WhoIs, WritePropertyRequest,
};
use crate::transaction::{Dispatch, TransactionError, Transactions};

/// Result type for client operations
pub type Result<T> = core::result::Result<T, ClientError>;

/// Receive buffer size; comfortably above the largest B/IP frame.
const RECV_BUFFER: usize = 2048;

/// Capacity of the discovery sink channel.
const DISCOVERY_CAPACITY: usize = 64;

/// Errors surfaced at the client boundary
#[derive(Debug, Error)]
pub enum ClientError {
    /// Named interface does not exist
    #[error("interface {0} not found")]
    InterfaceNotFound(String),
    /// Interface exists but carries no IPv4 address
    #[error("no IPv4 address assigned to interface {0}")]
    InterfaceHasNoIpv4(String),
    /// Interface enumeration failed
    #[error("failed to enumerate interfaces: {0}")]
    Interfaces(#[source] io::Error),
    /// UDP socket could not be bound
    #[error("failed to bind UDP socket: {0}")]
    Bind(#[source] io::Error),
    /// Datagram write failed
    #[error("failed to send datagram: {0}")]
    Write(#[source] io::Error),
    /// Client has been shut down
    #[error("client is shut down")]
    SocketClosed,
    /// Unicast NPDU without a destination address
    #[error("unicast NPDU requires a destination address")]
    MissingDestination,
    /// Invocation id allocation or registration failed
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    /// Outbound frame failed to encode
    #[error(transparent)]
    Codec(#[from] DataLinkError),
    /// Destination address could not be resolved
    #[error(transparent)]
    Network(#[from] NetworkError),
    /// The device answered with an Error PDU
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The reply did not match the request classification
    #[error("invalid reply to confirmed request")]
    InvalidReply,
    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,
}

/// Log sink used by the client.
///
/// Passed explicitly at construction; the client holds no process-global
/// logging state. [`TracingLogger`] is the default.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Logger that discards everything.
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn info(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Logger that forwards to the `tracing` macros under the `bacip` target.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(target: "bacip", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "bacip", "{message}");
    }
}

/// Client configuration.
///
/// `interface` selects the bind address: a CIDR string (`"ip/prefix"`) is
/// parsed directly, anything else is looked up as an interface name and
/// its first IPv4 address used. The subnet broadcast address for
/// discovery derives from the netmask either way.
pub struct ClientConfig {
    pub interface: String,
    /// Local UDP port; 0 selects an ephemeral port.
    pub port: u16,
    pub logger: Arc<dyn Logger>,
}

impl ClientConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            port: 0,
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }
}

/// Subnet broadcast address for an interface address and mask.
fn broadcast_addr(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(mask))
}

/// Parse `"ip/prefix"` into the interface address and netmask.
fn parse_cidr(cidr: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let (ip, prefix) = cidr.split_once('/')?;
    let ip: Ipv4Addr = ip.parse().ok()?;
    let prefix: u32 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    Some((ip, Ipv4Addr::from(mask)))
}

/// Resolve the configured interface to (local address, subnet broadcast).
fn resolve_interface(interface: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    if interface.contains('/') {
        let (ip, mask) = parse_cidr(interface)
            .ok_or_else(|| ClientError::InterfaceHasNoIpv4(interface.to_string()))?;
        return Ok((ip, broadcast_addr(ip, mask)));
    }

    let mut found = false;
    for candidate in if_addrs::get_if_addrs().map_err(ClientError::Interfaces)? {
        if candidate.name != interface {
            continue;
        }
        found = true;
        if let if_addrs::IfAddr::V4(v4) = candidate.addr {
            let broadcast = v4
                .broadcast
                .unwrap_or_else(|| broadcast_addr(v4.ip, v4.netmask));
            return Ok((v4.ip, broadcast));
        }
    }
    Err(if found {
        ClientError::InterfaceHasNoIpv4(interface.to_string())
    } else {
        ClientError::InterfaceNotFound(interface.to_string())
    })
}

struct Inner {
    socket: UdpSocket,
    ip: Ipv4Addr,
    port: u16,
    broadcast: Ipv4Addr,
    transactions: Arc<Transactions>,
    subscription: RwLock<Option<mpsc::Sender<(Bvlc, SocketAddr)>>>,
    logger: Arc<dyn Logger>,
    shutdown: CancellationToken,
}

impl Inner {
    fn set_subscription(&self, sink: Option<mpsc::Sender<(Bvlc, SocketAddr)>>) {
        let mut slot = match self.subscription.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = sink;
    }

    fn subscription_sink(&self) -> Option<mpsc::Sender<(Bvlc, SocketAddr)>> {
        match self.subscription.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Handle one inbound datagram. Synchronous and non-blocking so the
    /// reader can call it inline.
    fn handle_datagram(&self, datagram: &[u8], src: SocketAddr) {
        let frame = match Bvlc::decode(datagram) {
            Ok(frame) => frame,
            Err(err) => {
                self.logger
                    .error(&format!("dropping datagram from {src}: {err}"));
                return;
            }
        };

        // Discovery sees every frame; a full sink loses the frame rather
        // than stalling the reader.
        if let Some(sink) = self.subscription_sink() {
            let _ = sink.try_send((frame.clone(), src));
        }

        let apdu = match frame.npdu.apdu() {
            Some(apdu) => apdu,
            None => {
                if let NpduContent::Network { message_type, .. } = &frame.npdu.content {
                    self.logger.info(&format!(
                        "ignoring network-layer message {message_type:#04x} from {src}"
                    ));
                }
                return;
            }
        };

        if !apdu.is_reply() {
            // Inbound requests are not served by a client-only endpoint.
            return;
        }
        let invoke_id = match apdu.invoke_id() {
            Some(id) => id,
            None => return,
        };
        match self.transactions.dispatch(invoke_id, apdu.clone()) {
            Dispatch::Delivered => {}
            Dispatch::NoTransaction => self
                .logger
                .error(&format!("no transaction found for invocation id {invoke_id}")),
            Dispatch::Cancelled => self.logger.info(&format!(
                "dropping reply for cancelled invocation id {invoke_id}"
            )),
            Dispatch::Dropped => self.logger.error(&format!(
                "reply sink full, dropping reply for invocation id {invoke_id}"
            )),
        }
    }
}

async fn reader_loop(inner: Arc<Inner>) {
    let mut buffer = vec![0u8; RECV_BUFFER];
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            received = inner.socket.recv_from(&mut buffer) => match received {
                Ok((len, src)) => {
                    let datagram = &buffer[..len];
                    // A panicking logger must not tear down the reader.
                    if catch_unwind(AssertUnwindSafe(|| inner.handle_datagram(datagram, src)))
                        .is_err()
                    {
                        tracing::error!(target: "bacip", %src, "panic while handling datagram");
                    }
                }
                Err(err) => {
                    if inner.shutdown.is_cancelled() {
                        break;
                    }
                    inner.logger.error(&format!("udp receive: {err}"));
                }
            }
        }
    }
}

/// Asynchronous BACnet/IP client.
pub struct Client {
    inner: Arc<Inner>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Bind the client on the configured interface and port and start the
    /// background reader.
    pub async fn bind(config: ClientConfig) -> Result<Self> {
        let (ip, broadcast) = resolve_interface(&config.interface)?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port))
            .await
            .map_err(ClientError::Bind)?;
        socket.set_broadcast(true).map_err(ClientError::Bind)?;
        let port = socket.local_addr().map_err(ClientError::Bind)?.port();

        let inner = Arc::new(Inner {
            socket,
            ip,
            port,
            broadcast,
            transactions: Arc::new(Transactions::new()),
            subscription: RwLock::new(None),
            logger: config.logger,
            shutdown: CancellationToken::new(),
        });
        let reader = tokio::spawn(reader_loop(Arc::clone(&inner)));
        Ok(Self {
            inner,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// The bound local endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((self.inner.ip, self.inner.port))
    }

    /// The derived subnet broadcast address.
    pub fn broadcast_address(&self) -> Ipv4Addr {
        self.inner.broadcast
    }

    /// Broadcast a Who-Is query and collect I-Am announcements until the
    /// timeout elapses.
    ///
    /// Results are deduplicated on the full announcement record. When the
    /// query carries an instance range, announcements outside it are
    /// dropped: answers arrive by broadcast and may belong to another
    /// caller's query. Discovery does not fail on a quiet network; it
    /// returns whatever it collected.
    pub async fn who_is(&self, request: WhoIs, timeout: Duration) -> Result<Vec<Device>> {
        let (sink, mut frames) = mpsc::channel(DISCOVERY_CAPACITY);
        self.inner.set_subscription(Some(sink));

        let npdu = Npdu::local(Apdu::UnconfirmedRequest {
            request: UnconfirmedRequest::WhoIs(request),
        });
        if let Err(err) = self.send_broadcast(npdu).await {
            self.inner.set_subscription(None);
            return Err(err);
        }

        let mut found: HashMap<crate::service::IAm, Address> = HashMap::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = self.inner.shutdown.cancelled() => break,
                received = frames.recv() => {
                    let Some((frame, src)) = received else { break };
                    let Some(Apdu::UnconfirmedRequest {
                        request: UnconfirmedRequest::IAm(iam),
                    }) = frame.npdu.apdu() else {
                        continue;
                    };
                    if !request.matches(iam.device_id.instance) {
                        continue;
                    }
                    // Behind a router the UDP sender is the forwarder, not
                    // the device; a source specifier is authoritative.
                    let addr = frame
                        .npdu
                        .source
                        .clone()
                        .or_else(|| frame.origin.map(|origin| Address::from_udp(origin.into())))
                        .unwrap_or_else(|| Address::from_udp(src));
                    found.insert(*iam, addr);
                }
            }
        }
        self.inner.set_subscription(None);

        Ok(found
            .into_iter()
            .map(|(iam, addr)| Device {
                id: iam.device_id,
                max_apdu: iam.max_apdu,
                segmentation: iam.segmentation,
                vendor_id: iam.vendor_id,
                addr,
            })
            .collect())
    }

    /// Read one property from a device.
    ///
    /// Resolves to the decoded value from a matching ComplexAck, to
    /// [`ClientError::Protocol`] when the device answers with an Error
    /// PDU, and to [`ClientError::Cancelled`] when `cancel` fires first.
    pub async fn read_property(
        &self,
        device: &Device,
        request: ReadPropertyRequest,
        cancel: &CancellationToken,
    ) -> Result<PropertyValue> {
        let reply = self
            .confirmed_request(device, ConfirmedRequest::ReadProperty(request), cancel)
            .await?;
        match reply {
            Apdu::Error { error, .. } => Err(ClientError::Protocol(error)),
            Apdu::ComplexAck {
                ack: ServiceAck::ReadProperty(ack),
                ..
            } => Ok(ack.value),
            _ => Err(ClientError::InvalidReply),
        }
    }

    /// Write one property of a device. Resolves on the device's
    /// SimpleAck.
    pub async fn write_property(
        &self,
        device: &Device,
        request: WritePropertyRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let reply = self
            .confirmed_request(device, ConfirmedRequest::WriteProperty(request), cancel)
            .await?;
        match reply {
            Apdu::Error { error, .. } => Err(ClientError::Protocol(error)),
            Apdu::SimpleAck {
                service_choice: ConfirmedServiceChoice::WriteProperty,
                ..
            } => Ok(()),
            _ => Err(ClientError::InvalidReply),
        }
    }

    /// Issue one confirmed request and await its classified reply.
    ///
    /// The transaction handle owns the invocation id; every exit path
    /// (reply, cancellation, send failure, shutdown) releases it.
    async fn confirmed_request(
        &self,
        device: &Device,
        request: ConfirmedRequest,
        cancel: &CancellationToken,
    ) -> Result<Apdu> {
        let mut transaction = self.inner.transactions.open(cancel.clone())?;
        let apdu = Apdu::ConfirmedRequest {
            segmented_response_accepted: false,
            max_segments: MaxSegments::Unspecified,
            max_apdu: MaxApduSize::Up1476,
            invoke_id: transaction.id(),
            request,
        };
        let npdu = Npdu::confirmed(
            device.addr.clone(),
            Address::from_udp(self.local_addr()),
            apdu,
        );
        self.send_unicast(npdu).await?;

        tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            _ = self.inner.shutdown.cancelled() => Err(ClientError::SocketClosed),
            reply = transaction.recv() => reply.ok_or(ClientError::SocketClosed),
        }
    }

    /// Serialize an NPDU into an Original-Unicast frame and send it to
    /// the NPDU's destination address.
    pub async fn send_unicast(&self, npdu: Npdu) -> Result<()> {
        let destination = npdu
            .destination
            .as_ref()
            .ok_or(ClientError::MissingDestination)?;
        if destination.mac.is_empty() && destination.adr.is_empty() {
            return Err(ClientError::MissingDestination);
        }
        let target = destination.to_udp()?;
        let bytes = Bvlc::unicast(npdu).encode()?;
        self.send_raw(&bytes, target).await
    }

    /// Serialize an NPDU into an Original-Broadcast frame and send it to
    /// the subnet broadcast address on the standard port.
    pub async fn send_broadcast(&self, npdu: Npdu) -> Result<()> {
        let bytes = Bvlc::broadcast(npdu).encode()?;
        let target = SocketAddr::from((self.inner.broadcast, BACNET_IP_PORT));
        self.send_raw(&bytes, target).await
    }

    async fn send_raw(&self, bytes: &[u8], target: SocketAddr) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ClientError::SocketClosed);
        }
        self.inner
            .socket
            .send_to(bytes, target)
            .await
            .map_err(ClientError::Write)?;
        Ok(())
    }

    /// Shut the client down: stop the reader, fail in-flight waits with
    /// [`ClientError::SocketClosed`], and wait for the reader to exit.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let reader = {
            let mut slot = match self.reader.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        if let Some(reader) = reader {
            let _ = reader.await;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_addr_fills_host_bits() {
        assert_eq!(
            broadcast_addr("192.168.1.100".parse().unwrap(), "255.255.255.0".parse().unwrap()),
            "192.168.1.255".parse::<Ipv4Addr>().unwrap()
        );
        assert_eq!(
            broadcast_addr("10.20.0.5".parse().unwrap(), "255.255.0.0".parse().unwrap()),
            "10.20.255.255".parse::<Ipv4Addr>().unwrap()
        );
    }

    #[test]
    fn cidr_parsing() {
        let (ip, mask) = parse_cidr("192.168.1.10/24").unwrap();
        assert_eq!(ip, "192.168.1.10".parse::<Ipv4Addr>().unwrap());
        assert_eq!(mask, "255.255.255.0".parse::<Ipv4Addr>().unwrap());

        assert!(parse_cidr("192.168.1.10").is_none());
        assert!(parse_cidr("192.168.1.10/33").is_none());
        assert!(parse_cidr("not-an-ip/24").is_none());
    }

    #[test]
    fn cidr_interface_resolution() {
        let (ip, broadcast) = resolve_interface("172.16.4.2/12").unwrap();
        assert_eq!(ip, "172.16.4.2".parse::<Ipv4Addr>().unwrap());
        assert_eq!(broadcast, "172.31.255.255".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn unknown_interface_is_an_error() {
        match resolve_interface("definitely-not-a-real-interface0") {
            Err(ClientError::InterfaceNotFound(name)) => {
                assert_eq!(name, "definitely-not-a-real-interface0");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
