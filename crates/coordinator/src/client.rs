//! Coordinator session flows: server listing and invite resolution.
//!
//! Each flow opens its own short-lived TCP session and is bounded by an
//! overall deadline. The listing flow is best-effort and returns whatever it
//! accumulated when the session degrades; the resolve flow is strict and
//! fails on anything short of a direct or relay answer.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::listing::{decode_listing, decode_newgrf_lookup};
use crate::types::{InviteResolution, NewGrfLookup, ServerRecord};
use crate::wire::{decode_frame, Frame, PacketBuilder, PacketType};

/// Well-known public coordinator endpoint.
pub const DEFAULT_COORDINATOR_ADDR: &str = "coordinator.openttd.org:3976";

/// Version of the coordinator protocol this client speaks.
const COORDINATOR_VERSION: u8 = 6;
/// Newest server-record layout this client can decode.
const GAME_INFO_VERSION: u8 = 7;
/// Release tag reported in listing requests.
const CLIENT_REVISION: &str = "14.1";

/// Overall deadline for one listing session.
const LISTING_DEADLINE: std::time::Duration = std::time::Duration::from_secs(10);
/// Overall deadline for one resolve session.
const RESOLVE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(15);
/// Per-response watchdog during resolve.
const RESPONSE_WATCHDOG: std::time::Duration = std::time::Duration::from_secs(10);

/// Client for the coordinator's directory protocol.
///
/// Cheap to share behind an `Arc`; every flow opens its own session. The
/// NewGRF lookup table is the only state that outlives a session.
pub struct CoordinatorClient {
    addr: String,
    newgrf_lookup: NewGrfLookup,
}

impl CoordinatorClient {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            newgrf_lookup: NewGrfLookup::new(),
        }
    }

    /// Fetch the public server listing.
    ///
    /// Degrades gracefully: after the session is up, a timeout, socket
    /// close, or decode error returns the servers accumulated so far. Only
    /// a connect or handshake failure is an error.
    pub async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        let deadline = Instant::now() + LISTING_DEADLINE;
        let mut session = match timeout_at(deadline, Session::connect(&self.addr)).await {
            Ok(session) => session?,
            Err(_) => return Err(Error::Timeout),
        };

        let request = PacketBuilder::new(PacketType::ClientListing)
            .write_u8(COORDINATOR_VERSION)
            .write_u8(GAME_INFO_VERSION)
            .write_zstring(CLIENT_REVISION)
            .write_u32_le(0)
            .finish()?;
        match timeout_at(deadline, session.send(&request)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout),
        }

        let mut servers = Vec::new();
        loop {
            let frame = match timeout_at(deadline, session.read_frame()).await {
                Err(_) => {
                    debug!("listing deadline hit, returning {} servers", servers.len());
                    break;
                }
                Ok(Err(e)) => {
                    debug!("listing session degraded: {e}");
                    break;
                }
                Ok(Ok(None)) => break,
                Ok(Ok(Some(frame))) => frame,
            };

            match PacketType::from_u8(frame.packet_type) {
                Some(PacketType::GcNewGrfLookup) => {
                    match decode_newgrf_lookup(&frame.payload, &self.newgrf_lookup) {
                        Ok(applied) => debug!("applied {applied} NewGRF lookup entries"),
                        Err(e) => {
                            debug!("malformed NewGRF lookup delta: {e}");
                            break;
                        }
                    }
                }
                Some(PacketType::GcListing) => {
                    let batch = decode_listing(&frame.payload, &self.newgrf_lookup);
                    servers.extend(batch.servers);
                    if batch.end_of_stream {
                        break;
                    }
                }
                Some(PacketType::GcError) => {
                    // The coordinator bailing out ends the stream; keep
                    // whatever it sent before.
                    debug!("coordinator error during listing, keeping partial results");
                    break;
                }
                _ => debug!("ignoring packet type {} during listing", frame.packet_type),
            }
        }

        info!("listing session finished with {} servers", servers.len());
        Ok(servers)
    }

    /// Resolve an invite code into a direct address or a relay ticket.
    pub async fn resolve_invite(&self, code: &str) -> Result<InviteResolution> {
        let code = normalize_invite_code(code);
        match timeout(RESOLVE_DEADLINE, self.resolve_session(&code)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn resolve_session(&self, code: &str) -> Result<InviteResolution> {
        let mut session = Session::connect(&self.addr).await?;
        let request = PacketBuilder::new(PacketType::ClientConnect)
            .write_u8(COORDINATOR_VERSION)
            .write_zstring(code)
            .finish()?;
        session.send(&request).await?;

        loop {
            let frame = timeout(RESPONSE_WATCHDOG, session.read_frame())
                .await
                .map_err(|_| Error::Timeout)??
                .ok_or(Error::ConnectionClosed)?;
            let mut reader = crate::wire::PayloadReader::new(&frame.payload);

            match PacketType::from_u8(frame.packet_type) {
                Some(PacketType::GcError) => {
                    let code = reader.read_u8()?;
                    let detail = reader.read_zstring()?;
                    return Err(Error::Coordinator { code, detail });
                }
                Some(PacketType::GcConnecting) => {
                    let token = reader.read_zstring().unwrap_or_default();
                    debug!("coordinator acknowledged connect, token {token:?}");
                }
                Some(PacketType::GcStunRequest) => {
                    // Nothing for us to do; a relay instruction may follow.
                    debug!("ignoring STUN request");
                }
                Some(PacketType::GcDirectConnect) => {
                    let _token = reader.read_zstring()?;
                    let _tracking = reader.read_u8()?;
                    let hostname = reader.read_zstring()?;
                    let port = reader.read_u16_le()?;
                    return Ok(InviteResolution::Direct { hostname, port });
                }
                Some(PacketType::GcTurnConnect) => {
                    let _token = reader.read_zstring()?;
                    let _tracking = reader.read_u8()?;
                    let ticket = reader.read_zstring()?;
                    let connection_string = reader.read_zstring()?;
                    let (hostname, port) = split_connection_string(&connection_string)?;
                    return Ok(InviteResolution::Relay {
                        hostname,
                        port,
                        ticket,
                    });
                }
                Some(PacketType::GcConnectFailed) => return Err(Error::ConnectFailed),
                _ => debug!("ignoring packet type {} during resolve", frame.packet_type),
            }
        }
    }
}

/// One TCP session to the coordinator with a frame accumulation buffer.
struct Session {
    stream: TcpStream,
    buf: BytesMut,
}

impl Session {
    async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        })
    }

    async fn send(&mut self, packet: &[u8]) -> Result<()> {
        self.stream.write_all(packet).await?;
        Ok(())
    }

    /// Read until one full frame is buffered. `None` on a clean EOF.
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf)? {
                return Ok(Some(frame));
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(Error::TruncatedStream)
                };
            }
        }
    }
}

/// Invite codes conventionally start with `+`; accept them without it.
pub fn normalize_invite_code(code: &str) -> String {
    if code.starts_with('+') {
        code.to_owned()
    } else {
        format!("+{code}")
    }
}

fn split_connection_string(value: &str) -> Result<(String, u16)> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| Error::BadConnectionString(value.to_owned()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::BadConnectionString(value.to_owned()))?;
    if host.is_empty() {
        return Err(Error::BadConnectionString(value.to_owned()));
    }
    Ok((host.to_owned(), port))
}
