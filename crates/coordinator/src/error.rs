//! Coordinator error types.

use thiserror::Error;

/// Coordinator error type.
#[derive(Debug, Error)]
pub enum Error {
    /// TCP-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framed packet announced a size below the 3-byte header.
    #[error("packet size {0} below minimum")]
    FrameTooShort(usize),

    /// Framed packet announced a size above the protocol cap.
    #[error("packet size {0} exceeds limit")]
    FrameTooLarge(usize),

    /// Outgoing payload would not fit in the u16 size prefix.
    #[error("payload of {0} bytes does not fit a packet")]
    PayloadTooLarge(usize),

    /// A field reader ran past the end of the payload.
    #[error("payload truncated: wanted {wanted} bytes, {remaining} left")]
    Truncated { wanted: usize, remaining: usize },

    /// String field had no NUL terminator before end of payload.
    #[error("string field missing NUL terminator")]
    MissingTerminator,

    /// String field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Server record used a NewGRF encoding this client does not know.
    #[error("unknown NewGRF encoding {0}")]
    UnknownNewGrfEncoding(u8),

    /// The coordinator closed the connection before a terminal packet.
    #[error("connection closed by coordinator")]
    ConnectionClosed,

    /// The stream ended in the middle of a framed packet.
    #[error("stream ended mid-packet")]
    TruncatedStream,

    /// Overall deadline or response watchdog elapsed.
    #[error("timed out waiting for coordinator")]
    Timeout,

    /// Explicit error packet from the coordinator.
    #[error("coordinator error {code}: {detail}")]
    Coordinator { code: u8, detail: String },

    /// The coordinator gave up establishing the connection.
    #[error("coordinator could not establish a connection")]
    ConnectFailed,

    /// A `host:port` connection string that does not split cleanly.
    #[error("malformed connection string: {0}")]
    BadConnectionString(String),

    /// Server list refresh failed and no cached listing exists.
    #[error("server list refresh failed: {0}")]
    Refresh(String),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;
