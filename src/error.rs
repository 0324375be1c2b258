use std::fmt;
use std::io;

use openssl::error::ErrorStack;
use openssl::ssl;
use thiserror::Error;

/// Errors surfaced by the engine and the session adapter.
#[derive(Debug, Error)]
pub enum Error {
    /// Fatal error reported by the TLS library while handshaking, reading,
    /// writing or shutting down.
    #[error("{0}")]
    Ssl(#[from] ssl::Error),

    /// The TLS library rejected the certificate material or session setup.
    #[error("configuration rejected: {0}")]
    Config(#[from] ErrorStack),

    /// Certificate chain material parsed to zero certificates.
    #[error("certificate chain contains no certificate")]
    EmptyCertificateChain,

    /// Transport error passed up through the TLS library.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// The peer closed the TLS stream cleanly.
    #[error("end of stream")]
    Eof,

    /// The transport closed without a graceful TLS close.
    #[error("stream truncated")]
    StreamTruncated,

    /// The operation needs a configured session, but no handshake was started.
    #[error("session is not configured")]
    Unconfigured,

    /// Configuration failed earlier; the engine must be recreated.
    #[error("session is unusable after failed configuration")]
    Unusable,
}

/// Grouping of [`ErrorCode`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Values are OpenSSL error codes.
    Native,
    /// End-of-stream conditions.
    Stream,
    /// Operating system error numbers, -1 when unknown.
    Io,
    /// Misuse of the engine.
    Engine,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Category::Native => "openssl",
            Category::Stream => "stream",
            Category::Io => "io",
            Category::Engine => "engine",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric form of an [`Error`] for hosts that keep (category, value) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    category: Category,
    value: i64,
}

impl ErrorCode {
    pub const EOF: ErrorCode = ErrorCode::new(Category::Stream, 1);
    pub const STREAM_TRUNCATED: ErrorCode = ErrorCode::new(Category::Stream, 2);
    pub const UNCONFIGURED: ErrorCode = ErrorCode::new(Category::Engine, 1);
    pub const UNUSABLE: ErrorCode = ErrorCode::new(Category::Engine, 2);
    pub const EMPTY_CERTIFICATE_CHAIN: ErrorCode = ErrorCode::new(Category::Engine, 3);

    pub const fn new(category: Category, value: i64) -> Self {
        ErrorCode { category, value }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn value(&self) -> i64 {
        self.value
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.value)
    }
}

impl Error {
    /// The (category, value) pair for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Ssl(e) => {
                let packed = e.ssl_error().and_then(first_code);
                let value = packed.unwrap_or_else(|| e.code().as_raw() as i64);
                ErrorCode::new(Category::Native, value)
            }
            Error::Config(stack) => {
                ErrorCode::new(Category::Native, first_code(stack).unwrap_or(0))
            }
            Error::EmptyCertificateChain => ErrorCode::EMPTY_CERTIFICATE_CHAIN,
            Error::Io(e) => ErrorCode::new(Category::Io, e.raw_os_error().unwrap_or(-1) as i64),
            Error::Eof => ErrorCode::EOF,
            Error::StreamTruncated => ErrorCode::STREAM_TRUNCATED,
            Error::Unconfigured => ErrorCode::UNCONFIGURED,
            Error::Unusable => ErrorCode::UNUSABLE,
        }
    }

    /// Whether this is a clean end of stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof)
    }

    /// Format the message into a caller-supplied buffer.
    ///
    /// Native errors use OpenSSL's own error strings, one per queued error,
    /// separated by "; ".
    pub fn write_message<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let stack = match self {
            Error::Ssl(e) => e.ssl_error(),
            Error::Config(stack) => Some(stack),
            _ => None,
        };

        match stack.filter(|s| !s.errors().is_empty()) {
            Some(stack) => {
                for (i, e) in stack.errors().iter().enumerate() {
                    if i > 0 {
                        out.write_str("; ")?;
                    }
                    write!(out, "{}", e)?;
                }
                Ok(())
            }
            None => write!(out, "{}", self),
        }
    }

    /// The message as a freshly allocated string.
    pub fn message(&self) -> String {
        let mut s = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_message(&mut s);
        s
    }
}

fn first_code(stack: &ErrorStack) -> Option<i64> {
    stack.errors().first().map(|e| e.code() as i64)
}
