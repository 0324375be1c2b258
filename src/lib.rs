//! tlspipe is a non-blocking TLS session engine driven entirely through
//! in-memory buffers.
//!
//! OpenSSL expects a socket. Here it gets a [`DuplexChannel`]: two bounded byte
//! buffers, one per direction, that report would-block instead of waiting.
//! The caller moves bytes between the channel and the real transport with
//! [`Session::get_output`] and [`Session::put_input`], and every operation
//! comes back immediately with an [`Outcome`] saying what has to happen
//! before it can make further progress.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tlspipe::{Outcome, Role, SecurityContext, Session, VerifyMode};
//!
//! # fn run(ca_pem: &[u8]) {
//! let context = SecurityContext::builder(Role::Client)
//!     .trusted_cas(ca_pem)
//!     .verify_mode(VerifyMode::PEER)
//!     .build();
//! let mut session = Session::with_context(Arc::new(context));
//! let mut out = vec![0; 16_384];
//!
//! let t = session.handshake(Role::Client);
//! let to_socket = session.get_output(&mut out);
//! // ... write to_socket, and on Outcome::InputNeededRetry feed what the
//! // socket returns through session.put_input() before retrying.
//! # let _ = (t, to_socket, Outcome::Nothing);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

pub mod certificate;

mod channel;
pub use channel::{DuplexChannel, EngineIo, Side, DEFAULT_CAPACITY};

mod config;
pub use config::{Config, ConfigBuilder};

mod context;
pub use context::{
    ContextOptions, Material, Role, SecurityContext, SecurityContextBuilder, VerifyLevel,
    VerifyMode,
};

mod engine;
pub use engine::{EngineState, HandshakeEngine, Step};

mod error;
pub use error::{Category, Error, ErrorCode};

mod session;
pub use session::{Outcome, Session, Transfer};
