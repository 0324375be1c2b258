//! Facade for an asynchronous I/O layer.
//!
//! A [`Session`] wraps a [`HandshakeEngine`] and reports each operation as a
//! [`Transfer`]: what the I/O layer should do next ([`Outcome`]), how many
//! application bytes moved, and the error if the operation failed. Network
//! bytes move separately through [`Session::get_output`] and
//! [`Session::put_input`].
//!
//! A typical handshake loop:
//!
//! ```text
//! loop {
//!     let t = session.handshake(Role::Client);
//!     flush everything from session.get_output() to the socket
//!     match t.outcome {
//!         InputNeededRetry  => read from socket into session.put_input(), retry
//!         OutputNeededRetry => retry
//!         Nothing | OutputAvailable => done, check t.error
//!     }
//! }
//! ```

use std::sync::Arc;

use crate::channel::Side;
use crate::context::{Role, SecurityContext};
use crate::engine::{EngineState, HandshakeEngine, Step};
use crate::{Config, Error};

/// What the I/O layer has to do after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation is finished.
    Nothing,
    /// Feed more network input, then call the operation again.
    InputNeededRetry,
    /// Drain the output, then call the operation again.
    OutputNeededRetry,
    /// Drain the output; the operation is finished.
    OutputAvailable,
}

/// Result of one [`Session`] operation.
#[derive(Debug)]
pub struct Transfer {
    pub outcome: Outcome,
    /// Application bytes read or written. Always 0 for handshake and shutdown.
    pub bytes: usize,
    pub error: Option<Error>,
}

impl Transfer {
    fn new(outcome: Outcome, bytes: usize, error: Option<Error>) -> Self {
        Transfer {
            outcome,
            bytes,
            error,
        }
    }

    /// Whether the operation reported no error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the operation must be called again.
    pub fn needs_retry(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::InputNeededRetry | Outcome::OutputNeededRetry
        )
    }
}

/// TLS session over in-memory buffers.
#[derive(Debug)]
pub struct Session<'a> {
    engine: HandshakeEngine<'a>,
}

impl<'a> Session<'a> {
    pub fn new(context: Arc<SecurityContext<'a>>, config: Arc<Config>) -> Self {
        Session {
            engine: HandshakeEngine::new(context, config),
        }
    }

    /// Session with the default [`Config`].
    pub fn with_context(context: Arc<SecurityContext<'a>>) -> Self {
        Self::new(context, Arc::new(Config::default()))
    }

    pub fn engine(&self) -> &HandshakeEngine<'a> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut HandshakeEngine<'a> {
        &mut self.engine
    }

    /// Step the handshake. The first call configures the session for `role`.
    pub fn handshake(&mut self, role: Role) -> Transfer {
        self.perform(|engine| engine.handshake(role))
    }

    /// Handshake in the context's default role.
    pub fn handshake_default(&mut self) -> Transfer {
        let role = self.engine.context().role();
        self.handshake(role)
    }

    /// Send close_notify.
    pub fn shutdown(&mut self) -> Transfer {
        self.perform(|engine| engine.shutdown())
    }

    /// Encrypt application data.
    pub fn write(&mut self, data: &[u8]) -> Transfer {
        if data.is_empty() {
            return Transfer::new(Outcome::Nothing, 0, None);
        }
        self.perform(|engine| engine.write(data))
    }

    /// Decrypt application data into `data`.
    pub fn read(&mut self, data: &mut [u8]) -> Transfer {
        if data.is_empty() {
            return Transfer::new(Outcome::Nothing, 0, None);
        }
        self.perform(|engine| engine.read(data))
    }

    /// Move pending TLS output into `buf`, returning the filled part.
    pub fn get_output<'b>(&mut self, buf: &'b mut [u8]) -> &'b [u8] {
        let n = match self.engine.channel_mut() {
            Some(channel) => channel.read(Side::Network, buf),
            None => 0,
        };
        &buf[..n]
    }

    /// Offer network input, returning what did not fit.
    pub fn put_input<'b>(&mut self, buf: &'b [u8]) -> &'b [u8] {
        let n = match self.engine.channel_mut() {
            Some(channel) => channel.write(Side::Network, buf),
            None => 0,
        };
        &buf[n..]
    }

    /// TLS output waiting for [`Session::get_output`].
    pub fn pending_output(&self) -> usize {
        self.engine.pending_output()
    }

    /// Decide whether an end of stream was clean.
    ///
    /// Anything but [`Error::Eof`] passes through. An EOF while output is still
    /// undelivered, or one after which the session cannot shut down, becomes
    /// [`Error::StreamTruncated`].
    pub fn map_end_of_stream(&mut self, error: Error) -> Error {
        if !error.is_eof() {
            return error;
        }

        if self.engine.pending_output() > 0 {
            debug!("EOF with {} bytes undelivered", self.engine.pending_output());
            return Error::StreamTruncated;
        }

        match self.engine.shutdown() {
            Step::Failed(e) => {
                debug!("EOF without clean shutdown: {}", e);
                Error::StreamTruncated
            }
            _ => error,
        }
    }

    fn perform<F>(&mut self, op: F) -> Transfer
    where
        F: FnOnce(&mut HandshakeEngine<'a>) -> Step,
    {
        let before = self.engine.pending_output();
        let step = op(&mut self.engine);
        let after = self.engine.pending_output();

        classify(step, self.engine.state(), after > before)
    }
}

/// Map a native step, the engine state after it, and whether it produced
/// output into a [`Transfer`].
fn classify(step: Step, state: EngineState, produced: bool) -> Transfer {
    let bytes = match step {
        Step::Failed(e) => {
            let outcome = if produced {
                Outcome::OutputAvailable
            } else {
                Outcome::Nothing
            };
            return Transfer::new(outcome, 0, Some(e));
        }
        Step::Closed => {
            let outcome = if produced {
                Outcome::OutputAvailable
            } else {
                Outcome::Nothing
            };
            return Transfer::new(outcome, 0, Some(Error::Eof));
        }
        Step::Progress(n) => n,
    };

    if state == EngineState::Writing {
        return Transfer::new(Outcome::OutputNeededRetry, bytes, None);
    }

    if produced {
        let outcome = if bytes > 0 {
            Outcome::OutputAvailable
        } else {
            Outcome::OutputNeededRetry
        };
        return Transfer::new(outcome, bytes, None);
    }

    match state {
        EngineState::Reading => Transfer::new(Outcome::InputNeededRetry, bytes, None),
        EngineState::Closed => Transfer::new(Outcome::Nothing, bytes, Some(Error::Eof)),
        _ => Transfer::new(Outcome::Nothing, bytes, None),
    }
}
