// Engine lifecycle:
//
// 1. Created with a context and config, holding an unconfigured channel pair.
// 2. First connect()/accept() parses the context material, builds the OpenSSL
//    session and wraps the channel's engine side in an SslStream.
// 3. Each call steps OpenSSL until it completes or stalls on the channel. A
//    stall becomes the Reading or Writing state, anything else is fatal.
// 4. shutdown() queues close_notify and leaves the engine Closed.
//
// A failed configuration is final; the engine has to be recreated.

use std::fmt;
use std::mem;
use std::sync::Arc;

use openssl::pkey::{PKey, Private};
use openssl::ssl::{
    self, ErrorCode, Ssl, SslContextBuilder, SslMethod, SslMode, SslStream, SslVerifyMode,
};
use openssl::x509::{X509VerifyResult, X509};

use crate::channel::{DuplexChannel, EngineIo, Side};
use crate::context::{Role, SecurityContext, VerifyLevel, VerifyMode};
use crate::{Config, Error};

/// Where the engine stands after its last call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Last call completed.
    Idle,
    /// Last call stalled waiting for input from the peer.
    Reading,
    /// Last call stalled on a full output channel, or wrote only part of the
    /// request.
    Writing,
    /// Shutdown was requested.
    Closed,
}

/// Result of one call into the TLS session.
#[derive(Debug)]
pub enum Step {
    /// The call returned normally, possibly stalled (see [`EngineState`]).
    /// Carries the number of application bytes moved.
    Progress(usize),
    /// The peer closed the TLS stream with close_notify.
    Closed,
    /// Fatal error.
    Failed(Error),
}

enum Native {
    Unconfigured(EngineIo),
    Rejected(EngineIo),
    Ready(SslStream<EngineIo>),
    // SslStream construction consumed the channel and failed.
    Lost,
}

/// One TLS connection driven over an in-memory channel.
pub struct HandshakeEngine<'a> {
    context: Arc<SecurityContext<'a>>,
    config: Arc<Config>,
    native: Native,
    state: EngineState,
    verify_mode: VerifyMode,
    hostname: Option<String>,
    handshake_complete: bool,
}

impl<'a> HandshakeEngine<'a> {
    /// Unconfigured engine with a fresh channel sized by `config`.
    pub fn new(context: Arc<SecurityContext<'a>>, config: Arc<Config>) -> Self {
        let channel = DuplexChannel::new(config.channel_capacity());
        HandshakeEngine {
            verify_mode: context.verify_mode(),
            context,
            config,
            native: Native::Unconfigured(EngineIo::new(channel)),
            state: EngineState::Idle,
            hostname: None,
            handshake_complete: false,
        }
    }

    /// The context this engine was created from.
    pub fn context(&self) -> &SecurityContext<'a> {
        &self.context
    }

    /// State left by the last call.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Whether the first handshake call has happened, successful or not.
    pub fn is_configured(&self) -> bool {
        !matches!(self.native, Native::Unconfigured(_))
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    /// Override the context's verify mode for this engine.
    ///
    /// Takes effect at configuration, so it must be called before the first
    /// handshake.
    pub fn set_verify_mode(&mut self, mode: VerifyMode) {
        if self.is_configured() {
            warn!("Verify mode set after configuration is ignored");
        }
        self.verify_mode = mode;
    }

    /// Server name for a client engine.
    ///
    /// Sent as SNI, and checked against the server certificate when the
    /// verify mode asks for verification. Must be called before the first
    /// handshake.
    pub fn set_hostname(&mut self, hostname: impl Into<String>) {
        if self.is_configured() {
            warn!("Hostname set after configuration is ignored");
        }
        self.hostname = Some(hostname.into());
    }

    /// Client side handshake.
    pub fn connect(&mut self) -> Step {
        self.handshake(Role::Client)
    }

    /// Server side handshake.
    pub fn accept(&mut self) -> Step {
        self.handshake(Role::Server)
    }

    /// Configure on first use, then step the handshake as far as the channel
    /// allows.
    ///
    /// Once configured, the role of the first call sticks.
    pub fn handshake(&mut self, role: Role) -> Step {
        if let Err(e) = self.ensure_configured(role) {
            return Step::Failed(e);
        }

        let stream = match self.stream_mut() {
            Ok(v) => v,
            Err(e) => return Step::Failed(e),
        };

        match stream.do_handshake() {
            Ok(()) => {
                if !self.handshake_complete {
                    self.handshake_complete = true;
                    debug!(
                        "Handshake complete: {} {}",
                        self.protocol_version().unwrap_or("?"),
                        self.cipher_name().unwrap_or("?")
                    );
                }
                self.state = EngineState::Idle;
                Step::Progress(0)
            }
            Err(e) => self.stalled_or_failed(e),
        }
    }

    /// Read decrypted application data.
    ///
    /// Delivers what is available, up to `buf.len()`. Anything short of the
    /// full length leaves the engine Reading, so the caller feeds more input
    /// before asking for the rest.
    pub fn read(&mut self, buf: &mut [u8]) -> Step {
        if buf.is_empty() {
            self.state = EngineState::Idle;
            return Step::Progress(0);
        }

        let stream = match self.stream_mut() {
            Ok(v) => v,
            Err(e) => return Step::Failed(e),
        };

        match stream.ssl_read(buf) {
            Ok(n) => {
                self.state = if n == buf.len() {
                    EngineState::Idle
                } else {
                    trace!("Short read {}/{}", n, buf.len());
                    EngineState::Reading
                };
                Step::Progress(n)
            }
            Err(e) => self.stalled_or_failed(e),
        }
    }

    /// Encrypt and queue application data.
    ///
    /// When only part of `buf` went through, the state is Writing and the
    /// rest must be offered again once output was drained.
    pub fn write(&mut self, buf: &[u8]) -> Step {
        if buf.is_empty() {
            self.state = EngineState::Idle;
            return Step::Progress(0);
        }

        let stream = match self.stream_mut() {
            Ok(v) => v,
            Err(e) => return Step::Failed(e),
        };

        match stream.ssl_write(buf) {
            Ok(n) => {
                self.state = if n == buf.len() {
                    EngineState::Idle
                } else {
                    trace!("Partial write {}/{}", n, buf.len());
                    EngineState::Writing
                };
                Step::Progress(n)
            }
            Err(e) => self.stalled_or_failed(e),
        }
    }

    /// Queue a close_notify for the peer.
    ///
    /// The engine is Closed afterwards whatever the outcome.
    pub fn shutdown(&mut self) -> Step {
        let step = match self.stream_mut() {
            Ok(stream) => match stream.shutdown() {
                Ok(r) => {
                    debug!("Shutdown: {:?}", r);
                    Step::Progress(0)
                }
                Err(e) => {
                    let code = e.code();
                    if code == ErrorCode::WANT_READ
                        || code == ErrorCode::WANT_WRITE
                        || code == ErrorCode::ZERO_RETURN
                    {
                        Step::Progress(0)
                    } else {
                        debug!("Shutdown failed: {}", e);
                        Step::Failed(failure(e))
                    }
                }
            },
            Err(e) => Step::Failed(e),
        };

        self.state = EngineState::Closed;
        step
    }

    /// Bytes produced by the TLS session that the network side has not
    /// drained yet.
    pub fn pending_output(&self) -> usize {
        self.channel().map(|c| c.pending(Side::Engine)).unwrap_or(0)
    }

    /// The channel pair, unless it was lost in a failed configuration.
    pub fn channel(&self) -> Option<&DuplexChannel> {
        match &self.native {
            Native::Unconfigured(io) | Native::Rejected(io) => Some(io.channel()),
            Native::Ready(stream) => Some(stream.get_ref().channel()),
            Native::Lost => None,
        }
    }

    /// Mutable access to the channel pair.
    pub fn channel_mut(&mut self) -> Option<&mut DuplexChannel> {
        match &mut self.native {
            Native::Unconfigured(io) | Native::Rejected(io) => Some(io.channel_mut()),
            Native::Ready(stream) => Some(stream.get_mut().channel_mut()),
            Native::Lost => None,
        }
    }

    /// DER encoded certificate presented by the peer.
    pub fn peer_certificate(&self) -> Option<Vec<u8>> {
        let ssl = self.ssl()?;
        ssl.peer_certificate()?.to_der().ok()
    }

    /// Whether the peer certificate passed chain verification.
    ///
    /// With an optional verify level the handshake goes ahead regardless, and
    /// this tells the outcome.
    pub fn peer_verified(&self) -> bool {
        match self.ssl() {
            Some(ssl) => {
                ssl.peer_certificate().is_some() && ssl.verify_result() == X509VerifyResult::OK
            }
            None => false,
        }
    }

    /// Negotiated protocol version, such as "TLSv1.3".
    pub fn protocol_version(&self) -> Option<&'static str> {
        self.ssl().map(|ssl| ssl.version_str())
    }

    /// Negotiated cipher suite name.
    pub fn cipher_name(&self) -> Option<&'static str> {
        self.ssl()?.current_cipher().map(|c| c.name())
    }

    fn ssl(&self) -> Option<&ssl::SslRef> {
        match &self.native {
            Native::Ready(stream) => Some(stream.ssl()),
            _ => None,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut SslStream<EngineIo>, Error> {
        match &mut self.native {
            Native::Ready(stream) => Ok(stream),
            Native::Unconfigured(_) => Err(Error::Unconfigured),
            Native::Rejected(_) | Native::Lost => Err(Error::Unusable),
        }
    }

    fn stalled_or_failed(&mut self, e: ssl::Error) -> Step {
        let code = e.code();
        if code == ErrorCode::WANT_READ {
            self.state = EngineState::Reading;
            Step::Progress(0)
        } else if code == ErrorCode::WANT_WRITE {
            self.state = EngineState::Writing;
            Step::Progress(0)
        } else if code == ErrorCode::ZERO_RETURN {
            debug!("Peer sent close_notify");
            Step::Closed
        } else {
            debug!("TLS failure: {}", e);
            Step::Failed(failure(e))
        }
    }

    fn ensure_configured(&mut self, role: Role) -> Result<(), Error> {
        match self.native {
            Native::Ready(_) => return Ok(()),
            Native::Rejected(_) | Native::Lost => return Err(Error::Unusable),
            Native::Unconfigured(_) => {}
        }

        let ssl = match self.build_session(role) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to configure {:?} session: {}", role, e);
                if let Native::Unconfigured(io) = mem::replace(&mut self.native, Native::Lost) {
                    self.native = Native::Rejected(io);
                }
                return Err(e);
            }
        };

        let io = match mem::replace(&mut self.native, Native::Lost) {
            Native::Unconfigured(io) => io,
            _ => return Err(Error::Unusable),
        };

        let stream = SslStream::new(ssl, io)?;
        self.native = Native::Ready(stream);
        Ok(())
    }

    fn build_session(&self, role: Role) -> Result<Ssl, Error> {
        let context = &self.context;

        let mut builder = SslContextBuilder::new(SslMethod::tls())?;
        builder.set_options(context.options().to_native());
        builder.set_mode(SslMode::ENABLE_PARTIAL_WRITE | SslMode::ACCEPT_MOVING_WRITE_BUFFER);

        if let Some(list) = self.config.cipher_list() {
            builder.set_cipher_list(list)?;
        }

        let chain = context.certificate_chain();
        let key = context.private_key();
        if !chain.is_empty() && !key.is_empty() {
            let mut certs = parse_certificates(chain)?.into_iter();
            let leaf = certs.next().ok_or(Error::EmptyCertificateChain)?;
            builder.set_certificate(&leaf)?;
            for cert in certs {
                builder.add_extra_chain_cert(cert)?;
            }
            let pkey = parse_private_key(key)?;
            builder.set_private_key(&pkey)?;
            builder.check_private_key()?;
            debug!("Installed local certificate chain");
        } else {
            debug!("No local certificate");
        }

        let cas = context.trusted_cas();
        if !cas.is_empty() {
            let store = builder.cert_store_mut();
            for ca in parse_certificates(cas)? {
                store.add_cert(ca)?;
            }
        }

        let ssl_context = builder.build();
        let mut ssl = Ssl::new(&ssl_context)?;

        let level = self.verify_mode.level(role);
        match level {
            VerifyLevel::None => ssl.set_verify(SslVerifyMode::NONE),
            VerifyLevel::Optional => ssl.set_verify_callback(SslVerifyMode::PEER, |ok, ctx| {
                if !ok {
                    debug!("Accepting unverified peer certificate: {}", ctx.error());
                }
                true
            }),
            VerifyLevel::Required => {
                ssl.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT)
            }
        }

        if role == Role::Client {
            if let Some(hostname) = &self.hostname {
                ssl.set_hostname(hostname)?;
                if level != VerifyLevel::None {
                    ssl.param_mut().set_host(hostname)?;
                }
            }
        }

        match role {
            Role::Client => ssl.set_connect_state(),
            Role::Server => ssl.set_accept_state(),
        }

        debug!("Configured {:?} session, verify {:?}", role, level);
        Ok(ssl)
    }
}

impl fmt::Debug for HandshakeEngine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeEngine")
            .field("state", &self.state)
            .field("configured", &self.is_configured())
            .field("handshake_complete", &self.handshake_complete)
            .field("verify_mode", &self.verify_mode)
            .field("channel", &self.channel())
            .finish()
    }
}

fn failure(e: ssl::Error) -> Error {
    // SYSCALL failures carry the transport error, everything else an
    // OpenSSL error stack.
    match e.into_io_error() {
        Ok(io) => Error::Io(io),
        Err(e) => Error::Ssl(e),
    }
}

fn is_pem(data: &[u8]) -> bool {
    data.windows(10).any(|w| w == b"-----BEGIN")
}

fn parse_certificates(data: &[u8]) -> Result<Vec<X509>, Error> {
    if is_pem(data) {
        Ok(X509::stack_from_pem(data)?)
    } else {
        Ok(vec![X509::from_der(data)?])
    }
}

fn parse_private_key(data: &[u8]) -> Result<PKey<Private>, Error> {
    if is_pem(data) {
        Ok(PKey::private_key_from_pem(data)?)
    } else {
        Ok(PKey::private_key_from_der(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::generate_self_signed_certificate;

    fn engine<'a>(context: SecurityContext<'a>) -> HandshakeEngine<'a> {
        HandshakeEngine::new(Arc::new(context), Arc::new(Config::default()))
    }

    #[test]
    fn connect_without_material() {
        let mut client = engine(SecurityContext::builder(Role::Client).build());
        assert!(!client.is_configured());

        let step = client.connect();
        assert!(matches!(step, Step::Progress(0)), "{:?}", step);
        assert!(client.is_configured());
        assert_eq!(client.state(), EngineState::Reading);

        // ClientHello is waiting in the channel.
        let hello = client.pending_output();
        assert!(hello > 0);

        // No input arrived, so a second step changes nothing.
        let step = client.connect();
        assert!(matches!(step, Step::Progress(0)), "{:?}", step);
        assert_eq!(client.state(), EngineState::Reading);
        assert_eq!(client.pending_output(), hello);
    }

    #[test]
    fn accept_with_der_material() {
        let cert = generate_self_signed_certificate(&["localhost"]).unwrap();
        let mut server = engine(
            SecurityContext::builder(Role::Server)
                .certificate_chain(&cert.certificate_der[..])
                .private_key(&cert.private_key_der[..])
                .build(),
        );

        let step = server.accept();
        assert!(matches!(step, Step::Progress(0)), "{:?}", step);
        assert_eq!(server.state(), EngineState::Reading);
        assert_eq!(server.pending_output(), 0);
    }

    #[test]
    fn chain_without_key_is_not_parsed() {
        let mut client = engine(
            SecurityContext::builder(Role::Client)
                .certificate_chain(&b"definitely not a certificate"[..])
                .build(),
        );

        let step = client.connect();
        assert!(matches!(step, Step::Progress(0)), "{:?}", step);
        assert!(client.pending_output() > 0);
    }

    #[test]
    fn bad_material_fails_once_and_for_all() {
        let mut server = engine(
            SecurityContext::builder(Role::Server)
                .certificate_chain(&b"-----BEGIN CERTIFICATE-----\ngarbage\n"[..])
                .private_key(&b"garbage"[..])
                .build(),
        );

        let step = server.accept();
        assert!(
            matches!(
                step,
                Step::Failed(Error::Config(_)) | Step::Failed(Error::EmptyCertificateChain)
            ),
            "{:?}",
            step
        );
        assert!(server.is_configured());

        let step = server.accept();
        assert!(matches!(step, Step::Failed(Error::Unusable)), "{:?}", step);

        // The channel survives for draining.
        assert_eq!(server.pending_output(), 0);
        assert!(server.channel().is_some());
    }

    #[test]
    fn chain_without_certificates() {
        let cert = generate_self_signed_certificate(&["localhost"]).unwrap();
        let mut server = engine(
            SecurityContext::builder(Role::Server)
                .certificate_chain(&cert.private_key_pem[..])
                .private_key(&cert.private_key_pem[..])
                .build(),
        );

        let step = server.accept();
        assert!(
            matches!(
                step,
                Step::Failed(Error::EmptyCertificateChain) | Step::Failed(Error::Config(_))
            ),
            "{:?}",
            step
        );
    }

    #[test]
    fn data_before_handshake() {
        let mut client = engine(SecurityContext::builder(Role::Client).build());

        let mut buf = [0; 16];
        assert!(matches!(client.read(&mut buf), Step::Failed(Error::Unconfigured)));
        assert!(matches!(client.write(b"hi"), Step::Failed(Error::Unconfigured)));
    }

    #[test]
    fn shutdown_always_closes() {
        let mut client = engine(SecurityContext::builder(Role::Client).build());

        let step = client.shutdown();
        assert!(matches!(step, Step::Failed(Error::Unconfigured)));
        assert_eq!(client.state(), EngineState::Closed);
    }

    #[test]
    fn verify_mode_override() {
        let mut server = engine(
            SecurityContext::builder(Role::Server)
                .verify_mode(VerifyMode::PEER)
                .build(),
        );
        assert_eq!(server.verify_mode(), VerifyMode::PEER);

        server.set_verify_mode(VerifyMode::NONE);
        assert_eq!(server.verify_mode(), VerifyMode::NONE);
    }

    #[test]
    fn pem_detection() {
        assert!(is_pem(b"junk\n-----BEGIN CERTIFICATE-----\n"));
        assert!(!is_pem(&[0x30, 0x82, 0x01, 0x0a]));
    }
}
