//! Certificate material and policy shared by the engines of one endpoint.
//!
//! A [`SecurityContext`] only stores bytes. Nothing is parsed or validated until
//! an engine configures its TLS session on the first handshake call, so a bad
//! key surfaces as a failed handshake rather than a failed build.

use std::borrow::Cow;
use std::fmt;
use std::mem;
use std::ops::{BitOr, BitOrAssign};

use openssl::ssl::SslOptions;
use zeroize::Zeroize;

/// Which end of the handshake an engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Peer certificate policy, as a set of flags.
///
/// How the flags translate into a verification level depends on the role, see
/// [`VerifyMode::level`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VerifyMode(u8);

impl VerifyMode {
    pub const NONE: VerifyMode = VerifyMode(0);
    pub const PEER: VerifyMode = VerifyMode(1);
    pub const FAIL_IF_NO_PEER_CERT: VerifyMode = VerifyMode(1 << 1);
    pub const CLIENT_ONCE: VerifyMode = VerifyMode(1 << 2);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: VerifyMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Verification level this mode means for `role`.
    ///
    /// A client either requires a valid server certificate (`PEER`) or does not
    /// check at all. A server requires a client certificate when
    /// `FAIL_IF_NO_PEER_CERT` is set, requests but tolerates one with `PEER`
    /// alone, and otherwise never asks.
    pub fn level(&self, role: Role) -> VerifyLevel {
        match role {
            Role::Client if self.contains(VerifyMode::PEER) => VerifyLevel::Required,
            Role::Client => VerifyLevel::None,
            Role::Server if self.contains(VerifyMode::FAIL_IF_NO_PEER_CERT) => {
                VerifyLevel::Required
            }
            Role::Server if self.contains(VerifyMode::PEER) => VerifyLevel::Optional,
            Role::Server => VerifyLevel::None,
        }
    }
}

impl BitOr for VerifyMode {
    type Output = VerifyMode;

    fn bitor(self, rhs: VerifyMode) -> VerifyMode {
        VerifyMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for VerifyMode {
    fn bitor_assign(&mut self, rhs: VerifyMode) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(VerifyMode, &str); 3] = [
            (VerifyMode::PEER, "PEER"),
            (VerifyMode::FAIL_IF_NO_PEER_CERT, "FAIL_IF_NO_PEER_CERT"),
            (VerifyMode::CLIENT_ONCE, "CLIENT_ONCE"),
        ];

        if self.is_empty() {
            return f.write_str("VerifyMode(NONE)");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(m, _)| self.contains(*m))
            .map(|(_, n)| *n)
            .collect();
        write!(f, "VerifyMode({})", names.join(" | "))
    }
}

/// How strictly the peer certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyLevel {
    /// No check.
    None,
    /// Checked and recorded, but a failure does not abort the handshake.
    Optional,
    /// A missing or invalid certificate aborts the handshake.
    Required,
}

/// Protocol option flags applied to every session built from a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextOptions(u32);

impl ContextOptions {
    pub const DEFAULT_WORKAROUNDS: ContextOptions = ContextOptions(1);
    pub const SINGLE_DH_USE: ContextOptions = ContextOptions(1 << 1);
    pub const NO_SSLV2: ContextOptions = ContextOptions(1 << 2);
    pub const NO_SSLV3: ContextOptions = ContextOptions(1 << 3);
    pub const NO_TLSV1: ContextOptions = ContextOptions(1 << 4);
    pub const NO_TLSV1_1: ContextOptions = ContextOptions(1 << 5);
    pub const NO_TLSV1_2: ContextOptions = ContextOptions(1 << 6);
    pub const NO_TLSV1_3: ContextOptions = ContextOptions(1 << 7);
    pub const NO_COMPRESSION: ContextOptions = ContextOptions(1 << 8);

    pub fn empty() -> Self {
        ContextOptions(0)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: ContextOptions) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn to_native(self) -> SslOptions {
        let table = [
            (ContextOptions::DEFAULT_WORKAROUNDS, SslOptions::ALL),
            (ContextOptions::SINGLE_DH_USE, SslOptions::SINGLE_DH_USE),
            (ContextOptions::NO_SSLV2, SslOptions::NO_SSLV2),
            (ContextOptions::NO_SSLV3, SslOptions::NO_SSLV3),
            (ContextOptions::NO_TLSV1, SslOptions::NO_TLSV1),
            (ContextOptions::NO_TLSV1_1, SslOptions::NO_TLSV1_1),
            (ContextOptions::NO_TLSV1_2, SslOptions::NO_TLSV1_2),
            (ContextOptions::NO_TLSV1_3, SslOptions::NO_TLSV1_3),
            (ContextOptions::NO_COMPRESSION, SslOptions::NO_COMPRESSION),
        ];

        table
            .iter()
            .filter(|(o, _)| self.contains(*o))
            .fold(SslOptions::empty(), |acc, (_, native)| acc | *native)
    }
}

impl BitOr for ContextOptions {
    type Output = ContextOptions;

    fn bitor(self, rhs: ContextOptions) -> ContextOptions {
        ContextOptions(self.0 | rhs.0)
    }
}

impl BitOrAssign for ContextOptions {
    fn bitor_assign(&mut self, rhs: ContextOptions) {
        self.0 |= rhs.0;
    }
}

/// The categories of material a context holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Material {
    CertificateChain,
    PrivateKey,
    TrustedCas,
}

/// Certificate chain, private key, CA bundle and policy for a TLS endpoint.
///
/// The byte buffers are kept exactly as given, PEM or DER. Borrowed buffers
/// are never copied, so the context cannot outlive them. Share one context
/// between many engines with an `Arc`.
pub struct SecurityContext<'a> {
    role: Role,
    certificate_chain: Cow<'a, [u8]>,
    private_key: Cow<'a, [u8]>,
    trusted_cas: Cow<'a, [u8]>,
    verify_mode: VerifyMode,
    options: ContextOptions,
}

impl<'a> SecurityContext<'a> {
    /// Start building a context whose engines default to `role`.
    pub fn builder(role: Role) -> SecurityContextBuilder<'a> {
        SecurityContextBuilder {
            role,
            certificate_chain: Cow::Borrowed(&[]),
            private_key: Cow::Borrowed(&[]),
            trusted_cas: Cow::Borrowed(&[]),
            verify_mode: VerifyMode::NONE,
            options: ContextOptions::empty(),
        }
    }

    /// Default role of engines built from this context.
    #[inline(always)]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Local certificate chain, leaf first. Empty when not set.
    #[inline(always)]
    pub fn certificate_chain(&self) -> &[u8] {
        &self.certificate_chain
    }

    /// Private key for the leaf certificate. Empty when not set.
    #[inline(always)]
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    /// Trusted CA certificates used to verify the peer. Empty when not set.
    #[inline(always)]
    pub fn trusted_cas(&self) -> &[u8] {
        &self.trusted_cas
    }

    /// View of one category of material.
    pub fn material(&self, kind: Material) -> &[u8] {
        match kind {
            Material::CertificateChain => self.certificate_chain(),
            Material::PrivateKey => self.private_key(),
            Material::TrustedCas => self.trusted_cas(),
        }
    }

    /// Default peer verification policy.
    #[inline(always)]
    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    /// Protocol option flags.
    #[inline(always)]
    pub fn options(&self) -> ContextOptions {
        self.options
    }
}

impl Drop for SecurityContext<'_> {
    fn drop(&mut self) {
        zeroize_owned(&mut self.private_key);
    }
}

// Borrowed material belongs to the caller and is left alone.
fn zeroize_owned(material: &mut Cow<'_, [u8]>) {
    if let Cow::Owned(bytes) = material {
        bytes.zeroize();
    }
}

impl fmt::Debug for SecurityContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("role", &self.role)
            .field("certificate_chain", &self.certificate_chain.len())
            .field("private_key", &self.private_key.len())
            .field("trusted_cas", &self.trusted_cas.len())
            .field("verify_mode", &self.verify_mode)
            .field("options", &self.options)
            .finish()
    }
}

/// Builder for [`SecurityContext`].
pub struct SecurityContextBuilder<'a> {
    role: Role,
    certificate_chain: Cow<'a, [u8]>,
    private_key: Cow<'a, [u8]>,
    trusted_cas: Cow<'a, [u8]>,
    verify_mode: VerifyMode,
    options: ContextOptions,
}

impl<'a> SecurityContextBuilder<'a> {
    /// Set the local certificate chain.
    ///
    /// PEM with one or more certificates (leaf first), or a single DER
    /// certificate. Only installed when a private key is set as well.
    pub fn certificate_chain(mut self, chain: impl Into<Cow<'a, [u8]>>) -> Self {
        self.certificate_chain = chain.into();
        self
    }

    /// Set the private key, PEM or DER.
    pub fn private_key(mut self, key: impl Into<Cow<'a, [u8]>>) -> Self {
        self.private_key = key.into();
        self
    }

    /// Set the CA bundle the peer certificate is verified against.
    pub fn trusted_cas(mut self, cas: impl Into<Cow<'a, [u8]>>) -> Self {
        self.trusted_cas = cas.into();
        self
    }

    /// Set the default verification policy.
    ///
    /// Defaults to [`VerifyMode::NONE`].
    pub fn verify_mode(mut self, mode: VerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }

    /// Set the protocol option flags.
    ///
    /// Defaults to none.
    pub fn options(mut self, options: ContextOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the context.
    ///
    /// The material is not looked at here.
    pub fn build(mut self) -> SecurityContext<'a> {
        SecurityContext {
            role: self.role,
            certificate_chain: mem::replace(&mut self.certificate_chain, Cow::Borrowed(&[])),
            private_key: mem::replace(&mut self.private_key, Cow::Borrowed(&[])),
            trusted_cas: mem::replace(&mut self.trusted_cas, Cow::Borrowed(&[])),
            verify_mode: self.verify_mode,
            options: self.options,
        }
    }
}

impl Drop for SecurityContextBuilder<'_> {
    fn drop(&mut self) {
        zeroize_owned(&mut self.private_key);
    }
}
