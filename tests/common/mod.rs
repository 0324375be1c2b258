#![allow(unused)]

use std::sync::Arc;

use tlspipe::certificate::{generate_self_signed_certificate, CertifiedKey};
use tlspipe::{Config, Error, Outcome, Role, SecurityContext, Session, Transfer};

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn cert() -> CertifiedKey {
    generate_self_signed_certificate(&["localhost"]).expect("generate certificate")
}

/// Context presenting `cert` as the local certificate, PEM encoded.
pub fn context_with(role: Role, cert: &CertifiedKey) -> SecurityContext<'static> {
    SecurityContext::builder(role)
        .certificate_chain(cert.certificate_pem.clone())
        .private_key(cert.private_key_pem.clone())
        .build()
}

pub fn session<'a>(context: SecurityContext<'a>, config: &Arc<Config>) -> Session<'a> {
    Session::new(Arc::new(context), config.clone())
}

/// Move everything `from` produced onto `wire`, then feed `to` as much of the
/// wire as it accepts. Returns whether any byte moved.
pub fn pump(from: &mut Session<'_>, wire: &mut Vec<u8>, to: &mut Session<'_>) -> bool {
    let mut moved = false;
    let mut buf = [0u8; 2048];

    loop {
        let out = from.get_output(&mut buf);
        if out.is_empty() {
            break;
        }
        wire.extend_from_slice(out);
        moved = true;
    }

    if !wire.is_empty() {
        let rest = to.put_input(&wire[..]).len();
        let taken = wire.len() - rest;
        if taken > 0 {
            wire.drain(..taken);
            moved = true;
        }
    }

    moved
}

/// A client/server pair wired crosswise with a simulated network in between.
pub struct Pair<'a> {
    pub client: Session<'a>,
    pub server: Session<'a>,
    pub client_to_server: Vec<u8>,
    pub server_to_client: Vec<u8>,
}

#[derive(Default)]
pub struct Progress {
    pub done: bool,
    pub error: Option<Error>,
    pub calls: usize,
}

impl Progress {
    fn finished(&self) -> bool {
        self.done || self.error.is_some()
    }

    fn record(&mut self, t: Transfer) {
        self.calls += 1;
        // Non-blocking: every call comes back with a decision.
        if let Some(e) = t.error {
            self.error = Some(e);
            return;
        }
        self.done = matches!(t.outcome, Outcome::Nothing | Outcome::OutputAvailable);
    }
}

pub struct HandshakeResult {
    pub rounds: usize,
    pub client: Progress,
    pub server: Progress,
}

impl HandshakeResult {
    pub fn completed(&self) -> bool {
        self.client.done && self.server.done
    }
}

impl<'a> Pair<'a> {
    pub fn new(client: Session<'a>, server: Session<'a>) -> Self {
        Pair {
            client,
            server,
            client_to_server: Vec::new(),
            server_to_client: Vec::new(),
        }
    }

    /// Move bytes both ways once.
    pub fn pump(&mut self) -> bool {
        let a = pump(&mut self.client, &mut self.client_to_server, &mut self.server);
        let b = pump(&mut self.server, &mut self.server_to_client, &mut self.client);
        a || b
    }

    /// Step both handshakes until both finish, one fails and traffic dies
    /// down, or `max_rounds` is reached.
    pub fn handshake(&mut self, max_rounds: usize) -> HandshakeResult {
        let mut client = Progress::default();
        let mut server = Progress::default();

        for round in 1..=max_rounds {
            if !client.finished() {
                client.record(self.client.handshake(Role::Client));
            }
            if !server.finished() {
                server.record(self.server.handshake(Role::Server));
            }

            let moved = self.pump();

            let failed = client.error.is_some() || server.error.is_some();
            if (client.finished() && server.finished()) || (failed && !moved) {
                return HandshakeResult {
                    rounds: round,
                    client,
                    server,
                };
            }
        }

        HandshakeResult {
            rounds: max_rounds,
            client,
            server,
        }
    }

    /// Handshake and panic unless both sides complete.
    pub fn connect(&mut self) -> usize {
        let result = self.handshake(50);
        assert!(
            result.client.error.is_none(),
            "client failed: {:?}",
            result.client.error
        );
        assert!(
            result.server.error.is_none(),
            "server failed: {:?}",
            result.server.error
        );
        assert!(result.completed(), "handshake did not complete");
        result.rounds
    }
}

/// Read everything `session` can deliver right now.
pub fn read_available(session: &mut Session<'_>, into: &mut Vec<u8>) -> Transfer {
    let mut buf = [0u8; 1500];
    loop {
        let t = session.read(&mut buf);
        into.extend_from_slice(&buf[..t.bytes]);
        if t.error.is_some() || t.bytes == 0 {
            return t;
        }
    }
}
