//! Per-connection command loop.
//!
//! A [`Connection`] owns the credential carrier and the [`AuthSession`] of one
//! client. Its loop multiplexes four sources: client command lines, the
//! in-flight authentication attempt, the expiry check timer and broker
//! shutdown. All state transitions happen inside this loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use relaymq_admin::{Caller, Properties};
use relaymq_auth::{
    Applied, AttemptOutcome, AuthError, AuthPolicy, AuthSession, Certificate, ConnectionCarrier,
    PendingAttempt, ProviderRegistry, Start,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::config::MIN_EXPIRY_CHECK_INTERVAL;
use crate::error::Error;
use crate::protocol::{ClientCommand, ServerReply, MAX_LINE_LENGTH};

/// Shared state handed to every connection.
#[derive(Clone)]
pub struct BrokerContext {
    /// Read-only scheme table.
    pub registry: Arc<ProviderRegistry>,
    /// Authentication policy of the listener.
    pub policy: AuthPolicy,
    /// Property administration.
    pub properties: Arc<dyn Properties>,
    /// How often to check for expired principals.
    pub expiry_check_interval: Duration,
}

/// What the loop does after handling an event.
struct Reaction {
    reply: Option<ServerReply>,
    close: bool,
}

impl Reaction {
    fn none() -> Self {
        Self {
            reply: None,
            close: false,
        }
    }

    fn reply(reply: ServerReply) -> Self {
        Self {
            reply: Some(reply),
            close: false,
        }
    }

    fn close_with(reply: ServerReply) -> Self {
        Self {
            reply: Some(reply),
            close: true,
        }
    }
}

/// One client connection.
pub struct Connection {
    id: u64,
    carrier: ConnectionCarrier,
    session: AuthSession,
    properties: Arc<dyn Properties>,
    expiry_check_interval: Duration,
    challenge_sent: bool,
}

impl Connection {
    /// Create a connection for an accepted client.
    pub fn new(id: u64, peer: Option<SocketAddr>, ctx: &BrokerContext) -> Self {
        let carrier = match peer {
            Some(addr) => ConnectionCarrier::for_peer(addr),
            None => ConnectionCarrier::new(),
        };

        Self {
            id,
            carrier,
            session: AuthSession::new(id, ctx.registry.clone(), ctx.policy.clone()),
            properties: ctx.properties.clone(),
            expiry_check_interval: ctx.expiry_check_interval.max(MIN_EXPIRY_CHECK_INTERVAL),
            challenge_sent: false,
        }
    }

    /// Attach the client certificate chain presented during the TLS handshake.
    pub fn with_tls_certificates(mut self, chain: Vec<Certificate>) -> Self {
        self.carrier.set_tls_certificates(chain);
        self
    }

    /// Connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Serve the connection until the client quits, the broker closes it or
    /// shutdown is signalled.
    pub async fn run<S>(
        mut self,
        stream: S,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut pending: Option<PendingAttempt> = None;

        let mut expiry_check = tokio::time::interval(self.expiry_check_interval);
        expiry_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(connection_id = self.id, "connection opened");

        let result = loop {
            let reaction = tokio::select! {
                line = lines.next() => match line {
                    Some(Ok(line)) => self.on_line(&line, &mut pending),
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        tracing::warn!(connection_id = self.id, "command line too long, closing connection");
                        Reaction::close_with(ServerReply::error(
                            "protocol",
                            format!("command line exceeds {} bytes", MAX_LINE_LENGTH),
                        ))
                    }
                    Some(Err(LinesCodecError::Io(e))) => break Err(Error::Io(e)),
                    None => break Ok(()),
                },
                outcome = next_outcome(&mut pending) => {
                    pending = None;
                    self.on_outcome(outcome)
                }
                _ = expiry_check.tick() => self.on_expiry_check(pending.is_some()),
                _ = shutdown.recv() => Reaction::close_with(ServerReply::Bye),
            };

            if let Some(reply) = reaction.reply {
                if let Err(e) = send(&mut writer, &reply).await {
                    break Err(e);
                }
            }
            if reaction.close {
                break Ok(());
            }
        };

        self.session.close();
        self.carrier.clear();
        tracing::debug!(connection_id = self.id, "connection closed");

        result
    }

    fn on_line(&mut self, line: &str, pending: &mut Option<PendingAttempt>) -> Reaction {
        let command = match ClientCommand::parse(line) {
            Ok(command) => command,
            Err(e) => return Reaction::reply(ServerReply::error("protocol", e)),
        };

        match command {
            ClientCommand::Connect {
                scheme,
                credentials,
            } => {
                match credentials {
                    Some(credentials) => self.carrier.set_command_data(credentials),
                    None => self.carrier.clear_command_data(),
                }
                let started = self.session.start(&scheme, Arc::new(self.carrier.clone()));
                self.on_start(started, pending)
            }
            ClientCommand::AuthResponse { credentials } => {
                self.carrier.set_command_data(credentials);
                let started = self.session.reauthenticate(Arc::new(self.carrier.clone()));
                self.on_start(started, pending)
            }
            ClientCommand::ListProperties => {
                let caller = if self.session.reauth_due() {
                    Caller::anonymous()
                } else {
                    Caller::from(self.session.auth_state())
                };
                match self.properties.get_properties(&caller) {
                    Ok(names) => Reaction::reply(ServerReply::Properties(names)),
                    Err(e) => Reaction::reply(ServerReply::error(
                        format!("admin_{}", e.status_code()),
                        e,
                    )),
                }
            }
            ClientCommand::Ping => Reaction::reply(ServerReply::Pong),
            ClientCommand::Quit => Reaction::close_with(ServerReply::Bye),
        }
    }

    fn on_start(
        &mut self,
        started: Result<Start, AuthError>,
        pending: &mut Option<PendingAttempt>,
    ) -> Reaction {
        match started {
            Ok(Start::Started(attempt)) => {
                *pending = Some(attempt);
                Reaction::none()
            }
            Ok(Start::Coalesced) => Reaction::none(),
            Err(e) => {
                let reply = ServerReply::error(e.kind(), &e);
                if self.session.should_close(&e) {
                    Reaction::close_with(reply)
                } else {
                    Reaction::reply(reply)
                }
            }
        }
    }

    fn on_outcome(&mut self, outcome: AttemptOutcome) -> Reaction {
        match self.session.apply(outcome) {
            Applied::Authenticated(principal) => {
                self.challenge_sent = false;
                Reaction::reply(ServerReply::Connected {
                    role: principal.role().to_string(),
                })
            }
            Applied::Failed {
                reason,
                retries_exhausted,
            } => {
                let reply = ServerReply::error(reason.kind(), &reason);
                if retries_exhausted {
                    tracing::info!(
                        connection_id = self.id,
                        "closing connection after repeated authentication failures"
                    );
                    Reaction::close_with(reply)
                } else {
                    Reaction::reply(reply)
                }
            }
            Applied::Discarded => Reaction::none(),
        }
    }

    fn on_expiry_check(&mut self, attempt_in_flight: bool) -> Reaction {
        if attempt_in_flight || !self.session.reauth_due() {
            return Reaction::none();
        }

        let expired = ServerReply::error("expired", "principal expired");
        if !self.session.policy().reauth_on_expiry {
            tracing::info!(connection_id = self.id, "closing connection with expired principal");
            return Reaction::close_with(expired);
        }
        if self.challenge_sent {
            tracing::info!(
                connection_id = self.id,
                "closing connection after timeout on refreshing credentials"
            );
            return Reaction::close_with(expired);
        }

        let scheme = self
            .session
            .auth_state()
            .active_scheme()
            .unwrap_or_default()
            .to_string();
        tracing::debug!(connection_id = self.id, scheme = %scheme, "principal expired, challenging client");
        self.challenge_sent = true;
        Reaction::reply(ServerReply::AuthChallenge { scheme })
    }
}

async fn next_outcome(pending: &mut Option<PendingAttempt>) -> AttemptOutcome {
    match pending {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn send<W>(writer: &mut W, reply: &ServerReply) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let line = format!("{}\n", reply);
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
