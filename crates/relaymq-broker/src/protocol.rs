//! Line-oriented authentication commands.
//!
//! Each command is one line. Client to broker:
//!
//! ```text
//! CONNECT <scheme> [credentials]
//! AUTH_RESPONSE <credentials>
//! LIST_PROPERTIES
//! PING
//! QUIT
//! ```
//!
//! Broker to client:
//!
//! ```text
//! CONNECTED <role>
//! AUTH_CHALLENGE <scheme>
//! PROPERTIES <name> <name> ...
//! ERROR <kind> <message>
//! PONG
//! BYE
//! ```

use std::fmt;

use crate::error::Error;

/// Longest command line accepted from a client, in bytes.
pub const MAX_LINE_LENGTH: usize = 4096;

/// A command sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Authenticate with a scheme and optional command credentials.
    Connect {
        /// Declared scheme.
        scheme: String,
        /// Credential payload.
        credentials: Option<String>,
    },
    /// Fresh credentials for re-authentication with the active scheme.
    AuthResponse {
        /// Credential payload.
        credentials: String,
    },
    /// List tenant properties.
    ListProperties,
    /// Liveness check.
    Ping,
    /// Close the connection.
    Quit,
}

impl ClientCommand {
    /// Parse one command line.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "CONNECT" => {
                let (scheme, credentials) = match rest.split_once(char::is_whitespace) {
                    Some((scheme, credentials)) => (scheme, Some(credentials.trim())),
                    None => (rest, None),
                };
                if scheme.is_empty() {
                    return Err(Error::Protocol("CONNECT requires a scheme".to_string()));
                }
                Ok(ClientCommand::Connect {
                    scheme: scheme.to_string(),
                    credentials: credentials
                        .filter(|c| !c.is_empty())
                        .map(str::to_string),
                })
            }
            "AUTH_RESPONSE" => {
                if rest.is_empty() {
                    return Err(Error::Protocol(
                        "AUTH_RESPONSE requires credentials".to_string(),
                    ));
                }
                Ok(ClientCommand::AuthResponse {
                    credentials: rest.to_string(),
                })
            }
            "LIST_PROPERTIES" => Ok(ClientCommand::ListProperties),
            "PING" => Ok(ClientCommand::Ping),
            "QUIT" => Ok(ClientCommand::Quit),
            "" => Err(Error::Protocol("empty command".to_string())),
            other => Err(Error::Protocol(format!("unknown command: {}", other))),
        }
    }
}

/// A reply sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    /// Authentication succeeded.
    Connected {
        /// Principal role.
        role: String,
    },
    /// The principal expired; send `AUTH_RESPONSE`.
    AuthChallenge {
        /// Scheme to re-authenticate with.
        scheme: String,
    },
    /// Property listing.
    Properties(Vec<String>),
    /// Request failed.
    Error {
        /// Machine-readable kind.
        kind: String,
        /// Human readable detail.
        message: String,
    },
    /// Reply to `PING`.
    Pong,
    /// The broker is closing the connection.
    Bye,
}

impl ServerReply {
    /// Build an error reply.
    pub fn error(kind: impl Into<String>, message: impl fmt::Display) -> Self {
        ServerReply::Error {
            kind: kind.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ServerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerReply::Connected { role } => write!(f, "CONNECTED {}", role),
            ServerReply::AuthChallenge { scheme } => write!(f, "AUTH_CHALLENGE {}", scheme),
            ServerReply::Properties(names) if names.is_empty() => write!(f, "PROPERTIES"),
            ServerReply::Properties(names) => write!(f, "PROPERTIES {}", names.join(" ")),
            ServerReply::Error { kind, message } => write!(f, "ERROR {} {}", kind, message),
            ServerReply::Pong => write!(f, "PONG"),
            ServerReply::Bye => write!(f, "BYE"),
        }
    }
}
