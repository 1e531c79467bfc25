//! Per-connection credential material.
//!
//! A connection can carry credentials from several transports at once. The
//! [`AuthenticationDataSource`] trait exposes one capability pair per
//! transport category (a `has_data_from_*` flag plus typed accessors). Every
//! method has an "absent" default, so a source that only knows about one
//! transport implements just that pair.
//!
//! [`ConnectionCarrier`] is the concrete carrier the broker fills in as data
//! arrives: the peer address on accept, certificates when the TLS handshake
//! completes, the command payload with the first authenticate frame.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, AuthResult};

/// Transport categories that can supply credential material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transport {
    /// TLS client certificates.
    Tls,
    /// HTTP request metadata.
    Http,
    /// Authentication data from the binary command protocol.
    Command,
    /// Raw peer socket metadata.
    Peer,
}

impl Transport {
    /// All transport categories, in declaration order.
    pub const ALL: [Transport; 4] = [
        Transport::Tls,
        Transport::Http,
        Transport::Command,
        Transport::Peer,
    ];
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tls => write!(f, "tls"),
            Transport::Http => write!(f, "http"),
            Transport::Command => write!(f, "command"),
            Transport::Peer => write!(f, "peer"),
        }
    }
}

/// A client certificate as handed over by the TLS layer.
///
/// Chain validation happens before the certificate reaches the carrier; this
/// type only holds what providers need to derive an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    not_after: Option<DateTime<Utc>>,
}

impl Certificate {
    /// Create a certificate from its DER encoding and subject name.
    pub fn new(der: impl Into<Vec<u8>>, subject: impl Into<String>) -> Self {
        Self {
            der: der.into(),
            subject: subject.into(),
            not_after: None,
        }
    }

    /// Set the end of the validity period.
    pub fn with_not_after(mut self, not_after: DateTime<Utc>) -> Self {
        self.not_after = Some(not_after);
        self
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject name (common name).
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// End of the validity period, if known.
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }

    /// Check whether the certificate is past its validity period at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after.map(|exp| now > exp).unwrap_or(false)
    }

    /// Lowercase hex SHA-256 over the DER encoding.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }
}

/// HTTP metadata for a request-scoped connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpData {
    auth_type: String,
    /// Keys are stored lowercased.
    headers: HashMap<String, String>,
}

impl HttpData {
    /// Create HTTP data for the given authentication scheme.
    pub fn new(auth_type: impl Into<String>) -> Self {
        Self {
            auth_type: auth_type.into(),
            headers: HashMap::new(),
        }
    }

    /// Add a header. Names are case-insensitive.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Authentication scheme declared by the request.
    pub fn auth_type(&self) -> &str {
        &self.auth_type
    }

    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Uniform read access to the credential material on a connection.
///
/// Accessors return `None` when their transport has no data; callers check
/// the matching `has_data_from_*` flag or simply match on the option.
pub trait AuthenticationDataSource: Send + Sync {
    /// TLS data is available.
    fn has_data_from_tls(&self) -> bool {
        false
    }

    /// The client certificate chain, leaf first.
    fn tls_certificates(&self) -> Option<&[Certificate]> {
        None
    }

    /// HTTP data is available.
    fn has_data_from_http(&self) -> bool {
        false
    }

    /// Authentication scheme of the HTTP request.
    fn http_auth_type(&self) -> Option<&str> {
        None
    }

    /// Value of an HTTP header.
    fn http_header(&self, _name: &str) -> Option<&str> {
        None
    }

    /// Command protocol data is available.
    fn has_data_from_command(&self) -> bool {
        false
    }

    /// Authentication data carried in a protocol command.
    fn command_data(&self) -> Option<&str> {
        None
    }

    /// Peer data is available.
    fn has_data_from_peer(&self) -> bool {
        false
    }

    /// Remote socket address of the client.
    fn peer_address(&self) -> Option<SocketAddr> {
        None
    }

    /// Transports with data on this source.
    fn capabilities(&self) -> Vec<Transport> {
        Transport::ALL
            .into_iter()
            .filter(|transport| match transport {
                Transport::Tls => self.has_data_from_tls(),
                Transport::Http => self.has_data_from_http(),
                Transport::Command => self.has_data_from_command(),
                Transport::Peer => self.has_data_from_peer(),
            })
            .collect()
    }
}

/// Concrete carrier owned by one connection.
///
/// Each capability flag is derived from the presence of its field, so a flag
/// can never disagree with its accessor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionCarrier {
    tls_certificates: Option<Vec<Certificate>>,
    http: Option<HttpData>,
    command_data: Option<String>,
    peer_address: Option<SocketAddr>,
}

impl ConnectionCarrier {
    /// Create a carrier with no data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a carrier populated with the peer address of a new connection.
    pub fn for_peer(addr: SocketAddr) -> Self {
        let mut carrier = Self::new();
        carrier.set_peer_address(addr);
        carrier
    }

    /// Record the client certificate chain. An empty chain means no TLS data.
    pub fn set_tls_certificates(&mut self, chain: Vec<Certificate>) {
        self.tls_certificates = if chain.is_empty() { None } else { Some(chain) };
    }

    /// Record HTTP request metadata.
    pub fn set_http(&mut self, http: HttpData) {
        self.http = Some(http);
    }

    /// Record command authentication data. An empty payload means no data.
    pub fn set_command_data(&mut self, data: impl Into<String>) {
        let data = data.into();
        self.command_data = if data.is_empty() { None } else { Some(data) };
    }

    /// Record raw command authentication bytes.
    ///
    /// Bytes that are not valid UTF-8 are reported as an authentication
    /// failure and leave the previous command data untouched.
    pub fn set_command_bytes(&mut self, bytes: &[u8]) -> AuthResult<()> {
        let data = std::str::from_utf8(bytes)
            .map_err(|e| AuthError::failed(format!("malformed command data: {}", e)))?;
        self.set_command_data(data);
        Ok(())
    }

    /// Drop command data, e.g. before a re-authentication frame is read.
    pub fn clear_command_data(&mut self) {
        self.command_data = None;
    }

    /// Record the remote socket address.
    pub fn set_peer_address(&mut self, addr: SocketAddr) {
        self.peer_address = Some(addr);
    }

    /// Release all credential material.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Check whether no transport has supplied data.
    pub fn is_empty(&self) -> bool {
        self.tls_certificates.is_none()
            && self.http.is_none()
            && self.command_data.is_none()
            && self.peer_address.is_none()
    }
}

impl AuthenticationDataSource for ConnectionCarrier {
    fn has_data_from_tls(&self) -> bool {
        self.tls_certificates.is_some()
    }

    fn tls_certificates(&self) -> Option<&[Certificate]> {
        self.tls_certificates.as_deref()
    }

    fn has_data_from_http(&self) -> bool {
        self.http.is_some()
    }

    fn http_auth_type(&self) -> Option<&str> {
        self.http.as_ref().map(HttpData::auth_type)
    }

    fn http_header(&self, name: &str) -> Option<&str> {
        self.http.as_ref().and_then(|http| http.header(name))
    }

    fn has_data_from_command(&self) -> bool {
        self.command_data.is_some()
    }

    fn command_data(&self) -> Option<&str> {
        self.command_data.as_deref()
    }

    fn has_data_from_peer(&self) -> bool {
        self.peer_address.is_some()
    }

    fn peer_address(&self) -> Option<SocketAddr> {
        self.peer_address
    }
}

/// Extract a bearer credential from command data or the HTTP `Authorization` header.
///
/// Command data wins when both are present. A `Bearer ` prefix is stripped.
pub fn bearer_credential(data: &dyn AuthenticationDataSource) -> Option<&str> {
    let raw = data
        .command_data()
        .or_else(|| data.http_header("Authorization"))?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .unwrap_or(raw)
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.0.0.7:6650".parse().unwrap()
    }

    fn cert(subject: &str) -> Certificate {
        Certificate::new(subject.as_bytes().to_vec(), subject)
    }

    /// Flags and accessors must agree for every transport.
    fn assert_consistent(carrier: &ConnectionCarrier) {
        assert_eq!(
            carrier.has_data_from_tls(),
            carrier.tls_certificates().is_some()
        );
        assert_eq!(
            carrier.has_data_from_http(),
            carrier.http_auth_type().is_some()
        );
        assert_eq!(
            carrier.has_data_from_command(),
            carrier.command_data().is_some()
        );
        assert_eq!(
            carrier.has_data_from_peer(),
            carrier.peer_address().is_some()
        );
    }

    struct BareSource;

    impl AuthenticationDataSource for BareSource {}

    #[test]
    fn test_defaults_are_absent() {
        let source = BareSource;
        assert!(!source.has_data_from_tls());
        assert!(!source.has_data_from_http());
        assert!(!source.has_data_from_command());
        assert!(!source.has_data_from_peer());
        assert!(source.tls_certificates().is_none());
        assert!(source.http_auth_type().is_none());
        assert!(source.http_header("Authorization").is_none());
        assert!(source.command_data().is_none());
        assert!(source.peer_address().is_none());
        assert!(source.capabilities().is_empty());
    }

    #[test]
    fn test_empty_carrier() {
        let carrier = ConnectionCarrier::new();
        assert!(carrier.is_empty());
        assert!(carrier.capabilities().is_empty());
        assert_consistent(&carrier);
    }

    #[test]
    fn test_each_transport_independently() {
        let mut tls = ConnectionCarrier::new();
        tls.set_tls_certificates(vec![cert("client-a")]);
        assert_eq!(tls.capabilities(), vec![Transport::Tls]);
        assert_consistent(&tls);

        let mut http = ConnectionCarrier::new();
        http.set_http(HttpData::new("token"));
        assert_eq!(http.capabilities(), vec![Transport::Http]);
        assert_consistent(&http);

        let mut command = ConnectionCarrier::new();
        command.set_command_data("token:abc");
        assert_eq!(command.capabilities(), vec![Transport::Command]);
        assert_consistent(&command);

        let peer = ConnectionCarrier::for_peer(peer());
        assert_eq!(peer.capabilities(), vec![Transport::Peer]);
        assert_consistent(&peer);
    }

    #[test]
    fn test_transports_in_combination() {
        let mut carrier = ConnectionCarrier::for_peer(peer());
        carrier.set_tls_certificates(vec![cert("client-a"), cert("intermediate")]);
        assert_eq!(carrier.capabilities(), vec![Transport::Tls, Transport::Peer]);
        assert_consistent(&carrier);

        carrier.set_command_data("abc");
        carrier.set_http(HttpData::new("jwt"));
        assert_eq!(carrier.capabilities(), Transport::ALL.to_vec());
        assert_consistent(&carrier);

        let chain = carrier.tls_certificates().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].subject(), "client-a");
        assert_eq!(carrier.peer_address(), Some(peer()));
    }

    #[test]
    fn test_empty_values_stay_absent() {
        let mut carrier = ConnectionCarrier::new();
        carrier.set_tls_certificates(Vec::new());
        carrier.set_command_data("");
        assert!(carrier.is_empty());
        assert_consistent(&carrier);
    }

    #[test]
    fn test_malformed_command_bytes() {
        let mut carrier = ConnectionCarrier::new();
        carrier.set_command_data("previous");

        let err = carrier.set_command_bytes(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed { .. }));
        assert_eq!(carrier.command_data(), Some("previous"));

        carrier.set_command_bytes(b"token:abc").unwrap();
        assert_eq!(carrier.command_data(), Some("token:abc"));
    }

    #[test]
    fn test_http_headers_case_insensitive() {
        let mut carrier = ConnectionCarrier::new();
        carrier.set_http(HttpData::new("token").with_header("Authorization", "Bearer abc"));
        assert_eq!(carrier.http_header("authorization"), Some("Bearer abc"));
        assert_eq!(carrier.http_header("AUTHORIZATION"), Some("Bearer abc"));
        assert_eq!(carrier.http_header("X-Missing"), None);
        assert_eq!(carrier.http_auth_type(), Some("token"));
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut carrier = ConnectionCarrier::for_peer(peer());
        carrier.set_command_data("secret");
        carrier.set_tls_certificates(vec![cert("a")]);
        carrier.clear();
        assert!(carrier.is_empty());
        assert_consistent(&carrier);
    }

    #[test]
    fn test_bearer_credential() {
        let mut carrier = ConnectionCarrier::new();
        assert_eq!(bearer_credential(&carrier), None);

        carrier.set_http(HttpData::new("token").with_header("Authorization", "Bearer from-http"));
        assert_eq!(bearer_credential(&carrier), Some("from-http"));

        carrier.set_command_data("from-command");
        assert_eq!(bearer_credential(&carrier), Some("from-command"));
    }

    #[test]
    fn test_certificate_fingerprint_and_expiry() {
        let now = Utc::now();
        let c = cert("client").with_not_after(now - chrono::Duration::seconds(1));
        assert!(c.is_expired_at(now));
        assert_eq!(c.fingerprint().len(), 64);
        assert_eq!(c.fingerprint(), cert("client").fingerprint());
        assert!(!cert("client").is_expired_at(now));
    }
}
