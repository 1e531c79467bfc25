//! Built-in authentication providers.
//!
//! # Supported Schemes
//!
//! - **tls**: client certificate subject, or a role pinned to the certificate fingerprint
//! - **token**: static bearer tokens via `RELAYMQ_TOKENS`
//! - **jwt**: signed JSON Web Tokens with subject and expiry claims

mod jwt;
mod tls;
mod token;

pub use jwt::{JwtClaims, JwtConfig, JwtProvider, JWT_SCHEME};
pub use tls::{TlsProvider, TLS_SCHEME};
pub use token::{TokenProvider, TOKENS_ENV, TOKEN_SCHEME};
