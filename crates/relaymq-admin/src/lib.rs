//! RelayMQ tenant property administration.
//!
//! The admin surface sits behind connection authentication: it consumes the
//! authenticated principal (as a [`Caller`]) and nothing else. Errors use the
//! admin taxonomy in [`AdminError`] and never mix with authentication errors.

pub mod caller;
pub mod error;
pub mod properties;
pub mod property;

pub use caller::Caller;
pub use error::{AdminError, AdminResult};
pub use properties::{InMemoryProperties, Namespaces, Properties};
pub use property::{validate_name, PropertyAdmin};
