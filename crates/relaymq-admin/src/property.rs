//! Property (tenant) configuration records.

use serde::{Deserialize, Serialize};

use crate::error::{AdminError, AdminResult};

/// Administrative configuration of a property.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyAdmin {
    /// Roles allowed to administer the property.
    #[serde(default)]
    pub admin_roles: Vec<String>,

    /// Clusters the property may use.
    #[serde(default)]
    pub allowed_clusters: Vec<String>,
}

impl PropertyAdmin {
    /// Create a config with the given admin roles and clusters.
    pub fn new(admin_roles: Vec<String>, allowed_clusters: Vec<String>) -> Self {
        Self {
            admin_roles,
            allowed_clusters,
        }
    }

    /// Parse from the JSON body used by the admin API.
    pub fn from_json(json: &str) -> AdminResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to the JSON body used by the admin API.
    pub fn to_json(&self) -> AdminResult<String> {
        serde_json::to_string(self).map_err(|e| AdminError::Unexpected(e.to_string()))
    }

    /// Check whether `role` administers this property.
    pub fn is_admin(&self, role: &str) -> bool {
        self.admin_roles.iter().any(|r| r == role)
    }
}

/// Validate a property or namespace name segment.
///
/// Names are non-empty and limited to ASCII letters, digits and `_ - = : .`.
pub fn validate_name(kind: &str, name: &str) -> AdminResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '=' | ':' | '.'));

    if valid {
        Ok(())
    } else {
        Err(AdminError::PreconditionFailed(format!(
            "{} name is not valid: '{}'",
            kind, name
        )))
    }
}
