//! Property management.
//!
//! [`Properties`] is the admin contract for tenant properties. Every
//! operation takes the [`Caller`] derived from connection authentication.
//! Listing needs any authenticated principal; reading a property needs a
//! super-user or one of its admin roles; create, update and delete need a
//! super-user.
//!
//! [`InMemoryProperties`] keeps properties and their namespaces in process.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use parking_lot::RwLock;

use crate::caller::Caller;
use crate::error::{AdminError, AdminResult};
use crate::property::{validate_name, PropertyAdmin};

/// Admin interface for properties management.
pub trait Properties: Send + Sync {
    /// List all property names, in ascending order.
    fn get_properties(&self, caller: &Caller) -> AdminResult<Vec<String>>;

    /// Get the admin configuration of a property.
    fn get_property_admin(&self, caller: &Caller, property: &str) -> AdminResult<PropertyAdmin>;

    /// Provision a new property. Super-user only.
    fn create_property(
        &self,
        caller: &Caller,
        property: &str,
        config: PropertyAdmin,
    ) -> AdminResult<()>;

    /// Replace the configuration of an existing property. Super-user only.
    fn update_property(
        &self,
        caller: &Caller,
        property: &str,
        config: PropertyAdmin,
    ) -> AdminResult<()>;

    /// Delete a property that has no namespaces left. Super-user only.
    fn delete_property(&self, caller: &Caller, property: &str) -> AdminResult<()>;
}

/// Admin interface for namespaces under a property.
pub trait Namespaces: Send + Sync {
    /// List namespaces of a property, in ascending order.
    fn get_namespaces(&self, caller: &Caller, property: &str) -> AdminResult<Vec<String>>;

    /// Create a namespace.
    fn create_namespace(&self, caller: &Caller, property: &str, namespace: &str)
        -> AdminResult<()>;

    /// Delete a namespace.
    fn delete_namespace(&self, caller: &Caller, property: &str, namespace: &str)
        -> AdminResult<()>;
}

struct PropertyEntry {
    config: PropertyAdmin,
    namespaces: BTreeSet<String>,
}

/// In-process property store.
pub struct InMemoryProperties {
    super_user_roles: HashSet<String>,
    properties: RwLock<BTreeMap<String, PropertyEntry>>,
}

impl InMemoryProperties {
    /// Create an empty store with the given super-user roles.
    pub fn new<I, S>(super_user_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            super_user_roles: super_user_roles.into_iter().map(Into::into).collect(),
            properties: RwLock::new(BTreeMap::new()),
        }
    }

    /// Check whether the caller is a super-user.
    pub fn is_super_user(&self, caller: &Caller) -> bool {
        caller
            .role()
            .map(|role| self.super_user_roles.contains(role))
            .unwrap_or(false)
    }

    fn require_authenticated<'a>(&self, caller: &'a Caller) -> AdminResult<&'a str> {
        caller
            .role()
            .ok_or_else(|| AdminError::NotAuthorized("authentication required".to_string()))
    }

    fn require_super_user(&self, caller: &Caller) -> AdminResult<()> {
        let role = self.require_authenticated(caller)?;
        if self.is_super_user(caller) {
            Ok(())
        } else {
            Err(AdminError::NotAuthorized(format!(
                "role '{}' is not a super-user",
                role
            )))
        }
    }

    fn require_property_admin(&self, caller: &Caller, entry: &PropertyEntry) -> AdminResult<()> {
        let role = self.require_authenticated(caller)?;
        if self.is_super_user(caller) || entry.config.is_admin(role) {
            Ok(())
        } else {
            Err(AdminError::NotAuthorized(format!(
                "role '{}' does not administer this property",
                role
            )))
        }
    }
}

fn property_not_found(property: &str) -> AdminError {
    AdminError::NotFound(format!("property '{}' does not exist", property))
}

impl Properties for InMemoryProperties {
    fn get_properties(&self, caller: &Caller) -> AdminResult<Vec<String>> {
        self.require_authenticated(caller)?;
        Ok(self.properties.read().keys().cloned().collect())
    }

    fn get_property_admin(&self, caller: &Caller, property: &str) -> AdminResult<PropertyAdmin> {
        self.require_authenticated(caller)?;
        let properties = self.properties.read();
        let entry = properties
            .get(property)
            .ok_or_else(|| property_not_found(property))?;
        self.require_property_admin(caller, entry)?;
        Ok(entry.config.clone())
    }

    fn create_property(
        &self,
        caller: &Caller,
        property: &str,
        config: PropertyAdmin,
    ) -> AdminResult<()> {
        self.require_super_user(caller)?;
        validate_name("property", property)?;

        let mut properties = self.properties.write();
        if properties.contains_key(property) {
            return Err(AdminError::Conflict(format!(
                "property '{}' already exists",
                property
            )));
        }

        properties.insert(
            property.to_string(),
            PropertyEntry {
                config,
                namespaces: BTreeSet::new(),
            },
        );
        tracing::info!(property, role = caller.role().unwrap_or_default(), "property created");
        Ok(())
    }

    fn update_property(
        &self,
        caller: &Caller,
        property: &str,
        config: PropertyAdmin,
    ) -> AdminResult<()> {
        self.require_super_user(caller)?;

        let mut properties = self.properties.write();
        let entry = properties
            .get_mut(property)
            .ok_or_else(|| property_not_found(property))?;
        entry.config = config;
        tracing::info!(property, "property updated");
        Ok(())
    }

    fn delete_property(&self, caller: &Caller, property: &str) -> AdminResult<()> {
        self.require_super_user(caller)?;

        let mut properties = self.properties.write();
        let entry = properties
            .get(property)
            .ok_or_else(|| property_not_found(property))?;
        if !entry.namespaces.is_empty() {
            return Err(AdminError::Conflict(format!(
                "property '{}' still has {} active namespace(s)",
                property,
                entry.namespaces.len()
            )));
        }

        properties.remove(property);
        tracing::info!(property, "property deleted");
        Ok(())
    }
}

impl Namespaces for InMemoryProperties {
    fn get_namespaces(&self, caller: &Caller, property: &str) -> AdminResult<Vec<String>> {
        let properties = self.properties.read();
        let entry = properties
            .get(property)
            .ok_or_else(|| property_not_found(property))?;
        self.require_property_admin(caller, entry)?;
        Ok(entry.namespaces.iter().cloned().collect())
    }

    fn create_namespace(
        &self,
        caller: &Caller,
        property: &str,
        namespace: &str,
    ) -> AdminResult<()> {
        validate_name("namespace", namespace)?;

        let mut properties = self.properties.write();
        let entry = properties
            .get_mut(property)
            .ok_or_else(|| property_not_found(property))?;
        self.require_property_admin(caller, entry)?;

        if !entry.namespaces.insert(namespace.to_string()) {
            return Err(AdminError::Conflict(format!(
                "namespace '{}/{}' already exists",
                property, namespace
            )));
        }
        tracing::debug!(property, namespace, "namespace created");
        Ok(())
    }

    fn delete_namespace(
        &self,
        caller: &Caller,
        property: &str,
        namespace: &str,
    ) -> AdminResult<()> {
        let mut properties = self.properties.write();
        let entry = properties
            .get_mut(property)
            .ok_or_else(|| property_not_found(property))?;
        self.require_property_admin(caller, entry)?;

        if !entry.namespaces.remove(namespace) {
            return Err(AdminError::NotFound(format!(
                "namespace '{}/{}' does not exist",
                property, namespace
            )));
        }
        tracing::debug!(property, namespace, "namespace deleted");
        Ok(())
    }
}
