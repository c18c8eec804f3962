//! Device registry abstraction.
//!
//! The registry is the remote service that knows about things, groups,
//! certificates and policies. Provisioning only talks to it through this
//! trait, so the same flow runs against the file-backed [`LocalRegistry`]
//! or the in-memory [`MemoryRegistry`] used in tests.
//!
//! [`LocalRegistry`]: crate::local::LocalRegistry
//! [`MemoryRegistry`]: crate::memory::MemoryRegistry

use crate::error::RegistryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for registry calls
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Registry calls, in the order provisioning issues them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    CreateThingGroup,
    CreateThing,
    CreateKeysAndCertificate,
    AttachPolicy,
    AttachThingPrincipal,
    AddThingToThingGroup,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateThingGroup => "create_thing_group",
            Operation::CreateThing => "create_thing",
            Operation::CreateKeysAndCertificate => "create_keys_and_certificate",
            Operation::AttachPolicy => "attach_policy",
            Operation::AttachThingPrincipal => "attach_thing_principal",
            Operation::AddThingToThingGroup => "add_thing_to_thing_group",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly issued, active certificate with its key pair
#[derive(Clone)]
pub struct IssuedCertificate {
    pub certificate_id: String,
    pub certificate_arn: String,
    pub certificate_pem: String,
    pub public_key_pem: String,
    pub private_key_pem: String,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate_id", &self.certificate_id)
            .field("certificate_arn", &self.certificate_arn)
            .finish_non_exhaustive()
    }
}

/// Remote registry of things, groups and credentials
#[async_trait]
pub trait Registry: Send + Sync {
    /// Create a thing group. Fails with `AlreadyExists` when the group is present.
    async fn create_thing_group(&self, group: &str) -> RegistryResult<String>;

    /// Register a thing and return its ARN
    async fn create_thing(&self, thing: &str) -> RegistryResult<String>;

    /// Issue a new active certificate and key pair
    async fn create_keys_and_certificate(&self, subject: &str) -> RegistryResult<IssuedCertificate>;

    /// Attach a policy to a certificate
    async fn attach_policy(&self, policy: &str, certificate_arn: &str) -> RegistryResult<()>;

    /// Attach a certificate (principal) to a thing
    async fn attach_thing_principal(&self, thing: &str, principal_arn: &str) -> RegistryResult<()>;

    /// Add a thing to a group
    async fn add_thing_to_thing_group(&self, group: &str, thing: &str) -> RegistryResult<()>;
}

/// 64 lowercase hex characters, the shape of a registry certificate id
pub(crate) fn random_certificate_id() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
