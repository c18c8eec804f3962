//! vemo Provision - Device identity and credential provisioning
//!
//! Registers simulated vehicles in a device registry, issues one credential
//! bundle per device and stores it as three PEM artifacts:
//!
//! ```text
//! <root>/certificates/device_<i>.pem
//! <root>/keys/device_<i>.public.pem
//! <root>/keys/device_<i>.private.pem
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use vemo_core::ArtifactLayout;
//! use vemo_provision::{CredentialStore, LocalRegistry, Provisioner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let layout = ArtifactLayout::new("iot_resources");
//!     let registry = Arc::new(LocalRegistry::open("iot_resources/registry.json")?);
//!     let provisioner = Provisioner::new(
//!         registry,
//!         CredentialStore::new(layout),
//!         "VehicleEmissionsGroup",
//!         "GGTest_Group_Core-policy",
//!     );
//!
//!     provisioner.ensure_group("VehicleEmissionsGroup").await?;
//!     let summary = provisioner.provision_range(0..10).await;
//!     println!("{} devices provisioned", summary.succeeded());
//!     Ok(())
//! }
//! ```

pub mod credentials;
pub mod error;
pub mod local;
pub mod memory;
pub mod provisioner;
pub mod registry;

pub use credentials::{ArtifactPaths, CredentialBundle, CredentialStore};
pub use error::{ProvisionError, RegistryError, Result};
pub use local::LocalRegistry;
pub use memory::MemoryRegistry;
pub use provisioner::{GroupStatus, ProvisionReport, ProvisionSummary, Provisioner};
pub use registry::{IssuedCertificate, Operation, Registry, RegistryResult};
