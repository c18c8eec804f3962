//! Device provisioning flow.
//!
//! For each device index: register the thing, issue a certificate, persist
//! the artifacts, attach the policy, attach the certificate to the thing and
//! add the thing to the group. A failure aborts that device only and is never
//! retried. Remote resources created before the failure are left in place and
//! reported as orphaned.

use crate::credentials::{ArtifactPaths, CredentialBundle, CredentialStore};
use crate::error::{ProvisionError, RegistryError};
use crate::registry::{Operation, Registry};
use std::ops::Range;
use std::sync::Arc;
use tracing::{error, info, warn};
use vemo_core::DeviceId;

/// Outcome of [`Provisioner::ensure_group`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Created,
    AlreadyExists,
}

/// Result of provisioning one device
#[derive(Debug)]
pub struct ProvisionReport {
    pub device_id: DeviceId,
    pub bundle: Option<CredentialBundle>,
    pub artifacts: Option<ArtifactPaths>,
    pub error: Option<ProvisionError>,
    pub warnings: Vec<String>,
}

impl ProvisionReport {
    fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            bundle: None,
            artifacts: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.bundle.is_some()
    }
}

/// Reports of a provisioning run
#[derive(Debug, Default)]
pub struct ProvisionSummary {
    pub reports: Vec<ProvisionReport>,
}

impl ProvisionSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProvisionReport> {
        self.reports.iter().filter(|r| !r.is_success())
    }
}

/// Remote resources created so far for one device
#[derive(Debug, Default)]
struct Created {
    thing: Option<String>,
    certificate_id: Option<String>,
}

impl Created {
    fn describe(&self) -> Option<String> {
        match (&self.thing, &self.certificate_id) {
            (None, None) => None,
            (Some(thing), None) => Some(format!("thing {}", thing)),
            (None, Some(cert)) => Some(format!("certificate {}", cert)),
            (Some(thing), Some(cert)) => Some(format!("thing {} and certificate {}", thing, cert)),
        }
    }
}

/// Provisions devices against a registry and stores their credentials locally
pub struct Provisioner {
    registry: Arc<dyn Registry>,
    store: CredentialStore,
    group: String,
    policy: String,
}

impl Provisioner {
    pub fn new(
        registry: Arc<dyn Registry>,
        store: CredentialStore,
        group: impl Into<String>,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            group: group.into(),
            policy: policy.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Create a group; an existing group counts as success
    pub async fn ensure_group(&self, name: &str) -> Result<GroupStatus, ProvisionError> {
        match self.registry.create_thing_group(name).await {
            Ok(_) => {
                info!(group = name, "Thing group created");
                Ok(GroupStatus::Created)
            }
            Err(e) if e.is_already_exists() => {
                warn!(group = name, "Thing group already exists");
                Ok(GroupStatus::AlreadyExists)
            }
            Err(e) => {
                error!(group = name, error = %e, "Failed to create thing group");
                Err(ProvisionError::registry(Operation::CreateThingGroup, e))
            }
        }
    }

    /// Provision one device.
    ///
    /// Re-provisioning an index issues a new certificate every time; existing
    /// local artifacts are overwritten and a warning is recorded.
    pub async fn provision_device(&self, index: u32) -> ProvisionReport {
        let device_id = DeviceId::from_index(index);
        let thing = device_id.as_str();
        let mut report = ProvisionReport::new(device_id.clone());
        let mut created = Created::default();

        info!(device = %device_id, "Creating thing");
        if let Err(e) = self.registry.create_thing(thing).await {
            return self.abort(report, &created, ProvisionError::registry(Operation::CreateThing, e));
        }
        created.thing = Some(thing.to_string());

        let issued = match self.registry.create_keys_and_certificate(thing).await {
            Ok(issued) => issued,
            Err(e) => {
                return self.abort(
                    report,
                    &created,
                    ProvisionError::registry(Operation::CreateKeysAndCertificate, e),
                )
            }
        };
        created.certificate_id = Some(issued.certificate_id.clone());
        let bundle = CredentialBundle::from(issued);

        if self.store.exists(&device_id) {
            let message = format!(
                "{} already had credentials on disk; they are replaced by certificate {} and the previous certificate stays registered",
                device_id,
                bundle.short_id()
            );
            warn!(device = %device_id, "{}", message);
            report.warnings.push(message);
        }

        let artifacts = match self.store.persist(&device_id, &bundle) {
            Ok(paths) => paths,
            Err(e) => return self.abort(report, &created, e),
        };

        let steps = [
            Operation::AttachPolicy,
            Operation::AttachThingPrincipal,
            Operation::AddThingToThingGroup,
        ];
        for operation in steps {
            if let Err(e) = self.run_step(operation, thing, &bundle).await {
                report.artifacts = Some(artifacts);
                return self.abort(report, &created, ProvisionError::registry(operation, e));
            }
        }

        info!(
            device = %device_id,
            certificate = %bundle.short_id(),
            certificate_path = %artifacts.certificate.display(),
            private_key_path = %artifacts.private_key.display(),
            "Device registered"
        );

        report.bundle = Some(bundle);
        report.artifacts = Some(artifacts);
        report
    }

    /// Provision a range of indices sequentially, continuing past failures
    pub async fn provision_range(&self, indices: Range<u32>) -> ProvisionSummary {
        self.provision_range_with(indices, |_| {}).await
    }

    /// Like [`Provisioner::provision_range`], calling `on_device` after each device
    pub async fn provision_range_with<F>(&self, indices: Range<u32>, mut on_device: F) -> ProvisionSummary
    where
        F: FnMut(&ProvisionReport) + Send,
    {
        let mut summary = ProvisionSummary::default();
        for index in indices {
            let report = self.provision_device(index).await;
            on_device(&report);
            summary.reports.push(report);
        }
        summary
    }

    async fn run_step(
        &self,
        operation: Operation,
        thing: &str,
        bundle: &CredentialBundle,
    ) -> Result<(), RegistryError> {
        match operation {
            Operation::AttachPolicy => {
                self.registry
                    .attach_policy(&self.policy, &bundle.certificate_arn)
                    .await
            }
            Operation::AttachThingPrincipal => {
                self.registry
                    .attach_thing_principal(thing, &bundle.certificate_arn)
                    .await
            }
            Operation::AddThingToThingGroup => {
                self.registry.add_thing_to_thing_group(&self.group, thing).await
            }
            other => Err(RegistryError::Rejected(format!(
                "{} is not a post-issuance step",
                other
            ))),
        }
    }

    fn abort(
        &self,
        mut report: ProvisionReport,
        created: &Created,
        err: ProvisionError,
    ) -> ProvisionReport {
        error!(device = %report.device_id, error = %err, "Provisioning aborted");

        if let Some(resources) = created.describe() {
            let message = format!(
                "orphaned remote state for {}: {} left registered without rollback",
                report.device_id, resources
            );
            warn!(device = %report.device_id, "{}", message);
            report.warnings.push(message);
        }

        report.error = Some(err);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRegistry;
    use tempfile::TempDir;
    use vemo_core::ArtifactLayout;

    fn provisioner(dir: &TempDir, registry: Arc<MemoryRegistry>) -> Provisioner {
        let store = CredentialStore::new(ArtifactLayout::new(dir.path()));
        Provisioner::new(registry, store, "VehicleEmissionsGroup", "policy")
    }

    #[tokio::test]
    async fn test_ensure_group_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let p = provisioner(&dir, registry);

        assert_eq!(p.ensure_group("VehicleEmissionsGroup").await.unwrap(), GroupStatus::Created);
        assert_eq!(
            p.ensure_group("VehicleEmissionsGroup").await.unwrap(),
            GroupStatus::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_ensure_group_other_errors_propagate() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        registry.fail_on(Operation::CreateThingGroup, "throttled");
        let p = provisioner(&dir, registry);

        assert!(p.ensure_group("VehicleEmissionsGroup").await.is_err());
    }

    #[tokio::test]
    async fn test_provision_device_happy_path() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let p = provisioner(&dir, Arc::clone(&registry));
        p.ensure_group("VehicleEmissionsGroup").await.unwrap();

        let report = p.provision_device(3).await;
        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.device_id.as_str(), "device_3");
        assert!(report.warnings.is_empty());
        assert!(registry.is_member("VehicleEmissionsGroup", "device_3"));
        assert!(p.store().exists(&DeviceId::from_index(3)));
    }

    #[tokio::test]
    async fn test_attach_failure_reports_orphans() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        registry.fail_on(Operation::AttachThingPrincipal, "denied");
        let p = provisioner(&dir, Arc::clone(&registry));
        p.ensure_group("VehicleEmissionsGroup").await.unwrap();

        let report = p.provision_device(0).await;
        assert!(!report.is_success());
        assert!(matches!(
            report.error,
            Some(ProvisionError::Registry {
                operation: Operation::AttachThingPrincipal,
                ..
            })
        ));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("orphaned"));
        // Nothing is rolled back
        assert_eq!(registry.certificate_count(), 1);
        assert_eq!(registry.calls(Operation::AddThingToThingGroup), 0);
    }

    #[tokio::test]
    async fn test_create_thing_failure_has_no_orphans() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        registry.fail_on(Operation::CreateThing, "quota");
        let p = provisioner(&dir, Arc::clone(&registry));

        let report = p.provision_device(0).await;
        assert!(report.error.is_some());
        assert!(report.warnings.is_empty());
        assert_eq!(registry.calls(Operation::CreateKeysAndCertificate), 0);
    }

    #[tokio::test]
    async fn test_reprovisioning_issues_new_certificate() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let p = provisioner(&dir, Arc::clone(&registry));
        p.ensure_group("VehicleEmissionsGroup").await.unwrap();

        let first = p.provision_device(1).await;
        let second = p.provision_device(1).await;

        assert_eq!(first.device_id, second.device_id);
        assert_ne!(
            first.bundle.unwrap().certificate_id,
            second.bundle.as_ref().unwrap().certificate_id
        );
        assert_eq!(registry.certificate_count(), 2);
        assert_eq!(second.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_provision_range_continues_after_failure() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let p = provisioner(&dir, Arc::clone(&registry));
        // Group intentionally missing: every add-to-group fails

        let summary = p.provision_range(0..3).await;
        assert_eq!(summary.reports.len(), 3);
        assert_eq!(summary.failed(), 3);
        assert_eq!(registry.calls(Operation::CreateThing), 3);
    }

    #[tokio::test]
    async fn test_provision_range_reports_each_device() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let p = provisioner(&dir, Arc::clone(&registry));
        p.ensure_group("VehicleEmissionsGroup").await.unwrap();

        // Only device_1 hits the failing step
        let mut seen = Vec::new();
        let summary = p
            .provision_range_with(0..3, |report| {
                seen.push(report.device_id.to_string());
                match report.device_id.as_str() {
                    "device_0" => registry.fail_on(Operation::AttachPolicy, "denied"),
                    _ => registry.recover(Operation::AttachPolicy),
                }
            })
            .await;

        assert_eq!(seen, vec!["device_0", "device_1", "device_2"]);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        let failed: Vec<_> = summary.failures().map(|r| r.device_id.to_string()).collect();
        assert_eq!(failed, vec!["device_1"]);
    }
}
