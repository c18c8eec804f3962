//! File-backed registry.
//!
//! Keeps groups, things and certificates in a JSON state file and issues real
//! self-signed X.509 certificates, so the provisioning flow can run without a
//! cloud account. Policies are referenced by name only.

use crate::error::RegistryError;
use crate::registry::{random_certificate_id, IssuedCertificate, Registry, RegistryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

const ARN_PREFIX: &str = "arn:local:iot";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupEntry {
    arn: String,
    created_at: DateTime<Utc>,
    things: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ThingEntry {
    arn: String,
    created_at: DateTime<Utc>,
    principals: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CertificateEntry {
    arn: String,
    subject: String,
    active: bool,
    created_at: DateTime<Utc>,
    policies: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    groups: BTreeMap<String, GroupEntry>,
    things: BTreeMap<String, ThingEntry>,
    certificates: BTreeMap<String, CertificateEntry>,
}

impl RegistryState {
    fn certificate_by_arn_mut(&mut self, arn: &str) -> Option<&mut CertificateEntry> {
        self.certificates.values_mut().find(|c| c.arn == arn)
    }
}

/// Registry persisted to a JSON file
pub struct LocalRegistry {
    state_path: PathBuf,
    state: Mutex<RegistryState>,
    /// Serializes state file writes; held across the blocking write
    writer: tokio::sync::Mutex<()>,
}

impl LocalRegistry {
    /// Open the registry, loading existing state if the file is present
    pub fn open(state_path: impl Into<PathBuf>) -> RegistryResult<Self> {
        let state_path = state_path.into();
        let state = if state_path.exists() {
            let content = std::fs::read_to_string(&state_path)?;
            serde_json::from_str(&content)?
        } else {
            RegistryState::default()
        };

        Ok(Self {
            state_path,
            state: Mutex::new(state),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.state.lock().groups.contains_key(group)
    }

    pub fn has_thing(&self, thing: &str) -> bool {
        self.state.lock().things.contains_key(thing)
    }

    pub fn certificate_count(&self) -> usize {
        self.state.lock().certificates.len()
    }

    /// Things that belong to a group
    pub fn group_members(&self, group: &str) -> Vec<String> {
        self.state
            .lock()
            .groups
            .get(group)
            .map(|g| g.things.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Certificate ARNs attached to a thing
    pub fn thing_principals(&self, thing: &str) -> Vec<String> {
        self.state
            .lock()
            .things
            .get(thing)
            .map(|t| t.principals.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a mutation and persist the result; nothing is saved when it fails.
    ///
    /// The file is written on the blocking pool; the in-memory state only
    /// changes once the write succeeded.
    async fn update<T>(
        &self,
        mutate: impl FnOnce(&mut RegistryState) -> RegistryResult<T> + Send,
    ) -> RegistryResult<T> {
        let _writer = self.writer.lock().await;

        let (next, value) = {
            let state = self.state.lock();
            let mut next = state.clone();
            let value = mutate(&mut next)?;
            (next, value)
        };

        let json = serde_json::to_string_pretty(&next)?;
        let path = self.state_path.clone();
        tokio::task::spawn_blocking(move || write_state(&path, &json))
            .await
            .map_err(|e| RegistryError::Io(std::io::Error::other(e)))??;

        *self.state.lock() = next;
        Ok(value)
    }
}

/// Replace the state file through a temporary sibling
fn write_state(path: &Path, json: &str) -> RegistryResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl Registry for LocalRegistry {
    async fn create_thing_group(&self, group: &str) -> RegistryResult<String> {
        self.update(|state| {
            if state.groups.contains_key(group) {
                return Err(RegistryError::AlreadyExists(format!("thing group {}", group)));
            }
            let arn = format!("{}:thinggroup/{}", ARN_PREFIX, group);
            state.groups.insert(
                group.to_string(),
                GroupEntry {
                    arn: arn.clone(),
                    created_at: Utc::now(),
                    things: BTreeSet::new(),
                },
            );
            Ok(arn)
        })
        .await
    }

    async fn create_thing(&self, thing: &str) -> RegistryResult<String> {
        self.update(|state| {
            // Re-creating an identical thing returns the existing one
            if let Some(existing) = state.things.get(thing) {
                return Ok(existing.arn.clone());
            }
            let arn = format!("{}:thing/{}", ARN_PREFIX, thing);
            state.things.insert(
                thing.to_string(),
                ThingEntry {
                    arn: arn.clone(),
                    created_at: Utc::now(),
                    principals: BTreeSet::new(),
                },
            );
            Ok(arn)
        })
        .await
    }

    async fn create_keys_and_certificate(&self, subject: &str) -> RegistryResult<IssuedCertificate> {
        let (certificate_pem, public_key_pem, private_key_pem) = self_signed(subject)?;
        let certificate_id = random_certificate_id();
        let certificate_arn = format!("{}:cert/{}", ARN_PREFIX, certificate_id);

        self.update(|state| {
            state.certificates.insert(
                certificate_id.clone(),
                CertificateEntry {
                    arn: certificate_arn.clone(),
                    subject: subject.to_string(),
                    active: true,
                    created_at: Utc::now(),
                    policies: BTreeSet::new(),
                },
            );
            Ok(())
        })
        .await?;

        debug!(certificate_id = %certificate_id, subject, "Issued certificate");

        Ok(IssuedCertificate {
            certificate_id,
            certificate_arn,
            certificate_pem,
            public_key_pem,
            private_key_pem,
        })
    }

    async fn attach_policy(&self, policy: &str, certificate_arn: &str) -> RegistryResult<()> {
        self.update(|state| {
            let cert = state
                .certificate_by_arn_mut(certificate_arn)
                .ok_or_else(|| RegistryError::NotFound(format!("certificate {}", certificate_arn)))?;
            if !cert.active {
                return Err(RegistryError::Rejected(format!(
                    "certificate {} is inactive",
                    certificate_arn
                )));
            }
            cert.policies.insert(policy.to_string());
            Ok(())
        })
        .await
    }

    async fn attach_thing_principal(&self, thing: &str, principal_arn: &str) -> RegistryResult<()> {
        self.update(|state| {
            if state.certificate_by_arn_mut(principal_arn).is_none() {
                return Err(RegistryError::NotFound(format!("certificate {}", principal_arn)));
            }
            let entry = state
                .things
                .get_mut(thing)
                .ok_or_else(|| RegistryError::NotFound(format!("thing {}", thing)))?;
            entry.principals.insert(principal_arn.to_string());
            Ok(())
        })
        .await
    }

    async fn add_thing_to_thing_group(&self, group: &str, thing: &str) -> RegistryResult<()> {
        self.update(|state| {
            if !state.things.contains_key(thing) {
                return Err(RegistryError::NotFound(format!("thing {}", thing)));
            }
            let entry = state
                .groups
                .get_mut(group)
                .ok_or_else(|| RegistryError::NotFound(format!("thing group {}", group)))?;
            entry.things.insert(thing.to_string());
            Ok(())
        })
        .await
    }
}

/// Generate a key pair and a self-signed certificate with CN = `subject`.
///
/// Returns `(certificate_pem, public_key_pem, private_key_pem)`.
fn self_signed(subject: &str) -> RegistryResult<(String, String, String)> {
    let credential_err = |e: rcgen::Error| RegistryError::Credential(e.to_string());

    let key_pair = KeyPair::generate().map_err(credential_err)?;

    let mut params = CertificateParams::default();
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, subject);
    params.distinguished_name = name;

    let certificate = params.self_signed(&key_pair).map_err(credential_err)?;

    Ok((
        certificate.pem(),
        key_pair.public_key_pem(),
        key_pair.serialize_pem(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_group_already_exists() {
        let dir = TempDir::new().unwrap();
        let registry = LocalRegistry::open(dir.path().join("registry.json")).unwrap();

        registry.create_thing_group("fleet").await.unwrap();
        let err = registry.create_thing_group("fleet").await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_issued_certificate_is_pem() {
        let dir = TempDir::new().unwrap();
        let registry = LocalRegistry::open(dir.path().join("registry.json")).unwrap();

        let issued = registry.create_keys_and_certificate("device_0").await.unwrap();
        assert!(issued.certificate_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(issued.public_key_pem.contains("PUBLIC KEY"));
        assert!(issued.private_key_pem.contains("PRIVATE KEY"));
        assert!(issued.certificate_arn.ends_with(&issued.certificate_id));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");

        {
            let registry = LocalRegistry::open(&path).unwrap();
            registry.create_thing_group("fleet").await.unwrap();
            registry.create_thing("device_0").await.unwrap();
            let cert = registry.create_keys_and_certificate("device_0").await.unwrap();
            registry.attach_thing_principal("device_0", &cert.certificate_arn).await.unwrap();
            registry.add_thing_to_thing_group("fleet", "device_0").await.unwrap();
        }

        let registry = LocalRegistry::open(&path).unwrap();
        assert!(registry.has_group("fleet"));
        assert!(registry.has_thing("device_0"));
        assert_eq!(registry.certificate_count(), 1);
        assert_eq!(registry.group_members("fleet"), vec!["device_0".to_string()]);
        assert_eq!(registry.thing_principals("device_0").len(), 1);
    }

    #[tokio::test]
    async fn test_attach_to_unknown_resources() {
        let dir = TempDir::new().unwrap();
        let registry = LocalRegistry::open(dir.path().join("registry.json")).unwrap();

        let err = registry
            .attach_policy("policy", "arn:local:iot:cert/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));

        registry.create_thing_group("fleet").await.unwrap();
        let err = registry
            .add_thing_to_thing_group("fleet", "device_9")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_all_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let registry = std::sync::Arc::new(LocalRegistry::open(&path).unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let registry = std::sync::Arc::clone(&registry);
                tokio::spawn(async move { registry.create_thing(&format!("device_{}", i)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reopened = LocalRegistry::open(&path).unwrap();
        for i in 0..8 {
            assert!(reopened.has_thing(&format!("device_{}", i)));
        }
        assert!(!path.with_extension("json.tmp").exists());
    }
}
