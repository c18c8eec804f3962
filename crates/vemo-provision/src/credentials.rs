//! Credential bundles and their on-disk artifacts.

use crate::error::{ProvisionError, Result};
use crate::registry::IssuedCertificate;
use std::fmt;
use std::path::{Path, PathBuf};
use vemo_core::{ArtifactLayout, DeviceId};

/// Certificate plus key pair owned by exactly one device
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub certificate_id: String,
    pub certificate_arn: String,
    pub certificate_pem: String,
    pub public_key_pem: String,
    pub private_key_pem: String,
}

impl CredentialBundle {
    /// First six characters of the certificate id, for log lines
    pub fn short_id(&self) -> &str {
        let end = self
            .certificate_id
            .char_indices()
            .nth(6)
            .map(|(i, _)| i)
            .unwrap_or(self.certificate_id.len());
        &self.certificate_id[..end]
    }
}

impl From<IssuedCertificate> for CredentialBundle {
    fn from(issued: IssuedCertificate) -> Self {
        Self {
            certificate_id: issued.certificate_id,
            certificate_arn: issued.certificate_arn,
            certificate_pem: issued.certificate_pem,
            public_key_pem: issued.public_key_pem,
            private_key_pem: issued.private_key_pem,
        }
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("certificate_id", &self.certificate_id)
            .field("certificate_arn", &self.certificate_arn)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Paths of the three artifacts of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub certificate: PathBuf,
    pub public_key: PathBuf,
    pub private_key: PathBuf,
}

impl ArtifactPaths {
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [
            self.certificate.as_path(),
            self.public_key.as_path(),
            self.private_key.as_path(),
        ]
        .into_iter()
    }
}

/// Writes credential bundles under the artifact layout
#[derive(Debug, Clone)]
pub struct CredentialStore {
    layout: ArtifactLayout,
}

impl CredentialStore {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn paths(&self, device: &DeviceId) -> ArtifactPaths {
        ArtifactPaths {
            certificate: self.layout.certificate_path(device),
            public_key: self.layout.public_key_path(device),
            private_key: self.layout.private_key_path(device),
        }
    }

    /// Whether any artifact of the device is already on disk
    pub fn exists(&self, device: &DeviceId) -> bool {
        self.paths(device).iter().any(Path::exists)
    }

    /// Persist the three PEM artifacts, overwriting previous ones
    pub fn persist(&self, device: &DeviceId, bundle: &CredentialBundle) -> Result<ArtifactPaths> {
        let paths = self.paths(device);

        write_artifact(&paths.certificate, &bundle.certificate_pem)?;
        write_artifact(&paths.public_key, &bundle.public_key_pem)?;
        write_artifact(&paths.private_key, &bundle.private_key_pem)?;
        restrict_permissions(&paths.private_key)?;

        Ok(paths)
    }
}

fn write_artifact(path: &Path, contents: &str) -> Result<()> {
    let persist_err = |source| ProvisionError::Persist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(persist_err)?;
    }
    std::fs::write(path, contents).map_err(persist_err)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
        ProvisionError::Persist {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
