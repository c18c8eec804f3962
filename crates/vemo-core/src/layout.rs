//! On-disk layout of provisioned artifacts and datasets.

use crate::types::DeviceId;
use std::path::{Path, PathBuf};

/// Deterministic locations keyed by device identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
    certificates_dir: PathBuf,
    keys_dir: PathBuf,
    data_dir: PathBuf,
}

impl ArtifactLayout {
    /// Layout with the default sub-directories (`certificates`, `keys`, `data`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            certificates_dir: root.join("certificates"),
            keys_dir: root.join("keys"),
            data_dir: root.join("data"),
            root,
        }
    }

    pub fn with_dirs(
        root: impl Into<PathBuf>,
        certificates: impl AsRef<Path>,
        keys: impl AsRef<Path>,
        data: impl AsRef<Path>,
    ) -> Self {
        let root = root.into();
        Self {
            certificates_dir: root.join(certificates),
            keys_dir: root.join(keys),
            data_dir: root.join(data),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn certificates_dir(&self) -> &Path {
        &self.certificates_dir
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `<certificates>/<device>.pem`
    pub fn certificate_path(&self, device: &DeviceId) -> PathBuf {
        self.certificates_dir.join(format!("{}.pem", device))
    }

    /// `<keys>/<device>.public.pem`
    pub fn public_key_path(&self, device: &DeviceId) -> PathBuf {
        self.keys_dir.join(format!("{}.public.pem", device))
    }

    /// `<keys>/<device>.private.pem`
    pub fn private_key_path(&self, device: &DeviceId) -> PathBuf {
        self.keys_dir.join(format!("{}.private.pem", device))
    }

    /// Replay dataset of a device index: `<data>/vehicle<index>.csv`
    pub fn dataset_path(&self, index: u32) -> PathBuf {
        self.data_dir.join(format!("vehicle{}.csv", index))
    }

    /// Create the certificate, key and data directories
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.certificates_dir)?;
        std::fs::create_dir_all(&self.keys_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_keyed_by_identity() {
        let layout = ArtifactLayout::new("iot_resources");
        let device = DeviceId::from_index(4);

        assert_eq!(
            layout.certificate_path(&device),
            PathBuf::from("iot_resources/certificates/device_4.pem")
        );
        assert_eq!(
            layout.public_key_path(&device),
            PathBuf::from("iot_resources/keys/device_4.public.pem")
        );
        assert_eq!(
            layout.private_key_path(&device),
            PathBuf::from("iot_resources/keys/device_4.private.pem")
        );
        assert_eq!(layout.dataset_path(4), PathBuf::from("iot_resources/data/vehicle4.csv"));
    }
}
