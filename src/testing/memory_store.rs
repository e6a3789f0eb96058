//! In-memory device store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::crypto;
use crate::errors::Result;
use crate::storage::{DeviceKeys, DeviceStore, PairedDevice};

/// [`DeviceStore`] keeping everything in memory. Paired-device records are
/// lost when the store is dropped.
pub struct MemoryDeviceStore {
    keys: DeviceKeys,
    paired: Mutex<HashMap<String, PairedDevice>>,
}

impl MemoryDeviceStore {
    /// Generate a fresh RSA identity of the given size. Tests typically use
    /// 1024-bit keys to keep generation fast; production identities should
    /// be at least 2048 bits.
    pub fn generate(bits: usize) -> Result<Self> {
        let (private_key, public_key) = crypto::generate_rsa_keypair(bits)?;
        let public_key_der = crypto::export_rsa_public_key(&public_key)?;
        Ok(Self::with_keys(DeviceKeys {
            private_key,
            public_key,
            public_key_der,
        }))
    }

    /// Wrap existing key material.
    pub fn with_keys(keys: DeviceKeys) -> Self {
        Self {
            keys,
            paired: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn current_device(&self) -> Result<DeviceKeys> {
        Ok(self.keys.clone())
    }

    async fn add_paired_device(&self, record: PairedDevice) -> Result<()> {
        self.paired
            .lock()
            .unwrap()
            .insert(record.peer_id.clone(), record);
        Ok(())
    }

    async fn device(&self, peer_id: &str) -> Result<Option<PairedDevice>> {
        Ok(self.paired.lock().unwrap().get(peer_id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<PairedDevice>> {
        Ok(self.paired.lock().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_keyed_by_peer_id() {
        let store = MemoryDeviceStore::generate(1024).unwrap();
        store
            .add_paired_device(PairedDevice {
                peer_id: "p2".into(),
                public_key_der: vec![1, 2, 3],
            })
            .await
            .unwrap();

        let record = store.device("p2").await.unwrap().unwrap();
        assert_eq!(record.public_key_der, vec![1, 2, 3]);
        assert!(store.device("p3").await.unwrap().is_none());
        assert_eq!(store.list_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn adding_twice_replaces_the_record() {
        let store = MemoryDeviceStore::generate(1024).unwrap();
        for key in [vec![1], vec![2]] {
            store
                .add_paired_device(PairedDevice {
                    peer_id: "p2".into(),
                    public_key_der: key,
                })
                .await
                .unwrap();
        }
        let record = store.device("p2").await.unwrap().unwrap();
        assert_eq!(record.public_key_der, vec![2]);
    }
}
