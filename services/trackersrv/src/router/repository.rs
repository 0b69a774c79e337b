//! Live devices by id and identity

use crate::device::Device;
use crate::modem::response::normalize_phone;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One device, mutated by one task at a time
pub type SharedDevice = Arc<Mutex<Device>>;

pub struct DeviceRepository {
    devices: DashMap<String, SharedDevice>,
    /// Phone number, IMEI or protocol id to device id
    identities: DashMap<String, String>,
    country_code: String,
}

impl DeviceRepository {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            devices: DashMap::new(),
            identities: DashMap::new(),
            country_code: country_code.into(),
        }
    }

    pub fn get(&self, id: &str) -> Option<SharedDevice> {
        self.devices.get(id).map(|device| device.value().clone())
    }

    /// Resolve by id, then by identity as given, then by normalized phone number
    pub fn find(&self, identity: &str) -> Option<SharedDevice> {
        if let Some(device) = self.get(identity) {
            return Some(device);
        }
        let normalized = normalize_phone(identity, &self.country_code);
        for key in [identity, normalized.as_str()] {
            if key.is_empty() {
                continue;
            }
            let Some(id) = self.identities.get(key).map(|id| id.value().clone()) else {
                continue;
            };
            if let Some(device) = self.get(&id) {
                return Some(device);
            }
        }
        None
    }

    pub fn insert(&self, device: Device) -> SharedDevice {
        let id = device.id.clone();
        self.index(&id, device.identities());
        let shared = Arc::new(Mutex::new(device));
        self.devices.insert(id, shared.clone());
        shared
    }

    /// Rebuild the identity entries of `device` after a profile change
    pub fn reindex(&self, device: &Device) {
        self.identities.retain(|_, owner| *owner != device.id);
        self.index(&device.id, device.identities());
    }

    fn index(&self, id: &str, identities: Vec<String>) {
        for identity in identities.into_iter().filter(|identity| identity != id) {
            let normalized = normalize_phone(&identity, &self.country_code);
            if !normalized.is_empty() && normalized != identity {
                self.identities.insert(normalized, id.to_string());
            }
            self.identities.insert(identity, id.to_string());
        }
    }

    pub fn remove(&self, id: &str) -> Option<SharedDevice> {
        self.identities.retain(|_, owner| owner.as_str() != id);
        self.devices.remove(id).map(|(_, device)| device)
    }

    pub fn all(&self) -> Vec<SharedDevice> {
        self.devices.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::device::DeviceProfile;
    use crate::models::ModelKind;

    #[tokio::test]
    async fn test_find_by_identity() {
        let repository = DeviceRepository::new("55");
        let profile = DeviceProfile {
            identification: "+5567998035423".to_string(),
            ..Default::default()
        };
        repository.insert(Device::new("t1", ModelKind::Tk102b, profile));

        assert!(repository.find("t1").is_some());
        assert!(repository.find("+5567998035423").is_some());
        assert!(repository.find("067998035423").is_some());
        assert!(repository.find("359586015829802").is_none());

        let shared = repository.get("t1").unwrap();
        let mut device = shared.lock().await;
        device.profile.imei = Some("359586015829802".to_string());
        repository.reindex(&device);
        drop(device);
        assert!(repository.find("359586015829802").is_some());

        repository.remove("t1");
        assert!(repository.find("+5567998035423").is_none());
        assert!(repository.is_empty());
    }
}
