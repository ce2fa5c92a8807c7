//! Registre centralisé des appareils exposés.
//!
//! Tout l'état des appareils vit derrière un unique verrou : une
//! invocation d'action, une écriture de variable et une collecte
//! d'événements s'excluent mutuellement sur l'ensemble du registre.
//! C'est volontairement brutal : un cliché d'état n'est jamais observé
//! au milieu d'une mutation concurrente.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::device::Device;
use crate::dispatcher::DispatchError;

#[derive(Error, Debug)]
#[error("Device with UDN {0} already registered")]
pub struct DuplicateDevice(pub String);

/// Variables modifiées d'un service, produites par une passe de collecte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceChanges {
    pub udn: String,
    pub service_id: String,
    pub service_type: String,
    pub variables: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    pub(crate) inner: Mutex<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un appareil. Un UDN déjà présent est une erreur.
    pub async fn register(&self, device: Device) -> Result<(), DuplicateDevice> {
        let mut devices = self.inner.lock().await;
        let udn = device.udn().to_string();
        if devices.contains_key(&udn) {
            return Err(DuplicateDevice(udn));
        }
        info!(udn = %udn, name = %device.friendly_name(), "✅ Device registered");
        devices.insert(udn, device);
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn contains(&self, udn: &str) -> bool {
        self.inner.lock().await.contains_key(udn)
    }

    /// Écrit une variable d'état d'un service.
    ///
    /// À ne jamais appeler depuis un handler d'action : le verrou du
    /// registre est déjà tenu pendant l'invocation.
    pub async fn set_variable(
        &self,
        udn: &str,
        service_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), DispatchError> {
        let mut devices = self.inner.lock().await;
        let device = devices
            .get_mut(udn)
            .ok_or_else(|| DispatchError::UnknownDevice(udn.to_string()))?;
        let service = device
            .service_mut(service_id)
            .ok_or_else(|| DispatchError::UnknownService(service_id.to_string()))?;
        service.set_variable(name, value);
        Ok(())
    }

    pub async fn get_variable(&self, udn: &str, service_id: &str, name: &str) -> Option<String> {
        let devices = self.inner.lock().await;
        let device = devices.get(udn)?;
        let service = device.service(service_id)?;
        service.variable(name).map(str::to_string)
    }

    /// Collecte et draine les variables modifiées de tous les services.
    ///
    /// Les services sans changement sont absents du résultat. Le parcours
    /// est trié par UDN pour une livraison déterministe.
    pub async fn collect_changed(&self) -> Vec<ServiceChanges> {
        let mut devices = self.inner.lock().await;
        let mut udns: Vec<String> = devices.keys().cloned().collect();
        udns.sort();

        let mut collected = Vec::new();
        for udn in udns {
            let Some(device) = devices.get_mut(&udn) else {
                continue;
            };
            for service in device.services_mut() {
                let variables = service.take_changed();
                if variables.is_empty() {
                    continue;
                }
                collected.push(ServiceChanges {
                    udn: udn.clone(),
                    service_id: service.service_id().to_string(),
                    service_type: service.service_type().to_string(),
                    variables,
                });
            }
        }
        collected
    }
}
