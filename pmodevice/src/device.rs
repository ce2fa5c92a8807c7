//! Modèle des appareils exposés : un appareil porte des services, un
//! service porte une table d'actions et ses variables d'état.
//!
//! Chaque service tient le jeu des variables modifiées depuis la
//! dernière collecte d'événements. Écrire la même valeur ne marque
//! rien ; écrire une valeur nouvelle ou différente marque la variable.

use std::collections::{BTreeSet, HashMap};

use crate::actions::ActionHandler;

/// Un service UPnP : identité, type, table d'actions et variables d'état.
pub struct Service {
    service_id: String,
    service_type: String,
    actions: HashMap<String, ActionHandler>,
    variables: HashMap<String, String>,
    changed: BTreeSet<String>,
}

impl Service {
    pub fn new(service_id: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            service_type: service_type.into(),
            actions: HashMap::new(),
            variables: HashMap::new(),
            changed: BTreeSet::new(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Enregistre une action ; un handler du même nom est remplacé.
    pub fn register_action(&mut self, name: &str, handler: ActionHandler) {
        self.actions.insert(name.to_string(), handler);
    }

    pub(crate) fn handler(&self, action: &str) -> Option<&ActionHandler> {
        self.actions.get(action)
    }

    /// Écrit une variable d'état et la marque modifiée si sa valeur change.
    pub fn set_variable(&mut self, name: &str, value: &str) {
        let previous = self.variables.insert(name.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            self.changed.insert(name.to_string());
        }
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Cliché complet des variables, trié par nom.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .variables
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Draine les variables modifiées depuis la dernière collecte.
    pub(crate) fn take_changed(&mut self) -> Vec<(String, String)> {
        let names = std::mem::take(&mut self.changed);
        names
            .into_iter()
            .filter_map(|name| {
                let value = self.variables.get(&name)?.clone();
                Some((name, value))
            })
            .collect()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("service_id", &self.service_id)
            .field("service_type", &self.service_type)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("variables", &self.variables)
            .finish()
    }
}

/// Un appareil UPnP exposé par le renderer.
#[derive(Debug)]
pub struct Device {
    udn: String,
    friendly_name: String,
    device_type: String,
    services: Vec<Service>,
}

impl Device {
    pub fn new(
        udn: impl Into<String>,
        friendly_name: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            udn: udn.into(),
            friendly_name: friendly_name.into(),
            device_type: device_type.into(),
            services: Vec::new(),
        }
    }

    pub fn udn(&self) -> &str {
        &self.udn
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn add_service(&mut self, service: Service) {
        self.services.push(service);
    }

    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.service_id() == service_id)
    }

    pub(crate) fn service_mut(&mut self, service_id: &str) -> Option<&mut Service> {
        self.services
            .iter_mut()
            .find(|s| s.service_id() == service_id)
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub(crate) fn services_mut(&mut self) -> &mut [Service] {
        &mut self.services
    }
}
