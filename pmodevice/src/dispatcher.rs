//! Machine de dispatch des événements protocole.
//!
//! Un événement entrant traverse Reçu → Routé → Décodé → Invoqué →
//! Encodé → Livré, et s'effondre en rejet codé à la première erreur.
//! Un rejet est une réponse normale du point de vue du processus :
//! jamais un crash, jamais un impact sur les autres appareils.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::actions::ActionError;
use crate::registry::DeviceRegistry;
use crate::soap;

/// Les trois sortes d'événements que le transport protocole livre.
#[derive(Debug, Clone)]
pub enum UpnpEvent {
    /// Invocation d'action : identité cible et document d'arguments brut.
    ActionInvoke {
        device: String,
        service: String,
        body: String,
    },
    /// Demande de souscription aux événements d'un service.
    Subscribe { device: String, service: String },
    /// Interrogation directe d'une variable d'état (forme dépréciée).
    VariableQuery {
        device: String,
        service: String,
        variable: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReply {
    /// Document de réponse encodé d'une action réussie.
    ActionResponse(String),
    /// Souscription acceptée, avec le cliché d'état initial du service.
    SubscriptionAccepted {
        initial_state: Vec<(String, String)>,
    },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Malformed argument document: {0}")]
    BadArguments(String),

    #[error(transparent)]
    ActionFailed(#[from] ActionError),

    #[error("State variable queries are not supported")]
    NotSupported,

    #[error("Response encoding failed: {0}")]
    Encoding(String),
}

impl DispatchError {
    /// Code d'erreur UPnP annoncé au point de contrôle.
    ///
    /// Les erreurs d'arguments remontées par un handler rejoignent la
    /// classe 402 des documents malformés ; seul un échec d'exécution
    /// vaut 501.
    pub fn code(&self) -> u16 {
        match self {
            DispatchError::UnknownAction(_) => 401,
            DispatchError::UnknownDevice(_)
            | DispatchError::UnknownService(_)
            | DispatchError::BadArguments(_)
            | DispatchError::ActionFailed(
                ActionError::MissingArgument(_) | ActionError::InvalidArgument { .. },
            ) => 402,
            DispatchError::ActionFailed(ActionError::Failed(_)) | DispatchError::Encoding(_) => {
                501
            }
            DispatchError::NotSupported => 602,
        }
    }

    pub fn description(&self) -> &'static str {
        match self.code() {
            401 => "Invalid Action",
            402 => "Invalid Args",
            602 => "Not Supported",
            _ => "Action Failed",
        }
    }
}

impl DeviceRegistry {
    /// Route un événement protocole vers l'appareil cible.
    pub async fn dispatch(&self, event: UpnpEvent) -> Result<DispatchReply, DispatchError> {
        match event {
            UpnpEvent::ActionInvoke {
                device,
                service,
                body,
            } => self.dispatch_action(&device, &service, &body).await,
            UpnpEvent::Subscribe { device, service } => {
                self.dispatch_subscribe(&device, &service).await
            }
            UpnpEvent::VariableQuery { variable, .. } => {
                warn!(variable = %variable, "Rejecting deprecated state variable query");
                Err(DispatchError::NotSupported)
            }
        }
    }

    async fn dispatch_action(
        &self,
        device_udn: &str,
        service_id: &str,
        body: &str,
    ) -> Result<DispatchReply, DispatchError> {
        // Routé → Décodé → Invoqué sous le verrou du registre ; une
        // passe d'événements ne peut pas s'intercaler.
        let (action, service_type, output) = {
            let devices = self.inner.lock().await;
            let device = devices
                .get(device_udn)
                .ok_or_else(|| DispatchError::UnknownDevice(device_udn.to_string()))?;
            let service = device
                .service(service_id)
                .ok_or_else(|| DispatchError::UnknownService(service_id.to_string()))?;
            let document = soap::parse_action_document(body)
                .map_err(|e| DispatchError::BadArguments(e.to_string()))?;
            let handler = service
                .handler(&document.name)
                .ok_or_else(|| DispatchError::UnknownAction(document.name.clone()))?
                .clone();
            let service_type = service.service_type().to_string();

            debug!(
                device = %device_udn,
                service = %service_id,
                action = %document.name,
                "📡 Invoking action"
            );
            let output = handler(service_type.clone(), Arc::new(document.arguments)).await?;
            (document.name, service_type, output)
        };

        let xml = soap::build_action_response(&service_type, &action, &output)
            .map_err(|e| DispatchError::Encoding(e.to_string()))?;
        Ok(DispatchReply::ActionResponse(xml))
    }

    async fn dispatch_subscribe(
        &self,
        device_udn: &str,
        service_id: &str,
    ) -> Result<DispatchReply, DispatchError> {
        let devices = self.inner.lock().await;
        let device = devices
            .get(device_udn)
            .ok_or_else(|| DispatchError::UnknownDevice(device_udn.to_string()))?;
        let service = device
            .service(service_id)
            .ok_or_else(|| DispatchError::UnknownService(service_id.to_string()))?;

        let initial_state = service.snapshot();
        debug!(
            device = %device_udn,
            service = %service_id,
            variables = initial_state.len(),
            "📡 Subscription accepted"
        );
        Ok(DispatchReply::SubscriptionAccepted { initial_state })
    }
}
