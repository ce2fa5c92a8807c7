//! Boucle de notification des changements d'état.
//!
//! La collecte draine les variables modifiées sous le verrou du registre ;
//! la livraison se fait après relâchement, pour qu'un sink lent ne bloque
//! jamais le dispatch des actions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::registry::{DeviceRegistry, ServiceChanges};

/// Période de la boucle d'événements.
pub const EVENT_PERIOD: Duration = Duration::from_millis(500);

/// Destination des notifications d'état.
///
/// L'implémentation gère elle-même ses échecs de livraison : la boucle
/// ne rejoue pas un lot, les variables drainées sont considérées livrées.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn notify(&self, changes: &ServiceChanges);
}

/// Une passe complète de collecte puis livraison.
pub async fn eventing_pass(registry: &DeviceRegistry, sink: &dyn EventSink) {
    let batches = registry.collect_changed().await;
    for changes in &batches {
        debug!(
            device = %changes.udn,
            service = %changes.service_id,
            variables = changes.variables.len(),
            "📡 Notifying state changes"
        );
        sink.notify(changes).await;
    }
}

/// Démarre la boucle périodique de notification.
pub fn spawn_event_loop(
    registry: Arc<DeviceRegistry>,
    sink: Arc<dyn EventSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EVENT_PERIOD);
        loop {
            ticker.tick().await;
            eventing_pass(&registry, sink.as_ref()).await;
        }
    })
}
