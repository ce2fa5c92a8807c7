//! Souscriptions GENA et livraison des notifications d'état.
//!
//! Le magasin alloue les SID, retient le callback de chaque abonné et
//! pousse les propertyset en requêtes NOTIFY. La boucle d'événements ne
//! connaît que le trait [`EventSink`] : toute la livraison HTTP vit ici,
//! en tâches détachées pour qu'un abonné injoignable ne retarde jamais
//! une passe de notification.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pmodevice::soap::build_property_set;
use pmodevice::{EventSink, ServiceChanges};
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

/// Un abonné : le service suivi et l'URL à notifier.
#[derive(Debug, Clone)]
struct Subscriber {
    udn: String,
    service_id: String,
    callback: String,
}

/// Registre des souscriptions actives, partagé entre le shim HTTP et la
/// boucle de notification.
pub struct SubscriptionStore {
    timeout_secs: usize,
    subscribers: RwLock<HashMap<String, Subscriber>>, // SID → abonné
    seqid: Mutex<HashMap<String, u64>>,               // SID → dernier SEQ émis
}

impl SubscriptionStore {
    pub fn new(timeout_secs: usize) -> Self {
        Self {
            timeout_secs,
            subscribers: RwLock::new(HashMap::new()),
            seqid: Mutex::new(HashMap::new()),
        }
    }

    /// Valeur de l'en-tête `Timeout` annoncée aux abonnés. Le bail est
    /// fixe : une demande de durée différente n'est pas honorée.
    pub fn timeout_header(&self) -> String {
        format!("Second-{}", self.timeout_secs)
    }

    /// Enregistre une souscription et retourne son SID `uuid:` frais.
    pub async fn subscribe(&self, udn: &str, service_id: &str, callback: &str) -> String {
        let sid = format!("uuid:{}", Uuid::new_v4());
        let subscriber = Subscriber {
            udn: udn.to_string(),
            service_id: service_id.to_string(),
            callback: callback.to_string(),
        };
        self.subscribers
            .write()
            .await
            .insert(sid.clone(), subscriber);
        sid
    }

    /// Renouvelle un bail. Seule l'existence du SID compte.
    pub async fn renew(&self, sid: &str) -> bool {
        self.subscribers.read().await.contains_key(sid)
    }

    pub async fn unsubscribe(&self, sid: &str) {
        self.subscribers.write().await.remove(sid);
        self.seqid.lock().unwrap().remove(sid);
    }

    pub async fn count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    fn next_seq(&self, sid: &str) -> u64 {
        let mut seqid = self.seqid.lock().unwrap();
        let counter = seqid.entry(sid.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Envoie le cliché initial d'une souscription fraîche, SEQ 0.
    ///
    /// Un cliché vide n'envoie rien : la souscription reste valide et le
    /// premier NOTIFY viendra d'un changement réel.
    pub async fn send_initial_state(&self, sid: &str, variables: &[(String, String)]) {
        if variables.is_empty() {
            return;
        }
        let callback = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(sid) {
                Some(subscriber) => subscriber.callback.clone(),
                None => return,
            }
        };
        match build_property_set(variables) {
            Ok(body) => spawn_notify(callback, sid.to_string(), 0, body),
            Err(e) => error!(sid = %sid, error = %e, "Failed to encode initial property set"),
        }
    }
}

#[async_trait]
impl EventSink for SubscriptionStore {
    async fn notify(&self, changes: &ServiceChanges) {
        let targets: Vec<(String, String)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .filter(|(_, s)| s.udn == changes.udn && s.service_id == changes.service_id)
                .map(|(sid, s)| (sid.clone(), s.callback.clone()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let body = match build_property_set(&changes.variables) {
            Ok(body) => body,
            Err(e) => {
                error!(service = %changes.service_id, error = %e, "Failed to encode property set");
                return;
            }
        };

        for (sid, callback) in targets {
            let seq = self.next_seq(&sid);
            spawn_notify(callback, sid, seq, body.clone());
        }
    }
}

/// Pousse un NOTIFY GENA vers un callback, en tâche détachée.
///
/// Les chevrons entourant l'URL de callback, présents dans l'en-tête
/// GENA d'origine, sont retirés avant l'envoi.
fn spawn_notify(callback: String, sid: String, seq: u64, body: String) {
    tokio::spawn(async move {
        let callback = callback
            .trim()
            .trim_matches(|c| c == '<' || c == '>')
            .to_string();

        let client = reqwest::Client::new();
        match client
            .request(reqwest::Method::from_bytes(b"NOTIFY").unwrap(), &callback)
            .header("Content-Type", r#"text/xml; charset="utf-8""#)
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SID", &sid)
            .header("SEQ", seq.to_string())
            .body(body)
            .send()
            .await
        {
            Ok(response) => {
                debug!(
                    callback = %callback,
                    seq = %seq,
                    status = %response.status(),
                    "✅ Event notification delivered"
                );
            }
            Err(e) => {
                error!(callback = %callback, error = %e, "Failed to deliver event notification");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    const UDN: &str = "uuid:test-bridge";
    const CD_ID: &str = "urn:upnp-org:serviceId:ContentDirectory";

    #[derive(Debug, Clone)]
    struct CapturedNotify {
        method: String,
        nt: String,
        nts: String,
        sid: String,
        seq: String,
        body: String,
    }

    /// Petit serveur qui capture toutes les requêtes reçues sur /cb.
    async fn spawn_callback_sink() -> (String, Arc<Mutex<Vec<CapturedNotify>>>) {
        let seen: Arc<Mutex<Vec<CapturedNotify>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();

        let app = axum::Router::new().route(
            "/cb",
            axum::routing::any(move |request: axum::extract::Request| {
                let captured = captured.clone();
                async move {
                    let (parts, body) = request.into_parts();
                    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                    let header = |name: &str| {
                        parts
                            .headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string()
                    };
                    captured.lock().unwrap().push(CapturedNotify {
                        method: parts.method.to_string(),
                        nt: header("NT"),
                        nts: header("NTS"),
                        sid: header("SID"),
                        seq: header("SEQ"),
                        body: String::from_utf8_lossy(&bytes).to_string(),
                    });
                    axum::http::StatusCode::OK
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/cb"), seen)
    }

    async fn wait_for_notifies(
        seen: &Arc<Mutex<Vec<CapturedNotify>>>,
        count: usize,
    ) -> Vec<CapturedNotify> {
        for _ in 0..100 {
            {
                let guard = seen.lock().unwrap();
                if guard.len() >= count {
                    return guard.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        seen.lock().unwrap().clone()
    }

    fn changes(variables: &[(&str, &str)]) -> ServiceChanges {
        ServiceChanges {
            udn: UDN.to_string(),
            service_id: CD_ID.to_string(),
            service_type: "urn:schemas-upnp-org:service:ContentDirectory:1".to_string(),
            variables: variables
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_allocates_distinct_uuid_sids() {
        let store = SubscriptionStore::new(1800);
        let first = store.subscribe(UDN, CD_ID, "http://10.0.0.2:49200/").await;
        let second = store.subscribe(UDN, CD_ID, "http://10.0.0.3:49200/").await;

        assert!(first.starts_with("uuid:"));
        assert!(second.starts_with("uuid:"));
        assert_ne!(first, second);
        assert_eq!(store.count().await, 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_forgets_the_sid() {
        let store = SubscriptionStore::new(1800);
        let sid = store.subscribe(UDN, CD_ID, "http://10.0.0.2:49200/").await;

        assert!(store.renew(&sid).await);
        store.unsubscribe(&sid).await;
        assert!(!store.renew(&sid).await);
        assert_eq!(store.count().await, 0);
    }

    #[test]
    fn test_timeout_header_carries_the_configured_lease() {
        assert_eq!(SubscriptionStore::new(1800).timeout_header(), "Second-1800");
        assert_eq!(SubscriptionStore::new(300).timeout_header(), "Second-300");
    }

    #[tokio::test]
    async fn test_notify_delivers_a_property_set_with_increasing_seq() {
        let (callback, seen) = spawn_callback_sink().await;
        let store = SubscriptionStore::new(1800);
        // Chevrons GENA volontairement conservés autour du callback.
        let sid = store.subscribe(UDN, CD_ID, &format!("<{callback}>")).await;

        store.notify(&changes(&[("SystemUpdateID", "2")])).await;
        let delivered = wait_for_notifies(&seen, 1).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].method, "NOTIFY");
        assert_eq!(delivered[0].nt, "upnp:event");
        assert_eq!(delivered[0].nts, "upnp:propchange");
        assert_eq!(delivered[0].sid, sid);
        assert_eq!(delivered[0].seq, "1");
        assert!(delivered[0].body.contains("e:propertyset"));
        assert!(delivered[0].body.contains("SystemUpdateID"));
        assert!(delivered[0].body.contains("2"));

        store.notify(&changes(&[("SystemUpdateID", "3")])).await;
        let delivered = wait_for_notifies(&seen, 2).await;
        assert_eq!(delivered[1].seq, "2");
    }

    #[tokio::test]
    async fn test_initial_state_is_delivered_with_seq_zero() {
        let (callback, seen) = spawn_callback_sink().await;
        let store = SubscriptionStore::new(1800);
        let sid = store.subscribe(UDN, CD_ID, &callback).await;

        store
            .send_initial_state(
                &sid,
                &[("SystemUpdateID".to_string(), "1".to_string())],
            )
            .await;

        let delivered = wait_for_notifies(&seen, 1).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].seq, "0");
        assert_eq!(delivered[0].sid, sid);
        assert!(delivered[0].body.contains("SystemUpdateID"));
    }

    #[tokio::test]
    async fn test_empty_initial_state_sends_nothing() {
        let (callback, seen) = spawn_callback_sink().await;
        let store = SubscriptionStore::new(1800);
        let sid = store.subscribe(UDN, CD_ID, &callback).await;

        store.send_initial_state(&sid, &[]).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_changes_for_another_service_are_not_delivered() {
        let (callback, seen) = spawn_callback_sink().await;
        let store = SubscriptionStore::new(1800);
        store.subscribe(UDN, CD_ID, &callback).await;

        let mut other = changes(&[("SourceProtocolInfo", "http-get:*:*:*")]);
        other.service_id = "urn:upnp-org:serviceId:ConnectionManager".to_string();
        store.notify(&other).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(seen.lock().unwrap().is_empty());
    }
}
