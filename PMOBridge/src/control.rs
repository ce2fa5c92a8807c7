//! Shim HTTP du plan de contrôle UPnP.
//!
//! Deux routes par service exposé : `/service/{Name}/control` reçoit les
//! invocations SOAP, `/service/{Name}/event` les requêtes GENA. Le shim
//! ne décode jamais les corps : il transporte le document brut vers le
//! dispatcher du registre et traduit le verdict en réponse HTTP.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{any, post},
};
use pmodevice::soap::build_fault;
use pmodevice::{DeviceRegistry, DispatchReply, UpnpEvent};
use tracing::{info, warn};

use crate::events::SubscriptionStore;

pub const METHOD_SUBSCRIBE: &str = "SUBSCRIBE";
pub const METHOD_UNSUBSCRIBE: &str = "UNSUBSCRIBE";

/// État partagé des handlers du plan de contrôle.
#[derive(Clone)]
pub struct UpnpState {
    pub devices: Arc<DeviceRegistry>,
    pub subscriptions: Arc<SubscriptionStore>,
    /// UDN de l'appareil exposé, cible de tous les événements routés.
    pub udn: String,
}

/// Construit le routeur du plan de contrôle.
///
/// La route d'événements passe par `any` : SUBSCRIBE et UNSUBSCRIBE sont
/// des méthodes d'extension que les routeurs par méthode ne connaissent
/// pas.
pub fn upnp_router(state: UpnpState) -> Router {
    Router::new()
        .route("/service/{service}/control", post(control_handler))
        .route("/service/{service}/event", any(event_sub_handler))
        .with_state(state)
}

/// Identifiant de service dérivé du nom de route.
fn service_id_for(name: &str) -> String {
    format!("urn:upnp-org:serviceId:{name}")
}

fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [(CONTENT_TYPE, r#"text/xml; charset="utf-8""#)], body).into_response()
}

fn subscription_response(sid: &str, timeout: &str) -> Response {
    (
        StatusCode::OK,
        [
            (
                HeaderName::from_static("sid"),
                HeaderValue::from_str(sid).unwrap(),
            ),
            (
                HeaderName::from_static("timeout"),
                HeaderValue::from_str(timeout).unwrap(),
            ),
        ],
    )
        .into_response()
}

/// Handler des invocations SOAP.
///
/// Les fautes partent en 500 avec un document UPnPError, succès et rejet
/// portant le même content-type XML.
async fn control_handler(
    State(state): State<UpnpState>,
    Path(service): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let soap_action = headers
        .get("SOAPACTION")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim_matches('"');
    info!(service = %service, action = %soap_action, "📡 Control request");

    let event = UpnpEvent::ActionInvoke {
        device: state.udn.clone(),
        service: service_id_for(&service),
        body,
    };
    match state.devices.dispatch(event).await {
        Ok(DispatchReply::ActionResponse(xml)) => xml_response(StatusCode::OK, xml),
        // Une invocation ne produit jamais d'autre réplique.
        Ok(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(e) => {
            warn!(service = %service, error = %e, "❌ Action rejected");
            match build_fault(e.code(), e.description()) {
                Ok(fault) => xml_response(StatusCode::INTERNAL_SERVER_ERROR, fault),
                Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        }
    }
}

/// Handler des requêtes GENA.
///
/// SUBSCRIBE sans SID ouvre une souscription, avec SID la renouvelle.
/// Le bail accordé est toujours celui configuré, quelle que soit la
/// durée demandée.
async fn event_sub_handler(
    State(state): State<UpnpState>,
    Path(service): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    };
    let sid = header("SID");
    let timeout = header("Timeout");
    let callback = header("Callback");
    info!(service = %service, method = %method, "📡 Event subscription request");

    match method.as_str() {
        METHOD_SUBSCRIBE if sid.is_empty() => {
            if callback.is_empty() {
                warn!(service = %service, "❌ SUBSCRIBE without Callback");
                return StatusCode::PRECONDITION_FAILED.into_response();
            }
            let service_id = service_id_for(&service);
            let event = UpnpEvent::Subscribe {
                device: state.udn.clone(),
                service: service_id.clone(),
            };
            let initial_state = match state.devices.dispatch(event).await {
                Ok(DispatchReply::SubscriptionAccepted { initial_state }) => initial_state,
                Ok(_) => Vec::new(),
                Err(e) => {
                    warn!(service = %service, error = %e, "❌ Subscription refused");
                    return StatusCode::NOT_FOUND.into_response();
                }
            };

            let new_sid = state
                .subscriptions
                .subscribe(&state.udn, &service_id, callback)
                .await;
            info!(
                sid = %new_sid,
                callback = %callback,
                requested = %timeout,
                "🔔 New subscription"
            );

            let subscriptions = state.subscriptions.clone();
            let initial_sid = new_sid.clone();
            tokio::spawn(async move {
                subscriptions
                    .send_initial_state(&initial_sid, &initial_state)
                    .await;
            });

            subscription_response(&new_sid, &state.subscriptions.timeout_header())
        }
        METHOD_SUBSCRIBE => {
            if state.subscriptions.renew(sid).await {
                info!(sid = %sid, "♻️ Subscription renewed");
                subscription_response(sid, &state.subscriptions.timeout_header())
            } else {
                warn!(sid = %sid, "❌ Renewal for unknown SID");
                StatusCode::PRECONDITION_FAILED.into_response()
            }
        }
        METHOD_UNSUBSCRIBE => {
            if sid.is_empty() {
                warn!(service = %service, "❌ UNSUBSCRIBE without SID");
                return StatusCode::PRECONDITION_FAILED.into_response();
            }
            state.subscriptions.unsubscribe(sid).await;
            info!(sid = %sid, "🗑️ Subscription cancelled");
            StatusCode::OK.into_response()
        }
        _ => {
            warn!(method = %method, "Unsupported EventSub method");
            StatusCode::METHOD_NOT_ALLOWED.into_response()
        }
    }
}
