//! Du chemin HTTP entrant au plan de réponse.
//!
//! Une requête de streaming porte le chemin publié dans le DIDL et un
//! paramètre `trackId`. On en reconstruit le jeton canonique, on choisit
//! le plugin par plus long préfixe, puis la résolution donne soit une
//! redirection, soit l'URL à proxifier selon le mode configuré.

use std::sync::Arc;

use axum::http::StatusCode;
use pmoplugin::{PluginError, PluginRegistry};
use thiserror::Error;
use tracing::{debug, warn};

use crate::proxy::StreamError;

/// Paramètre de requête identifiant la piste.
pub const TRACK_ID_PARAM: &str = "trackId";

/// Mode de réponse du portail de streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Redirection 302 vers l'URL résolue.
    #[default]
    Redirect,
    /// Le portail ouvre l'URL lui-même et sert les octets.
    Proxy,
}

impl StreamMode {
    /// Décode la valeur de configuration `streaming.mode`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "redirect" => Some(StreamMode::Redirect),
            "proxy" => Some(StreamMode::Proxy),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Missing or empty trackId parameter")]
    MissingTrackId,

    #[error("No plugin serves path {0}")]
    NoPlugin(String),

    #[error(transparent)]
    Resolution(#[from] PluginError),

    #[error("Resolved URL is not HTTP: {0}")]
    NotHttp(String),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl GatewayError {
    /// Statut HTTP renvoyé au client ; jamais une redirection.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingTrackId => StatusCode::BAD_REQUEST,
            GatewayError::NoPlugin(_) => StatusCode::NOT_FOUND,
            GatewayError::Resolution(_) | GatewayError::NotHttp(_) | GatewayError::Stream(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

/// Reconstruit le jeton canonique que les backends résolvent : le chemin
/// d'origine suivi de la forme de requête normalisée.
pub fn canonical_token(path: &str, track_id: &str) -> String {
    format!("{path}?version=1&trackId={track_id}")
}

/// Ce que la réponse HTTP devra faire, décidé avant toute écriture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPlan {
    /// Rediriger le client vers l'URL résolue, telle quelle.
    Redirect(String),
    /// Ouvrir l'URL côté portail ; le débit sert aux seeks temporels.
    Proxy {
        media_url: String,
        kbps: Option<u32>,
    },
}

/// Résout les requêtes de streaming contre les plugins enregistrés.
pub struct StreamResolver {
    registry: Arc<PluginRegistry>,
    mode: StreamMode,
}

impl StreamResolver {
    pub fn new(registry: Arc<PluginRegistry>, mode: StreamMode) -> Self {
        Self { registry, mode }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub async fn plan_request(
        &self,
        path: &str,
        track_id: Option<&str>,
    ) -> Result<StreamPlan, GatewayError> {
        let track_id = track_id
            .filter(|id| !id.is_empty())
            .ok_or(GatewayError::MissingTrackId)?;
        let plugin = self
            .registry
            .plugin_for_path(path)
            .await
            .ok_or_else(|| GatewayError::NoPlugin(path.to_string()))?;

        let token = canonical_token(path, track_id);
        debug!(plugin = %plugin.name(), token = %token, "Resolving stream request");
        let media_url = plugin.resolve(&token).await?;

        match self.mode {
            StreamMode::Redirect => {
                if media_url.starts_with("http") {
                    Ok(StreamPlan::Redirect(media_url))
                } else {
                    warn!(url = %media_url, "Resolved URL is not HTTP, refusing redirect");
                    Err(GatewayError::NotHttp(media_url))
                }
            }
            StreamMode::Proxy => {
                let details = plugin.media_details(&token).await?;
                Ok(StreamPlan::Proxy {
                    media_url,
                    kbps: details.kbps,
                })
            }
        }
    }
}
