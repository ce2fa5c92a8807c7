//! # Adaptateur de plugin de contenu
//!
//! Traduit les opérations ContentDirectory (browse, search) et la
//! résolution de pistes vers les procédures RPC du backend hors-processus.
//! Chaque plugin possède son superviseur de worker et son cache de
//! résolution ; les appels concurrents contre le même plugin se
//! sérialisent derrière le verrou du canal RPC.

use std::sync::Arc;

use pmorpc::RpcCaller;
use tracing::debug;

use crate::cache::UrlCache;
use crate::records::{MediaRecord, decode_window};
use crate::{PluginError, Result};

/// Mode de parcours d'un container, côté protocole UPnP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseFlag {
    /// Métadonnées de l'objet lui-même.
    Metadata,
    /// Enfants directs du container.
    Children,
}

impl BrowseFlag {
    /// Valeur envoyée au backend dans le champ `flag`.
    pub fn wire(&self) -> &'static str {
        match self {
            BrowseFlag::Metadata => "meta",
            BrowseFlag::Children => "children",
        }
    }

    /// Décode la valeur du paramètre UPnP `BrowseFlag`.
    pub fn from_upnp(flag: &str) -> Option<Self> {
        match flag {
            "BrowseMetadata" => Some(BrowseFlag::Metadata),
            "BrowseDirectChildren" => Some(BrowseFlag::Children),
            _ => None,
        }
    }
}

/// Fenêtre de résultats d'un browse ou d'une recherche.
///
/// `total` est la taille complète du résultat backend, pas celle de la
/// fenêtre : c'est le total de pagination annoncé aux points de contrôle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseSlice {
    pub total: u32,
    pub records: Vec<MediaRecord>,
}

/// Ce que le backend sait du format d'une piste.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaDetails {
    pub mimetype: Option<String>,
    /// Débit en kilobits par seconde, quand le backend le connaît.
    /// Indispensable au calcul de repositionnement temporel du proxy.
    pub kbps: Option<u32>,
}

/// Un backend de contenu raccordé au renderer.
#[derive(Debug)]
pub struct ContentPlugin {
    name: String,
    path_prefix: String,
    worker: Arc<dyn RpcCaller>,
    cache: UrlCache,
}

impl ContentPlugin {
    pub fn new(name: &str, path_prefix: &str, worker: Arc<dyn RpcCaller>) -> Self {
        Self {
            name: name.to_string(),
            path_prefix: normalize_prefix(path_prefix),
            worker,
            cache: UrlCache::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Préfixe de chemin servi par ce plugin, toujours avec `/` initial
    /// et sans `/` final.
    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// Parcourt un container du backend et retourne la fenêtre demandée.
    ///
    /// Le backend renvoie toujours le résultat complet ; la fenêtre
    /// `start`/`count` est découpée ici, et `total` reflète la taille
    /// complète quelle que soit la fenêtre.
    pub async fn browse(
        &self,
        object_id: &str,
        flag: BrowseFlag,
        start: u32,
        count: u32,
    ) -> Result<BrowseSlice> {
        debug!(
            plugin = %self.name,
            object_id = %object_id,
            flag = %flag.wire(),
            start = %start,
            count = %count,
            "Plugin browse"
        );

        let reply = self
            .worker
            .call("browse", &[("objid", object_id), ("flag", flag.wire())])
            .await?;
        let entries = reply
            .text("entries")
            .ok_or(PluginError::MissingField("entries"))?;
        let (total, records) = decode_window(entries, start, count)?;
        Ok(BrowseSlice { total, records })
    }

    /// Recherche dans le backend.
    ///
    /// Seule la forme `champ op valeur` en trois mots est acceptée, sur un
    /// petit jeu de champs connus ; toute autre expression est un échec
    /// franc, jamais une interprétation partielle.
    pub async fn search(
        &self,
        object_id: &str,
        criteria: &str,
        start: u32,
        count: u32,
    ) -> Result<BrowseSlice> {
        let (field, value) = parse_search_expression(criteria)?;
        debug!(
            plugin = %self.name,
            object_id = %object_id,
            field = %field,
            value = %value,
            "Plugin search"
        );

        let reply = self
            .worker
            .call(
                "search",
                &[("objid", object_id), ("field", field), ("value", &value)],
            )
            .await?;
        let entries = reply
            .text("entries")
            .ok_or(PluginError::MissingField("entries"))?;
        let (total, records) = decode_window(entries, start, count)?;
        Ok(BrowseSlice { total, records })
    }

    /// Résout un jeton de piste en URL média de courte durée de vie.
    ///
    /// Le cache à emplacement unique absorbe la double requête typique
    /// (sondage puis lecture) ; tout échec vide l'emplacement pour que la
    /// prochaine demande reparte d'une résolution fraîche.
    pub async fn resolve(&self, token: &str) -> Result<String> {
        if let Some(url) = self.cache.lookup(token) {
            debug!(plugin = %self.name, token = %token, "Resolution served from cache");
            return Ok(url);
        }

        let reply = match self.worker.call("trackuri", &[("path", token)]).await {
            Ok(reply) => reply,
            Err(e) => {
                self.cache.clear();
                return Err(e.into());
            }
        };

        match reply.text("media_url") {
            Some(url) if !url.is_empty() => {
                let url = url.to_string();
                self.cache.store(token, &url);
                Ok(url)
            }
            _ => {
                self.cache.clear();
                Err(PluginError::ResolutionFailed(token.to_string()))
            }
        }
    }

    /// Interroge le backend sur le format d'une piste.
    pub async fn media_details(&self, token: &str) -> Result<MediaDetails> {
        let reply = self.worker.call("mimetype", &[("path", token)]).await?;
        Ok(MediaDetails {
            mimetype: reply.text("mimetype").map(str::to_string),
            kbps: reply.text("kbs").and_then(|raw| raw.parse().ok()),
        })
    }
}

fn normalize_prefix(path_prefix: &str) -> String {
    let trimmed = path_prefix.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Découpe une expression de recherche UPnP en `(champ backend, valeur)`.
fn parse_search_expression(criteria: &str) -> Result<(&'static str, String)> {
    let tokens: Vec<&str> = criteria.split_whitespace().collect();
    let [field, _op, value] = tokens[..] else {
        return Err(PluginError::BadSearchExpression(criteria.to_string()));
    };

    let backend_field = match field {
        "upnp:artist" | "dc:author" => "artist",
        "upnp:album" => "album",
        "dc:title" => "track",
        other => return Err(PluginError::UnknownSearchField(other.to_string())),
    };

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Ok((backend_field, value.to_string()))
}
