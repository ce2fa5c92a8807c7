//! # Rendu DIDL-Lite
//!
//! Sérialise les enregistrements normalisés vers le XML DIDL-Lite que les
//! points de contrôle UPnP attendent dans les réponses Browse et Search.
//! Uniquement le sens sortant : rien ici ne parse du DIDL.

use serde::Serialize;

use crate::records::{MediaItem, MediaRecord};
use crate::{PluginError, Result};

/// Racine d'un document DIDL-Lite
#[derive(Debug, Clone, Serialize)]
#[serde(rename = "DIDL-Lite")]
struct DIDLLite {
    #[serde(rename = "@xmlns")]
    xmlns: String,

    #[serde(rename = "@xmlns:upnp")]
    xmlns_upnp: String,

    #[serde(rename = "@xmlns:dc")]
    xmlns_dc: String,

    #[serde(rename = "container")]
    containers: Vec<Container>,

    #[serde(rename = "item")]
    items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize)]
struct Container {
    #[serde(rename = "@id")]
    id: String,

    #[serde(rename = "@parentID")]
    parent_id: String,

    #[serde(rename = "@restricted")]
    restricted: String,

    #[serde(rename = "dc:title")]
    title: String,

    #[serde(rename = "upnp:class")]
    class: String,
}

#[derive(Debug, Clone, Serialize)]
struct Item {
    #[serde(rename = "@id")]
    id: String,

    #[serde(rename = "@parentID")]
    parent_id: String,

    #[serde(rename = "@restricted")]
    restricted: String,

    #[serde(rename = "dc:title")]
    title: String,

    #[serde(rename = "upnp:class")]
    class: String,

    #[serde(rename = "upnp:artist", skip_serializing_if = "Option::is_none")]
    artist: Option<String>,

    #[serde(rename = "upnp:genre", skip_serializing_if = "Option::is_none")]
    genre: Option<String>,

    #[serde(
        rename = "upnp:originalTrackNumber",
        skip_serializing_if = "Option::is_none"
    )]
    original_track_number: Option<String>,

    #[serde(rename = "upnp:albumArtURI", skip_serializing_if = "Option::is_none")]
    album_art: Option<String>,

    #[serde(rename = "res")]
    resources: Vec<Resource>,
}

/// Ressource média (la piste elle-même)
#[derive(Debug, Clone, Serialize)]
struct Resource {
    #[serde(rename = "@protocolInfo")]
    protocol_info: String,

    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    duration: Option<String>,

    #[serde(rename = "$text")]
    url: String,
}

/// Rend un lot d'enregistrements en document DIDL-Lite complet.
pub fn render_records(records: &[MediaRecord]) -> Result<String> {
    let mut containers = Vec::new();
    let mut items = Vec::new();
    for record in records {
        match record {
            MediaRecord::Container(container) => containers.push(Container {
                id: container.id.clone(),
                parent_id: container.parent_id.clone(),
                restricted: "1".to_string(),
                title: container.title.clone(),
                class: "object.container".to_string(),
            }),
            MediaRecord::Item(item) => items.push(to_didl_item(item)),
        }
    }

    let didl = DIDLLite {
        xmlns: "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/".to_string(),
        xmlns_upnp: "urn:schemas-upnp-org:metadata-1-0/upnp/".to_string(),
        xmlns_dc: "http://purl.org/dc/elements/1.1/".to_string(),
        containers,
        items,
    };

    quick_xml::se::to_string(&didl).map_err(|e| PluginError::Didl(e.to_string()))
}

fn to_didl_item(item: &MediaItem) -> Item {
    Item {
        id: item.id.clone(),
        parent_id: item.parent_id.clone(),
        restricted: "1".to_string(),
        title: item.title.clone(),
        class: "object.item.audioItem.musicTrack".to_string(),
        artist: non_empty(&item.artist),
        genre: non_empty(&item.genre),
        original_track_number: (item.track_number > 0).then(|| item.track_number.to_string()),
        album_art: non_empty(&item.art_uri),
        resources: vec![Resource {
            protocol_info: "http-get:*:*:*".to_string(),
            duration: (item.duration_seconds > 0).then(|| format_duration(item.duration_seconds)),
            url: item.uri.clone(),
        }],
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Formate une durée en `H:MM:SS`, la forme attendue dans `res@duration`.
fn format_duration(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{}:{:02}:{:02}", hours, minutes, secs)
}
