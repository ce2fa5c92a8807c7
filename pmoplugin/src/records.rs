//! # Enregistrements médias normalisés
//!
//! Les backends répondent aux procédures `browse` et `search` par un
//! tableau JSON d'objets au vocabulaire fixe. Chaque objet porte une
//! étiquette de type obligatoire `tp` (`"ct"` container, `"it"` item) ;
//! un objet sans étiquette reconnue est abandonné avec une anomalie
//! journalisée, jamais une erreur fatale.
//!
//! Les propriétés optionnelles absentes restent à leur valeur par défaut
//! (chaîne vide, zéro). Quand plusieurs clés sources alimentent le même
//! champ normalisé (`dc:creator` puis `upnp:artist` pour l'artiste), la
//! clé rencontrée en dernier dans l'ordre de décodage écrase la
//! précédente.

use serde_json::Value;
use tracing::warn;

use crate::{PluginError, Result};

/// Un nœud de l'arborescence de contenu : container ou piste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRecord {
    Container(MediaContainer),
    Item(MediaItem),
}

impl MediaRecord {
    pub fn id(&self) -> &str {
        match self {
            MediaRecord::Container(container) => &container.id,
            MediaRecord::Item(item) => &item.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            MediaRecord::Container(container) => &container.title,
            MediaRecord::Item(item) => &item.title,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaContainer {
    pub id: String,
    pub parent_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub parent_id: String,
    pub title: String,
    pub uri: String,
    pub artist: String,
    pub genre: String,
    pub track_number: u32,
    pub art_uri: String,
    pub duration_seconds: u32,
}

/// Décode une fenêtre du tableau d'entrées d'une réponse backend.
///
/// Le parcours démarre à l'index brut `start` et s'arrête après avoir émis
/// `count` enregistrements ; une entrée abandonnée ne consomme pas la
/// fenêtre. Le total retourné est la longueur complète du tableau décodé,
/// indépendamment de la fenêtre : c'est lui que les appelants renvoient
/// comme total de pagination.
pub fn decode_window(raw: &str, start: u32, count: u32) -> Result<(u32, Vec<MediaRecord>)> {
    let parsed: Value = serde_json::from_str(raw)?;
    let Value::Array(entries) = parsed else {
        return Err(PluginError::NotAnArray);
    };

    let total = entries.len() as u32;
    let mut records = Vec::new();
    for entry in entries.iter().skip(start as usize) {
        if records.len() as u32 >= count {
            break;
        }
        if let Some(record) = decode_entry(entry) {
            records.push(record);
        }
    }
    Ok((total, records))
}

fn decode_entry(entry: &Value) -> Option<MediaRecord> {
    if !entry.is_object() {
        warn!("🗑️ Dropping backend entry: not a JSON object");
        return None;
    }

    match entry.get("tp").and_then(Value::as_str) {
        Some("ct") => Some(MediaRecord::Container(MediaContainer {
            id: string_of(entry, "id"),
            parent_id: string_of(entry, "pid"),
            title: string_of(entry, "tt"),
        })),
        Some("it") => {
            let mut item = MediaItem {
                id: string_of(entry, "id"),
                parent_id: string_of(entry, "pid"),
                title: string_of(entry, "tt"),
                uri: string_of(entry, "uri"),
                ..Default::default()
            };
            // Deux clés alimentent l'artiste ; la seconde écrase.
            item.artist = string_of(entry, "dc:creator");
            if let Some(artist) = opt_string_of(entry, "upnp:artist") {
                item.artist = artist;
            }
            item.genre = string_of(entry, "upnp:genre");
            item.track_number = number_of(entry, "upnp:originalTrackNumber");
            item.art_uri = string_of(entry, "upnp:albumArtURI");
            item.duration_seconds = number_of(entry, "duration");
            Some(MediaRecord::Item(item))
        }
        Some(other) => {
            warn!(tag = %other, "🗑️ Dropping backend entry with unrecognized type tag");
            None
        }
        None => {
            warn!("🗑️ Dropping backend entry without a type tag");
            None
        }
    }
}

fn opt_string_of(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_of(entry: &Value, key: &str) -> String {
    opt_string_of(entry, key).unwrap_or_default()
}

/// Les backends envoient les nombres tantôt en nombre JSON, tantôt en
/// chaîne de chiffres ; les deux formes sont acceptées, tout le reste vaut
/// zéro.
fn number_of(entry: &Value, key: &str) -> u32 {
    match entry.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(raw: &str) -> Vec<MediaRecord> {
        decode_window(raw, 0, u32::MAX).unwrap().1
    }

    #[test]
    fn test_decode_container_and_item() {
        let raw = r#"[
            {"tp": "ct", "id": "qobuz$root", "pid": "0", "tt": "Albums"},
            {"tp": "it", "id": "qobuz$tr1", "pid": "qobuz$root", "tt": "Echoes",
             "uri": "http://host:49149/qobuz/track?version=1&trackId=tr1",
             "dc:creator": "Someone", "upnp:artist": "Pink Floyd",
             "upnp:genre": "Rock", "upnp:originalTrackNumber": "1",
             "upnp:albumArtURI": "http://art/echoes.jpg", "duration": 1415}
        ]"#;

        let records = decode_all(raw);
        assert_eq!(records.len(), 2);

        let MediaRecord::Container(container) = &records[0] else {
            panic!("expected a container");
        };
        assert_eq!(container.id, "qobuz$root");
        assert_eq!(container.parent_id, "0");
        assert_eq!(container.title, "Albums");

        let MediaRecord::Item(item) = &records[1] else {
            panic!("expected an item");
        };
        assert_eq!(item.title, "Echoes");
        // upnp:artist arrive après dc:creator et doit l'écraser.
        assert_eq!(item.artist, "Pink Floyd");
        assert_eq!(item.track_number, 1);
        assert_eq!(item.duration_seconds, 1415);
    }

    #[test]
    fn test_window_starts_at_raw_index_and_caps_emitted() {
        let entries: Vec<String> = (0..10)
            .map(|i| format!(r#"{{"tp": "it", "id": "tr{}", "tt": "Track {}"}}"#, i, i))
            .collect();
        let raw = format!("[{}]", entries.join(","));

        let (total, records) = decode_window(&raw, 2, 3).unwrap();
        assert_eq!(total, 10);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id(), "tr2");
        assert_eq!(records[2].id(), "tr4");
    }

    #[test]
    fn test_dropped_entries_count_in_total_not_in_window() {
        let raw = r#"[
            {"tp": "it", "id": "a"},
            {"no-tag": true},
            {"tp": "it", "id": "b"},
            {"tp": "it", "id": "c"}
        ]"#;

        let (total, records) = decode_window(raw, 0, 2).unwrap();
        // L'entrée sans étiquette compte dans le total décodé mais ne
        // consomme pas la fenêtre demandée.
        assert_eq!(total, 4);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id(), "a");
        assert_eq!(records[1].id(), "b");
    }

    #[test]
    fn test_entries_without_type_tag_are_dropped() {
        let raw = r#"[
            {"id": "1", "tt": "no tag"},
            {"tp": "xx", "id": "2", "tt": "bad tag"},
            {"tp": "it", "id": "3", "tt": "kept"}
        ]"#;

        let records = decode_all(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), "3");
    }

    #[test]
    fn test_absent_optional_fields_default() {
        let raw = r#"[{"tp": "it", "id": "x"}]"#;
        let records = decode_all(raw);
        let MediaRecord::Item(item) = &records[0] else {
            panic!("expected an item");
        };
        assert_eq!(item.title, "");
        assert_eq!(item.artist, "");
        assert_eq!(item.uri, "");
        assert_eq!(item.track_number, 0);
        assert_eq!(item.duration_seconds, 0);
    }

    #[test]
    fn test_creator_used_when_artist_key_absent() {
        let raw = r#"[{"tp": "it", "id": "x", "dc:creator": "Fallback Artist"}]"#;
        let records = decode_all(raw);
        let MediaRecord::Item(item) = &records[0] else {
            panic!("expected an item");
        };
        assert_eq!(item.artist, "Fallback Artist");
    }

    #[test]
    fn test_numbers_accept_both_json_forms() {
        let raw = r#"[
            {"tp": "it", "id": "a", "duration": "90", "upnp:originalTrackNumber": 7},
            {"tp": "it", "id": "b", "duration": {"weird": true}}
        ]"#;
        let records = decode_all(raw);
        let MediaRecord::Item(a) = &records[0] else {
            panic!()
        };
        assert_eq!(a.duration_seconds, 90);
        assert_eq!(a.track_number, 7);
        let MediaRecord::Item(b) = &records[1] else {
            panic!()
        };
        assert_eq!(b.duration_seconds, 0);
    }

    #[test]
    fn test_zero_count_emits_nothing() {
        let raw = r#"[{"tp": "it", "id": "a"}]"#;
        let (total, records) = decode_window(raw, 0, 0).unwrap();
        assert_eq!(total, 1);
        assert!(records.is_empty());
    }

    #[test]
    fn test_non_array_payload_is_an_error() {
        assert!(matches!(
            decode_window(r#"{"tp": "it"}"#, 0, 1),
            Err(PluginError::NotAnArray)
        ));
        assert!(matches!(
            decode_window("not json at all", 0, 1),
            Err(PluginError::BadEntries(_))
        ));
    }
}
