//! # Cache de résolution à emplacement unique
//!
//! Les appareils de rendu demandent souvent la même URL deux fois en
//! quelques millisecondes : une requête HEAD de sondage puis le GET de
//! lecture. Résoudre deux fois coûte un aller-retour backend complet ;
//! un seul emplacement mémorisé avec une durée de vie courte suffit à
//! absorber ce motif sans jamais servir une URL périmée.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Durée de vie d'une résolution mémorisée.
pub const RESOLUTION_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct CachedResolution {
    token: String,
    url: String,
    resolved_at: Instant,
}

/// Mémorise la dernière résolution réussie d'un jeton de piste.
///
/// Un seul emplacement : mémoriser une nouvelle résolution écrase la
/// précédente. Une entrée n'est servie que si le jeton correspond
/// exactement et que son âge ne dépasse pas la durée de vie.
#[derive(Debug)]
pub struct UrlCache {
    ttl: Duration,
    slot: Mutex<Option<CachedResolution>>,
}

impl UrlCache {
    pub fn new() -> Self {
        Self::with_ttl(RESOLUTION_TTL)
    }

    /// Construit un cache avec une durée de vie explicite, surtout utile
    /// pour forcer l'expiration dans les tests.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Retourne l'URL mémorisée pour `token` si elle est encore fraîche.
    pub fn lookup(&self, token: &str) -> Option<String> {
        let slot = self.slot.lock();
        let cached = slot.as_ref()?;
        if cached.token != token {
            return None;
        }
        if cached.resolved_at.elapsed() > self.ttl {
            debug!(token = %token, "Cached resolution expired");
            return None;
        }
        Some(cached.url.clone())
    }

    /// Mémorise une résolution réussie, en écrasant l'emplacement.
    pub fn store(&self, token: &str, url: &str) {
        let mut slot = self.slot.lock();
        *slot = Some(CachedResolution {
            token: token.to_string(),
            url: url.to_string(),
            resolved_at: Instant::now(),
        });
    }

    /// Vide l'emplacement. Appelé après toute résolution échouée pour
    /// qu'un échec ne laisse jamais une URL douteuse derrière lui.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

impl Default for UrlCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_hits_on_same_token() {
        let cache = UrlCache::new();
        cache.store("/qobuz/track?version=1&trackId=42", "http://cdn/42.flac");
        assert_eq!(
            cache.lookup("/qobuz/track?version=1&trackId=42"),
            Some("http://cdn/42.flac".to_string())
        );
    }

    #[test]
    fn test_lookup_misses_on_other_token() {
        let cache = UrlCache::new();
        cache.store("/qobuz/track?version=1&trackId=42", "http://cdn/42.flac");
        assert_eq!(cache.lookup("/qobuz/track?version=1&trackId=43"), None);
    }

    #[test]
    fn test_store_overwrites_the_single_slot() {
        let cache = UrlCache::new();
        cache.store("token-a", "http://cdn/a");
        cache.store("token-b", "http://cdn/b");
        assert_eq!(cache.lookup("token-a"), None);
        assert_eq!(cache.lookup("token-b"), Some("http://cdn/b".to_string()));
    }

    #[test]
    fn test_expired_entry_is_not_served() {
        let cache = UrlCache::with_ttl(Duration::ZERO);
        cache.store("token", "http://cdn/x");
        assert_eq!(cache.lookup("token"), None);
    }

    #[test]
    fn test_clear_empties_the_slot() {
        let cache = UrlCache::new();
        cache.store("token", "http://cdn/x");
        cache.clear();
        assert_eq!(cache.lookup("token"), None);
    }
}
