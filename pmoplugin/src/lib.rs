//! # PMOPlugin - Adaptateur de contenu vers les workers
//!
//! Ce crate fait le pont entre le vocabulaire ContentDirectory du daemon et
//! les backends de contenu hors processus :
//!
//! - [`records`] : décodage du tableau JSON renvoyé par un backend en
//!   enregistrements normalisés containers/items ;
//! - [`didl`] : rendu de ces enregistrements en document DIDL-Lite ;
//! - [`ContentPlugin`] : les opérations browse/search/resolve d'un plugin,
//!   chacune traduite en appel de procédure RPC vers son worker ;
//! - [`UrlCache`] : le cache de résolution à une seule entrée, propriété
//!   exclusive de chaque plugin ;
//! - [`PluginRegistry`] : l'ensemble des plugins actifs et la sélection par
//!   plus long préfixe de chemin.

pub mod adapter;
pub mod cache;
pub mod didl;
pub mod records;
pub mod registry;

pub use adapter::{BrowseFlag, BrowseSlice, ContentPlugin, MediaDetails};
pub use cache::{RESOLUTION_TTL, UrlCache};
pub use records::{MediaContainer, MediaItem, MediaRecord};
pub use registry::PluginRegistry;

/// Erreurs de l'adaptateur. Les échecs de worker sont encapsulés tels
/// quels ; tout le reste est local à la requête en cours.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error(transparent)]
    Worker(#[from] pmorpc::WorkerError),

    #[error("worker reply is missing the `{0}` field")]
    MissingField(&'static str),

    #[error("backend entries are not valid JSON: {0}")]
    BadEntries(#[from] serde_json::Error),

    #[error("backend entries are not a JSON array")]
    NotAnArray,

    #[error("invalid search expression `{0}`: expected a single `field op value` triple")]
    BadSearchExpression(String),

    #[error("unsupported search field `{0}`")]
    UnknownSearchField(String),

    #[error("no media URL resolved for `{0}`")]
    ResolutionFailed(String),

    #[error("DIDL-Lite serialization failed: {0}")]
    Didl(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;
