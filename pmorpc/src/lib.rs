//! # PMORpc - Protocole RPC vers les workers de contenu
//!
//! Ce crate implémente le protocole privé entre le daemon et ses backends
//! de contenu, qui sont des processus fils de longue durée ("workers").
//! Chaque worker parle un protocole texte à trames de longueur sur son
//! stdin/stdout :
//!
//! ```text
//! nom: <longueur-en-octets>\n
//! <octets bruts>
//! ...
//! \n             <- ligne vide = fin de message
//! ```
//!
//! ## Architecture
//!
//! - [`RpcChannel`] : encodage/décodage des trames sur un flux d'octets
//!   quelconque (stdin/stdout d'un fils en production, paire `duplex` en
//!   test).
//! - [`Worker`] : cycle de vie d'un processus fils (démarrage paresseux,
//!   injection d'environnement, détection de crash, destruction forcée) et
//!   sérialisation des appels, un seul appel en vol par worker.
//! - [`RpcCaller`] : la couture par laquelle le reste du daemon invoque des
//!   procédures distantes, mockable dans les tests.
//!
//! Le protocole est volontairement synchrone : une requête, une réponse,
//! dans cet ordre. Toute trame malformée rend le canal inutilisable et le
//! worker est détruit puis relancé au prochain appel.

mod channel;
mod worker;

pub use channel::{ChannelError, PROC_FIELD, RpcChannel, RpcFields, RpcRequest, STATUS_FIELD};
pub use worker::{RpcCaller, Worker, WorkerError, WorkerSpec};
