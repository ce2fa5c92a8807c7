//! # PMOGateway - Portail HTTP de streaming
//!
//! Les URLs publiées dans le DIDL pointent vers ce portail, jamais vers
//! les services eux-mêmes : leurs URLs réelles sont temporaires. À chaque
//! requête le portail retrouve le plugin propriétaire du chemin, fait
//! résoudre le jeton de piste (cache d'abord, RPC sinon), puis répond :
//!
//! - en mode redirection, un 302 vers l'URL résolue ;
//! - en mode proxy, le flux lui-même, avec traduction des `Range` en
//!   seek octet (HTTP) ou temporel (protocole temps réel hérité).

pub mod proxy;
pub mod resolver;
pub mod routes;

pub use proxy::{
    HttpStream, MediaStream, READ_CHUNK, RealtimeStream, RealtimeTransport, StreamError,
    open_media,
};
pub use resolver::{
    GatewayError, StreamMode, StreamPlan, StreamResolver, TRACK_ID_PARAM, canonical_token,
};
pub use routes::streaming_router;
