//! Types et utilitaires pour les handlers d'actions UPnP.
//!
//! Un handler reçoit le type du service résolu et les arguments décodés
//! de l'action, et rend la liste ordonnée des champs de sortie. Le
//! dispatcher se charge du décodage amont et de l'encodage aval ; le
//! handler ne voit jamais de XML.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use thiserror::Error;

/// Arguments décodés d'une action, partagés via `Arc`.
pub type ActionArgs = Arc<HashMap<String, String>>;

/// Champs de sortie d'un handler, dans l'ordre d'encodage.
pub type ActionOutput = Vec<(String, String)>;

/// Future retourné par un [`ActionHandler`].
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<ActionOutput, ActionError>> + Send>>;

/// Handler d'action UPnP asynchrone.
///
/// Signature : `Fn(serviceType, ActionArgs) -> ActionFuture`. Les
/// handlers avec contexte capturent leurs `Arc` et les clonent avant le
/// bloc async (voir la forme manuelle ci-dessous) ; les handlers sans
/// capture passent par la macro [`action_handler!`](crate::action_handler).
///
/// ```rust
/// use pmodevice::actions::{ActionError, ActionHandler};
/// use std::sync::Arc;
///
/// let manual: ActionHandler = Arc::new(|_service, args| {
///     Box::pin(async move {
///         let id = args
///             .get("ObjectID")
///             .cloned()
///             .ok_or_else(|| ActionError::MissingArgument("ObjectID".to_string()))?;
///         Ok(vec![("ObjectID".to_string(), id)])
///     })
/// });
/// ```
pub type ActionHandler = Arc<dyn Fn(String, ActionArgs) -> ActionFuture + Send + Sync>;

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Action failed: {0}")]
    Failed(String),
}

/// Macro pour créer un [`ActionHandler`] sans capture de contexte.
///
/// ```rust
/// use pmodevice::action_handler;
///
/// let handler = action_handler!(|_service, _args| {
///     Ok(vec![("SearchCaps".to_string(), "dc:title".to_string())])
/// });
/// ```
#[macro_export]
macro_rules! action_handler {
    (|$service:ident, $args:ident| $body:block) => {{
        let handler: $crate::actions::ActionHandler = std::sync::Arc::new(
            |$service: String, $args: $crate::actions::ActionArgs| Box::pin(async move $body),
        );
        handler
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_macro_handler_runs() {
        let handler = action_handler!(|_service, _args| {
            Ok(vec![("SortCaps".to_string(), "dc:title".to_string())])
        });

        let output = handler(
            "urn:schemas-upnp-org:service:ContentDirectory:1".to_string(),
            Arc::new(HashMap::new()),
        )
        .await
        .unwrap();
        assert_eq!(output, vec![("SortCaps".to_string(), "dc:title".to_string())]);
    }

    #[tokio::test]
    async fn test_manual_handler_with_captured_context() {
        let prefix = Arc::new("qobuz".to_string());
        let handler: ActionHandler = Arc::new(move |_service, args| {
            let prefix = prefix.clone();
            Box::pin(async move {
                let id = args
                    .get("ObjectID")
                    .cloned()
                    .ok_or_else(|| ActionError::MissingArgument("ObjectID".to_string()))?;
                Ok(vec![("Result".to_string(), format!("{}:{}", prefix, id))])
            })
        });

        let mut args = HashMap::new();
        args.insert("ObjectID".to_string(), "0".to_string());
        let output = handler("svc".to_string(), Arc::new(args)).await.unwrap();
        assert_eq!(output[0].1, "qobuz:0");

        let err = handler("svc".to_string(), Arc::new(HashMap::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingArgument(_)));
    }
}
