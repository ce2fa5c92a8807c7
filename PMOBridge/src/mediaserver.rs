//! Appareil MediaServer exposé : services et tables d'actions.
//!
//! ContentDirectory fait le pont vers les plugins de contenu. L'espace
//! d'identifiants d'objets suit la convention `0$<plugin>$...` : la
//! racine `0` liste un container par plugin enregistré, et tout autre
//! ObjectID est routé vers le plugin nommé entre les deux premiers `$`.

use std::sync::Arc;

use pmodevice::action_handler;
use pmodevice::actions::{ActionArgs, ActionError, ActionHandler, ActionOutput};
use pmodevice::{Device, Service};
use pmoplugin::didl;
use pmoplugin::{
    BrowseFlag, ContentPlugin, MediaContainer, MediaRecord, PluginError, PluginRegistry,
};

pub const CONTENT_DIRECTORY_ID: &str = "urn:upnp-org:serviceId:ContentDirectory";
pub const CONTENT_DIRECTORY_TYPE: &str = "urn:schemas-upnp-org:service:ContentDirectory:1";
pub const CONNECTION_MANAGER_ID: &str = "urn:upnp-org:serviceId:ConnectionManager";
pub const CONNECTION_MANAGER_TYPE: &str = "urn:schemas-upnp-org:service:ConnectionManager:1";
pub const MEDIA_SERVER_TYPE: &str = "urn:schemas-upnp-org:device:MediaServer:1";

/// Racine de l'arborescence du répertoire de contenu.
const ROOT_OBJECT: &str = "0";

/// Protocoles annoncés par GetProtocolInfo, alignés sur le protocolInfo
/// des items DIDL rendus.
const SOURCE_PROTOCOL_INFO: &str = "http-get:*:*:*";

/// Champs de recherche compris par l'adaptateur plugin.
const SEARCH_CAPABILITIES: &str = "dc:title,dc:author,upnp:artist,upnp:album";

/// Construit l'appareil MediaServer complet.
pub fn build_media_server(udn: &str, friendly_name: &str, plugins: Arc<PluginRegistry>) -> Device {
    let mut device = Device::new(udn, friendly_name, MEDIA_SERVER_TYPE);
    device.add_service(content_directory(friendly_name, plugins));
    device.add_service(connection_manager());
    device
}

fn content_directory(friendly_name: &str, plugins: Arc<PluginRegistry>) -> Service {
    let mut service = Service::new(CONTENT_DIRECTORY_ID, CONTENT_DIRECTORY_TYPE);
    service.set_variable("SystemUpdateID", "1");

    service.register_action(
        "Browse",
        browse_handler(friendly_name.to_string(), plugins.clone()),
    );
    service.register_action("Search", search_handler(plugins));
    service.register_action(
        "GetSearchCapabilities",
        action_handler!(|_service, _args| {
            Ok(vec![(
                "SearchCaps".to_string(),
                SEARCH_CAPABILITIES.to_string(),
            )])
        }),
    );
    service.register_action(
        "GetSortCapabilities",
        action_handler!(|_service, _args| { Ok(vec![("SortCaps".to_string(), String::new())]) }),
    );
    service.register_action(
        "GetSystemUpdateID",
        action_handler!(|_service, _args| { Ok(vec![("Id".to_string(), "1".to_string())]) }),
    );
    service
}

fn connection_manager() -> Service {
    let mut service = Service::new(CONNECTION_MANAGER_ID, CONNECTION_MANAGER_TYPE);
    service.set_variable("SourceProtocolInfo", SOURCE_PROTOCOL_INFO);
    service.set_variable("SinkProtocolInfo", "");
    service.set_variable("CurrentConnectionIDs", "0");
    service.register_action(
        "GetProtocolInfo",
        action_handler!(|_service, _args| {
            Ok(vec![
                ("Source".to_string(), SOURCE_PROTOCOL_INFO.to_string()),
                ("Sink".to_string(), String::new()),
            ])
        }),
    );
    service
}

fn browse_handler(friendly_name: String, plugins: Arc<PluginRegistry>) -> ActionHandler {
    Arc::new(move |_service, args| {
        let friendly_name = friendly_name.clone();
        let plugins = plugins.clone();
        Box::pin(async move {
            let object_id = require(&args, "ObjectID")?;
            let flag_raw = require(&args, "BrowseFlag")?;
            let flag =
                BrowseFlag::from_upnp(&flag_raw).ok_or_else(|| ActionError::InvalidArgument {
                    name: "BrowseFlag".to_string(),
                    reason: format!("unknown flag '{flag_raw}'"),
                })?;
            let start = numeric(&args, "StartingIndex")?;
            let count = window(numeric(&args, "RequestedCount")?);

            if object_id == ROOT_OBJECT {
                return browse_root(&friendly_name, &plugins, flag, start, count).await;
            }

            let plugin = plugin_for_object(&plugins, &object_id).await?;
            let slice = plugin
                .browse(&object_id, flag, start, count)
                .await
                .map_err(plugin_failure)?;
            directory_output(&slice.records, slice.total)
        })
    })
}

fn search_handler(plugins: Arc<PluginRegistry>) -> ActionHandler {
    Arc::new(move |_service, args| {
        let plugins = plugins.clone();
        Box::pin(async move {
            let container_id = require(&args, "ContainerID")?;
            let criteria = require(&args, "SearchCriteria")?;
            let start = numeric(&args, "StartingIndex")?;
            let count = window(numeric(&args, "RequestedCount")?);

            let plugin = plugin_for_object(&plugins, &container_id).await?;
            let slice = plugin
                .search(&container_id, &criteria, start, count)
                .await
                .map_err(plugin_failure)?;
            directory_output(&slice.records, slice.total)
        })
    })
}

/// Réponse du répertoire pour la racine `0`.
async fn browse_root(
    friendly_name: &str,
    plugins: &PluginRegistry,
    flag: BrowseFlag,
    start: u32,
    count: u32,
) -> Result<ActionOutput, ActionError> {
    match flag {
        BrowseFlag::Metadata => {
            let root = MediaRecord::Container(MediaContainer {
                id: ROOT_OBJECT.to_string(),
                parent_id: "-1".to_string(),
                title: friendly_name.to_string(),
            });
            directory_output(&[root], 1)
        }
        BrowseFlag::Children => {
            let roots: Vec<MediaRecord> = plugins
                .list()
                .await
                .iter()
                .map(|plugin| {
                    MediaRecord::Container(MediaContainer {
                        id: plugin_root(plugin.name()),
                        parent_id: ROOT_OBJECT.to_string(),
                        title: plugin.name().to_string(),
                    })
                })
                .collect();
            let total = roots.len() as u32;
            let window: Vec<MediaRecord> = roots
                .into_iter()
                .skip(start as usize)
                .take(count as usize)
                .collect();
            directory_output(&window, total)
        }
    }
}

/// Id du container racine d'un plugin dans l'espace d'objets.
fn plugin_root(name: &str) -> String {
    format!("0${name}$")
}

/// Plugin propriétaire d'un ObjectID de la forme `0$nom$...`.
async fn plugin_for_object(
    plugins: &PluginRegistry,
    object_id: &str,
) -> Result<Arc<ContentPlugin>, ActionError> {
    let name = object_id
        .strip_prefix("0$")
        .and_then(|rest| rest.split('$').next())
        .filter(|name| !name.is_empty());
    match name {
        Some(name) => plugins.get(name).await,
        None => None,
    }
    .ok_or_else(|| ActionError::InvalidArgument {
        name: "ObjectID".to_string(),
        reason: format!("no plugin owns '{object_id}'"),
    })
}

fn require(args: &ActionArgs, name: &str) -> Result<String, ActionError> {
    args.get(name)
        .cloned()
        .ok_or_else(|| ActionError::MissingArgument(name.to_string()))
}

fn numeric(args: &ActionArgs, name: &str) -> Result<u32, ActionError> {
    let raw = require(args, name)?;
    raw.parse().map_err(|_| ActionError::InvalidArgument {
        name: name.to_string(),
        reason: format!("'{raw}' is not a number"),
    })
}

/// `RequestedCount` à zéro signifie « tout ».
fn window(requested: u32) -> u32 {
    if requested == 0 { u32::MAX } else { requested }
}

/// Une expression de recherche refusée est une erreur d'argument ; tout
/// autre échec plugin est un échec d'exécution.
fn plugin_failure(error: PluginError) -> ActionError {
    match error {
        PluginError::BadSearchExpression(_) | PluginError::UnknownSearchField(_) => {
            ActionError::InvalidArgument {
                name: "SearchCriteria".to_string(),
                reason: error.to_string(),
            }
        }
        other => ActionError::Failed(other.to_string()),
    }
}

/// Encode la réponse standard des actions Browse et Search.
fn directory_output(records: &[MediaRecord], total: u32) -> Result<ActionOutput, ActionError> {
    let result = didl::render_records(records).map_err(|e| ActionError::Failed(e.to_string()))?;
    Ok(vec![
        ("Result".to_string(), result),
        ("NumberReturned".to_string(), records.len().to_string()),
        ("TotalMatches".to_string(), total.to_string()),
        ("UpdateID".to_string(), "1".to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pmodevice::{DeviceRegistry, DispatchError, DispatchReply, UpnpEvent};
    use pmorpc::{RpcCaller, RpcFields, WorkerError};
    use serde_json::json;

    const UDN: &str = "uuid:test-bridge";

    /// Backend simulé : dix pistes en browse, une piste en search.
    #[derive(Debug)]
    struct ScriptedBackend;

    #[async_trait]
    impl RpcCaller for ScriptedBackend {
        async fn call(
            &self,
            procedure: &str,
            args: &[(&str, &str)],
        ) -> Result<RpcFields, WorkerError> {
            let mut fields = RpcFields::default();
            match procedure {
                "browse" => {
                    let entries: Vec<_> = (0..10)
                        .map(|n| {
                            json!({
                                "tp": "it",
                                "id": format!("0$demo$track{n}"),
                                "pid": "0$demo$",
                                "tt": format!("Track {n}"),
                                "uri": format!("http://gw/demo/t{n}?trackId={n}"),
                            })
                        })
                        .collect();
                    fields.insert("entries", json!(entries).to_string().into_bytes());
                }
                "search" => {
                    let field = args
                        .iter()
                        .find(|(name, _)| *name == "field")
                        .map(|(_, value)| *value)
                        .unwrap_or("");
                    let entries = json!([{
                        "tp": "it",
                        "id": "0$demo$hit",
                        "pid": "0$demo$",
                        "tt": format!("Hit for {field}"),
                    }]);
                    fields.insert("entries", entries.to_string().into_bytes());
                }
                _ => {
                    fields.insert("pmorpcstatus", b"1".to_vec());
                }
            }
            Ok(fields)
        }
    }

    async fn registry_with_media_server() -> DeviceRegistry {
        let plugins = Arc::new(PluginRegistry::new());
        plugins
            .register(Arc::new(ContentPlugin::new(
                "demo",
                "/demo",
                Arc::new(ScriptedBackend),
            )))
            .await;

        let registry = DeviceRegistry::new();
        registry
            .register(build_media_server(UDN, "PMOBridge", plugins))
            .await
            .unwrap();
        registry
    }

    fn soap_body(action: &str, args: &[(&str, &str)]) -> String {
        let mut arg_xml = String::new();
        for (name, value) in args {
            arg_xml.push_str(&format!("<{0}>{1}</{0}>", name, value));
        }
        format!(
            r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:{action} xmlns:u="{CONTENT_DIRECTORY_TYPE}">{arg_xml}</u:{action}>
  </s:Body>
</s:Envelope>"#
        )
    }

    async fn invoke_directory(
        registry: &DeviceRegistry,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<String, DispatchError> {
        let reply = registry
            .dispatch(UpnpEvent::ActionInvoke {
                device: UDN.to_string(),
                service: CONTENT_DIRECTORY_ID.to_string(),
                body: soap_body(action, args),
            })
            .await?;
        match reply {
            DispatchReply::ActionResponse(xml) => Ok(xml),
            other => panic!("expected an action response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_root_children_list_one_container_per_plugin() {
        let registry = registry_with_media_server().await;
        let xml = invoke_directory(
            &registry,
            "Browse",
            &[
                ("ObjectID", "0"),
                ("BrowseFlag", "BrowseDirectChildren"),
                ("StartingIndex", "0"),
                ("RequestedCount", "0"),
            ],
        )
        .await
        .unwrap();

        assert!(xml.contains("0$demo$"));
        assert!(xml.contains("<NumberReturned>1</NumberReturned>"));
        assert!(xml.contains("<TotalMatches>1</TotalMatches>"));
    }

    #[tokio::test]
    async fn test_root_metadata_describes_the_daemon() {
        let registry = registry_with_media_server().await;
        let xml = invoke_directory(
            &registry,
            "Browse",
            &[
                ("ObjectID", "0"),
                ("BrowseFlag", "BrowseMetadata"),
                ("StartingIndex", "0"),
                ("RequestedCount", "0"),
            ],
        )
        .await
        .unwrap();

        assert!(xml.contains("PMOBridge"));
        assert!(xml.contains("<TotalMatches>1</TotalMatches>"));
    }

    #[tokio::test]
    async fn test_browse_window_reports_the_full_total() {
        let registry = registry_with_media_server().await;
        let xml = invoke_directory(
            &registry,
            "Browse",
            &[
                ("ObjectID", "0$demo$albums"),
                ("BrowseFlag", "BrowseDirectChildren"),
                ("StartingIndex", "2"),
                ("RequestedCount", "3"),
            ],
        )
        .await
        .unwrap();

        assert!(xml.contains("<NumberReturned>3</NumberReturned>"));
        assert!(xml.contains("<TotalMatches>10</TotalMatches>"));
        // La fenêtre commence à l'index brut 2.
        assert!(xml.contains("Track 2"));
        assert!(xml.contains("Track 4"));
        assert!(!xml.contains("Track 5"));
    }

    #[tokio::test]
    async fn test_zero_requested_count_returns_everything() {
        let registry = registry_with_media_server().await;
        let xml = invoke_directory(
            &registry,
            "Browse",
            &[
                ("ObjectID", "0$demo$albums"),
                ("BrowseFlag", "BrowseDirectChildren"),
                ("StartingIndex", "0"),
                ("RequestedCount", "0"),
            ],
        )
        .await
        .unwrap();

        assert!(xml.contains("<NumberReturned>10</NumberReturned>"));
    }

    #[tokio::test]
    async fn test_unknown_plugin_object_is_an_argument_error() {
        let registry = registry_with_media_server().await;
        let err = invoke_directory(
            &registry,
            "Browse",
            &[
                ("ObjectID", "0$tidal$albums"),
                ("BrowseFlag", "BrowseDirectChildren"),
                ("StartingIndex", "0"),
                ("RequestedCount", "0"),
            ],
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), 402);
    }

    #[tokio::test]
    async fn test_bad_browse_flag_is_an_argument_error() {
        let registry = registry_with_media_server().await;
        let err = invoke_directory(
            &registry,
            "Browse",
            &[
                ("ObjectID", "0"),
                ("BrowseFlag", "BrowseEverything"),
                ("StartingIndex", "0"),
                ("RequestedCount", "0"),
            ],
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), 402);
    }

    #[tokio::test]
    async fn test_search_reaches_the_plugin_backend() {
        let registry = registry_with_media_server().await;
        let xml = invoke_directory(
            &registry,
            "Search",
            &[
                ("ContainerID", "0$demo$"),
                ("SearchCriteria", "upnp:artist = \"Brassens\""),
                ("StartingIndex", "0"),
                ("RequestedCount", "0"),
            ],
        )
        .await
        .unwrap();

        assert!(xml.contains("Hit for artist"));
        assert!(xml.contains("<TotalMatches>1</TotalMatches>"));
    }

    #[tokio::test]
    async fn test_malformed_search_expression_is_an_argument_error() {
        let registry = registry_with_media_server().await;
        let err = invoke_directory(
            &registry,
            "Search",
            &[
                ("ContainerID", "0$demo$"),
                ("SearchCriteria", "dc:title contains \"a\" and more"),
                ("StartingIndex", "0"),
                ("RequestedCount", "0"),
            ],
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), 402);
    }

    #[tokio::test]
    async fn test_capability_actions_answer_without_backend() {
        let registry = registry_with_media_server().await;

        let xml = invoke_directory(&registry, "GetSearchCapabilities", &[])
            .await
            .unwrap();
        assert!(xml.contains("upnp:artist"));

        let xml = invoke_directory(&registry, "GetSortCapabilities", &[])
            .await
            .unwrap();
        assert!(xml.contains("SortCaps"));

        let xml = invoke_directory(&registry, "GetSystemUpdateID", &[])
            .await
            .unwrap();
        assert!(xml.contains("<Id>1</Id>"));
    }

    #[tokio::test]
    async fn test_connection_manager_announces_protocols() {
        let registry = registry_with_media_server().await;
        let reply = registry
            .dispatch(UpnpEvent::ActionInvoke {
                device: UDN.to_string(),
                service: CONNECTION_MANAGER_ID.to_string(),
                body: format!(
                    r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetProtocolInfo xmlns:u="{CONNECTION_MANAGER_TYPE}"></u:GetProtocolInfo>
  </s:Body>
</s:Envelope>"#
                ),
            })
            .await
            .unwrap();

        let DispatchReply::ActionResponse(xml) = reply else {
            panic!("expected an action response");
        };
        assert!(xml.contains("http-get:*:*:*"));
        assert!(xml.contains("u:GetProtocolInfoResponse"));
    }
}
