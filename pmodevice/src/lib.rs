//! # pmodevice - Appareils UPnP, dispatch d'actions et événements
//!
//! Ce crate porte la face protocole du renderer : le registre des
//! appareils exposés, la machine de dispatch qui route un événement
//! entrant (invocation d'action, souscription, interrogation de
//! variable) vers le bon handler, le codec SOAP, et la boucle de
//! notification qui pousse les variables d'état modifiées.
//!
//! ## Architecture
//!
//! ```text
//! UpnpEvent ──► DeviceRegistry::dispatch ──► ActionHandler
//!                      │ (verrou global unique)
//!                      └──► collect_changed ──► EventSink (boucle 500 ms)
//! ```
//!
//! ## Discipline de verrouillage
//!
//! Un seul verrou couvre tout le registre : une invocation d'action et
//! une passe d'événements ne s'exécutent jamais en même temps, donc une
//! notification n'observe jamais un état en cours de mutation. Les
//! handlers ne doivent pas rappeler le registre pendant leur exécution.

pub mod actions;
pub mod device;
pub mod dispatcher;
pub mod eventing;
pub mod registry;
pub mod soap;

pub use actions::{ActionArgs, ActionError, ActionFuture, ActionHandler, ActionOutput};
pub use device::{Device, Service};
pub use dispatcher::{DispatchError, DispatchReply, UpnpEvent};
pub use eventing::{EVENT_PERIOD, EventSink, eventing_pass, spawn_event_loop};
pub use registry::{DeviceRegistry, DuplicateDevice, ServiceChanges};
pub use soap::{ActionDocument, SoapError};
