mod api;
mod command;
mod config;
mod constants;
mod data_layer;
mod environment;
pub mod error;
mod gtag;
mod identity;
mod initialization;

pub use api::{bootstrap_gtag, Destination};
pub use command::{GtagCall, GtagCommandKind, GtagParams, SendTo};
pub use config::{GtagSettings, GTAG_SETTINGS_ENV};
pub use constants::{DEFAULT_DATA_LAYER_NAME, DEFAULT_GTAG_NAME};
pub use data_layer::DataLayer;
pub use environment::GtagEnvironment;
pub use gtag::{wrap_or_create_gtag, Forwarder, Gtag, GtagGateway, GtagInstallation};
pub use identity::{
    initialize_ga_id, spawn_identity_initialization, InstallationIdProvider, LocalInstallationId,
    StaticInstallationId,
};
pub use initialization::{
    initialization_channel, InitializationFuture, InitializationRegistry, InitializationResolver,
    InitializationSnapshot, WaitSet,
};
