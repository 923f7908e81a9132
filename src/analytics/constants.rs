/// Name of the global queue gtag reads from when none is configured.
pub const DEFAULT_DATA_LAYER_NAME: &str = "dataLayer";

/// Name the dispatch function is exposed under when none is configured.
pub const DEFAULT_GTAG_NAME: &str = "gtag";

/// Field of an event's options that restricts which destinations receive it.
pub const SEND_TO_KEY: &str = "send_to";

/// Identity registration parameters issued with the `config` command.
pub const GA_FID_KEY: &str = "firebase_id";
pub const ORIGIN_KEY: &str = "origin";
pub const UPDATE_KEY: &str = "update";
pub const FIREBASE_ORIGIN: &str = "firebase";

/// First positional argument accepted by gtag.
pub mod command {
    pub const CONFIG: &str = "config";
    pub const EVENT: &str = "event";
    pub const SET: &str = "set";
    pub const JS: &str = "js";
}
