//! Per-destination identity registration.
//!
//! Before a destination may receive scoped commands its installation ID has to be registered with
//! a `config` command. The registration is issued through the ungated gtag function and the
//! destination's initialization future is settled only afterwards, so nothing waiting on the
//! destination can reach the queue ahead of its own registration.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde_json::{json, Value};

use crate::analytics::command::{GtagCall, GtagParams};
use crate::analytics::constants::{command, FIREBASE_ORIGIN, GA_FID_KEY, ORIGIN_KEY, UPDATE_KEY};
use crate::analytics::error::{installations_failed, AnalyticsResult};
use crate::analytics::gtag::Gtag;
use crate::analytics::initialization::InitializationResolver;
use crate::platform::runtime::spawn_detached;

/// Source of the per-install identifier registered with each destination.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait InstallationIdProvider: Send + Sync {
    async fn installation_id(&self) -> AnalyticsResult<String>;
}

/// Always reports the same identifier.
#[derive(Clone, Debug)]
pub struct StaticInstallationId(String);

impl StaticInstallationId {
    pub fn new(installation_id: impl Into<String>) -> Self {
        Self(installation_id.into())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl InstallationIdProvider for StaticInstallationId {
    async fn installation_id(&self) -> AnalyticsResult<String> {
        if self.0.trim().is_empty() {
            return Err(installations_failed("Installation ID must not be empty"));
        }
        Ok(self.0.clone())
    }
}

/// Generates a random identifier on first use and keeps returning it.
#[derive(Debug, Default)]
pub struct LocalInstallationId {
    fid: Mutex<Option<String>>,
}

impl LocalInstallationId {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl InstallationIdProvider for LocalInstallationId {
    async fn installation_id(&self) -> AnalyticsResult<String> {
        let mut fid = self.fid.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(fid.get_or_insert_with(generate_fid).clone())
    }
}

fn generate_fid() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(22)
        .collect()
}

/// Fetches the installation ID and registers it with `measurement_id` through `gtag_core`.
pub async fn initialize_ga_id(
    provider: &dyn InstallationIdProvider,
    measurement_id: &str,
    gtag_core: &Gtag,
) -> AnalyticsResult<()> {
    let fid = provider.installation_id().await?;

    gtag_core.call(GtagCall::Other {
        arguments: vec![
            Value::String(command::JS.to_string()),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        ],
    });
    gtag_core.call(GtagCall::config(measurement_id, identity_params(&fid)));
    Ok(())
}

fn identity_params(fid: &str) -> GtagParams {
    let mut params = GtagParams::new();
    params.insert(GA_FID_KEY.to_string(), json!(fid));
    params.insert(ORIGIN_KEY.to_string(), json!(FIREBASE_ORIGIN));
    params.insert(UPDATE_KEY.to_string(), json!(true));
    params
}

/// Runs [`initialize_ga_id`] in the background and settles `resolver` once it has finished,
/// whether or not the registration succeeded.
pub fn spawn_identity_initialization(
    provider: Arc<dyn InstallationIdProvider>,
    measurement_id: String,
    gtag_core: Gtag,
    resolver: InitializationResolver,
) {
    spawn_detached(async move {
        if let Err(err) = initialize_ga_id(provider.as_ref(), &measurement_id, &gtag_core).await {
            log::warn!("identity initialization for {measurement_id} failed: {err}");
        }
        resolver.settle();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::data_layer::DataLayer;
    use crate::analytics::initialization::initialization_channel;
    use futures::channel::oneshot;

    const MOCK_ANALYTICS_ID: &str = "abcd-efgh-ijkl";
    const MOCK_FID: &str = "fid-1234-zyxw";

    struct FailingInstallationId;

    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    impl InstallationIdProvider for FailingInstallationId {
        async fn installation_id(&self) -> AnalyticsResult<String> {
            Err(installations_failed("installations unavailable"))
        }
    }

    /// Hands out its identifier only once the test releases it.
    struct GatedInstallationId {
        release: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    impl InstallationIdProvider for GatedInstallationId {
        async fn installation_id(&self) -> AnalyticsResult<String> {
            let release = self.release.lock().unwrap().take();
            if let Some(release) = release {
                let _ = release.await;
            }
            Ok(MOCK_FID.to_string())
        }
    }

    async fn next_turn() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn initialize_ga_id_registers_fid_with_config() {
        let layer = DataLayer::new();
        let gtag = Gtag::pushing_to(layer.clone());
        initialize_ga_id(&StaticInstallationId::new(MOCK_FID), MOCK_ANALYTICS_ID, &gtag)
            .await
            .unwrap();

        let entries = layer.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].to_arguments()[0], json!("js"));
        assert_eq!(
            entries[1],
            GtagCall::config(
                MOCK_ANALYTICS_ID,
                json!({"firebase_id": MOCK_FID, "origin": "firebase", "update": true})
                    .as_object()
                    .cloned()
                    .unwrap()
            )
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn initialize_ga_id_propagates_provider_errors() {
        let layer = DataLayer::new();
        let err = initialize_ga_id(&FailingInstallationId, MOCK_ANALYTICS_ID, &Gtag::pushing_to(layer.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "analytics/installations-failed");
        assert!(layer.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn local_installation_id_is_stable() {
        let provider = LocalInstallationId::new();
        let first = provider.installation_id().await.unwrap();
        assert_eq!(first.len(), 22);
        assert_eq!(provider.installation_id().await.unwrap(), first);
        assert!(StaticInstallationId::new(" ").installation_id().await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn settles_only_after_registration_is_queued() {
        let layer = DataLayer::new();
        let (release_tx, release_rx) = oneshot::channel();
        let provider = Arc::new(GatedInstallationId {
            release: Mutex::new(Some(release_rx)),
        });
        let (resolver, future) = initialization_channel();

        spawn_identity_initialization(
            provider,
            MOCK_ANALYTICS_ID.to_string(),
            Gtag::pushing_to(layer.clone()),
            resolver,
        );
        next_turn().await;
        assert!(future.is_pending());
        assert!(layer.is_empty());

        release_tx.send(()).unwrap();
        future.clone().await;
        assert!(matches!(layer.last(), Some(GtagCall::Config { .. })));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn settles_even_when_the_fetch_fails() {
        let layer = DataLayer::new();
        let (resolver, future) = initialization_channel();
        spawn_identity_initialization(
            Arc::new(FailingInstallationId),
            MOCK_ANALYTICS_ID.to_string(),
            Gtag::pushing_to(layer.clone()),
            resolver,
        );
        future.clone().await;
        assert!(future.is_settled());
        assert!(layer.is_empty());
    }
}
