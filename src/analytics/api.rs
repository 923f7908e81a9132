use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::analytics::config::GtagSettings;
use crate::analytics::environment::GtagEnvironment;
use crate::analytics::error::{already_exists, invalid_argument, AnalyticsResult};
use crate::analytics::gtag::{wrap_or_create_gtag, GtagInstallation};
use crate::analytics::identity::{spawn_identity_initialization, InstallationIdProvider};
use crate::analytics::initialization::InitializationRegistry;

/// One reporting destination and the source of the identifier registered with it.
#[derive(Clone)]
pub struct Destination {
    measurement_id: String,
    provider: Arc<dyn InstallationIdProvider>,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("measurement_id", &self.measurement_id)
            .finish()
    }
}

impl Destination {
    pub fn new(measurement_id: impl Into<String>, provider: Arc<dyn InstallationIdProvider>) -> Self {
        Self {
            measurement_id: measurement_id.into(),
            provider,
        }
    }

    pub fn measurement_id(&self) -> &str {
        &self.measurement_id
    }
}

/// Sets up gated gtag for a page with the given destinations.
///
/// Every destination gets a pending initialization, the gateway is installed over a snapshot of
/// all of them, and then each destination's identity registration starts in the background.
/// Nothing is installed when the destinations are invalid.
pub fn bootstrap_gtag(
    environment: &GtagEnvironment,
    settings: &GtagSettings,
    destinations: Vec<Destination>,
) -> AnalyticsResult<GtagInstallation> {
    settings.validate()?;
    let mut seen = BTreeSet::new();
    for destination in &destinations {
        if destination.measurement_id.trim().is_empty() {
            return Err(invalid_argument("Measurement ID must not be empty"));
        }
        if !seen.insert(destination.measurement_id.as_str()) {
            return Err(already_exists(&destination.measurement_id));
        }
    }

    let registry = InitializationRegistry::new();
    let mut pending = Vec::with_capacity(destinations.len());
    for destination in destinations {
        let resolver = registry.register(&destination.measurement_id)?;
        pending.push((destination, resolver));
    }

    environment.get_or_create_data_layer(&settings.data_layer_name);
    let installation = wrap_or_create_gtag(environment, registry.snapshot(), settings)?;

    for (destination, resolver) in pending {
        log::debug!("initializing gtag destination {}", destination.measurement_id);
        spawn_identity_initialization(
            destination.provider,
            destination.measurement_id,
            installation.core.clone(),
            resolver,
        );
    }

    Ok(installation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::command::{GtagCall, GtagParams};
    use crate::analytics::identity::StaticInstallationId;
    use serde_json::json;

    async fn next_turn() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn destination(id: &str) -> Destination {
        Destination::new(id, Arc::new(StaticInstallationId::new(format!("fid-{id}"))))
    }

    #[test]
    fn rejects_duplicate_destinations_before_installing() {
        let environment = GtagEnvironment::new();
        let err = bootstrap_gtag(
            &environment,
            &GtagSettings::default(),
            vec![destination("G-1"), destination("G-1")],
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "analytics/already-exists");
        assert!(environment.gtag("gtag").is_none());
        assert!(environment.data_layer("dataLayer").is_none());

        let err = bootstrap_gtag(&environment, &GtagSettings::default(), vec![destination(" ")])
            .unwrap_err();
        assert_eq!(err.code_str(), "analytics/invalid-argument");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn registration_precedes_dependent_events() {
        let environment = GtagEnvironment::new();
        let settings = GtagSettings::default().with_data_layer_name("customDataLayerName");
        let installation = bootstrap_gtag(
            &environment,
            &settings,
            vec![destination("G-1"), destination("G-2")],
        )
        .unwrap();

        installation
            .wrapped
            .event("purchase", json!({"amount": 10}).as_object().cloned().unwrap());
        assert_eq!(installation.gateway.deferred_len(), 1);
        let layer = environment.data_layer("customDataLayerName").unwrap();
        assert!(layer.is_empty());

        next_turn().await;

        let entries = layer.entries();
        let last = entries.last().cloned().unwrap();
        assert_eq!(last, GtagCall::event("purchase", json!({"amount": 10}).as_object().cloned().unwrap()));
        let mut configs: Vec<_> = entries
            .iter()
            .filter_map(|entry| match entry {
                GtagCall::Config { target_id, .. } => Some(target_id.as_str()),
                _ => None,
            })
            .collect();
        configs.sort_unstable();
        assert_eq!(configs, vec!["G-1", "G-2"]);
        assert_eq!(entries.len(), 5);
    }

    #[test]
    fn without_destinations_nothing_waits() {
        let environment = GtagEnvironment::new();
        let installation =
            bootstrap_gtag(&environment, &GtagSettings::default(), Vec::new()).unwrap();
        installation.wrapped.config("Z", GtagParams::new());
        installation.wrapped.set(GtagParams::new());
        assert_eq!(environment.data_layer("dataLayer").unwrap().len(), 2);
    }
}
