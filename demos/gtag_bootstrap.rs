//! Bootstraps gated gtag for two destinations and prints the data layer as commands are released.

use std::sync::Arc;
use std::time::Duration;

use gtag_gateway::analytics::{
    bootstrap_gtag, Destination, GtagEnvironment, GtagParams, GtagSettings, LocalInstallationId,
    StaticInstallationId,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let environment = GtagEnvironment::new();
    let settings = GtagSettings::from_env()?;
    let installation = bootstrap_gtag(
        &environment,
        &settings,
        vec![
            Destination::new("G-1234567890", Arc::new(LocalInstallationId::new())),
            Destination::new("G-0987654321", Arc::new(StaticInstallationId::new("demo-fid"))),
        ],
    )?;

    let mut language = GtagParams::new();
    language.insert("language".into(), "en".into());
    installation.wrapped.set(language);

    let mut purchase = GtagParams::new();
    purchase.insert("amount".into(), 10.into());
    installation.wrapped.event("purchase", purchase);

    let data_layer = environment.get_or_create_data_layer(&settings.data_layer_name);
    println!("before initialization: {} entries", data_layer.len());

    tokio::time::sleep(Duration::from_millis(10)).await;

    for entry in data_layer.entries() {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}
