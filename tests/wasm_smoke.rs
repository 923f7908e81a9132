#![cfg(target_arch = "wasm32")]

use gtag_gateway::analytics::{
    wrap_or_create_gtag, GtagCall, GtagEnvironment, GtagParams, GtagSettings,
    InitializationRegistry,
};
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

#[wasm_bindgen_test]
fn set_is_forwarded_synchronously() {
    let registry = InitializationRegistry::new();
    let _pending = registry.register("G-WASM").expect("register destination");
    let environment = GtagEnvironment::new();
    let installation =
        wrap_or_create_gtag(&environment, registry.snapshot(), &GtagSettings::default())
            .expect("install gtag");

    installation.wrapped.set(GtagParams::new());
    let data_layer = environment.data_layer("dataLayer").expect("data layer");
    assert_eq!(data_layer.entries(), vec![GtagCall::set(GtagParams::new())]);
}

#[wasm_bindgen_test(async)]
async fn deferred_event_is_released_after_settlement() {
    let registry = InitializationRegistry::new();
    let resolver = registry.register("G-WASM").expect("register destination");
    let environment = GtagEnvironment::new();
    let installation =
        wrap_or_create_gtag(&environment, registry.snapshot(), &GtagSettings::default())
            .expect("install gtag");
    let data_layer = environment.data_layer("dataLayer").expect("data layer");

    installation.wrapped.event("purchase", GtagParams::new());
    assert!(data_layer.is_empty());

    let initialization = registry.get("G-WASM").expect("registered future");
    resolver.settle();
    initialization.await;
    installation.gateway.release_settled();
    assert_eq!(data_layer.len(), 1);
}
