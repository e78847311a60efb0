//! Shared fixtures for integration tests: a tracing subscriber, a cheap key
//! derivation setting and stores wired to a simulated registry.

use std::sync::{Arc, Once};

use elastos_did::{
    Backend, Config, DidStore, Document, KdfParams, MemoryStorage, PublishOptions, SimulatedRegistry,
};
use tracing_subscriber::EnvFilter;

/// Store password used by fixtures.
pub const PASSWORD: &str = "passw0rd";

/// A store over in-memory storage and the simulated registry.
pub type TestStore = DidStore<MemoryStorage, SimulatedRegistry>;

static INIT: Once = Once::new();

/// Install a test subscriber once per process. Set `RUST_LOG` to see output.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Configuration with a key-derivation cost suited to tests.
#[must_use]
pub fn config() -> Config {
    Config::default().kdf(KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    })
}

/// A backend over a fresh simulated registry.
#[must_use]
pub fn backend() -> Arc<Backend<SimulatedRegistry>> {
    init_tracing();
    Arc::new(Backend::new(SimulatedRegistry::new(), config()))
}

/// A fresh store sharing `backend`.
#[must_use]
pub fn store(backend: &Arc<Backend<SimulatedRegistry>>) -> TestStore {
    DidStore::new(MemoryStorage::new(), Arc::clone(backend))
}

/// A store over a fresh registry with one root identity. Returns the store
/// and the identity id.
///
/// # Panics
///
/// Panics if the identity cannot be created.
pub async fn store_with_identity() -> (TestStore, String) {
    let store = store(&backend());
    let identity = store.create_root_identity(None, PASSWORD).await.expect("should create identity");
    (store, identity)
}

/// Derive the next DID of `identity` and publish it.
///
/// # Panics
///
/// Panics if the DID cannot be created or published.
pub async fn published_did(store: &TestStore, identity: &str) -> Document {
    let doc = store.new_did(identity, PASSWORD).await.expect("should create DID");
    store.publish(&doc, PublishOptions::default(), PASSWORD).await.expect("should publish DID")
}
