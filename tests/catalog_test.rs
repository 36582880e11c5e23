//! Catalog reconciliation tests against the public API
//!
//! These exercise the reload semantics: counters surviving for hosts that
//! stay, disappearing hosts dropping out, and re-added hosts starting over.

use redirector::config::MirrorEntry;
use redirector::geo::MockProvider;
use redirector::mirrors::{Catalog, CatalogBuilder};

fn entry(server: &str) -> MirrorEntry {
    MirrorEntry {
        server: server.to_string(),
        latitude: Some(40.7128),
        longitude: Some(-74.006),
        continent: Some("NA".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_reload_preserves_redirect_counters() {
    let geo = MockProvider::new();

    let previous = Catalog::empty();
    let mut builder = CatalogBuilder::new(&previous);
    builder
        .add_or_update(&entry("localhost/archive"), &geo)
        .await
        .unwrap();
    let catalog = builder.finish();

    let mirror = catalog.host("localhost").unwrap();
    mirror.redirects.inc();
    mirror.redirects.inc();

    // Same host present again: the counter carries over
    let mut builder = CatalogBuilder::new(&catalog);
    builder
        .add_or_update(&entry("localhost/archive"), &geo)
        .await
        .unwrap();
    let reloaded = builder.finish();

    assert_eq!(
        reloaded.host("localhost").unwrap().redirects.get() as u64,
        2
    );
}

#[tokio::test]
async fn test_reload_drops_absent_hosts() {
    let geo = MockProvider::new();

    let previous = Catalog::empty();
    let mut builder = CatalogBuilder::new(&previous);
    builder
        .add_or_update(&entry("localhost"), &geo)
        .await
        .unwrap();
    let catalog = builder.finish();

    assert_eq!(catalog.len(), 1);

    // A reload without the host removes it
    let builder = CatalogBuilder::new(&catalog);
    let emptied = builder.finish();

    assert!(emptied.is_empty());
    assert!(emptied.host("localhost").is_none());

    // Re-adding starts the counter over
    let mut builder = CatalogBuilder::new(&emptied);
    builder
        .add_or_update(&entry("localhost"), &geo)
        .await
        .unwrap();
    let readded = builder.finish();

    assert_eq!(readded.host("localhost").unwrap().redirects.get() as u64, 0);
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    let geo = MockProvider::new();

    let entries = [entry("localhost/a"), entry("127.0.0.1/b")];

    let mut catalog = Catalog::empty();

    for _ in 0..3 {
        let mut builder = CatalogBuilder::new(&catalog);
        for e in &entries {
            builder.add_or_update(e, &geo).await.unwrap();
        }
        catalog = builder.finish();
    }

    assert_eq!(catalog.len(), 2);
    assert!(catalog.host("localhost").is_some());
    assert!(catalog.host("127.0.0.1").is_some());
    assert_eq!(catalog.region("NA").unwrap().len(), 2);
}

#[tokio::test]
async fn test_unresolvable_host_is_an_error() {
    let geo = MockProvider::new();

    let previous = Catalog::empty();
    let mut builder = CatalogBuilder::new(&previous);

    let result = builder
        .add_or_update(&entry("no-such-host.invalid"), &geo)
        .await;

    assert!(result.is_err());
}
