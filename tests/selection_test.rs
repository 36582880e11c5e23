//! End-to-end selection scenarios against the public API

use std::net::IpAddr;
use std::sync::Arc;

use prometheus::Counter;
use redirector::checks::CheckError;
use redirector::geo::{City, Country, Location, MockProvider};
use redirector::mirrors::{Catalog, Mirror, Selector};
use redirector::rules::Rule;

fn mirror(host: &str, lat: f64, lon: f64) -> Arc<Mirror> {
    mirror_with_rules(host, lat, lon, Vec::new())
}

fn mirror_with_rules(host: &str, lat: f64, lon: f64, rules: Vec<Rule>) -> Arc<Mirror> {
    Arc::new(Mirror::new(
        host.to_string(),
        String::new(),
        lat,
        lon,
        "NA".to_string(),
        None,
        10,
        vec!["http".to_string(), "https".to_string()],
        rules,
        Counter::new(format!("itest_{}", host.replace(['.', '-'], "_")), "test").unwrap(),
    ))
}

fn client(ip: &str, lat: f64, lon: f64) -> (MockProvider, IpAddr) {
    let provider = MockProvider::new();
    let ip: IpAddr = ip.parse().unwrap();
    provider.set_location(ip, lat, lon);
    (provider, ip)
}

#[test]
fn test_client_follows_mirror_availability() {
    let catalog = Catalog::new(vec![
        mirror("near.example.com", 45.4215, -75.6972),
        mirror("far.example.com", 34.0522, -118.2437),
    ]);
    let selector = Selector::new(64, 1, 0);
    let (geo, ip) = client("4.3.2.1", 45.5215, -75.5972);

    // The close mirror wins while it is healthy
    let (picked, _) = selector.closest(&catalog, &geo, "https", ip).unwrap();
    assert_eq!(picked.host, "near.example.com");

    // It fails a probe: the sweep flips it and purges the cache
    catalog.mirrors()[0].observe(Err(CheckError::UnexpectedStatus(500)));
    selector.purge();

    for _ in 0..5 {
        let (picked, _) = selector.closest(&catalog, &geo, "https", ip).unwrap();
        assert_eq!(picked.host, "far.example.com");
    }

    // Recovery brings it back
    catalog.mirrors()[0].observe(Ok(()));
    selector.purge();

    let (picked, _) = selector.closest(&catalog, &geo, "https", ip).unwrap();
    assert_eq!(picked.host, "near.example.com");
}

#[test]
fn test_rules_exclude_mirror_for_matching_clients() {
    let exclude_us = Rule {
        field: "location.country.iso_code".to_string(),
        is_not: Some("US".to_string()),
        ..Default::default()
    };

    let catalog = Catalog::new(vec![
        mirror_with_rules("restricted.example.com", 40.0, -74.0, vec![exclude_us]),
        mirror("open-a.example.com", 41.0, -74.0),
        mirror("open-b.example.com", 42.0, -74.0),
    ]);
    let selector = Selector::new(64, 5, 0);

    let provider = MockProvider::new();
    let us_client: IpAddr = "3.3.3.3".parse().unwrap();
    provider.set_city(
        us_client,
        City {
            country: Country {
                iso_code: "US".to_string(),
            },
            location: Location {
                latitude: 40.0,
                longitude: -74.0,
            },
            ..Default::default()
        },
    );

    let decision = selector
        .choices(&catalog, &provider, "https", us_client)
        .unwrap();

    assert!(decision
        .iter()
        .all(|c| c.mirror.host.starts_with("open-")));

    // A client elsewhere still sees the restricted mirror
    let ca_client: IpAddr = "4.4.4.4".parse().unwrap();
    provider.set_city(
        ca_client,
        City {
            country: Country {
                iso_code: "CA".to_string(),
            },
            location: Location {
                latitude: 40.0,
                longitude: -74.0,
            },
            ..Default::default()
        },
    );

    let decision = selector
        .choices(&catalog, &provider, "https", ca_client)
        .unwrap();

    assert!(decision
        .iter()
        .any(|c| c.mirror.host == "restricted.example.com"));
}

#[test]
fn test_scheme_and_weight_govern_picks() {
    let heavy = Arc::new(Mirror::new(
        "heavy.example.com".to_string(),
        String::new(),
        10.0,
        10.0,
        "NA".to_string(),
        None,
        1000,
        vec!["https".to_string()],
        Vec::new(),
        Counter::new("itest_heavy_example_com", "test").unwrap(),
    ));
    let light = Arc::new(Mirror::new(
        "light.example.com".to_string(),
        String::new(),
        10.0,
        10.0,
        "NA".to_string(),
        None,
        1,
        vec!["https".to_string()],
        Vec::new(),
        Counter::new("itest_light_example_com", "test").unwrap(),
    ));

    let catalog = Catalog::new(vec![heavy, light]);
    let selector = Selector::new(64, 2, 0);
    let (geo, ip) = client("5.5.5.5", 10.0, 10.0);

    let mut heavy_picks = 0;
    for _ in 0..200 {
        let (picked, _) = selector.closest(&catalog, &geo, "https", ip).unwrap();
        if picked.host == "heavy.example.com" {
            heavy_picks += 1;
        }
    }

    // 1000:1 weighting: the heavy mirror must dominate
    assert!(heavy_picks > 150, "heavy mirror picked {heavy_picks}/200");
}

#[test]
fn test_distinct_cache_keys_per_scheme() {
    let catalog = Catalog::new(vec![
        mirror("s1.example.com", 10.0, 10.0),
        mirror("s2.example.com", 11.0, 11.0),
    ]);
    let selector = Selector::new(64, 2, 0);
    let (geo, ip) = client("6.6.6.6", 10.0, 10.0);

    // Both schemes resolve independently without disturbing each other
    let http_decision = selector.choices(&catalog, &geo, "http", ip).unwrap();
    let https_decision = selector.choices(&catalog, &geo, "https", ip).unwrap();

    assert_eq!(http_decision.len(), https_decision.len());

    let (picked, _) = selector.closest(&catalog, &geo, "http", ip).unwrap();
    assert!(picked.supports("http"));
}
