//! Mirror selection: filter, rank, top-N, weighted pick
//!
//! Decisions are cached per `(scheme, client address)` as the whole top-N
//! choice list rather than a single mirror, so the weighted pick runs per
//! request and spreads a client across its set of nearby mirrors. Any
//! availability flip purges the cache wholesale.

use std::cmp::Ordering as CmpOrdering;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use moka::sync::Cache;
use rand::seq::SliceRandom;

use super::{Catalog, Mirror};
use crate::config::DEFAULT_TOP_CHOICES;
use crate::error::{Error, Result};
use crate::geo::{distance, Provider};
use crate::rules::{evaluate, Facts};

/// One ranked candidate
#[derive(Clone)]
pub struct Choice {
    pub mirror: Arc<Mirror>,
    pub distance: f64,
}

/// A cached selection outcome: the choice list for one `(scheme, ip)` key
pub type Decision = Arc<Vec<Choice>>;

// ============================================================================
// Selector
// ============================================================================

/// The selection engine and its decision cache.
///
/// `top_choices` and `max_deviation` are atomics because reload retunes them
/// while requests are in flight.
pub struct Selector {
    cache: RwLock<Cache<String, Decision>>,
    top_choices: AtomicUsize,
    max_deviation: AtomicU64,
}

impl Selector {
    pub fn new(cache_size: usize, top_choices: usize, max_deviation: u64) -> Self {
        Self {
            cache: RwLock::new(Cache::new(cache_size as u64)),
            top_choices: AtomicUsize::new(top_choices.max(1)),
            max_deviation: AtomicU64::new(max_deviation),
        }
    }

    /// Replace the cache with an empty one of the given capacity.
    ///
    /// Reload calls this unconditionally, so a reload always starts from an
    /// empty cache even when the capacity is unchanged.
    pub fn resize(&self, capacity: usize) {
        *self.cache.write().unwrap() = Cache::new(capacity as u64);
    }

    /// Drop every cached decision
    pub fn purge(&self) {
        self.cache.read().unwrap().invalidate_all();
    }

    pub fn top_choices(&self) -> usize {
        self.top_choices.load(Ordering::SeqCst)
    }

    /// Set the spread width, clamped to `[1, mirror_count]`; `0` falls back
    /// to the default
    pub fn set_top_choices(&self, configured: usize, mirror_count: usize) {
        let wanted = if configured == 0 {
            DEFAULT_TOP_CHOICES
        } else {
            configured
        };

        let clamped = wanted.min(mirror_count.max(1)).max(1);
        self.top_choices.store(clamped, Ordering::SeqCst);
    }

    pub fn set_max_deviation(&self, meters: u64) {
        self.max_deviation.store(meters, Ordering::SeqCst);
    }

    /// Select the best mirror for a client.
    ///
    /// Consults the decision cache first; on a miss, runs the full pipeline
    /// (geo facts, filter, rank, top-N) and caches the resulting choice list
    /// before the weighted pick.
    pub fn closest(
        &self,
        catalog: &Catalog,
        geo: &dyn Provider,
        scheme: &str,
        ip: IpAddr,
    ) -> Result<(Arc<Mirror>, f64)> {
        let key = cache_key(scheme, ip);

        if let Some(decision) = self.cache.read().unwrap().get(&key) {
            let live: Vec<&Choice> = decision
                .iter()
                .filter(|c| c.mirror.is_available())
                .collect();

            // A decision whose mirrors have all gone away is recomputed;
            // anything else is picked from directly.
            if !live.is_empty() {
                let choice = weighted_pick(&live)?;
                return Ok((choice.mirror.clone(), choice.distance));
            }
        }

        let decision = self.choices(catalog, geo, scheme, ip)?;

        let all: Vec<&Choice> = decision.iter().collect();
        let choice = weighted_pick(&all)?;

        Ok((choice.mirror.clone(), choice.distance))
    }

    /// Compute and cache the choice list for a client
    pub fn choices(
        &self,
        catalog: &Catalog,
        geo: &dyn Provider,
        scheme: &str,
        ip: IpAddr,
    ) -> Result<Decision> {
        if catalog.is_empty() {
            return Err(Error::NoCandidates);
        }

        let city = geo.city(ip)?;

        let asn = match geo.asn(ip) {
            Ok(asn) => Some(asn),
            Err(Error::NoAsnDatabase) => None,
            Err(e) => return Err(e),
        };

        let facts = Facts {
            ip,
            asn,
            location: city.clone(),
        };

        let eligible: Vec<Arc<Mirror>> = catalog
            .mirrors()
            .iter()
            .filter(|m| m.is_available() && m.supports(scheme) && evaluate(&m.rules, &facts))
            .cloned()
            .collect();

        // A filter that leaves fewer than two mirrors must not starve
        // traffic in small catalogs; fall back to the full list.
        let pool = if eligible.len() < 2 {
            catalog.mirrors().to_vec()
        } else {
            eligible
        };

        let mut ranked: Vec<Choice> = pool
            .into_iter()
            .map(|mirror| Choice {
                distance: distance(
                    city.location.latitude,
                    city.location.longitude,
                    mirror.latitude,
                    mirror.longitude,
                ),
                mirror,
            })
            .collect();

        ranked.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(CmpOrdering::Equal)
        });

        let n = self.top_choices().min(ranked.len());
        let closest_distance = ranked[0].distance;
        let max_deviation = self.max_deviation.load(Ordering::SeqCst) as f64;

        let mut list = Vec::with_capacity(n);

        for (i, choice) in ranked.into_iter().take(n).enumerate() {
            // The closest entry is always retained
            if i > 0 && max_deviation > 0.0 && choice.distance - closest_distance > max_deviation {
                continue;
            }

            list.push(choice);
        }

        let decision: Decision = Arc::new(list);

        let key = cache_key(scheme, ip);
        self.cache.read().unwrap().insert(key, decision.clone());

        Ok(decision)
    }

    #[cfg(test)]
    fn cached(&self, scheme: &str, ip: IpAddr) -> Option<Decision> {
        self.cache.read().unwrap().get(&cache_key(scheme, ip))
    }

    #[cfg(test)]
    fn cache_entry_count(&self) -> u64 {
        let cache = self.cache.read().unwrap();
        cache.run_pending_tasks();
        cache.entry_count()
    }
}

fn cache_key(scheme: &str, ip: IpAddr) -> String {
    format!("{scheme}_{ip}")
}

// ============================================================================
// Weighted Random
// ============================================================================

/// Weighted random pick over a choice list.
///
/// A single entry is returned deterministically.
pub fn weighted_pick<'a>(choices: &[&'a Choice]) -> Result<&'a Choice> {
    match choices.len() {
        0 => Err(Error::WeightedPick("empty choice list".to_string())),
        1 => Ok(choices[0]),
        _ => choices
            .choose_weighted(&mut rand::thread_rng(), |c| c.mirror.weight)
            .map(|c| *c)
            .map_err(|e| Error::WeightedPick(e.to_string())),
    }
}

/// Weighted random pick over a region's mirrors, restricted to available
/// ones. Used by the `/region/<code>/` override path.
pub fn weighted_random(mirrors: &[Arc<Mirror>]) -> Result<Arc<Mirror>> {
    let live: Vec<&Arc<Mirror>> = mirrors.iter().filter(|m| m.is_available()).collect();

    match live.len() {
        0 => Err(Error::NoCandidates),
        1 => Ok(live[0].clone()),
        _ => live
            .choose_weighted(&mut rand::thread_rng(), |m| m.weight)
            .map(|m| (*m).clone())
            .map_err(|e| Error::WeightedPick(e.to_string())),
    }
}
