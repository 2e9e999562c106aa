use async_trait::async_trait;
use futures::future::join_all;
use log::debug;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::sdk::LatLng;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeocodeError {
    #[error("no geocoding result for '{0}'")]
    NotFound(String),
    #[error("geocoder failed for '{address}': {reason}")]
    Provider { address: String, reason: String },
}

/// Resolves one free-text address. Implementations are driven on the
/// single-threaded browser executor, hence `?Send`.
#[async_trait(?Send)]
pub trait Geocoder {
    async fn resolve_address(&self, address: &str) -> Result<LatLng, GeocodeError>;
}

/// Unique non-blank addresses in first-seen order.
pub fn unique_addresses<'a, I>(addresses: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter(|address| !address.trim().is_empty())
        .filter(|address| seen.insert(*address))
        .map(str::to_string)
        .collect()
}

/// Geocodes every unique address once and returns only the successes.
///
/// Lookups in the batch run concurrently on the current task. A failed or
/// out-of-range result leaves its address out of the map; it never aborts the
/// batch.
pub async fn resolve<G>(geocoder: &G, addresses: &[String]) -> HashMap<String, LatLng>
where
    G: Geocoder + ?Sized,
{
    let unique = unique_addresses(addresses.iter().map(String::as_str));
    let lookups = unique.iter().map(|address| async move {
        (address, geocoder.resolve_address(address).await)
    });

    let mut resolved = HashMap::with_capacity(unique.len());
    for (address, outcome) in join_all(lookups).await {
        match outcome {
            Ok(position) if position.is_valid() => {
                resolved.insert(address.clone(), position);
            }
            Ok(position) => {
                debug!("discarding out-of-range geocode for '{}': {:?}", address, position);
            }
            Err(e) => debug!("{}", e),
        }
    }
    debug!("geocoded {}/{} unique addresses", resolved.len(), unique.len());
    resolved
}

/// Successful resolutions remembered across passes, evicting the entry that
/// was used least recently once `capacity` is reached.
pub struct GeocodeCache {
    capacity: usize,
    entries: HashMap<String, (LatLng, u64)>,
    clock: u64,
}

impl GeocodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            clock: 0,
        }
    }

    pub fn get(&mut self, address: &str) -> Option<LatLng> {
        self.clock += 1;
        let now = self.clock;
        self.entries.get_mut(address).map(|(position, used)| {
            *used = now;
            *position
        })
    }

    pub fn insert(&mut self, address: String, position: LatLng) {
        if self.capacity == 0 || !position.is_valid() {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&address) {
            self.evict_oldest();
        }
        self.clock += 1;
        self.entries.insert(address, (position, self.clock));
    }

    /// Splits `addresses` into cache hits and the unique misses still to look up.
    pub fn partition(&mut self, addresses: &[String]) -> (HashMap<String, LatLng>, Vec<String>) {
        let mut hits = HashMap::new();
        let mut misses = Vec::new();
        for address in unique_addresses(addresses.iter().map(String::as_str)) {
            match self.get(&address) {
                Some(position) => {
                    hits.insert(address, position);
                }
                None => misses.push(address),
            }
        }
        (hits, misses)
    }

    pub fn extend(&mut self, resolved: &HashMap<String, LatLng>) {
        for (address, position) in resolved {
            self.insert(address.clone(), *position);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, (_, used))| *used)
            .map(|(address, _)| address.clone())
        {
            self.entries.remove(&oldest);
        }
    }
}
