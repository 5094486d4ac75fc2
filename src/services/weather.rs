//! Matching building weather references against the geo-index.

use crate::models::xstock::{coordinate_key, WeatherRecord};
use std::collections::{BTreeMap, BTreeSet};

/// Weather reference of a building exactly as its metadata spells it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StationTriple {
    pub latitude: String,
    pub longitude: String,
    pub station: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStation {
    pub triple: StationTriple,
    pub record: WeatherRecord,
}

/// Every triple lands in exactly one of the three buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherResolution {
    pub resolved: Vec<ResolvedStation>,
    /// No geo-index station at the triple's coordinates.
    pub unknown: Vec<StationTriple>,
    /// More than one distinct station at the triple's coordinates.
    pub ambiguous: Vec<StationTriple>,
}

impl WeatherResolution {
    pub fn total(&self) -> usize {
        self.resolved.len() + self.unknown.len() + self.ambiguous.len()
    }
}

pub fn partition(triples: &BTreeSet<StationTriple>, records: &[WeatherRecord]) -> WeatherResolution {
    let mut by_coordinates: BTreeMap<(String, String), Vec<&WeatherRecord>> = BTreeMap::new();
    for record in records {
        let matches = by_coordinates.entry(record.coordinate_key()).or_default();
        if !matches.contains(&record) {
            matches.push(record);
        }
    }

    let mut resolution = WeatherResolution::default();
    for triple in triples {
        let matches = coordinate_key(&triple.latitude, &triple.longitude)
            .and_then(|key| by_coordinates.get(&key))
            .map(Vec::as_slice)
            .unwrap_or_default();
        match matches {
            [] => resolution.unknown.push(triple.clone()),
            [record] => resolution.resolved.push(ResolvedStation {
                triple: triple.clone(),
                record: (*record).clone(),
            }),
            _ => resolution.ambiguous.push(triple.clone()),
        }
    }
    resolution
}
