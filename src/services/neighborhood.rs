//! CityLearn bundle for a set of simulated buildings.

use crate::db::models::{NeighborhoodBuilding, SimulationResult};
use crate::db::store::Store;
use crate::error::{Error, Result};
use crate::models::xstock::NeighborhoodMember;
use crate::schema;
use diesel::prelude::*;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const WEATHER_FILE: &str = "weather.epw";
pub const ATTRIBUTES_FILE: &str = "building_attributes.json";
pub const STATE_ACTION_SPACE_FILE: &str = "buildings_state_action_space.json";

#[derive(Debug, Clone)]
pub struct NeighborhoodReport {
    pub output_directory: PathBuf,
    /// Synthetic building ids, in request order.
    pub buildings: Vec<String>,
    pub weather_stations: usize,
}

pub fn building_id(member: &NeighborhoodMember) -> String {
    format!("Building_{}", member.simulation_id())
}

/// Members listed in a request CSV with a
/// `dataset_type,weather_source,year_of_publication,release,bldg_id,upgrade` header.
pub fn read_members(path: &Path) -> Result<Vec<NeighborhoodMember>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| Error::decode(path.display().to_string(), e))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<NeighborhoodMember>, _>>()
        .map_err(|e| Error::decode(path.display().to_string(), e))
}

struct Resolved<'m> {
    member: &'m NeighborhoodMember,
    building: NeighborhoodBuilding,
    epw: String,
}

fn resolve(store: &Store, member: &NeighborhoodMember) -> Result<Option<(NeighborhoodBuilding, String)>> {
    use schema::citylearn_building_attributes::dsl as A;
    use schema::citylearn_building_state_action_space::dsl as S;
    use schema::dataset::dsl as D;
    use schema::metadata::dsl as M;
    use schema::weather::dsl as W;

    let building: Option<NeighborhoodBuilding> = store.run("read neighborhood member", |conn| {
        M::metadata
            .inner_join(D::dataset)
            .inner_join(A::citylearn_building_attributes)
            .inner_join(S::citylearn_building_state_action_space)
            .filter(D::dataset_type.eq(&member.dataset_type))
            .filter(D::weather_source.eq(&member.weather_source))
            .filter(D::year_of_publication.eq(member.year_of_publication))
            .filter(D::release.eq(member.release))
            .filter(M::bldg_id.eq(member.bldg_id))
            .filter(M::upgrade.eq(member.upgrade))
            .select((
                M::id,
                M::dataset_id,
                M::in_weather_file_tmy3,
                M::in_weather_file_latitude,
                M::in_weather_file_longitude,
                A::attributes,
                S::state_action_space,
            ))
            .first(conn)
            .optional()
    })?;
    let Some(building) = building else {
        return Ok(None);
    };
    let (Some(station), Some(latitude), Some(longitude)) = (
        &building.weather_file_tmy3,
        &building.weather_file_latitude,
        &building.weather_file_longitude,
    ) else {
        return Ok(None);
    };

    let epw: Option<Option<String>> = store.run("read neighborhood weather", |conn| {
        W::weather
            .filter(W::dataset_id.eq(building.dataset_id))
            .filter(W::weather_file_tmy3.eq(station))
            .filter(W::weather_file_latitude.eq(latitude))
            .filter(W::weather_file_longitude.eq(longitude))
            .select(W::epw)
            .first(conn)
            .optional()
    })?;
    Ok(epw.flatten().map(|epw| (building, epw)))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Write the CityLearn input files for `members` into `output_directory`.
///
/// Every member must have metadata, weather and both stored documents;
/// otherwise nothing is written and all missing members are listed.
pub fn assemble(store: &Store, members: &[NeighborhoodMember], output_directory: &Path) -> Result<NeighborhoodReport> {
    use schema::citylearn_energyplus_simulation_result::dsl as R;

    info!("Assembling neighborhood of {} building(s)", members.len());
    let mut resolved = Vec::with_capacity(members.len());
    let mut missing = Vec::new();
    for member in members {
        match resolve(store, member)? {
            Some((building, epw)) => resolved.push(Resolved { member, building, epw }),
            None => missing.push(member.simulation_id()),
        }
    }
    if !missing.is_empty() {
        return Err(Error::IncompleteNeighborhood {
            requested: members.len(),
            missing,
        });
    }

    let stations: BTreeSet<(Option<&str>, Option<&str>, Option<&str>)> = resolved
        .iter()
        .map(|r| {
            (
                r.building.weather_file_tmy3.as_deref(),
                r.building.weather_file_latitude.as_deref(),
                r.building.weather_file_longitude.as_deref(),
            )
        })
        .collect();
    if stations.len() > 1 {
        warn!(
            "Neighborhood spans {} weather stations; using the weather of {}",
            stations.len(),
            resolved.first().map(|r| r.member.simulation_id()).unwrap_or_default()
        );
    }

    std::fs::create_dir_all(output_directory)?;
    if let Some(first) = resolved.first() {
        std::fs::write(output_directory.join(WEATHER_FILE), &first.epw)?;
    }

    // Stored documents are copied through untyped so fields and values survive as stored.
    let mut attributes: BTreeMap<String, Value> = BTreeMap::new();
    let mut spaces: BTreeMap<String, Value> = BTreeMap::new();
    let mut buildings = Vec::with_capacity(resolved.len());
    for r in &resolved {
        let id = building_id(r.member);
        let document: Value = serde_json::from_str(&r.building.attributes)?;
        let space: Value = serde_json::from_str(&r.building.state_action_space)?;

        let rows: Vec<SimulationResult> = store.run("read simulation results", |conn| {
            R::citylearn_energyplus_simulation_result
                .filter(R::metadata_id.eq(r.building.metadata_id))
                .order((R::month, R::day_type, R::hour))
                .select(SimulationResult::as_select())
                .load(conn)
        })?;
        if rows.is_empty() {
            warn!("{} has no stored simulation results", id);
        }

        let file_name = document
            .get("File_Name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.csv", id));
        let path = output_directory.join(&file_name);
        let mut writer = csv::Writer::from_path(&path).map_err(|e| Error::Io(e.into()))?;
        for row in &rows {
            writer.serialize(row).map_err(|e| Error::Io(e.into()))?;
        }
        writer.flush()?;
        debug!("Wrote {} row(s) to {}", rows.len(), path.display());

        attributes.insert(id.clone(), document);
        spaces.insert(id.clone(), space);
        buildings.push(id);
    }

    write_json(&output_directory.join(ATTRIBUTES_FILE), &attributes)?;
    write_json(&output_directory.join(STATE_ACTION_SPACE_FILE), &spaces)?;
    info!("Neighborhood written to {}", output_directory.display());

    Ok(NeighborhoodReport {
        output_directory: output_directory.to_path_buf(),
        buildings,
        weather_stations: stations.len(),
    })
}
