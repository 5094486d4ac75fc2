//! One building's EnergyPlus run, from stored inputs to stored CityLearn documents.
//!
//! Notes
//! - Stages run strictly in order: input assembly, translation, preprocessing,
//!   execution, result read, normalization, attribute derivation, persistence.
//! - The translator and engine are traits so tests can stand in for the
//!   external toolchain.
//! - Engine failure is terminal; nothing is rerun with a modified input.

use crate::db::models::{self as dbm, RawResultRow, SimulationInput, SimulationResult};
use crate::db::store::Store;
use crate::error::{Error, Result};
use crate::idf;
use crate::models::citylearn::{BuildingAttributes, StateActionSpace};
use crate::models::xstock::DatasetKey;
use crate::schema;
use crate::services::normalize::{self, required_signals};
use crate::services::schedule::KEY_COLUMNS;
use diesel::prelude::*;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

const RESULT_SQL: &str = include_str!("../../sql/simulation_result.sql");
const SCHEDULE_FILE: &str = "schedules.csv";
const WEATHER_FILE: &str = "weather.epw";

const FORWARD_TRANSLATE_RB: &str = r#"require 'openstudio'

model = OpenStudio::OSVersion::VersionTranslator.new.loadModel(OpenStudio::Path.new(ARGV[0]))
raise "could not load model #{ARGV[0]}" if model.empty?
workspace = OpenStudio::EnergyPlus::ForwardTranslator.new.translateModel(model.get)
workspace.save(OpenStudio::Path.new(ARGV[1]), true)
"#;

/// Turns a stored building model into an engine input file.
pub trait ModelTranslator {
    fn translate(&self, simulation_id: &str, model: &Path, input: &Path) -> Result<()>;
}

/// Files handed to the engine for one run.
#[derive(Debug, Clone)]
pub struct EngineRun {
    pub run_id: String,
    pub input: PathBuf,
    pub weather: PathBuf,
    pub working_directory: PathBuf,
}

impl EngineRun {
    pub fn diagnostics(&self) -> PathBuf {
        self.working_directory.join(format!("{}.err", self.run_id))
    }
}

/// Runs the engine to completion and returns the path of its SQLite result store.
pub trait SimulationEngine {
    fn run(&self, run: &EngineRun) -> Result<PathBuf>;
}

pub struct OpenStudioTranslator {
    pub executable: PathBuf,
}

impl ModelTranslator for OpenStudioTranslator {
    fn translate(&self, simulation_id: &str, model: &Path, input: &Path) -> Result<()> {
        let script = model.with_file_name("forward_translate.rb");
        std::fs::write(&script, FORWARD_TRANSLATE_RB)?;
        debug!("{} execute_ruby_script {} {}", self.executable.display(), script.display(), model.display());
        let output = Command::new(&self.executable)
            .arg("execute_ruby_script")
            .arg(&script)
            .arg(model)
            .arg(input)
            .output()
            .map_err(|e| Error::Translation {
                simulation_id: simulation_id.to_string(),
                message: format!("could not start {}: {}", self.executable.display(), e),
            })?;
        if !output.status.success() || !input.is_file() {
            return Err(Error::Translation {
                simulation_id: simulation_id.to_string(),
                message: format!("{}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim()),
            });
        }
        Ok(())
    }
}

pub struct EnergyPlusEngine {
    pub executable: PathBuf,
    pub idd: Option<PathBuf>,
}

impl SimulationEngine for EnergyPlusEngine {
    fn run(&self, run: &EngineRun) -> Result<PathBuf> {
        // The child runs inside the working directory, so every path it gets must be absolute.
        let working_directory = std::path::absolute(&run.working_directory)?;
        let executable = if self.executable.components().count() > 1 {
            std::path::absolute(&self.executable)?
        } else {
            self.executable.clone()
        };
        let mut command = Command::new(&executable);
        command
            .current_dir(&working_directory)
            .arg("--weather")
            .arg(std::path::absolute(&run.weather)?)
            .arg("--output-directory")
            .arg(&working_directory)
            .arg("--output-prefix")
            .arg(&run.run_id)
            .arg("--output-suffix")
            .arg("C")
            .arg("--expandobjects");
        if let Some(idd) = &self.idd {
            command.arg("--idd").arg(std::path::absolute(idd)?);
        }
        command.arg(std::path::absolute(&run.input)?);
        info!("Running {} for {}", self.executable.display(), run.run_id);

        let status = command.status().map_err(|e| Error::SimulationExecution {
            simulation_id: run.run_id.clone(),
            message: format!("could not start {}: {}", self.executable.display(), e),
            diagnostics: run.diagnostics(),
        })?;
        if !status.success() {
            return Err(Error::SimulationExecution {
                simulation_id: run.run_id.clone(),
                message: format!("engine exited with {}", status),
                diagnostics: run.diagnostics(),
            });
        }

        [format!("{}.sql", run.run_id), format!("{}out.sql", run.run_id)]
            .into_iter()
            .map(|name| working_directory.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| Error::SimulationExecution {
                simulation_id: run.run_id.clone(),
                message: "engine finished without writing a SQLite result store".to_string(),
                diagnostics: run.diagnostics(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub simulation_id: String,
    pub metadata_id: i64,
    pub working_directory: PathBuf,
    pub result_rows: usize,
    pub attributes: BuildingAttributes,
    pub state_action_space: StateActionSpace,
}

pub struct Orchestrator<'a> {
    store: &'a Store,
    translator: Box<dyn ModelTranslator>,
    engine: Box<dyn SimulationEngine>,
    output_root: PathBuf,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a Store,
        translator: Box<dyn ModelTranslator>,
        engine: Box<dyn SimulationEngine>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Orchestrator {
            store,
            translator,
            engine,
            output_root: output_root.into(),
        }
    }

    /// Simulate one building and persist its normalized results and documents.
    /// `seed` perturbs the attribute template; `None` keeps it as is.
    pub fn simulate(&self, key: &DatasetKey, bldg_id: i64, upgrade: i64, seed: Option<u64>) -> Result<SimulationReport> {
        let simulation_id = key.simulation_id(bldg_id, upgrade);
        info!("Simulating {}", simulation_id);

        let (input, epw) = self.assemble_inputs(key, bldg_id, upgrade, &simulation_id)?;
        let working_directory = std::path::absolute(self.output_root.join(format!("output_{}", simulation_id)))?;
        std::fs::create_dir_all(&working_directory)?;
        let run = self.prepare_run(&simulation_id, &input, &epw, &working_directory)?;
        info!("Input assembled in {}", working_directory.display());

        let result_store = self.engine.run(&run)?;
        info!("Engine finished; reading {}", result_store.display());

        let raw: Vec<RawResultRow> = Store::new(&result_store).query(RESULT_SQL)?;
        let results = normalize::normalize(input.metadata_id, &raw);
        if results.is_empty() {
            warn!("{} produced no run-period results", simulation_id);
        }
        debug!("Normalized {} raw row(s) into {} result row(s)", raw.len(), results.len());

        let attributes = BuildingAttributes::derive(seed)?.for_building(
            &simulation_id,
            input.climate_zone.as_deref(),
            input.pv_system_size.as_deref(),
        );
        let state_action_space = StateActionSpace::derive(&attributes)?;

        self.persist(input.metadata_id, &results, &attributes, &state_action_space)?;
        info!("Simulation {} stored: {} result row(s)", simulation_id, results.len());

        Ok(SimulationReport {
            simulation_id,
            metadata_id: input.metadata_id,
            working_directory,
            result_rows: results.len(),
            attributes,
            state_action_space,
        })
    }

    /// Read everything the run needs and fail before touching the engine when
    /// the model or weather is missing.
    fn assemble_inputs(&self, key: &DatasetKey, bldg_id: i64, upgrade: i64, simulation_id: &str) -> Result<(SimulationInput, String)> {
        use schema::dataset::dsl as D;
        use schema::metadata::dsl as M;
        use schema::model::dsl as Mo;
        use schema::weather::dsl as W;

        let missing = |what: &str| Error::MissingInput {
            simulation_id: simulation_id.to_string(),
            what: what.to_string(),
        };

        let input: SimulationInput = self
            .store
            .run("read simulation input", |conn| {
                M::metadata
                    .inner_join(D::dataset)
                    .left_join(Mo::model)
                    .filter(D::dataset_type.eq(&key.dataset_type))
                    .filter(D::weather_source.eq(&key.weather_source))
                    .filter(D::year_of_publication.eq(key.year_of_publication))
                    .filter(D::release.eq(key.release))
                    .filter(M::bldg_id.eq(bldg_id))
                    .filter(M::upgrade.eq(upgrade))
                    .select((
                        M::id,
                        M::dataset_id,
                        M::in_ashrae_iecc_climate_zone_2004,
                        M::in_pv_system_size,
                        M::in_weather_file_tmy3,
                        M::in_weather_file_latitude,
                        M::in_weather_file_longitude,
                        Mo::osm.nullable(),
                    ))
                    .first(conn)
                    .optional()
            })?
            .ok_or_else(|| missing("metadata"))?;
        if input.osm.is_none() {
            return Err(missing("model"));
        }

        let epw = match (&input.weather_file_tmy3, &input.weather_file_latitude, &input.weather_file_longitude) {
            (Some(station), Some(latitude), Some(longitude)) => self
                .store
                .run("read simulation weather", |conn| {
                    W::weather
                        .filter(W::dataset_id.eq(input.dataset_id))
                        .filter(W::weather_file_tmy3.eq(station))
                        .filter(W::weather_file_latitude.eq(latitude))
                        .filter(W::weather_file_longitude.eq(longitude))
                        .select(W::epw)
                        .first::<Option<String>>(conn)
                        .optional()
                })?
                .flatten(),
            _ => None,
        };
        let epw = epw.ok_or_else(|| missing("weather"))?;
        Ok((input, epw))
    }

    /// Write the working files, translate the model and rewrite its output requests.
    fn prepare_run(&self, simulation_id: &str, input: &SimulationInput, epw: &str, dir: &Path) -> Result<EngineRun> {
        self.write_schedule(input.metadata_id, &dir.join(SCHEDULE_FILE))?;

        let model = dir.join(format!("{}.osm", simulation_id));
        std::fs::write(&model, input.osm.as_deref().unwrap_or_default())?;
        let weather = dir.join(WEATHER_FILE);
        std::fs::write(&weather, epw)?;

        let engine_input = dir.join(format!("{}.idf", simulation_id));
        self.translator.translate(simulation_id, &model, &engine_input)?;
        info!("Model translated to {}", engine_input.display());

        let idf = std::fs::read_to_string(&engine_input)?;
        std::fs::write(&engine_input, idf::rewrite_output_variables(&idf, &required_signals()))?;
        debug!("Output variables rewritten in {}", engine_input.display());

        Ok(EngineRun {
            run_id: simulation_id.to_string(),
            input: engine_input,
            weather,
            working_directory: dir.to_path_buf(),
        })
    }

    fn write_schedule(&self, metadata_id: i64, path: &Path) -> Result<()> {
        let frame = self.store.select_frame(
            "schedule",
            &format!("WHERE metadata_id = {} ORDER BY day_index, hour, minute", metadata_id),
        )?;
        if frame.is_empty() {
            warn!("No schedule rows for metadata id {}; writing an empty {}", metadata_id, SCHEDULE_FILE);
        }
        let keep: Vec<usize> = frame
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_str() != "metadata_id" && !KEY_COLUMNS.contains(&c.as_str()))
            .map(|(i, _)| i)
            .collect();

        let mut writer = csv::Writer::from_path(path).map_err(|e| Error::Io(e.into()))?;
        writer
            .write_record(keep.iter().map(|&i| frame.columns[i].as_str()))
            .map_err(|e| Error::Io(e.into()))?;
        for row in &frame.rows {
            writer
                .write_record(keep.iter().map(|&i| row[i].render().unwrap_or_default()))
                .map_err(|e| Error::Io(e.into()))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn persist(
        &self,
        metadata_id: i64,
        results: &[SimulationResult],
        attributes: &BuildingAttributes,
        state_action_space: &StateActionSpace,
    ) -> Result<()> {
        use schema::citylearn_building_attributes::dsl as A;
        use schema::citylearn_building_state_action_space::dsl as S;
        use schema::citylearn_energyplus_simulation_result::dsl as R;

        let attributes = dbm::NewBuildingAttributes {
            metadata_id,
            attributes: serde_json::to_string(attributes)?,
        };
        let space = dbm::NewStateActionSpace {
            metadata_id,
            state_action_space: serde_json::to_string(state_action_space)?,
        };

        self.store.run("persist simulation output", |conn| {
            conn.transaction(|conn| {
                for row in results {
                    diesel::insert_into(R::citylearn_energyplus_simulation_result)
                        .values(row)
                        .on_conflict((R::metadata_id, R::month, R::hour, R::day_type))
                        .do_update()
                        .set(row)
                        .execute(conn)?;
                }
                diesel::insert_into(A::citylearn_building_attributes)
                    .values(&attributes)
                    .on_conflict(A::metadata_id)
                    .do_update()
                    .set(A::attributes.eq(&attributes.attributes))
                    .execute(conn)?;
                diesel::insert_into(S::citylearn_building_state_action_space)
                    .values(&space)
                    .on_conflict(S::metadata_id)
                    .do_update()
                    .set(S::state_action_space.eq(&space.state_action_space))
                    .execute(conn)?;
                Ok(())
            })
        })
    }
}
