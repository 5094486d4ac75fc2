//! Output column contract and the normalization of engine results into it.
//!
//! One static table drives both the requested engine output variables and
//! the default-filling of result columns.

use crate::db::models::{RawResultRow, SimulationResult};
use log::debug;
use std::collections::BTreeMap;

/// Time keys passed through unchanged; no source signal, no default.
pub const TIME_KEY_COLUMNS: [&str; 4] = ["Month", "Hour", "Day Type", "Daylight Savings Status"];

/// One measured output column.
pub struct OutputColumn {
    pub name: &'static str,
    /// Engine output variables aggregated into this column.
    pub signals: &'static [&'static str],
    /// Fill value for missing cells; `None` leaves them missing.
    pub default: Option<f64>,
    field: fn(&mut SimulationResult) -> &mut Option<f64>,
}

impl OutputColumn {
    pub fn field<'a>(&self, row: &'a mut SimulationResult) -> &'a mut Option<f64> {
        (self.field)(row)
    }
}

pub static OUTPUT_COLUMNS: [OutputColumn; 8] = [
    OutputColumn {
        name: "Equipment Electric Power [kWh]",
        signals: &["Lights Electricity Energy", "Electric Equipment Electricity Energy"],
        default: Some(0.0),
        field: |r| &mut r.equipment_electric_power,
    },
    OutputColumn {
        name: "Indoor Temperature [C]",
        signals: &["Zone Air Temperature"],
        default: None,
        field: |r| &mut r.indoor_temperature,
    },
    OutputColumn {
        name: "Indoor Relative Humidity [%]",
        signals: &["Zone Air Relative Humidity"],
        default: None,
        field: |r| &mut r.indoor_relative_humidity,
    },
    OutputColumn {
        name: "Average Unmet Cooling Setpoint Difference [C]",
        signals: &["Zone Thermostat Cooling Setpoint Temperature"],
        default: Some(0.0),
        field: |r| &mut r.average_unmet_cooling_setpoint_difference,
    },
    OutputColumn {
        name: "Average Unmet Heating Setpoint Difference [C]",
        signals: &["Zone Thermostat Heating Setpoint Temperature"],
        default: Some(0.0),
        field: |r| &mut r.average_unmet_heating_setpoint_difference,
    },
    OutputColumn {
        name: "DHW Heating [kWh]",
        signals: &["Water Heater Heating Energy"],
        default: Some(0.0),
        field: |r| &mut r.dhw_heating,
    },
    OutputColumn {
        name: "Cooling Load [kWh]",
        signals: &["Zone Predicted Sensible Load to Setpoint Heat Transfer Rate"],
        default: Some(0.0),
        field: |r| &mut r.cooling_load,
    },
    OutputColumn {
        name: "Heating Load [kWh]",
        signals: &["Zone Predicted Sensible Load to Setpoint Heat Transfer Rate"],
        default: Some(0.0),
        field: |r| &mut r.heating_load,
    },
];

/// Distinct engine output variables the contract needs, in first-seen order.
pub fn required_signals() -> Vec<&'static str> {
    let mut signals: Vec<&'static str> = Vec::new();
    for column in &OUTPUT_COLUMNS {
        for signal in column.signals {
            if !signals.contains(signal) {
                signals.push(signal);
            }
        }
    }
    signals
}

/// `Foo (C)` -> `Foo [C]`
pub fn bracket_units(name: &str) -> String {
    name.replace('(', "[").replace(')', "]")
}

/// `Foo [C]` -> `Foo (C)`
pub fn paren_units(name: &str) -> String {
    name.replace('[', "(").replace(']', ")")
}

/// Engine rows pivoted to one record per time key, columns already renamed.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub month: i64,
    pub hour: i64,
    pub day_type: String,
    pub dst: Option<i64>,
    pub values: BTreeMap<String, Option<f64>>,
}

/// Pivot long-format rows and rename their labels to bracket units.
/// Every contract column is present afterwards; absent ones hold `None`.
pub fn pivot(rows: &[RawResultRow]) -> Vec<PivotRow> {
    let mut pivoted: BTreeMap<(i64, String, i64), PivotRow> = BTreeMap::new();
    for raw in rows {
        let entry = pivoted
            .entry((raw.month, raw.day_type.clone(), raw.hour))
            .or_insert_with(|| PivotRow {
                month: raw.month,
                hour: raw.hour,
                day_type: raw.day_type.clone(),
                dst: raw.dst,
                values: OUTPUT_COLUMNS.iter().map(|c| (c.name.to_string(), None)).collect(),
            });
        if entry.dst.is_none() {
            entry.dst = raw.dst;
        }
        entry.values.insert(bracket_units(&raw.label), raw.value);
    }
    pivoted.into_values().collect()
}

/// Replace missing cells of defaulted columns.
pub fn fill_defaults(row: &mut PivotRow) {
    for column in &OUTPUT_COLUMNS {
        if let Some(default) = column.default {
            let cell = row.values.entry(column.name.to_string()).or_insert(None);
            if cell.is_none() {
                *cell = Some(default);
            }
        }
    }
}

/// Typed result row for `metadata_id`; labels outside the contract are dropped.
pub fn reshape(metadata_id: i64, row: PivotRow) -> SimulationResult {
    let mut result = SimulationResult {
        metadata_id,
        month: row.month,
        hour: row.hour,
        day_type: row.day_type,
        daylight_savings_status: row.dst,
        equipment_electric_power: None,
        indoor_temperature: None,
        indoor_relative_humidity: None,
        average_unmet_cooling_setpoint_difference: None,
        average_unmet_heating_setpoint_difference: None,
        dhw_heating: None,
        cooling_load: None,
        heating_load: None,
    };
    for (name, value) in row.values {
        match OUTPUT_COLUMNS.iter().find(|c| c.name == name) {
            Some(column) => *column.field(&mut result) = value,
            None => debug!("Dropping result column outside the output contract: {}", name),
        }
    }
    result
}

pub fn normalize(metadata_id: i64, rows: &[RawResultRow]) -> Vec<SimulationResult> {
    pivot(rows)
        .into_iter()
        .map(|mut row| {
            fill_defaults(&mut row);
            reshape(metadata_id, row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_SQL: &str = include_str!("../../sql/simulation_result.sql");

    fn raw(hour: i64, label: &str, value: Option<f64>) -> RawResultRow {
        RawResultRow {
            month: 1,
            hour,
            day_type: "Monday".to_string(),
            dst: Some(0),
            label: label.to_string(),
            value,
        }
    }

    #[test]
    fn missing_dhw_defaults_to_zero_but_temperature_stays_missing() {
        let rows = vec![
            raw(1, "Equipment Electric Power (kWh)", Some(1.25)),
            raw(1, "Indoor Relative Humidity (%)", Some(41.0)),
        ];
        let results = normalize(7, &rows);
        assert_eq!(results.len(), 1);
        let row = &results[0];
        assert_eq!(row.metadata_id, 7);
        assert_eq!(row.equipment_electric_power, Some(1.25));
        assert_eq!(row.dhw_heating, Some(0.0));
        assert_eq!(row.indoor_temperature, None);
        assert_eq!(row.indoor_relative_humidity, Some(41.0));
    }

    #[test]
    fn null_values_of_defaulted_columns_are_filled() {
        let rows = vec![raw(2, "Cooling Load (kWh)", None), raw(2, "Indoor Temperature (C)", None)];
        let row = &normalize(1, &rows)[0];
        assert_eq!(row.cooling_load, Some(0.0));
        assert_eq!(row.indoor_temperature, None);
    }

    #[test]
    fn every_defaulted_column_is_total() {
        let results = normalize(1, &[raw(3, "Something Else (W)", Some(5.0))]);
        let mut row = results[0].clone();
        for column in &OUTPUT_COLUMNS {
            let value = *column.field(&mut row);
            match column.default {
                Some(default) => assert_eq!(value, Some(default), "{}", column.name),
                None => assert_eq!(value, None, "{}", column.name),
            }
        }
    }

    #[test]
    fn pivots_by_time_key_in_month_day_type_hour_order() {
        let mut rows = vec![raw(2, "DHW Heating (kWh)", Some(0.5)), raw(1, "DHW Heating (kWh)", Some(0.25))];
        rows.push(RawResultRow {
            month: 1,
            hour: 1,
            day_type: "Holiday".to_string(),
            dst: None,
            label: "DHW Heating (kWh)".to_string(),
            value: Some(1.0),
        });
        let results = normalize(1, &rows);
        let keys: Vec<(String, i64)> = results.iter().map(|r| (r.day_type.clone(), r.hour)).collect();
        assert_eq!(
            keys,
            vec![("Holiday".to_string(), 1), ("Monday".to_string(), 1), ("Monday".to_string(), 2)]
        );
        assert_eq!(results[1].dhw_heating, Some(0.25));
        assert_eq!(results[1].daylight_savings_status, Some(0));
    }

    #[test]
    fn unit_renames_round_trip() {
        assert_eq!(bracket_units("Indoor Temperature (C)"), "Indoor Temperature [C]");
        assert_eq!(paren_units("Indoor Relative Humidity [%]"), "Indoor Relative Humidity (%)");
    }

    #[test]
    fn required_signals_are_distinct() {
        let signals = required_signals();
        assert_eq!(signals.len(), 8);
        assert_eq!(
            signals.iter().filter(|s| **s == "Zone Predicted Sensible Load to Setpoint Heat Transfer Rate").count(),
            1
        );
    }

    #[test]
    fn projection_query_covers_the_contract() {
        for column in &OUTPUT_COLUMNS {
            assert!(RESULT_SQL.contains(&format!("'{}'", paren_units(column.name))), "label {}", column.name);
            for signal in column.signals {
                assert!(RESULT_SQL.contains(signal), "signal {}", signal);
            }
        }
    }
}
