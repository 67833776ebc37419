//! Usage logs for the vehicle fleet and scaling them up as the fleet grows.
//!
//! A usage log is a CSV file with two header rows. The first column holds time stamps. Every
//! other column belongs to a vehicle: the first header row gives the vehicle's name (e.g. `bev3`)
//! and the second the attribute (`atbase`, `dsoc`, `consumption`, `atac`, `atdc`, `tour_dist`).
use crate::error::validation_err;
use crate::input::input_err_msg;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Prefix of the names given to cloned vehicles
pub const VEHICLE_PREFIX: &str = "bev";

/// The attribute columns of a single vehicle
#[derive(Debug, Clone, PartialEq)]
struct VehicleColumns {
    /// Attribute names, in file order
    attributes: Vec<String>,
    /// One series per attribute
    series: Vec<Vec<String>>,
}

/// A per-vehicle usage time series
#[derive(Debug, Clone, PartialEq)]
pub struct UsageLog {
    /// The two header cells of the time column
    time_header: [String; 2],
    /// Time stamps
    time: Vec<String>,
    /// Columns for each vehicle, in file order
    vehicles: IndexMap<String, VehicleColumns>,
}

impl UsageLog {
    /// Read a usage log from a CSV file
    pub fn from_path(file_path: &Path) -> Result<Self> {
        let file = fs::File::open(file_path).with_context(|| input_err_msg(file_path))?;
        Self::from_reader(file).with_context(|| input_err_msg(file_path))
    }

    /// Read a usage log from CSV data
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader)
            .into_records();
        let vehicle_row = records.next().context("Usage log is empty")??;
        let attribute_row = records
            .next()
            .context("Usage log is missing the attribute header row")??;
        ensure!(
            vehicle_row.len() == attribute_row.len() && !vehicle_row.is_empty(),
            "Usage log header rows have different lengths"
        );

        // Work out which vehicle each column belongs to
        let mut vehicles: IndexMap<String, VehicleColumns> = IndexMap::new();
        let mut column_owner = Vec::with_capacity(vehicle_row.len() - 1);
        for (vehicle, attribute) in vehicle_row.iter().zip(attribute_row.iter()).skip(1) {
            ensure!(!vehicle.is_empty(), "Usage log column has no vehicle name");
            let columns = vehicles
                .entry(vehicle.to_string())
                .or_insert_with(|| VehicleColumns {
                    attributes: Vec::new(),
                    series: Vec::new(),
                });
            ensure!(
                !columns.attributes.iter().any(|a| a == attribute),
                "Usage log has more than one {attribute} column for {vehicle}"
            );
            column_owner.push((vehicle.to_string(), columns.attributes.len()));
            columns.attributes.push(attribute.to_string());
            columns.series.push(Vec::new());
        }

        let mut time = Vec::new();
        for record in records {
            let record = record?;
            ensure!(
                record.len() == vehicle_row.len(),
                "Usage log row {} has the wrong number of columns",
                time.len() + 1
            );
            time.push(record[0].to_string());
            for ((vehicle, index), value) in column_owner.iter().zip(record.iter().skip(1)) {
                vehicles[vehicle.as_str()].series[*index].push(value.to_string());
            }
        }

        Ok(Self {
            time_header: [vehicle_row[0].to_string(), attribute_row[0].to_string()],
            time,
            vehicles,
        })
    }

    /// Write the usage log as a CSV file with two header rows
    pub fn write_csv(&self, file_path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(file_path)
            .with_context(|| format!("Could not create {}", file_path.display()))?;

        let columns = self
            .vehicles
            .iter()
            .flat_map(|(name, columns)| {
                columns
                    .attributes
                    .iter()
                    .zip(&columns.series)
                    .map(move |(attribute, series)| (name.as_str(), attribute.as_str(), series))
            })
            .collect_vec();

        let vehicle_row = std::iter::once(self.time_header[0].as_str())
            .chain(columns.iter().map(|(name, _, _)| *name));
        writer.write_record(vehicle_row)?;
        let attribute_row = std::iter::once(self.time_header[1].as_str())
            .chain(columns.iter().map(|(_, attribute, _)| *attribute));
        writer.write_record(attribute_row)?;
        for (row, time) in self.time.iter().enumerate() {
            let record = std::iter::once(time.as_str())
                .chain(columns.iter().map(|(_, _, series)| series[row].as_str()));
            writer.write_record(record)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// The number of vehicles in the log
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// The number of time steps in the log
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Whether the log has no time steps
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Vehicle names, in column order
    pub fn vehicle_names(&self) -> impl Iterator<Item = &str> {
        self.vehicles.keys().map(String::as_str)
    }

    /// Values of one attribute of one vehicle
    pub fn series(&self, vehicle: &str, attribute: &str) -> Option<&[String]> {
        let columns = self.vehicles.get(vehicle)?;
        let index = columns.attributes.iter().position(|a| a == attribute)?;
        Some(&columns.series[index])
    }
}

/// Grow a usage log to `target_n` vehicles by cloning randomly chosen vehicles.
///
/// If `target_n <= base_n`, the log is returned unchanged. Otherwise `target_n - base_n` source
/// vehicles are drawn with replacement using a generator seeded with `seed`, and for each a copy
/// of all its columns is appended under the name `bev<n>`, numbering on from the highest `bev<n>`
/// already in the log (or from `base_n`, if that is higher).
///
/// # Returns
///
/// The scaled log, or a validation error if the log does not contain `base_n` vehicles.
pub fn scale(base_log: &UsageLog, base_n: u32, target_n: u32, seed: u64) -> Result<UsageLog> {
    if base_log.vehicle_count() != base_n as usize {
        Err(validation_err!(
            "Expected {base_n} vehicles in usage log, found {}",
            base_log.vehicle_count()
        ))?;
    }
    if target_n <= base_n {
        return Ok(base_log.clone());
    }
    ensure!(base_n > 0, "Cannot clone vehicles from an empty usage log");

    let mut rng = StdRng::seed_from_u64(seed);
    let sources = base_log.vehicles.values().collect_vec();
    let mut scaled = base_log.clone();
    let first_index = base_log
        .vehicle_names()
        .filter_map(|name| name.strip_prefix(VEHICLE_PREFIX)?.parse::<u32>().ok())
        .map(|n| n + 1)
        .max()
        .map_or(base_n, |next| next.max(base_n));
    for new_index in first_index..first_index + (target_n - base_n) {
        let source = sources[rng.gen_range(0..sources.len())];
        scaled
            .vehicles
            .insert(format!("{VEHICLE_PREFIX}{new_index}"), source.clone());
    }

    info!("Scaled usage log: {base_n} -> {target_n} vehicles");
    debug!(
        "Cloned vehicles: {}",
        scaled.vehicle_names().skip(base_n as usize).join(", ")
    );

    Ok(scaled)
}
