//! The scenario table handed to the optimiser.
//!
//! A scenario file has the columns `block,key,<scenario 1>,<scenario 2>,...`. The
//! [`ScenarioTemplate`] holds the file as read and is never modified. Each stage takes a fresh
//! [`ScenarioSnapshot`] of one column and edits that instead.
use crate::error::validation_err;
use crate::id::BlockID;
use crate::input::input_err_msg;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use std::io::Read;
use std::path::{Path, PathBuf};

pub mod builder;
pub mod cell;
pub use builder::ScenarioBuilder;
pub use cell::CellValue;

/// The values of one block, keyed by parameter name
pub type BlockCells = IndexMap<String, CellValue>;

/// A scenario file as read from disk
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioTemplate {
    /// Where the template was read from
    pub path: PathBuf,
    /// Names of the scenario columns
    columns: Vec<String>,
    /// Values for each column, by block and key
    blocks: IndexMap<BlockID, IndexMap<String, Vec<CellValue>>>,
}

impl ScenarioTemplate {
    /// Read a scenario template from a CSV file
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).with_context(|| input_err_msg(path))?;
        let mut template = Self::from_reader(file).with_context(|| input_err_msg(path))?;
        template.path = path.to_path_buf();
        Ok(template)
    }

    /// Read a scenario template from CSV data
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = reader.headers()?.clone();
        ensure!(
            headers.get(0) == Some("block") && headers.get(1) == Some("key"),
            "Scenario file must start with the columns block and key"
        );
        let columns = headers.iter().skip(2).map(String::from).collect_vec();
        ensure!(!columns.is_empty(), "Scenario file has no scenario columns");

        let mut blocks: IndexMap<BlockID, IndexMap<String, Vec<CellValue>>> = IndexMap::new();
        for record in reader.records() {
            let record = record?;
            let block = record.get(0).unwrap_or_default().trim();
            let key = record.get(1).unwrap_or_default().trim();
            ensure!(
                !block.is_empty() && !key.is_empty(),
                "Scenario row is missing a block or key"
            );

            // Short rows are padded with blank cells
            let values = (0..columns.len())
                .map(|i| CellValue::parse(record.get(i + 2).unwrap_or_default()))
                .collect_vec();
            let existing = blocks
                .entry(block.into())
                .or_default()
                .insert(key.to_string(), values);
            ensure!(
                existing.is_none(),
                "Scenario parameter {block}.{key} is defined more than once"
            );
        }

        Ok(Self {
            path: PathBuf::new(),
            columns,
            blocks,
        })
    }

    /// Names of the scenario columns, in file order
    pub fn scenario_names(&self) -> &[String] {
        &self.columns
    }

    /// Whether the template has any parameters for `block`
    pub fn contains_block(&self, block: &str) -> bool {
        self.blocks.contains_key(block)
    }

    /// Check that every block in `required` appears in the template
    pub fn check_blocks<'a, I>(&self, required: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a BlockID>,
    {
        let missing = required
            .into_iter()
            .filter(|block| !self.contains_block(block.as_str()))
            .join(", ");
        if !missing.is_empty() {
            Err(validation_err!(
                "Scenario template is missing block(s): {missing}"
            ))?;
        }

        Ok(())
    }

    /// Take a copy of a single scenario column.
    ///
    /// # Arguments
    ///
    /// * `column` - The name of the column to use, or `None` for the first
    pub fn snapshot(&self, column: Option<&str>) -> Result<ScenarioSnapshot> {
        let index = match column {
            Some(name) => self
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| {
                    validation_err!(
                        "Scenario column {name} not found (available: {})",
                        self.columns.join(", ")
                    )
                })?,
            None => 0,
        };

        let blocks = self
            .blocks
            .iter()
            .map(|(block, params)| {
                let cells = params
                    .iter()
                    .map(|(key, values)| (key.clone(), values[index].clone()))
                    .collect();
                (block.clone(), cells)
            })
            .collect();

        Ok(ScenarioSnapshot {
            column: self.columns[index].clone(),
            blocks,
        })
    }
}

/// A single scenario column, edited for one stage
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSnapshot {
    column: String,
    blocks: IndexMap<BlockID, BlockCells>,
}

impl ScenarioSnapshot {
    /// The name of the scenario column
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Get the value of a cell, if it exists
    pub fn get(&self, block: &str, key: &str) -> Option<&CellValue> {
        self.blocks.get(block)?.get(key)
    }

    /// Get the value of a cell as a number, if it exists and is numeric
    pub fn get_f64(&self, block: &str, key: &str) -> Option<f64> {
        self.get(block, key).and_then(CellValue::as_f64)
    }

    /// Whether a cell is absent or blank
    pub fn is_unset(&self, block: &str, key: &str) -> bool {
        self.get(block, key).is_none_or(CellValue::is_empty)
    }

    /// Set the value of a cell, adding it if needed.
    ///
    /// # Returns
    ///
    /// The previous value of the cell, if there was one.
    pub fn set<V: Into<CellValue>>(
        &mut self,
        block: &BlockID,
        key: &str,
        value: V,
    ) -> Option<CellValue> {
        self.blocks
            .entry(block.clone())
            .or_default()
            .insert(key.to_string(), value.into())
    }

    /// Iterate over all cells as `(block, key, value)`
    pub fn iter(&self) -> impl Iterator<Item = (&BlockID, &str, &CellValue)> {
        self.blocks.iter().flat_map(|(block, cells)| {
            cells
                .iter()
                .map(move |(key, value)| (block, key.as_str(), value))
        })
    }

    /// Write the snapshot as a single-column scenario file
    pub fn write_csv(&self, file_path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(file_path)
            .with_context(|| format!("Could not create {}", file_path.display()))?;
        writer.write_record(["block", "key", self.column.as_str()])?;
        for (block, key, value) in self.iter() {
            writer.write_record([block.as_str(), key, value.to_string().as_str()])?;
        }
        writer.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{TEMPLATE_CSV, assert_error, template};
    use rstest::rstest;
    use tempfile::tempdir;

    fn read_template(csv: &str) -> Result<ScenarioTemplate> {
        ScenarioTemplate::from_reader(csv.as_bytes())
    }

    #[rstest]
    fn test_read_template(template: ScenarioTemplate) {
        assert_eq!(template.scenario_names(), ["base", "high_pv"]);
        assert!(template.contains_block("pv"));
        assert!(template.contains_block("scenario"));
        assert!(!template.contains_block("wind"));
    }

    #[rstest]
    #[case("block,key\npv,size_existing\n", "Scenario file has no scenario columns")]
    #[case(
        "name,key,base\npv,size_existing,0\n",
        "Scenario file must start with the columns block and key"
    )]
    #[case(
        "block,key,base\npv,size_existing,0\npv,size_existing,1\n",
        "Scenario parameter pv.size_existing is defined more than once"
    )]
    #[case("block,key,base\n,size_existing,0\n", "Scenario row is missing a block or key")]
    fn test_read_template_invalid(#[case] csv: &str, #[case] msg: &str) {
        assert_error!(read_template(csv), msg);
    }

    #[rstest]
    fn test_check_blocks(template: ScenarioTemplate) {
        let present: Vec<BlockID> = vec!["pv".into(), "grid".into()];
        template.check_blocks(&present).unwrap();

        let required: Vec<BlockID> = vec!["pv".into(), "wind".into(), "hydro".into()];
        assert_error!(
            template.check_blocks(&required),
            "Validation failed: Scenario template is missing block(s): wind, hydro"
        );
    }

    #[rstest]
    fn test_snapshot_column(template: ScenarioTemplate) {
        let snapshot = template.snapshot(None).unwrap();
        assert_eq!(snapshot.column(), "base");
        assert_eq!(snapshot.get_f64("pv", "size_existing"), Some(0.0));

        let snapshot = template.snapshot(Some("high_pv")).unwrap();
        assert_eq!(snapshot.column(), "high_pv");
        assert_eq!(snapshot.get_f64("pv", "size_existing"), Some(50_000.0));

        assert_error!(
            template.snapshot(Some("missing")),
            "Validation failed: Scenario column missing not found (available: base, high_pv)"
        );
    }

    #[rstest]
    fn test_snapshot_is_independent(template: ScenarioTemplate) {
        let mut first = template.snapshot(None).unwrap();
        first.set(&"pv".into(), "size_existing", 1000.0);
        let second = template.snapshot(None).unwrap();
        assert_eq!(second.get_f64("pv", "size_existing"), Some(0.0));
    }

    #[rstest]
    fn test_set_and_unset(template: ScenarioTemplate) {
        let mut snapshot = template.snapshot(None).unwrap();
        assert!(snapshot.is_unset("scenario", "invest_max"));
        assert!(snapshot.is_unset("scenario", "no_such_key"));

        let previous = snapshot.set(&"scenario".into(), "invest_max", 10.0);
        assert_eq!(previous, Some(CellValue::Empty));
        assert!(!snapshot.is_unset("scenario", "invest_max"));

        let previous = snapshot.set(&"scenario".into(), "new_key", "x");
        assert_eq!(previous, None);
        assert_eq!(
            snapshot.get("scenario", "new_key"),
            Some(&CellValue::Text("x".into()))
        );
    }

    #[rstest]
    fn test_write_csv(template: ScenarioTemplate) {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("scenario.csv");
        let mut snapshot = template.snapshot(Some("high_pv")).unwrap();
        snapshot.set(&"pv".into(), "size_existing", 1234.5);
        snapshot.write_csv(&file_path).unwrap();

        let reread = ScenarioTemplate::from_path(&file_path).unwrap();
        assert_eq!(reread.scenario_names(), ["high_pv"]);
        let reread = reread.snapshot(None).unwrap();
        assert_eq!(reread.get_f64("pv", "size_existing"), Some(1234.5));
        assert_eq!(reread.iter().count(), snapshot.iter().count());
        assert_eq!(reread.get("bev", "filename"), snapshot.get("bev", "filename"));
    }

    #[test]
    fn test_template_fixture_parses() {
        read_template(TEMPLATE_CSV).unwrap();
    }
}
