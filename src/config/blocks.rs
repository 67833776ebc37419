//! Descriptors for the scenario blocks the planner reads and writes.
use crate::id::BlockID;
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;

/// Default scenario key holding a block's existing capacity
pub const SIZE_EXISTING_KEY: &str = "size_existing";
/// Scenario key holding a grid block's existing grid-to-site capacity
pub const SIZE_G2S_EXISTING_KEY: &str = "size_g2s_existing";
/// Scenario key holding a grid block's existing site-to-grid capacity
pub const SIZE_S2G_EXISTING_KEY: &str = "size_s2g_existing";

/// What sort of asset an investable block represents
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    /// Generation (e.g. PV)
    #[string = "generator"]
    Generator,
    /// Energy storage
    #[string = "storage"]
    Storage,
    /// Grid connection, sized independently in each direction
    #[string = "grid"]
    Grid,
    /// Anything else (e.g. chargers)
    #[default]
    #[string = "other"]
    Other,
}

impl BlockKind {
    /// The unit and divisor used when displaying a capacity of this kind
    pub fn display_unit(self) -> (&'static str, f64) {
        match self {
            Self::Generator | Self::Grid => ("kW", 1000.0),
            Self::Storage => ("kWh", 1000.0),
            Self::Other => ("W", 1.0),
        }
    }
}

fn default_size_param() -> String {
    SIZE_EXISTING_KEY.to_string()
}

/// A block in which the optimiser may invest
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvestableBlock {
    /// Block name, as it appears in the scenario table
    pub name: BlockID,
    /// The kind of asset
    #[serde(default)]
    pub kind: BlockKind,
    /// The scenario key holding the block's unit cost, if costs evolve
    pub cost_param: Option<String>,
    /// The scenario key holding the block's existing capacity
    #[serde(default = "default_size_param")]
    pub size_param: String,
}

impl InvestableBlock {
    /// Whether this block's name refers to the given technology
    pub fn uses_technology(&self, tech: &str) -> bool {
        self.name.as_str().contains(tech)
    }

    /// Whether capacity is sized separately for import and export
    pub fn is_bidirectional(&self) -> bool {
        self.kind == BlockKind::Grid
    }
}

/// A block representing (part of) the vehicle fleet
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DemandBlock {
    /// Block name, as it appears in the scenario table
    pub name: BlockID,
    /// The scenario key holding the number of vehicles
    pub size_param: String,
    /// The scenario key holding annual consumption
    pub consumption_param: Option<String>,
    /// The scenario key holding the file name of the usage log
    pub log_param: Option<String>,
}

/// Where stage-wide values live in the scenario table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScenarioKeys {
    /// The block holding scenario-wide parameters
    pub block: BlockID,
    /// Key for the stage duration in years
    pub duration_key: String,
    /// Key for the emissions cap
    pub emissions_cap_key: String,
    /// Key for the per-stage investment ceiling
    pub investment_ceiling_key: String,
}

impl Default for ScenarioKeys {
    fn default() -> Self {
        Self {
            block: "scenario".into(),
            duration_key: "prj_duration".into(),
            emissions_cap_key: "co2_max".into(),
            investment_ceiling_key: "invest_max".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pv", "pv", true)]
    #[case("pv_roof", "pv", true)]
    #[case("ess", "pv", false)]
    fn test_uses_technology(#[case] name: &str, #[case] tech: &str, #[case] expected: bool) {
        let block = InvestableBlock {
            name: name.into(),
            kind: BlockKind::Generator,
            cost_param: None,
            size_param: default_size_param(),
        };
        assert_eq!(block.uses_technology(tech), expected);
    }

    #[test]
    fn test_deserialise_investable_block() {
        let block: InvestableBlock = toml::from_str(
            "name = \"grid\"\nkind = \"grid\"\ncost_param = \"capex_spec\"",
        )
        .unwrap();
        assert!(block.is_bidirectional());
        assert_eq!(block.size_param, SIZE_EXISTING_KEY);
        assert_eq!(block.cost_param.as_deref(), Some("capex_spec"));

        let block: InvestableBlock = toml::from_str("name = \"charger\"").unwrap();
        assert_eq!(block.kind, BlockKind::Other);
    }
}
