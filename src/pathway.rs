//! Pathway functions: how technology costs, fleet size and the emissions cap evolve over time.
//!
//! All of these are pure functions of the configuration and a year.
use crate::error::PlanningError;
use anyhow::Result;
use serde::Deserialize;
use strum::{Display, EnumString};

/// The emissions limit used when no emissions pathway applies.
///
/// This is a large finite number rather than infinity so that arithmetic on it stays well-defined.
pub const UNBOUNDED_EMISSIONS_LIMIT: f64 = 1e15;

/// Default assumption for the energy a single vehicle consumes per year (kWh)
pub const DEFAULT_ENERGY_PER_VEHICLE_KWH: f64 = 15_000.0;

/// Check that `year` is not before `base_year`, returning the number of elapsed years
fn years_elapsed(model: &str, year: u32, base_year: u32) -> Result<u32> {
    if year < base_year {
        Err(PlanningError::Domain {
            model: model.to_string(),
            year,
            base_year,
        })?;
    }

    Ok(year - base_year)
}

/// Exponential decline of a technology's unit cost
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TechCostModel {
    /// The year in which the unit cost equals `base_cost`
    pub base_year: u32,
    /// Unit cost in the base year (currency per W or per Wh)
    pub base_cost: f64,
    /// Fraction by which the cost falls each year
    pub annual_decline_rate: f64,
}

impl TechCostModel {
    /// The unit cost in the given year: `base_cost * (1 - decline_rate)^(year - base_year)`
    pub fn unit_cost(&self, year: u32) -> Result<f64> {
        let elapsed = years_elapsed("technology cost", year, self.base_year)?;
        Ok(self.base_cost * (1.0 - self.annual_decline_rate).powi(elapsed as i32))
    }
}

/// Exponential growth of the vehicle fleet
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemandModel {
    /// The year in which the fleet has `base_fleet_size` vehicles
    pub base_year: u32,
    /// Number of vehicles in the base year
    pub base_fleet_size: u32,
    /// Fractional growth of the fleet per year
    pub annual_growth_rate: f64,
    /// Assumed energy demand of one vehicle over a year (kWh)
    #[serde(default = "default_energy_per_vehicle")]
    pub energy_per_vehicle_kwh: f64,
}

fn default_energy_per_vehicle() -> f64 {
    DEFAULT_ENERGY_PER_VEHICLE_KWH
}

impl DemandModel {
    /// The number of vehicles in the given year, rounded down
    pub fn fleet_size(&self, year: u32) -> Result<u32> {
        let elapsed = years_elapsed("fleet demand", year, self.base_year)?;
        let size =
            f64::from(self.base_fleet_size) * (1.0 + self.annual_growth_rate).powi(elapsed as i32);
        Ok(size.floor() as u32)
    }

    /// The ratio of the fleet size in `year` to the base fleet size.
    ///
    /// This is computed from the rounded fleet size so that everything scaled with the fleet
    /// (e.g. annual consumption) stays consistent with the number of vehicles.
    pub fn growth_factor(&self, year: u32) -> Result<f64> {
        Ok(f64::from(self.fleet_size(year)?) / f64::from(self.base_fleet_size))
    }
}

/// The policy which determines the emissions cap in each year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EmissionsPathway {
    /// No emissions cap
    None,
    /// Linear interpolation between a base and final limit
    Linear,
    /// A fixed fraction of the base limit is removed each year, down to net zero
    ScienceBased,
}

/// Evolution of the emissions cap
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionsModel {
    /// Pathway policy
    pub pathway: EmissionsPathway,
    /// First year of the pathway
    pub base_year: u32,
    /// Emissions limit in the base year (kg)
    pub base_limit_kg: f64,
    /// Year in which the final limit is reached (linear pathway)
    pub final_year: u32,
    /// Emissions limit in the final year (kg)
    pub final_limit_kg: f64,
    /// Fraction of the base limit removed per year (science-based pathway)
    pub annual_reduction_rate: Option<f64>,
}

impl EmissionsModel {
    /// The emissions limit (kg) for the given year.
    ///
    /// Returns [`UNBOUNDED_EMISSIONS_LIMIT`] if there is no pathway.
    pub fn limit(&self, year: u32) -> Result<f64> {
        let limit = match self.pathway {
            EmissionsPathway::None => UNBOUNDED_EMISSIONS_LIMIT,
            EmissionsPathway::Linear => self.linear_limit(year),
            EmissionsPathway::ScienceBased => {
                let Some(rate) = self.annual_reduction_rate else {
                    return Err(PlanningError::Config(
                        "annual_reduction_rate must be set for the science_based pathway".into(),
                    )
                    .into());
                };
                self.science_based_limit(year, rate)
            }
        };

        Ok(limit)
    }

    fn linear_limit(&self, year: u32) -> f64 {
        if year <= self.base_year {
            return self.base_limit_kg;
        }
        if year >= self.final_year {
            return self.final_limit_kg;
        }

        let fraction =
            f64::from(year - self.base_year) / f64::from(self.final_year - self.base_year);
        self.base_limit_kg + fraction * (self.final_limit_kg - self.base_limit_kg)
    }

    fn science_based_limit(&self, year: u32, rate: f64) -> f64 {
        if year <= self.base_year {
            return self.base_limit_kg;
        }

        let elapsed = f64::from(year - self.base_year);
        (self.base_limit_kg * (1.0 - rate * elapsed)).max(0.0)
    }
}

/// The factor by which values in `year` are discounted back to `first_year`.
///
/// This is `(1 + wacc)^-(year - first_year)`.
pub fn discount_factor(wacc: f64, first_year: u32, year: u32) -> f64 {
    let exponent = i64::from(year) - i64::from(first_year);
    (1.0 + wacc).powi(-(exponent as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use proptest::prelude::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn pv_cost() -> TechCostModel {
        TechCostModel {
            base_year: 2025,
            base_cost: 1.0,
            annual_decline_rate: 0.05,
        }
    }

    #[fixture]
    fn demand() -> DemandModel {
        DemandModel {
            base_year: 2025,
            base_fleet_size: 10,
            annual_growth_rate: 0.1,
            energy_per_vehicle_kwh: DEFAULT_ENERGY_PER_VEHICLE_KWH,
        }
    }

    fn emissions(pathway: EmissionsPathway, rate: Option<f64>) -> EmissionsModel {
        EmissionsModel {
            pathway,
            base_year: 2025,
            base_limit_kg: 500.0,
            final_year: 2050,
            final_limit_kg: 100.0,
            annual_reduction_rate: rate,
        }
    }

    #[rstest]
    #[case(2025, 1.0)]
    #[case(2030, 0.773_780_937_5)]
    #[case(2050, 0.277_389_573_122)]
    fn test_unit_cost(pv_cost: TechCostModel, #[case] year: u32, #[case] expected: f64) {
        assert_approx_eq!(f64, pv_cost.unit_cost(year).unwrap(), expected, epsilon = 1e-9);
    }

    #[rstest]
    fn test_unit_cost_before_base_year(pv_cost: TechCostModel) {
        let err = pv_cost.unit_cost(2024).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlanningError>(),
            Some(PlanningError::Domain {
                year: 2024,
                base_year: 2025,
                ..
            })
        ));
    }

    #[rstest]
    #[case(2025, 10)]
    #[case(2030, 16)] // floor(10 * 1.1^5) = floor(16.1051)
    #[case(2050, 108)] // floor(10 * 1.1^25) = floor(108.347)
    fn test_fleet_size(demand: DemandModel, #[case] year: u32, #[case] expected: u32) {
        assert_eq!(demand.fleet_size(year).unwrap(), expected);
    }

    #[rstest]
    fn test_fleet_size_before_base_year(demand: DemandModel) {
        assert!(demand.fleet_size(2020).is_err());
    }

    #[rstest]
    fn test_growth_factor(demand: DemandModel) {
        assert_approx_eq!(f64, demand.growth_factor(2025).unwrap(), 1.0);
        assert_approx_eq!(f64, demand.growth_factor(2030).unwrap(), 1.6);
    }

    #[test]
    fn test_no_pathway() {
        let model = emissions(EmissionsPathway::None, None);
        assert_eq!(model.limit(2030).unwrap(), UNBOUNDED_EMISSIONS_LIMIT);
    }

    #[rstest]
    #[case(2020, 500.0)] // clamped before base year
    #[case(2025, 500.0)]
    #[case(2030, 420.0)]
    #[case(2050, 100.0)]
    #[case(2060, 100.0)] // clamped after final year
    fn test_linear_pathway(#[case] year: u32, #[case] expected: f64) {
        let model = emissions(EmissionsPathway::Linear, None);
        assert_approx_eq!(f64, model.limit(year).unwrap(), expected, epsilon = 1e-9);
    }

    #[rstest]
    #[case(2025, 500.0)]
    #[case(2030, 395.0)] // 500 * (1 - 0.042 * 5)
    #[case(2045, 80.0)] // 500 * (1 - 0.042 * 20)
    #[case(2050, 0.0)] // floored at net zero
    fn test_science_based_pathway(#[case] year: u32, #[case] expected: f64) {
        let model = emissions(EmissionsPathway::ScienceBased, Some(0.042));
        assert_approx_eq!(f64, model.limit(year).unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_science_based_pathway_missing_rate() {
        let model = emissions(EmissionsPathway::ScienceBased, None);
        let err = model.limit(2030).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlanningError>(),
            Some(PlanningError::Config(_))
        ));
    }

    #[rstest]
    #[case("none", EmissionsPathway::None)]
    #[case("linear", EmissionsPathway::Linear)]
    #[case("science_based", EmissionsPathway::ScienceBased)]
    fn test_pathway_from_str(#[case] input: &str, #[case] expected: EmissionsPathway) {
        assert_eq!(input.parse::<EmissionsPathway>().unwrap(), expected);
        assert_eq!(expected.to_string(), input);
    }

    #[test]
    fn test_pathway_from_str_unknown() {
        assert!("exponential".parse::<EmissionsPathway>().is_err());
    }

    #[rstest]
    #[case(2025, 1.0)]
    #[case(2030, 0.680_583_197)]
    #[case(2035, 0.463_193_488)]
    fn test_discount_factor(#[case] year: u32, #[case] expected: f64) {
        assert_approx_eq!(
            f64,
            discount_factor(0.08, 2025, year),
            expected,
            epsilon = 1e-9
        );
    }

    proptest! {
        #[test]
        fn prop_unit_cost_non_increasing(
            base_cost in 0.0f64..1000.0,
            rate in 0.001f64..0.99,
            offset in 0u32..60,
        ) {
            let model = TechCostModel { base_year: 2025, base_cost, annual_decline_rate: rate };
            prop_assert_eq!(model.unit_cost(2025).unwrap(), base_cost);
            let c1 = model.unit_cost(2025 + offset).unwrap();
            let c2 = model.unit_cost(2026 + offset).unwrap();
            prop_assert!(c2 <= c1);
        }

        #[test]
        fn prop_fleet_size_non_decreasing(
            base in 1u32..500,
            rate in 0.0f64..0.3,
            offset in 0u32..30,
        ) {
            let model = DemandModel {
                base_year: 2025,
                base_fleet_size: base,
                annual_growth_rate: rate,
                energy_per_vehicle_kwh: DEFAULT_ENERGY_PER_VEHICLE_KWH,
            };
            prop_assert_eq!(model.fleet_size(2025).unwrap(), base);
            let n1 = model.fleet_size(2025 + offset).unwrap();
            let n2 = model.fleet_size(2026 + offset).unwrap();
            prop_assert!(n2 >= n1);
        }

        #[test]
        fn prop_linear_pathway_monotonic(
            base_limit in 0.0f64..1e6,
            final_limit in 0.0f64..1e6,
            y1 in 2026u32..2049,
            gap in 1u32..24,
        ) {
            let model = EmissionsModel {
                pathway: EmissionsPathway::Linear,
                base_year: 2025,
                base_limit_kg: base_limit,
                final_year: 2050,
                final_limit_kg: final_limit,
                annual_reduction_rate: None,
            };
            let y2 = (y1 + gap).min(2049);
            prop_assert_eq!(model.limit(2025).unwrap(), base_limit);
            prop_assert_eq!(model.limit(2050).unwrap(), final_limit);
            let l1 = model.limit(y1).unwrap();
            let l2 = model.limit(y2).unwrap();
            if final_limit >= base_limit {
                prop_assert!(l2 >= l1);
            } else {
                prop_assert!(l2 <= l1);
            }
        }

        #[test]
        fn prop_science_based_never_negative(
            base_limit in 0.0f64..1e6,
            rate in 0.0f64..1.0,
            offset in 0u32..100,
        ) {
            let model = EmissionsModel {
                pathway: EmissionsPathway::ScienceBased,
                base_year: 2025,
                base_limit_kg: base_limit,
                final_year: 2050,
                final_limit_kg: 0.0,
                annual_reduction_rate: Some(rate),
            };
            prop_assert_eq!(model.limit(2025).unwrap(), base_limit);
            prop_assert!(model.limit(2025 + offset).unwrap() >= 0.0);
        }
    }
}
