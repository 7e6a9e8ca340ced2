use crate::error::{ReconcileError, Result};
use crate::layout::NationalLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Knobs for one pipeline run. Every field has a default matching the
/// 2011–2021 treasury and ministry publications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub first_year: i32,
    pub last_year: i32,

    /// Budget code the roster and file names use for the whole country.
    pub country_code: u32,
    /// Name emitted for country-scope rows when the roster has no country entry.
    pub country_name: String,

    /// From this year on sub-national workbooks put revenue/spending on sheets 0/1
    /// instead of 1/2.
    pub subnational_sheet_switch_year: i32,
    /// From this year on the spending target-article code sits 5 columns right of
    /// the label column instead of 6.
    pub spending_offset_switch_year: i32,

    pub national_revenue_sheet: usize,
    pub national_spending_sheet: usize,
    /// Report form per national year; years not listed use `Generalized`.
    pub national_layouts: BTreeMap<i32, NationalLayout>,

    /// The tax table reports thousands of roubles; the treasury reports roubles.
    pub tax_unit_multiplier: f64,

    /// Share of unclassified tax rows above which a warning is logged.
    pub classification_miss_warning_rate: f64,

    /// Year whose recorded country totals are compared with regional sums.
    pub cross_check_year: Option<i32>,
    /// Relative deviation tolerated by the cross-check.
    pub cross_check_tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut national_layouts = BTreeMap::new();
        national_layouts.insert(2011, NationalLayout::Early);
        national_layouts.insert(2014, NationalLayout::Cumulative);
        national_layouts.insert(2015, NationalLayout::Cumulative);
        national_layouts.insert(2021, NationalLayout::Cumulative);

        Self {
            first_year: 2011,
            last_year: 2021,
            country_code: 0,
            country_name: "russia".to_string(),
            subnational_sheet_switch_year: 2017,
            spending_offset_switch_year: 2015,
            national_revenue_sheet: 1,
            national_spending_sheet: 3,
            national_layouts,
            tax_unit_multiplier: 1000.0,
            classification_miss_warning_rate: 0.35,
            cross_check_year: Some(2012),
            cross_check_tolerance: 0.01,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.first_year..=self.last_year
    }

    pub fn contains_year(&self, year: i32) -> bool {
        (self.first_year..=self.last_year).contains(&year)
    }

    pub fn national_layout(&self, year: i32) -> NationalLayout {
        self.national_layouts
            .get(&year)
            .copied()
            .unwrap_or(NationalLayout::Generalized)
    }

    pub fn validate(&self) -> Result<()> {
        if self.last_year < self.first_year {
            return Err(ReconcileError::InvalidConfig(format!(
                "last_year {} is before first_year {}",
                self.last_year, self.first_year
            )));
        }

        if !(self.tax_unit_multiplier > 0.0) {
            return Err(ReconcileError::InvalidConfig(format!(
                "tax_unit_multiplier must be positive, got {}",
                self.tax_unit_multiplier
            )));
        }

        if !(0.0..=1.0).contains(&self.classification_miss_warning_rate) {
            return Err(ReconcileError::InvalidConfig(format!(
                "classification_miss_warning_rate {} must be between 0.0 and 1.0",
                self.classification_miss_warning_rate
            )));
        }

        if self.cross_check_tolerance < 0.0 {
            return Err(ReconcileError::InvalidConfig(format!(
                "cross_check_tolerance {} must be non-negative",
                self.cross_check_tolerance
            )));
        }

        if let Some(year) = self.cross_check_year {
            if year == self.first_year || !self.contains_year(year) {
                return Err(ReconcileError::InvalidConfig(format!(
                    "cross_check_year {} must be a later year inside {}..={}",
                    year, self.first_year, self.last_year
                )));
            }
        }

        if self.national_revenue_sheet == self.national_spending_sheet {
            return Err(ReconcileError::InvalidConfig(
                "national revenue and spending sheets must differ".to_string(),
            ));
        }

        Ok(())
    }
}
