//! # Regional Budget Reconciler
//!
//! A library for reconciling Russian budget execution data (regional treasury
//! reports, federal treasury reports and the finance ministry's tax collection
//! table) into one long, hierarchically indexed fact table.
//!
//! ## Core Concepts
//!
//! - **Raw Extracts**: decoded spreadsheet sheets, one workbook per region and year
//!   (or per federal year), whose layouts drift between publication years
//! - **Normalized Records**: one revenue or spending line with a zero-padded budget
//!   classification code and a cleaned amount
//! - **Tax Records**: ministry rows classified by tax category, destination budget
//!   and region through ordered substring catalogs
//! - **Classification Paths**: small-integer tuples (scope, domain, flow type,
//!   revenue levels, spending levels, label) addressing every output row
//! - **Integrity**: no duplicate paths, revenue and spending levels never mixed,
//!   missing reference values never turned into zeros
//!
//! ## Example
//!
//! ```rust,ignore
//! use regional_budget_reconciler::*;
//!
//! let config = PipelineConfig::default();
//! let reference = ReferenceTables::load(&ReferencePaths::in_dir("reference"), &config)?;
//! let reconciler = BudgetReconciler::with_default_catalogs(config, reference)?;
//!
//! let inputs = ReconciliationInputs {
//!     subnational: regional_workbooks,
//!     national: federal_workbooks,
//!     tax_table: TaxCollectionTable::from_csv_path("reference/taxes.csv")?,
//! };
//!
//! let reconciliation = reconciler.reconcile(&inputs)?;
//! reconciliation.table.to_csv_writer(std::fs::File::create("russian_budget_data.csv")?)?;
//! ```

pub mod canonical;
pub mod codes;
pub mod config;
pub mod error;
pub mod join;
pub mod layout;
pub mod normalize;
pub mod pivot;
pub mod reference;
pub mod schema;
pub mod taxonomy;
pub mod verify;

pub use codes::{RevenueBand, RevenueCode, SpendingCode};
pub use config::PipelineConfig;
pub use error::{ReconcileError, Result};
pub use join::{CrossSourceJoiner, JoinReport, JoinedFacts, TotalDeviation};
pub use layout::{NationalLayout, SubnationalLayout};
pub use normalize::{
    normalize_national_workbook, normalize_subnational_workbook, NormalizedWorkbook,
};
pub use pivot::{FactTable, PivotBuilder, PivotReport};
pub use reference::{ReferencePaths, ReferenceSources, ReferenceTables};
pub use schema::*;
pub use taxonomy::{classify_tax_table, ClassificationReport, TaxCollectionTable, TaxonomyCatalogs};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Everything one run consumes besides the reference tables.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationInputs {
    /// One workbook per (region, year), the country file included.
    pub subnational: Vec<Workbook>,
    /// One federal budget workbook per year.
    pub national: Vec<Workbook>,
    pub tax_table: TaxCollectionTable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub subnational_files: usize,
    pub national_files: usize,
    /// Workbooks whose year is outside the configured range.
    pub skipped_files: Vec<String>,
    pub classification: ClassificationReport,
    pub join: JoinReport,
    pub pivot: PivotReport,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub table: FactTable,
    pub report: PipelineReport,
}

pub struct BudgetReconciler {
    config: PipelineConfig,
    reference: ReferenceTables,
    catalogs: TaxonomyCatalogs,
}

impl BudgetReconciler {
    pub fn new(
        config: PipelineConfig,
        reference: ReferenceTables,
        catalogs: TaxonomyCatalogs,
    ) -> Result<Self> {
        config.validate()?;
        catalogs.validate()?;
        Ok(Self {
            config,
            reference,
            catalogs,
        })
    }

    pub fn with_default_catalogs(
        config: PipelineConfig,
        reference: ReferenceTables,
    ) -> Result<Self> {
        Self::new(config, reference, TaxonomyCatalogs::default())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn reference(&self) -> &ReferenceTables {
        &self.reference
    }

    /// Runs every stage and returns a verified fact table. Any structural
    /// failure aborts the run; no partial table is returned.
    pub fn reconcile(&self, inputs: &ReconciliationInputs) -> Result<Reconciliation> {
        let config = &self.config;
        let mut report = PipelineReport::default();

        info!(
            "Reconciling {} regional and {} federal workbooks for {}-{}",
            inputs.subnational.len(),
            inputs.national.len(),
            config.first_year,
            config.last_year
        );

        let mut subnational = NormalizedWorkbook::default();
        for workbook in self.in_range(&inputs.subnational, &mut report.skipped_files) {
            let normalized = normalize_subnational_workbook(workbook, config)?;
            subnational.revenue.extend(normalized.revenue);
            subnational.spending.extend(normalized.spending);
            report.subnational_files += 1;
        }

        let mut national = NormalizedWorkbook::default();
        for workbook in self.in_range(&inputs.national, &mut report.skipped_files) {
            let normalized = normalize_national_workbook(workbook, config)?;
            national.revenue.extend(normalized.revenue);
            national.spending.extend(normalized.spending);
            report.national_files += 1;
        }

        debug!(
            "Normalized {} regional revenue, {} regional spending, {} federal revenue and {} federal spending records",
            subnational.revenue.len(),
            subnational.spending.len(),
            national.revenue.len(),
            national.spending.len()
        );

        let (tax_records, classification) =
            classify_tax_table(&inputs.tax_table, &self.catalogs, config);
        report.classification = classification;

        let joiner = CrossSourceJoiner::new(config, &self.reference);
        let facts = joiner.join(
            &subnational.revenue,
            &subnational.spending,
            &national.revenue,
            &national.spending,
            &tax_records,
            &mut report.join,
        )?;

        let (table, pivot_report) = PivotBuilder::new(config, &self.reference).build(&facts)?;
        report.pivot = pivot_report;

        let covered: BTreeSet<(i32, &str)> = subnational
            .revenue
            .iter()
            .filter(|r| r.region != RegionKey::Country)
            .filter_map(|r| self.reference.region_name(r.region).map(|name| (r.year, name)))
            .collect();
        verify::verify_fact_table(&table, covered)?;

        info!(
            "Reconciliation complete: {} fact rows, {} cross-check deviations",
            table.len(),
            report.join.deviations.len()
        );

        Ok(Reconciliation { table, report })
    }

    /// Workbooks inside the configured years, ordered by (year, source id).
    fn in_range<'w>(
        &self,
        workbooks: &'w [Workbook],
        skipped: &mut Vec<String>,
    ) -> Vec<&'w Workbook> {
        let mut selected: Vec<&Workbook> = Vec::with_capacity(workbooks.len());
        for workbook in workbooks {
            if self.config.contains_year(workbook.year) {
                selected.push(workbook);
            } else {
                warn!(
                    "Skipping {}: year {} is outside {}-{}",
                    workbook.source_id, workbook.year, self.config.first_year, self.config.last_year
                );
                skipped.push(workbook.source_id.clone());
            }
        }
        selected.sort_by(|a, b| (a.year, &a.source_id).cmp(&(b.year, &b.source_id)));
        selected
    }
}

pub fn reconcile(
    config: PipelineConfig,
    reference: ReferenceTables,
    inputs: &ReconciliationInputs,
) -> Result<Reconciliation> {
    BudgetReconciler::with_default_catalogs(config, reference)?.reconcile(inputs)
}
