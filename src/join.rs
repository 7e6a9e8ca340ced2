use crate::codes::{RevenueCode, SpendingCode, OWN_REVENUE_CODE, TRANSFERS_CODE};
use crate::canonical::is_zero_code;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::reference::ReferenceTables;
use crate::schema::{DestinationBucket, NormalizedRecord, ReferenceAttributes, RegionKey, TaxRecord};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Tax amounts for one (year, region, code) after bucket pivoting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxSummary {
    /// Federal budget plus federal non-budget funds.
    pub tax_to_fed: f64,
    /// Regional budget only, without regional funds.
    pub tax_to_region: f64,
    pub label_eng: String,
    pub label_rus: String,
}

pub type TaxKey = (i32, RegionKey, String);

#[derive(Debug, Clone, Copy, Default)]
struct BucketMean {
    total: f64,
    count: usize,
}

impl BucketMean {
    fn add(&mut self, amount: f64) {
        self.total += amount;
        self.count += 1;
    }

    fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// One revenue line after the revenue/tax outer join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueFact {
    pub year: i32,
    pub region: RegionKey,
    pub code: RevenueCode,
    pub label_native: Option<String>,
    pub label_eng: Option<String>,
    /// Treasury amount; `None` for tax-only lines.
    pub revenue: Option<f64>,
    pub tax_to_fed: Option<f64>,
    pub tax_to_region: Option<f64>,
    pub attributes: ReferenceAttributes,
}

/// One spending line with its decomposed section code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendingFact {
    pub year: i32,
    pub region: RegionKey,
    pub code: SpendingCode,
    pub label_native: String,
    pub label_eng: Option<String>,
    pub amount: Option<f64>,
    /// Target article is the zero code.
    pub article_is_zero: bool,
    /// Ministry code is the zero code; always true for sub-national lines.
    pub agency_is_zero: bool,
}

/// Recorded country total vs. the sum over regions for one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalDeviation {
    pub year: i32,
    pub line: String,
    pub recorded: f64,
    pub regional_sum: f64,
    pub relative: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinReport {
    pub tax_records_unresolved: usize,
    pub tax_records_unknown_region: usize,
    pub duplicate_source_lines: usize,
    pub tax_only_lines: usize,
    pub gap_filled_values: usize,
    /// Federal lines labelled from a regional line with the same code.
    pub federal_labels_borrowed: usize,
    pub deviations: Vec<TotalDeviation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedFacts {
    /// Consolidated sub-national revenue, country rows included.
    pub regional_revenue: Vec<RevenueFact>,
    pub regional_spending: Vec<SpendingFact>,
    pub federal_revenue: Vec<RevenueFact>,
    pub federal_spending: Vec<SpendingFact>,
}

pub struct CrossSourceJoiner<'a> {
    config: &'a PipelineConfig,
    reference: &'a ReferenceTables,
}

impl<'a> CrossSourceJoiner<'a> {
    pub fn new(config: &'a PipelineConfig, reference: &'a ReferenceTables) -> Self {
        Self { config, reference }
    }

    pub fn join(
        &self,
        subnational_revenue: &[NormalizedRecord],
        subnational_spending: &[NormalizedRecord],
        national_revenue: &[NormalizedRecord],
        national_spending: &[NormalizedRecord],
        tax_records: &[TaxRecord],
        report: &mut JoinReport,
    ) -> Result<JoinedFacts> {
        let taxes = self.summarize_taxes(tax_records, report);

        let mut regional_revenue = self.join_revenue(subnational_revenue, taxes, report)?;
        report.gap_filled_values += fill_reference_gaps(&mut regional_revenue);

        let mut federal_revenue = self.join_revenue(national_revenue, BTreeMap::new(), report)?;
        report.federal_labels_borrowed +=
            borrow_revenue_labels(&mut federal_revenue, &regional_revenue);

        let facts = JoinedFacts {
            regional_revenue,
            regional_spending: self.join_spending(subnational_spending)?,
            federal_revenue,
            federal_spending: self.join_spending(national_spending)?,
        };

        if let Some(year) = self.config.cross_check_year {
            report.deviations =
                cross_check_country_totals(&facts, year, self.config.cross_check_tolerance);
        }

        info!(
            "Joined sources: {} regional revenue lines ({} tax-only), {} regional spending lines, {} federal revenue lines, {} federal spending lines",
            facts.regional_revenue.len(),
            report.tax_only_lines,
            facts.regional_spending.len(),
            facts.federal_revenue.len(),
            facts.federal_spending.len()
        );

        Ok(facts)
    }

    /// Averages tax records per (year, region, code, bucket) and pivots the
    /// buckets. Repeated rows for one bucket are copies of the same remittance,
    /// so they are not added up. Absent buckets count as zero. Records without
    /// a resolved region are dropped.
    pub fn summarize_taxes(
        &self,
        records: &[TaxRecord],
        report: &mut JoinReport,
    ) -> BTreeMap<TaxKey, TaxSummary> {
        let mut buckets: BTreeMap<TaxKey, (BTreeMap<DestinationBucket, BucketMean>, &TaxRecord)> =
            BTreeMap::new();

        for record in records {
            let Some(name) = record.region_name.as_deref() else {
                report.tax_records_unresolved += 1;
                continue;
            };
            let Some(region) = self.reference.region_for_name(name) else {
                report.tax_records_unknown_region += 1;
                debug!("Tax region '{}' is not in the region roster", name);
                continue;
            };

            let key = (record.year, region, record.tax_category_code.clone());
            let (means, _) = buckets
                .entry(key)
                .or_insert_with(|| (BTreeMap::new(), record));
            means
                .entry(record.destination_bucket)
                .or_default()
                .add(record.amount);
        }

        if report.tax_records_unresolved > 0 || report.tax_records_unknown_region > 0 {
            warn!(
                "Dropped {} tax records with an unresolved region and {} with a region outside the roster",
                report.tax_records_unresolved, report.tax_records_unknown_region
            );
        }

        buckets
            .into_iter()
            .map(|(key, (means, first))| {
                let bucket = |b: DestinationBucket| {
                    means.get(&b).map(BucketMean::value).unwrap_or(0.0)
                };
                let summary = TaxSummary {
                    tax_to_fed: bucket(DestinationBucket::Federal)
                        + bucket(DestinationBucket::FederalFund),
                    tax_to_region: bucket(DestinationBucket::Regional),
                    label_eng: first.tax_label_eng.clone(),
                    label_rus: first.tax_label_rus.clone(),
                };
                (key, summary)
            })
            .collect()
    }

    /// Outer join of treasury revenue with tax summaries on (year, region, code).
    pub fn join_revenue(
        &self,
        records: &[NormalizedRecord],
        mut taxes: BTreeMap<TaxKey, TaxSummary>,
        report: &mut JoinReport,
    ) -> Result<Vec<RevenueFact>> {
        let mut lines: BTreeMap<TaxKey, RevenueFact> = BTreeMap::new();

        for record in records {
            let key = (record.year, record.region, record.category_code.clone());
            match lines.entry(key) {
                Entry::Occupied(entry) => {
                    report.duplicate_source_lines += 1;
                    warn!(
                        "Revenue code {} appears twice for {} in {} ({}); keeping the first line",
                        entry.key().2,
                        record.region,
                        record.year,
                        record.source_id
                    );
                }
                Entry::Vacant(entry) => {
                    let code = RevenueCode::parse(&record.category_code)?;
                    entry.insert(RevenueFact {
                        year: record.year,
                        region: record.region,
                        label_native: Some(record.category_label_native.clone()),
                        label_eng: self
                            .reference
                            .revenue_label(&record.category_code)
                            .map(str::to_string),
                        code,
                        revenue: record.amount,
                        tax_to_fed: None,
                        tax_to_region: None,
                        attributes: self.reference.attributes_for(record.region, record.year),
                    });
                }
            }
        }

        for (key, fact) in lines.iter_mut() {
            if let Some(tax) = taxes.remove(key) {
                fact.tax_to_fed = Some(tax.tax_to_fed);
                fact.tax_to_region = Some(tax.tax_to_region);
                fact.label_eng = fact.label_eng.take().or(Some(tax.label_eng));
                fact.label_native = fact.label_native.take().or(Some(tax.label_rus));
            }
        }

        report.tax_only_lines += taxes.len();
        for ((year, region, code), tax) in taxes {
            let parsed = RevenueCode::parse(&code)?;
            let label_eng = self
                .reference
                .revenue_label(&code)
                .map(str::to_string)
                .unwrap_or(tax.label_eng);
            lines.insert(
                (year, region, code),
                RevenueFact {
                    year,
                    region,
                    code: parsed,
                    label_native: Some(tax.label_rus),
                    label_eng: Some(label_eng),
                    revenue: None,
                    tax_to_fed: Some(tax.tax_to_fed),
                    tax_to_region: Some(tax.tax_to_region),
                    attributes: ReferenceAttributes::default(),
                },
            );
        }

        Ok(lines.into_values().collect())
    }

    pub fn join_spending(&self, records: &[NormalizedRecord]) -> Result<Vec<SpendingFact>> {
        records
            .iter()
            .map(|record| {
                Ok(SpendingFact {
                    year: record.year,
                    region: record.region,
                    code: SpendingCode::parse(&record.category_code)?,
                    label_native: record.category_label_native.clone(),
                    label_eng: self
                        .reference
                        .spending_label(&record.category_code)
                        .map(str::to_string),
                    amount: record.amount,
                    article_is_zero: record
                        .program_code
                        .as_deref()
                        .map(is_zero_code)
                        .unwrap_or(true),
                    agency_is_zero: record.agency_code.as_deref().map(is_zero_code).unwrap_or(true),
                })
            })
            .collect()
    }
}

/// Gives unlabelled lines the English label that resolved for the same code
/// on the regional side, where the tax catalog also supplies labels. When a
/// code carries several labels the smallest one is used. Returns the number
/// of lines labelled.
pub fn borrow_revenue_labels(facts: &mut [RevenueFact], labelled: &[RevenueFact]) -> usize {
    let mut labels: BTreeMap<String, &str> = BTreeMap::new();
    for fact in labelled {
        let code = fact.code.to_code_string();
        let Some(label) = fact.label_eng.as_deref() else { continue };
        if is_zero_code(&code) {
            continue;
        }
        labels
            .entry(code)
            .and_modify(|current| {
                if label < *current {
                    *current = label;
                }
            })
            .or_insert(label);
    }

    let mut borrowed = 0;
    for fact in facts.iter_mut().filter(|f| f.label_eng.is_none()) {
        if let Some(label) = labels.get(&fact.code.to_code_string()) {
            fact.label_eng = Some(label.to_string());
            borrowed += 1;
        }
    }
    if borrowed > 0 {
        debug!("Labelled {} federal revenue lines from regional codes", borrowed);
    }
    borrowed
}

/// Replaces missing reference attributes with the minimum recorded for the
/// same (year, region). Tax-only lines pick up their region's attributes this
/// way. Returns the number of values filled.
///
/// The minimum equals the single recorded value whenever the reference tables
/// hold at most one value per (region, year), which the loader guarantees.
pub fn fill_reference_gaps(facts: &mut [RevenueFact]) -> usize {
    let mut minima: BTreeMap<(i32, RegionKey), ReferenceAttributes> = BTreeMap::new();
    for fact in facts.iter() {
        let entry = minima.entry((fact.year, fact.region)).or_default();
        *entry = ReferenceAttributes {
            population: min_option(entry.population, fact.attributes.population),
            real_income_index: min_option(
                entry.real_income_index,
                fact.attributes.real_income_index,
            ),
            income_per_capita: min_option(
                entry.income_per_capita,
                fact.attributes.income_per_capita,
            ),
            poverty_rate_pct: min_option(entry.poverty_rate_pct, fact.attributes.poverty_rate_pct),
            exchange_rate_rub_per_usd: min_option(
                entry.exchange_rate_rub_per_usd,
                fact.attributes.exchange_rate_rub_per_usd,
            ),
        };
    }

    let mut filled = 0;
    for fact in facts.iter_mut() {
        let Some(fill) = minima.get(&(fact.year, fact.region)) else { continue };
        let before = count_present(&fact.attributes);
        fact.attributes = fact.attributes.or(*fill);
        filled += count_present(&fact.attributes) - before;
    }
    if filled > 0 {
        debug!("Filled {} reference values from their (year, region) group", filled);
    }
    filled
}

fn min_option<T: PartialOrd>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b < a { b } else { a }),
        (a, b) => a.or(b),
    }
}

fn count_present(attributes: &ReferenceAttributes) -> usize {
    [
        attributes.population.is_some(),
        attributes.real_income_index.is_some(),
        attributes.income_per_capita.is_some(),
        attributes.poverty_rate_pct.is_some(),
        attributes.exchange_rate_rub_per_usd.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count()
}

/// Sum of the present values, `None` when nothing contributed.
pub fn sum_present(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    values
        .into_iter()
        .flatten()
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Sum over the non-country revenue lines with `code` in `year`.
pub fn regional_revenue_sum(facts: &[RevenueFact], year: i32, code: &str) -> Option<f64> {
    sum_present(
        facts
            .iter()
            .filter(|f| {
                f.year == year
                    && f.region != RegionKey::Country
                    && f.code.to_code_string() == code
            })
            .map(|f| f.revenue),
    )
}

/// Sum over the non-country spending totals in `year`.
pub fn regional_spending_total(facts: &[SpendingFact], year: i32) -> Option<f64> {
    sum_present(
        facts
            .iter()
            .filter(|f| f.year == year && f.region != RegionKey::Country && f.code.is_total())
            .map(|f| f.amount),
    )
}

/// Compares recorded country totals with the per-region sums for `year`.
/// Deviations above `tolerance` (relative to the recorded value) are logged
/// and returned.
pub fn cross_check_country_totals(
    facts: &JoinedFacts,
    year: i32,
    tolerance: f64,
) -> Vec<TotalDeviation> {
    let recorded_revenue = |code: &str| {
        facts
            .regional_revenue
            .iter()
            .find(|f| {
                f.year == year
                    && f.region == RegionKey::Country
                    && f.code.to_code_string() == code
            })
            .and_then(|f| f.revenue)
    };
    let recorded_spending = facts
        .regional_spending
        .iter()
        .find(|f| f.year == year && f.region == RegionKey::Country && f.code.is_total())
        .and_then(|f| f.amount);

    let checks = [
        (
            "reg_own_revenue",
            recorded_revenue(OWN_REVENUE_CODE),
            regional_revenue_sum(&facts.regional_revenue, year, OWN_REVENUE_CODE),
        ),
        (
            "transfers_to_reg",
            recorded_revenue(TRANSFERS_CODE),
            regional_revenue_sum(&facts.regional_revenue, year, TRANSFERS_CODE),
        ),
        (
            "reg_spending",
            recorded_spending,
            regional_spending_total(&facts.regional_spending, year),
        ),
    ];

    let mut deviations = Vec::new();
    for (line, recorded, regional_sum) in checks {
        let (Some(recorded), Some(regional_sum)) = (recorded, regional_sum) else {
            debug!("Cross-check of {} in {} skipped: a side is missing", line, year);
            continue;
        };
        let relative = if recorded == 0.0 {
            if regional_sum == 0.0 { 0.0 } else { f64::INFINITY }
        } else {
            ((recorded - regional_sum) / recorded).abs()
        };
        if relative > tolerance {
            warn!(
                "Country {} for {} is {:.2} but regions sum to {:.2} ({:.2}% apart)",
                line,
                year,
                recorded,
                regional_sum,
                relative * 100.0
            );
            deviations.push(TotalDeviation {
                year,
                line: line.to_string(),
                recorded,
                regional_sum,
                relative,
            });
        }
    }
    deviations
}
