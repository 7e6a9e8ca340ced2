use crate::codes::{RevenueBand, RevenueCode, OWN_REVENUE_CODE, TAX_TOTAL_CODE, TRANSFERS_CODE};
use crate::config::PipelineConfig;
use crate::error::{ReconcileError, Result};
use crate::join::{sum_present, JoinedFacts, RevenueFact, SpendingFact};
use crate::reference::ReferenceTables;
use crate::schema::{
    BudgetDomain, ClassificationPath, FactRow, FlowType, RegionKey, RevenueLine, Scope,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

pub const CSV_HEADER: [&str; 14] = [
    "scope",
    "domain",
    "flow_type",
    "r1",
    "r2",
    "r3",
    "r4",
    "r5",
    "s1",
    "s2",
    "category_label",
    "region_name",
    "year",
    "value",
];

/// The finished long table, sorted by year, region (country first) and path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactTable {
    pub rows: Vec<FactRow>,
}

impl FactTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows for one region name and year.
    pub fn rows_for<'a>(
        &'a self,
        region_name: &'a str,
        year: i32,
    ) -> impl Iterator<Item = &'a FactRow> + 'a {
        self.rows
            .iter()
            .filter(move |row| row.year == year && row.region_name == region_name)
    }

    /// Writes the table as CSV; a missing value is an empty field.
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(CSV_HEADER)?;
        for row in &self.rows {
            let p = &row.path;
            csv_writer.write_record([
                p.scope.to_string(),
                p.domain.to_string(),
                p.flow_type.to_string(),
                p.r1.to_string(),
                p.r2.to_string(),
                p.r3.to_string(),
                p.r4.to_string(),
                p.r5.to_string(),
                p.s1.to_string(),
                p.s2.to_string(),
                p.category_label.clone(),
                row.region_name.clone(),
                row.year.to_string(),
                row.value.map(|v| v.to_string()).unwrap_or_default(),
            ])?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buffer = Vec::new();
        self.to_csv_writer(&mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ReconcileError::InvariantViolation(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rows)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PivotReport {
    pub rows_emitted: usize,
    /// Lines dropped because their region is not in the roster.
    pub rows_without_region: usize,
    pub unlabelled_lines: usize,
}

type FactKey = (i32, RegionKey, ClassificationPath);

/// Collects rows and refuses a second value for the same (path, region, year).
struct FactSink<'a> {
    reference: &'a ReferenceTables,
    rows: BTreeMap<FactKey, (String, Option<f64>)>,
    unnamed_regions: BTreeSet<RegionKey>,
    report: PivotReport,
}

impl<'a> FactSink<'a> {
    fn emit(
        &mut self,
        region: RegionKey,
        year: i32,
        path: ClassificationPath,
        value: Option<f64>,
    ) -> Result<()> {
        let Some(name) = self.reference.region_name(region) else {
            self.report.rows_without_region += 1;
            self.unnamed_regions.insert(region);
            return Ok(());
        };
        match self.rows.entry((year, region, path)) {
            Entry::Occupied(entry) => Err(ReconcileError::DuplicateFact {
                path: entry.key().2.to_string(),
                region: name.to_string(),
                year,
            }),
            Entry::Vacant(entry) => {
                entry.insert((name.to_string(), value));
                Ok(())
            }
        }
    }
}

fn base_path(
    scope: Scope,
    domain: BudgetDomain,
    flow: FlowType,
    label: impl Into<String>,
) -> ClassificationPath {
    ClassificationPath {
        scope: scope.index(),
        domain: domain.index(),
        flow_type: flow.index(),
        r1: 0,
        r2: 0,
        r3: 0,
        r4: 0,
        r5: 0,
        s1: 0,
        s2: 0,
        category_label: label.into(),
    }
}

/// Detail levels as they appear in the output: the code's group, subgroup and
/// item move one position down and `r2` carries the tax/non-tax band.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DetailLevels {
    group: u8,
    subgroup: u8,
    item: u16,
}

impl DetailLevels {
    fn of(code: &RevenueCode) -> Option<Self> {
        let reportable =
            code.kind == 1 && code.is_detail() && !(code.subgroup == 0 && code.item != 0);
        reportable.then_some(Self {
            group: code.group,
            subgroup: code.subgroup,
            item: code.item,
        })
    }

    fn path(
        &self,
        scope: Scope,
        domain: BudgetDomain,
        line: RevenueLine,
        label: &str,
    ) -> ClassificationPath {
        ClassificationPath {
            r1: line.index(),
            r2: RevenueBand::of_group(self.group).index(),
            r3: self.group,
            r4: self.subgroup,
            r5: self.item,
            ..base_path(scope, domain, FlowType::Revenue, label)
        }
    }
}

fn top_line_path(
    scope: Scope,
    domain: BudgetDomain,
    line: RevenueLine,
    label: &str,
) -> ClassificationPath {
    ClassificationPath {
        r1: line.index(),
        ..base_path(scope, domain, FlowType::Revenue, label)
    }
}

fn band_total_path(
    scope: Scope,
    domain: BudgetDomain,
    band: RevenueBand,
    label: &str,
) -> ClassificationPath {
    ClassificationPath {
        r1: RevenueLine::OwnRevenue.index(),
        r2: band.index(),
        ..base_path(scope, domain, FlowType::Revenue, label)
    }
}

fn spending_path(
    scope: Scope,
    domain: BudgetDomain,
    section: u8,
    subsection: u8,
    label: &str,
) -> ClassificationPath {
    ClassificationPath {
        s1: section,
        s2: subsection,
        ..base_path(scope, domain, FlowType::Spending, label)
    }
}

const TOP_LINES: [(&str, RevenueLine, &str); 3] = [
    (OWN_REVENUE_CODE, RevenueLine::OwnRevenue, "reg_own_revenue"),
    (TRANSFERS_CODE, RevenueLine::Transfers, "transfers_to_reg"),
    (TAX_TOTAL_CODE, RevenueLine::TaxToFederal, "tax_to_fed"),
];

fn is_code(fact: &RevenueFact, code: &str) -> bool {
    fact.code.to_code_string() == code
}

/// Group-level own revenue lines of one band, the addends of the band totals.
fn is_band_group_line(fact: &RevenueFact, band: RevenueBand) -> bool {
    fact.code.kind == 1
        && fact.code.band() == band
        && band != RevenueBand::Total
        && fact.code.subgroup == 0
        && fact.code.item == 0
}

fn is_reported_spending_line(fact: &SpendingFact) -> bool {
    !fact.code.is_total() && fact.article_is_zero
}

/// Reshapes joined facts into classification-path rows.
pub struct PivotBuilder<'a> {
    config: &'a PipelineConfig,
    reference: &'a ReferenceTables,
}

impl<'a> PivotBuilder<'a> {
    pub fn new(config: &'a PipelineConfig, reference: &'a ReferenceTables) -> Self {
        Self { config, reference }
    }

    pub fn build(&self, facts: &JoinedFacts) -> Result<(FactTable, PivotReport)> {
        let mut sink = FactSink {
            reference: self.reference,
            rows: BTreeMap::new(),
            unnamed_regions: BTreeSet::new(),
            report: PivotReport::default(),
        };

        let revenue_groups = group_by_region_year(&facts.regional_revenue, |f| (f.year, f.region));
        let spending_groups =
            group_by_region_year(&facts.regional_spending, |f| (f.year, f.region));

        for (&(year, region), lines) in &revenue_groups {
            if region == RegionKey::Country {
                continue;
            }
            self.emit_region_revenue(&mut sink, region, year, lines)?;
            let attributes = lines.first().map(|f| f.attributes).unwrap_or_default();
            for flow in FlowType::ATTRIBUTES {
                self.emit_attribute(
                    &mut sink,
                    Scope::Region,
                    region,
                    year,
                    flow,
                    flow.attribute_value(&attributes),
                )?;
            }
        }
        for (&(year, region), lines) in &spending_groups {
            if region == RegionKey::Country {
                continue;
            }
            self.emit_region_spending(&mut sink, region, year, lines)?;
        }

        let years: BTreeSet<i32> = facts
            .regional_revenue
            .iter()
            .map(|f| f.year)
            .chain(facts.regional_spending.iter().map(|f| f.year))
            .chain(facts.federal_revenue.iter().map(|f| f.year))
            .chain(facts.federal_spending.iter().map(|f| f.year))
            .filter(|year| self.config.contains_year(*year))
            .collect();

        for &year in &years {
            self.emit_country_revenue(&mut sink, facts, year)?;
            self.emit_country_spending(&mut sink, facts, year)?;
            self.emit_federal(&mut sink, facts, year)?;

            let attributes = self.reference.attributes_for(RegionKey::Country, year);
            for flow in FlowType::ATTRIBUTES {
                self.emit_attribute(
                    &mut sink,
                    Scope::Country,
                    RegionKey::Country,
                    year,
                    flow,
                    flow.attribute_value(&attributes),
                )?;
            }
        }

        for region in &sink.unnamed_regions {
            warn!("No roster name for {}; its lines are left out of the fact table", region);
        }

        let FactSink { rows, mut report, .. } = sink;
        let rows: Vec<FactRow> = rows
            .into_iter()
            .map(|((year, _, path), (region_name, value))| FactRow {
                path,
                region_name,
                year,
                value,
            })
            .collect();
        report.rows_emitted = rows.len();

        info!(
            "Built fact table: {} rows over {} years ({} lines without a roster region)",
            report.rows_emitted,
            years.len(),
            report.rows_without_region
        );

        Ok((FactTable { rows }, report))
    }

    fn emit_attribute(
        &self,
        sink: &mut FactSink<'_>,
        scope: Scope,
        region: RegionKey,
        year: i32,
        flow: FlowType,
        value: Option<f64>,
    ) -> Result<()> {
        let Some(label) = flow.attribute_label() else {
            return Ok(());
        };
        sink.emit(region, year, base_path(scope, BudgetDomain::Consolidated, flow, label), value)
    }

    fn emit_region_revenue(
        &self,
        sink: &mut FactSink<'_>,
        region: RegionKey,
        year: i32,
        lines: &[&RevenueFact],
    ) -> Result<()> {
        let scope = Scope::Region;
        let domain = BudgetDomain::Consolidated;

        for (code, line, label) in TOP_LINES {
            for fact in lines.iter().filter(|f| is_code(f, code)) {
                sink.emit(
                    region,
                    year,
                    top_line_path(scope, domain, line, label),
                    fact.revenue.or(fact.tax_to_fed),
                )?;
            }
        }

        for fact in lines {
            let Some(levels) = DetailLevels::of(&fact.code) else { continue };
            let Some(label) = fact.label_eng.as_deref() else {
                sink.report.unlabelled_lines += 1;
                continue;
            };
            if fact.revenue.is_some() {
                sink.emit(
                    region,
                    year,
                    levels.path(scope, domain, RevenueLine::OwnRevenue, label),
                    fact.revenue,
                )?;
            }
            if fact.tax_to_fed.is_some() {
                sink.emit(
                    region,
                    year,
                    levels.path(scope, domain, RevenueLine::TaxToFederal, label),
                    fact.tax_to_fed,
                )?;
            }
        }
        Ok(())
    }

    fn emit_region_spending(
        &self,
        sink: &mut FactSink<'_>,
        region: RegionKey,
        year: i32,
        lines: &[&SpendingFact],
    ) -> Result<()> {
        let scope = Scope::Region;
        let domain = BudgetDomain::Consolidated;

        for fact in lines.iter().filter(|f| f.code.is_total() && f.article_is_zero) {
            sink.emit(
                region,
                year,
                spending_path(scope, domain, 0, 0, "reg_spending"),
                fact.amount,
            )?;
        }
        for fact in lines.iter().filter(|f| is_reported_spending_line(f)) {
            let Some(label) = fact.label_eng.as_deref() else {
                sink.report.unlabelled_lines += 1;
                continue;
            };
            sink.emit(
                region,
                year,
                spending_path(scope, domain, fact.code.section, fact.code.subsection, label),
                fact.amount,
            )?;
        }
        Ok(())
    }

    /// Country rows of the consolidated domain. In the first configured year
    /// there is no country treasury report, so treasury-sourced lines are
    /// region sums and tax-sourced lines fall back to region sums.
    fn emit_country_revenue(
        &self,
        sink: &mut FactSink<'_>,
        facts: &JoinedFacts,
        year: i32,
    ) -> Result<()> {
        let scope = Scope::Country;
        let domain = BudgetDomain::Consolidated;
        let region = RegionKey::Country;
        let first_year = year == self.config.first_year;

        let (country, regions): (Vec<&RevenueFact>, Vec<&RevenueFact>) = facts
            .regional_revenue
            .iter()
            .filter(|f| f.year == year)
            .partition(|f| f.region == RegionKey::Country);

        for (code, line, label) in TOP_LINES {
            let recorded = country
                .iter()
                .find(|f| is_code(f, code))
                .map(|f| f.revenue.or(f.tax_to_fed));
            let regional = || {
                sum_present(
                    regions
                        .iter()
                        .filter(|f| is_code(f, code))
                        .map(|f| f.revenue.or(f.tax_to_fed)),
                )
            };

            let value = match (first_year, line) {
                (true, RevenueLine::TaxToFederal) => recorded.flatten().or_else(regional).map(Some),
                (true, _) => regional().map(Some),
                (false, _) => recorded,
            };
            if let Some(value) = value {
                sink.emit(region, year, top_line_path(scope, domain, line, label), value)?;
            }
        }

        let band_source = if first_year { &regions } else { &country };
        for (band, label) in [
            (RevenueBand::Tax, "reg_tax_revenue"),
            (RevenueBand::NonTax, "reg_nontax_revenue"),
        ] {
            let total = sum_present(
                band_source
                    .iter()
                    .filter(|f| is_band_group_line(f, band))
                    .map(|f| f.revenue),
            );
            if let Some(total) = total {
                sink.emit(region, year, band_total_path(scope, domain, band, label), Some(total))?;
            }
        }

        let mut details: BTreeMap<(DetailLevels, String), Option<f64>> = BTreeMap::new();
        for fact in band_source {
            let (Some(levels), Some(label), Some(revenue)) =
                (DetailLevels::of(&fact.code), fact.label_eng.as_ref(), fact.revenue)
            else {
                continue;
            };
            match details.entry((levels, label.clone())) {
                Entry::Occupied(mut entry) if first_year => {
                    *entry.get_mut() = Some(entry.get().unwrap_or(0.0) + revenue);
                }
                Entry::Occupied(entry) => {
                    return Err(ReconcileError::DuplicateFact {
                        path: entry
                            .key()
                            .0
                            .path(scope, domain, RevenueLine::OwnRevenue, label)
                            .to_string(),
                        region: self.reference.country_name.clone(),
                        year,
                    });
                }
                Entry::Vacant(entry) => {
                    entry.insert(Some(revenue));
                }
            }
        }
        for ((levels, label), value) in &details {
            sink.emit(
                region,
                year,
                levels.path(scope, domain, RevenueLine::OwnRevenue, label),
                *value,
            )?;
        }

        for fact in &country {
            let (Some(levels), Some(label), Some(tax)) =
                (DetailLevels::of(&fact.code), fact.label_eng.as_deref(), fact.tax_to_fed)
            else {
                continue;
            };
            if tax != 0.0 {
                sink.emit(
                    region,
                    year,
                    levels.path(scope, domain, RevenueLine::TaxToFederal, label),
                    Some(tax),
                )?;
            }
        }
        Ok(())
    }

    fn emit_country_spending(
        &self,
        sink: &mut FactSink<'_>,
        facts: &JoinedFacts,
        year: i32,
    ) -> Result<()> {
        let scope = Scope::Country;
        let domain = BudgetDomain::Consolidated;
        let first_year = year == self.config.first_year;

        let (country, regions): (Vec<&SpendingFact>, Vec<&SpendingFact>) = facts
            .regional_spending
            .iter()
            .filter(|f| f.year == year && f.article_is_zero)
            .partition(|f| f.region == RegionKey::Country);
        let source = if first_year { &regions } else { &country };

        let totals: Vec<Option<f64>> = source
            .iter()
            .filter(|f| f.code.is_total())
            .map(|f| f.amount)
            .collect();
        if first_year {
            if let Some(total) = sum_present(totals) {
                sink.emit(
                    RegionKey::Country,
                    year,
                    spending_path(scope, domain, 0, 0, "reg_spending"),
                    Some(total),
                )?;
            }
        } else {
            for total in totals {
                sink.emit(
                    RegionKey::Country,
                    year,
                    spending_path(scope, domain, 0, 0, "reg_spending"),
                    total,
                )?;
            }
        }

        if first_year {
            let sections = summed_sections(source.iter().copied(), &mut sink.report);
            for ((section, subsection, label), value) in sections {
                sink.emit(
                    RegionKey::Country,
                    year,
                    spending_path(scope, domain, section, subsection, &label),
                    value,
                )?;
            }
        } else {
            for fact in source.iter().filter(|f| is_reported_spending_line(f)) {
                let Some(label) = fact.label_eng.as_deref() else {
                    sink.report.unlabelled_lines += 1;
                    continue;
                };
                sink.emit(
                    RegionKey::Country,
                    year,
                    spending_path(scope, domain, fact.code.section, fact.code.subsection, label),
                    fact.amount,
                )?;
            }
        }
        Ok(())
    }

    fn emit_federal(&self, sink: &mut FactSink<'_>, facts: &JoinedFacts, year: i32) -> Result<()> {
        let scope = Scope::Country;
        let domain = BudgetDomain::Federal;
        let region = RegionKey::Country;

        let revenue: Vec<&RevenueFact> = facts
            .federal_revenue
            .iter()
            .filter(|f| f.year == year)
            .collect();
        for fact in revenue.iter().filter(|f| f.code.kind == 1 && !f.code.is_detail()) {
            sink.emit(
                region,
                year,
                band_total_path(scope, domain, RevenueBand::Total, "fed_revenue"),
                fact.revenue,
            )?;
        }
        for (band, label) in [
            (RevenueBand::Tax, "fed_tax_revenue"),
            (RevenueBand::NonTax, "fed_nontax_revenue"),
        ] {
            let total = sum_present(
                revenue
                    .iter()
                    .filter(|f| is_band_group_line(f, band))
                    .map(|f| f.revenue),
            );
            if let Some(total) = total {
                sink.emit(region, year, band_total_path(scope, domain, band, label), Some(total))?;
            }
        }
        for fact in revenue.iter().filter(|f| f.revenue.is_some()) {
            let Some(levels) = DetailLevels::of(&fact.code) else {
                continue;
            };
            let Some(label) = fact.label_eng.as_deref() else {
                sink.report.unlabelled_lines += 1;
                continue;
            };
            sink.emit(
                region,
                year,
                levels.path(scope, domain, RevenueLine::OwnRevenue, label),
                fact.revenue,
            )?;
        }

        let spending: Vec<&SpendingFact> = facts
            .federal_spending
            .iter()
            .filter(|f| f.year == year)
            .collect();
        for fact in spending.iter().filter(|f| f.code.is_total() && f.agency_is_zero) {
            sink.emit(
                region,
                year,
                spending_path(scope, domain, 0, 0, "fed_spending"),
                fact.amount,
            )?;
        }
        let by_agency = spending
            .iter()
            .copied()
            .filter(|f| !f.agency_is_zero && f.article_is_zero);
        for ((section, subsection, label), value) in summed_sections(by_agency, &mut sink.report) {
            sink.emit(
                region,
                year,
                spending_path(scope, domain, section, subsection, &label),
                value,
            )?;
        }
        Ok(())
    }
}

/// Sums non-total spending lines per (section, subsection, label).
fn summed_sections<'f>(
    lines: impl Iterator<Item = &'f SpendingFact>,
    report: &mut PivotReport,
) -> BTreeMap<(u8, u8, String), Option<f64>> {
    let mut sums: BTreeMap<(u8, u8, String), Option<f64>> = BTreeMap::new();
    for fact in lines.filter(|f| !f.code.is_total()) {
        let Some(label) = fact.label_eng.as_ref() else {
            report.unlabelled_lines += 1;
            continue;
        };
        let entry = sums
            .entry((fact.code.section, fact.code.subsection, label.clone()))
            .or_insert(None);
        if let Some(amount) = fact.amount {
            *entry = Some(entry.unwrap_or(0.0) + amount);
        }
    }
    debug!("Summed {} spending sections", sums.len());
    sums
}

fn group_by_region_year<T, F>(items: &[T], key: F) -> BTreeMap<(i32, RegionKey), Vec<&T>>
where
    F: Fn(&T) -> (i32, RegionKey),
{
    let mut groups: BTreeMap<(i32, RegionKey), Vec<&T>> = BTreeMap::new();
    for item in items {
        groups.entry(key(item)).or_default().push(item);
    }
    groups
}
