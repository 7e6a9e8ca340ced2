use crate::canonical::{canonical_amount, canonical_code, canonical_label, CanonicalField};
use crate::config::PipelineConfig;
use crate::error::{ReconcileError, Result};
use crate::schema::{Cell, ReferenceAttributes, RegionKey};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Central Bank annual average RUB/USD rates.
pub const DEFAULT_EXCHANGE_RATES: [(i32, f64); 11] = [
    (2011, 29.3925),
    (2012, 31.088),
    (2013, 31.8542),
    (2014, 38.4375),
    (2015, 60.9579),
    (2016, 67.0349),
    (2017, 58.3529),
    (2018, 62.7091),
    (2019, 64.7362),
    (2020, 72.1464),
    (2021, 73.6541),
];

/// Columns before the per-year columns of the roster and series tables.
const SERIES_KEY_COLUMNS: usize = 3;

/// File locations of the static tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePaths {
    pub revenue_codes: PathBuf,
    pub spending_codes: PathBuf,
    pub region_roster: PathBuf,
    pub real_income: PathBuf,
    pub income_per_capita: PathBuf,
    pub poverty: PathBuf,
    /// Built-in rates are used when absent.
    pub exchange_rates: Option<PathBuf>,
}

impl ReferencePaths {
    /// Conventional file names inside one directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let exchange_rates = dir.join("rub_usd.csv");
        Self {
            revenue_codes: dir.join("revenue_codes.csv"),
            spending_codes: dir.join("spending_codes.csv"),
            region_roster: dir.join("regions.csv"),
            real_income: dir.join("real_income.csv"),
            income_per_capita: dir.join("income_per_cap.csv"),
            poverty: dir.join("poverty.csv"),
            exchange_rates: exchange_rates.exists().then_some(exchange_rates),
        }
    }
}

/// Readers for the static tables, one per table.
pub struct ReferenceSources<R> {
    pub revenue_codes: R,
    pub spending_codes: R,
    pub region_roster: R,
    pub real_income: R,
    pub income_per_capita: R,
    pub poverty: R,
    pub exchange_rates: Option<R>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub budget_code: u32,
    /// Lowercase English name, the key the tax table resolves to.
    pub name_eng: String,
    pub name_rus: String,
}

type Series = BTreeMap<(u32, i32), f64>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceTables {
    pub revenue_labels: BTreeMap<String, String>,
    pub spending_labels: BTreeMap<String, String>,
    pub regions: BTreeMap<u32, RegionEntry>,
    pub population: BTreeMap<(u32, i32), u64>,
    pub real_income: Series,
    pub income_per_capita: Series,
    pub poverty: Series,
    pub exchange_rates: BTreeMap<i32, f64>,
    pub country_code: u32,
    pub country_name: String,
}

fn open_table(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ReconcileError::MissingReference(path.display().to_string())
        }
        _ => ReconcileError::IoError(e),
    })
}

impl ReferenceTables {
    pub fn load(paths: &ReferencePaths, config: &PipelineConfig) -> Result<Self> {
        info!("Loading reference tables");
        let sources = ReferenceSources {
            revenue_codes: open_table(&paths.revenue_codes)?,
            spending_codes: open_table(&paths.spending_codes)?,
            region_roster: open_table(&paths.region_roster)?,
            real_income: open_table(&paths.real_income)?,
            income_per_capita: open_table(&paths.income_per_capita)?,
            poverty: open_table(&paths.poverty)?,
            exchange_rates: paths
                .exchange_rates
                .as_deref()
                .map(open_table)
                .transpose()?,
        };
        Self::from_sources(sources, config)
    }

    pub fn from_sources<R: Read>(
        sources: ReferenceSources<R>,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let revenue_labels = load_code_dictionary(
            sources.revenue_codes,
            "revenue codes",
            CanonicalField::SubnationalRevenueCode,
        )?;
        let spending_labels = load_code_dictionary(
            sources.spending_codes,
            "spending codes",
            CanonicalField::SpendingCode,
        )?;

        let roster = load_series(sources.region_roster, "region roster", config)?;
        let population = roster
            .values
            .iter()
            .map(|(&key, &value)| {
                if value < 0.0 {
                    return Err(ReconcileError::ReferenceValue {
                        table: "region roster".to_string(),
                        row: 0,
                        details: format!("negative population {} for {:?}", value, key),
                    });
                }
                Ok((key, value.round() as u64))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let real_income = load_series(sources.real_income, "real income", config)?.values;
        let income_per_capita =
            load_series(sources.income_per_capita, "income per capita", config)?.values;
        let poverty = load_series(sources.poverty, "poverty", config)?.values;

        let exchange_rates = match sources.exchange_rates {
            Some(reader) => load_exchange_rates(reader)?,
            None => DEFAULT_EXCHANGE_RATES.iter().copied().collect(),
        };

        let country_name = roster
            .regions
            .get(&config.country_code)
            .map(|entry| entry.name_eng.clone())
            .unwrap_or_else(|| config.country_name.clone());

        debug!(
            "Reference tables: {} revenue codes, {} spending codes, {} regions, {} exchange rates",
            revenue_labels.len(),
            spending_labels.len(),
            roster.regions.len(),
            exchange_rates.len()
        );

        Ok(Self {
            revenue_labels,
            spending_labels,
            regions: roster.regions,
            population,
            real_income,
            income_per_capita,
            poverty,
            exchange_rates,
            country_code: config.country_code,
            country_name,
        })
    }

    fn budget_code(&self, region: RegionKey) -> u32 {
        match region {
            RegionKey::Country => self.country_code,
            RegionKey::Region(code) => code,
        }
    }

    /// Lowercase English name for a region, or the country name.
    pub fn region_name(&self, region: RegionKey) -> Option<&str> {
        match region {
            RegionKey::Country => Some(self.country_name.as_str()),
            RegionKey::Region(code) => self.regions.get(&code).map(|e| e.name_eng.as_str()),
        }
    }

    /// Reverse of [`Self::region_name`], used to key tax records.
    pub fn region_for_name(&self, name: &str) -> Option<RegionKey> {
        if name == self.country_name {
            return Some(RegionKey::Country);
        }
        self.regions
            .values()
            .find(|entry| entry.name_eng == name)
            .map(|entry| {
                if entry.budget_code == self.country_code {
                    RegionKey::Country
                } else {
                    RegionKey::Region(entry.budget_code)
                }
            })
    }

    /// Left join of the attribute tables for one (region, year); absent values stay `None`.
    pub fn attributes_for(&self, region: RegionKey, year: i32) -> ReferenceAttributes {
        let key = (self.budget_code(region), year);
        ReferenceAttributes {
            population: self.population.get(&key).copied(),
            real_income_index: self.real_income.get(&key).copied(),
            income_per_capita: self.income_per_capita.get(&key).copied(),
            poverty_rate_pct: self.poverty.get(&key).copied(),
            exchange_rate_rub_per_usd: self.exchange_rates.get(&year).copied(),
        }
    }

    pub fn revenue_label(&self, code: &str) -> Option<&str> {
        self.revenue_labels.get(code).map(String::as_str)
    }

    pub fn spending_label(&self, code: &str) -> Option<&str> {
        self.spending_labels.get(code).map(String::as_str)
    }
}

fn shape_error(table: &str, expected: usize, found: usize) -> ReconcileError {
    ReconcileError::ReferenceShape {
        table: table.to_string(),
        expected,
        found,
    }
}

/// Spreadsheet exports write long codes as `1.0E16`; those are read as numbers.
fn code_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.contains(['e', 'E']) {
        if let Ok(value) = trimmed.parse::<f64>() {
            return Cell::Number(value);
        }
    }
    Cell::from(trimmed)
}

fn load_code_dictionary<R: Read>(
    reader: R,
    table: &str,
    field: CanonicalField,
) -> Result<BTreeMap<String, String>> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    if headers.len() != 2 {
        return Err(shape_error(table, 2, headers.len()));
    }

    let mut labels = BTreeMap::new();
    for (idx, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() != 2 {
            return Err(shape_error(table, 2, record.len()));
        }
        let Some(code) = canonical_code(&code_cell(&record[0]), field) else {
            return Err(ReconcileError::ReferenceValue {
                table: table.to_string(),
                row: idx + 1,
                details: "empty code".to_string(),
            });
        };
        labels.insert(code, canonical_label(&record[1]));
    }
    Ok(labels)
}

struct SeriesTable {
    regions: BTreeMap<u32, RegionEntry>,
    values: Series,
}

/// Reads `budget_code,region_eng,region_rus,<year>...` with exactly one
/// column per configured year. Empty cells stay missing.
fn load_series<R: Read>(reader: R, table: &str, config: &PipelineConfig) -> Result<SeriesTable> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let expected = SERIES_KEY_COLUMNS + config.years().count();
    if headers.len() != expected {
        return Err(shape_error(table, expected, headers.len()));
    }

    let years = headers
        .iter()
        .skip(SERIES_KEY_COLUMNS)
        .map(|h| {
            h.trim()
                .parse::<i32>()
                .ok()
                .filter(|year| config.contains_year(*year))
                .ok_or_else(|| ReconcileError::ReferenceValue {
                    table: table.to_string(),
                    row: 0,
                    details: format!("column '{}' is not a configured year", h),
                })
        })
        .collect::<Result<Vec<i32>>>()?;

    let mut regions = BTreeMap::new();
    let mut values = BTreeMap::new();
    for (idx, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() != expected {
            return Err(shape_error(table, expected, record.len()));
        }

        let budget_code = canonical_amount(&Cell::from(&record[0]))
            .filter(|code| *code >= 0.0 && code.fract() == 0.0)
            .ok_or_else(|| ReconcileError::ReferenceValue {
                table: table.to_string(),
                row: idx + 1,
                details: format!("budget code '{}' is not a non-negative integer", &record[0]),
            })? as u32;

        regions.insert(
            budget_code,
            RegionEntry {
                budget_code,
                name_eng: canonical_label(&record[1]),
                name_rus: canonical_label(&record[2]),
            },
        );

        for (year, raw) in years.iter().zip(record.iter().skip(SERIES_KEY_COLUMNS)) {
            if let Some(value) = canonical_amount(&Cell::from(raw)) {
                values.insert((budget_code, *year), value);
            }
        }
    }

    Ok(SeriesTable { regions, values })
}

fn load_exchange_rates<R: Read>(reader: R) -> Result<BTreeMap<i32, f64>> {
    let table = "exchange rates";
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    if headers.len() != 2 {
        return Err(shape_error(table, 2, headers.len()));
    }

    let mut rates = BTreeMap::new();
    for (idx, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() != 2 {
            return Err(shape_error(table, 2, record.len()));
        }
        let year = record[0].trim().parse::<i32>().ok();
        let rate = canonical_amount(&Cell::from(&record[1])).filter(|r| *r > 0.0);
        match (year, rate) {
            (Some(year), Some(rate)) => {
                rates.insert(year, rate);
            }
            _ => {
                return Err(ReconcileError::ReferenceValue {
                    table: table.to_string(),
                    row: idx + 1,
                    details: format!(
                        "'{}' / '{}' is not a year and a positive rate",
                        &record[0], &record[1]
                    ),
                })
            }
        }
    }
    Ok(rates)
}
