use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

static EMPTY_CELL: Cell = Cell::Empty;

/// One cell of a decoded spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    /// Whitespace-only text counts as empty, matching how the publisher leaves
    /// visually blank cells.
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(n) => n.is_nan(),
        }
    }

    /// Renders the cell as text. Integral numbers are written without a
    /// fractional part so that `200.0` and `"200"` compare equal.
    pub fn render(&self) -> Option<Cow<'_, str>> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Cell::Number(n) if n.is_nan() => None,
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e18 => {
                Some(Cow::Owned(format!("{:.0}", n)))
            }
            Cell::Number(n) => Some(Cow::Owned(n.to_string())),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

/// One sheet of a source file, as decoded by the file-reading collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExtract {
    /// Source file identifier; sub-national files encode the region id in the file name.
    pub source_id: String,
    pub year: i32,
    /// Header labels as they appear in the source.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawExtract {
    pub fn new(
        source_id: impl Into<String>,
        year: i32,
        columns: Vec<String>,
        rows: Vec<Vec<Cell>>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            year,
            columns,
            rows,
        }
    }

    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.len())
            .chain(std::iter::once(self.columns.len()))
            .max()
            .unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Returns a copy with every text cell and label passed through `f`.
    pub fn map_text<F>(&self, f: F) -> RawExtract
    where
        F: Fn(&str) -> String,
    {
        RawExtract {
            source_id: self.source_id.clone(),
            year: self.year,
            columns: self.columns.iter().map(|c| f(c)).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|cell| match cell {
                            Cell::Text(s) => Cell::Text(f(s)),
                            other => other.clone(),
                        })
                        .collect()
                })
                .collect(),
        }
    }
}

/// One decoded source file: its sheets in workbook order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    pub source_id: String,
    pub year: i32,
    pub sheets: Vec<RawExtract>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDomain {
    Subnational,
    National,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Revenue,
    Spending,
}

/// A sub-national region by budget code, or the whole country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKey {
    Country,
    Region(u32),
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKey::Country => write!(f, "country"),
            RegionKey::Region(code) => write!(f, "region {:02}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Lowercased line description from the source.
    pub category_label_native: String,
    /// Zero-padded hierarchical code: 17 digits for revenue, 4 for spending sections.
    pub category_code: String,
    /// Spending target-article code, `None` for revenue.
    pub program_code: Option<String>,
    /// National spending ministry code.
    pub agency_code: Option<String>,
    pub amount: Option<f64>,
    pub year: i32,
    pub region: RegionKey,
    pub flow_direction: FlowDirection,
    pub source_domain: SourceDomain,
    pub source_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationBucket {
    Total,
    Federal,
    Regional,
    FederalFund,
    RegionalFund,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxCategory {
    pub code: String,
    pub label_eng: String,
    pub label_rus: String,
}

/// One (region, tax category, destination bucket, year) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRecord {
    pub tax_category_code: String,
    pub tax_label_eng: String,
    pub tax_label_rus: String,
    pub destination_bucket: DestinationBucket,
    pub region_label_native: String,
    /// Resolved lowercase English region name; `None` when no fragment matched.
    pub region_name: Option<String>,
    pub year: i32,
    /// In treasury units (the tax table reports thousands).
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceAttributes {
    pub population: Option<u64>,
    pub real_income_index: Option<f64>,
    pub income_per_capita: Option<f64>,
    pub poverty_rate_pct: Option<f64>,
    pub exchange_rate_rub_per_usd: Option<f64>,
}

impl ReferenceAttributes {
    /// Keeps recorded values and takes the rest from `fallback`.
    pub fn or(self, fallback: ReferenceAttributes) -> ReferenceAttributes {
        ReferenceAttributes {
            population: self.population.or(fallback.population),
            real_income_index: self.real_income_index.or(fallback.real_income_index),
            income_per_capita: self.income_per_capita.or(fallback.income_per_capita),
            poverty_rate_pct: self.poverty_rate_pct.or(fallback.poverty_rate_pct),
            exchange_rate_rub_per_usd: self
                .exchange_rate_rub_per_usd
                .or(fallback.exchange_rate_rub_per_usd),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.population.is_some()
            && self.real_income_index.is_some()
            && self.income_per_capita.is_some()
            && self.poverty_rate_pct.is_some()
            && self.exchange_rate_rub_per_usd.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    Region,
    Country,
}

impl Scope {
    pub fn index(self) -> u8 {
        match self {
            Scope::Region => 1,
            Scope::Country => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BudgetDomain {
    Consolidated,
    Federal,
}

impl BudgetDomain {
    pub fn index(self) -> u8 {
        match self {
            BudgetDomain::Consolidated => 1,
            BudgetDomain::Federal => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlowType {
    Revenue,
    Spending,
    Population,
    RealIncome,
    IncomePerCapita,
    Poverty,
    ExchangeRate,
}

impl FlowType {
    pub fn index(self) -> u8 {
        match self {
            FlowType::Revenue => 1,
            FlowType::Spending => 2,
            FlowType::Population => 5,
            FlowType::RealIncome => 6,
            FlowType::IncomePerCapita => 7,
            FlowType::Poverty => 8,
            FlowType::ExchangeRate => 9,
        }
    }

    pub const ATTRIBUTES: [FlowType; 5] = [
        FlowType::Population,
        FlowType::RealIncome,
        FlowType::IncomePerCapita,
        FlowType::Poverty,
        FlowType::ExchangeRate,
    ];

    pub fn attribute_label(self) -> Option<&'static str> {
        match self {
            FlowType::Population => Some("population"),
            FlowType::RealIncome => Some("real_income"),
            FlowType::IncomePerCapita => Some("income_per_cap"),
            FlowType::Poverty => Some("poverty"),
            FlowType::ExchangeRate => Some("rub_usd"),
            _ => None,
        }
    }

    pub fn attribute_value(self, attributes: &ReferenceAttributes) -> Option<f64> {
        match self {
            FlowType::Population => attributes.population.map(|p| p as f64),
            FlowType::RealIncome => attributes.real_income_index,
            FlowType::IncomePerCapita => attributes.income_per_capita,
            FlowType::Poverty => attributes.poverty_rate_pct,
            FlowType::ExchangeRate => attributes.exchange_rate_rub_per_usd,
            _ => None,
        }
    }
}

/// Top-level revenue line (`r1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RevenueLine {
    OwnRevenue,
    Transfers,
    TaxToFederal,
}

impl RevenueLine {
    pub fn index(self) -> u8 {
        match self {
            RevenueLine::OwnRevenue => 1,
            RevenueLine::Transfers => 2,
            RevenueLine::TaxToFederal => 3,
        }
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct ClassificationPath {
    #[schemars(description = "1 = per-region row, 2 = country aggregate")]
    pub scope: u8,

    #[schemars(description = "1 = consolidated sub-national budgets, 2 = federal budget")]
    pub domain: u8,

    #[schemars(
        description = "1 revenue, 2 spending, 5 population, 6 real income index, 7 income per capita, 8 poverty rate, 9 RUB/USD rate"
    )]
    pub flow_type: u8,

    #[schemars(description = "1 own revenue, 2 transfers received, 3 tax remitted to the federal level")]
    pub r1: u8,

    #[schemars(description = "0 group total, 1 tax revenue, 2 non-tax revenue")]
    pub r2: u8,

    #[schemars(description = "Revenue code subgroup")]
    pub r3: u8,

    #[schemars(description = "Revenue code item")]
    pub r4: u8,

    #[schemars(description = "Revenue code subitem")]
    pub r5: u16,

    #[schemars(description = "Spending section")]
    pub s1: u8,

    #[schemars(description = "Spending subsection")]
    pub s2: u8,

    #[schemars(description = "English line label or reserved aggregate name")]
    pub category_label: String,
}

impl ClassificationPath {
    pub fn has_revenue_levels(&self) -> bool {
        self.r1 != 0 || self.r2 != 0 || self.r3 != 0 || self.r4 != 0 || self.r5 != 0
    }

    pub fn has_spending_levels(&self) -> bool {
        self.s1 != 0 || self.s2 != 0
    }
}

impl fmt::Display for ClassificationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            self.scope,
            self.domain,
            self.flow_type,
            self.r1,
            self.r2,
            self.r3,
            self.r4,
            self.r5,
            self.s1,
            self.s2,
            self.category_label
        )
    }
}

/// The terminal unit handed to the visualization layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FactRow {
    #[serde(flatten)]
    pub path: ClassificationPath,

    #[schemars(description = "Lowercase English region name; the country row uses the roster's country name")]
    pub region_name: String,

    pub year: i32,

    #[schemars(description = "Amount in roubles, or the attribute value; null when not recorded")]
    pub value: Option<f64>,
}

impl FactRow {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(FactRow)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
