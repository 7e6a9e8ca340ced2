use crate::canonical::{canonical_amount, canonical_label};
use crate::config::PipelineConfig;
use crate::error::{ReconcileError, Result};
use crate::schema::{Cell, DestinationBucket, TaxCategory, TaxRecord};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

/// One classification rule: the text must contain `pattern` and none of `exclude`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRule<T> {
    pub pattern: String,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub outcome: T,
}

impl<T> MatchRule<T> {
    pub fn new(pattern: &str, outcome: T) -> Self {
        Self {
            pattern: pattern.to_lowercase(),
            exclude: Vec::new(),
            outcome,
        }
    }

    pub fn excluding(mut self, fragment: &str) -> Self {
        self.exclude.push(fragment.to_lowercase());
        self
    }

    /// `text` must already be lowercase.
    fn matches(&self, text: &str) -> bool {
        text.contains(&self.pattern) && !self.exclude.iter().any(|e| text.contains(e.as_str()))
    }
}

/// An ordered rule list; rules are tried top to bottom and the first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleCatalog<T> {
    pub rules: Vec<MatchRule<T>>,
}

impl<T> RuleCatalog<T> {
    pub fn new(rules: Vec<MatchRule<T>>) -> Self {
        Self { rules }
    }

    pub fn classify(&self, text: &str) -> Option<&T> {
        let text = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&text))
            .map(|rule| &rule.outcome)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if self.rules.is_empty() {
            return Err(ReconcileError::Catalog(format!("{} catalog is empty", name)));
        }
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.pattern.trim().is_empty() {
                return Err(ReconcileError::Catalog(format!(
                    "{} rule #{} has an empty pattern",
                    name, idx
                )));
            }
            if rule.pattern != rule.pattern.to_lowercase()
                || rule.exclude.iter().any(|e| *e != e.to_lowercase())
            {
                return Err(ReconcileError::Catalog(format!(
                    "{} rule #{} ('{}') must be lowercase",
                    name, idx, rule.pattern
                )));
            }
        }
        Ok(())
    }
}

impl<T: DeserializeOwned> RuleCatalog<T> {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn tax(pattern: &str, code: &str, label_eng: &str, label_rus: &str) -> MatchRule<TaxCategory> {
    MatchRule::new(
        pattern,
        TaxCategory {
            code: code.to_string(),
            label_eng: label_eng.to_string(),
            label_rus: label_rus.to_string(),
        },
    )
}

/// Tax categories of the ministry's collection report. Where two phrases can
/// both occur in one line, the rule listed first wins; the general corporate
/// income tax rule instead excludes the production-sharing variant explicitly.
pub fn tax_category_catalog() -> RuleCatalog<TaxCategory> {
    RuleCatalog::new(vec![
        tax("поступило", "00000000000000000", "total tax revenue", "всего поступило налогов"),
        tax("транспортный налог", "10604000020000110", "transport tax", "транспортный налог"),
        tax(
            "животного мира",
            "10704000010000110",
            "biological resources use fee",
            "сборы за пользование объктами животного мира",
        ),
        tax(
            "роялти",
            "10702000010000110",
            "regular mining payments",
            "регулярные платежи за добычу полезных ископаемых (роялти)",
        ),
        tax(
            "платежи за пользование недрами",
            "10903060010000110",
            "subsoil use payments",
            "платежи за пользование недрами",
        ),
        tax(
            "налог, взимаемый в связи с применением упрощенной системы",
            "10501000000000110",
            "simplified tax system",
            "налог на профессиональный доход в связи с применением упрощенной системы налогообложения",
        ),
        tax(
            "налог, взимаемый в связи с применением патентной",
            "10504000020000110",
            "patent taxation system",
            "налог взимаемый в связи с применением патентной системы налогообложения",
        ),
        tax(
            "налог, взимаемый в виде стоимости патента",
            "10911000020000110",
            "patent cost via the simplified taxation system",
            "налог в виде стоимости патента в связи с применением упрощенной системы налогообложения",
        ),
        tax(
            "налог на профессиональный доход",
            "10506000010000110",
            "professional income tax",
            "налог на профессиональный доход",
        ),
        tax(
            "налог на прибыль организаций при выполнении соглашений о разделе продукции",
            "10101020010000110",
            "corporate income tax on the implementation of oil and gas fields development agreements",
            "налог на прибыль организаций при выполнении соглашений о разработке месторождений нефти и газа",
        ),
        tax(
            "налог на прибыль организаций",
            "10101000000000110",
            "corporate income tax full",
            "налог на прибыль организаций",
        )
        .excluding("при выполнении соглашений"),
        tax("налог на имущество", "10600000000000000", "property taxes", "налог на имущество"),
        tax(
            "налог на игорный бизнес",
            "10605000020000110",
            "gambling tax",
            "налог на игорный бизнес",
        ),
        tax("налог на доходы физических лиц", "10102000010000110", "personal income tax", "ндфл"),
        tax(
            "налог на дополнительный доход от добычи углеводородного сырья",
            "10705000010000110",
            "additional income from hydrocarbon extraction tax",
            "налог на дополнительный доход от добычи углеводородного сырья",
        ),
        tax(
            "налог на добычу полезных ископаемых",
            "10701000010000110",
            "minerals extraction tax",
            "налог на добычу полезных ископаемых",
        ),
        tax(
            "налог на добычу нефти",
            "10701011010000110",
            "oil extraction tax",
            "налог на добычу нефти",
        ),
        tax(
            "налог на добычу газового конденсата",
            "10701013010000110",
            "gas condensate extraction tax",
            "налог на добычу газового конденсата",
        ),
        tax(
            "налог на добычу газа",
            "10701012010000110",
            "gas extraction tax",
            "налог на добычу газа",
        ),
        tax(
            "налог на добавленную стоимость на товары, ввозимые",
            "10401000010000110",
            "vat on import",
            "ндс на ввозимые товары",
        ),
        tax(
            "налог на добавленную стоимость на товары (работы, услуги), реализуемые",
            "10301000010000110",
            "vat on sales",
            "ндс на реализуемые товары",
        ),
        tax(
            "единый сельскохозяйственный налог",
            "10503000010000110",
            "unified agricultural tax",
            "единый сельскохозяйственный налог",
        ),
        tax(
            "единый налог на вмененный доход",
            "10502000020000110",
            "presumptive tax",
            "единый налог на вмененный доход",
        ),
        tax(
            "государственная пошлина",
            "10800000000000000",
            "state duty",
            "государственная пошлина",
        ),
        tax("водный налог", "10703000010000110", "water tax", "водный налог"),
        tax(
            "производимым на территории российской федерации",
            "10302000010000110",
            "excises",
            "акцизы по производимым товарам",
        ),
        tax(
            "акцизы по подакцизным товарам (продукции), ввозимым на территорию российской федерации",
            "10402000010000110",
            "excises on imported goods",
            "акцизы по ввозимым товарам",
        ),
    ])
}

/// Destination buckets. Fund phrases go first because they also mention the
/// budget level they belong to.
pub fn destination_bucket_catalog() -> RuleCatalog<DestinationBucket> {
    RuleCatalog::new(vec![
        MatchRule::new("территориальных фондов", DestinationBucket::RegionalFund),
        MatchRule::new("фонда", DestinationBucket::FederalFund),
        MatchRule::new("бюджеты субъектов", DestinationBucket::Regional),
        MatchRule::new("в федеральный бюджет", DestinationBucket::Federal),
        MatchRule::new("- всего", DestinationBucket::Total),
    ])
}

fn region(pattern: &str, name: &str) -> MatchRule<String> {
    MatchRule::new(pattern, name.to_string())
}

/// Region name fragments of the ministry report, resolved to the roster's
/// lowercase English names. Autonomous okrugs precede their parent oblasts,
/// whose names appear in brackets after the okrug.
pub fn region_catalog() -> RuleCatalog<String> {
    RuleCatalog::new(vec![
        region("российская федерация", "russia"),
        region("чеченская", "chechnya"),
        region("забайкальский", "zabaykalsky krai"),
        region("ямало", "yamalo-nenets autonomous okrug"),
        region("чукотский", "chukotka autonomous okrug"),
        region("ханты", "khanty-mansiysk autonomous okrug – ugra"),
        region("ненецкий", "nenets autonomous okrug").excluding("ямало"),
        region("хакасия", "hakasia"),
        region("карачаево", "karachaevo-cherkessia"),
        region("еврейская", "jewish autonomous oblast"),
        region("алтай", "altai").excluding("край"),
        region("адыгея", "adygea"),
        region("крым", "crimea"),
        region("севастополь", "sevastopol"),
        region("москва", "moscow"),
        region("петербург", "saint petersburg"),
        region("ярославская", "yaroslavl oblast"),
        region("челябинская", "chelyabinsk oblast"),
        region("ульяновская", "ulyanovsk oblast"),
        region("тюменская", "tyumen oblast"),
        region("тульская", "tula oblast"),
        region("томская", "tomsk oblast"),
        region("тамбовская", "tambov oblast"),
        region("смоленская", "smolensk oblast"),
        region("свердловская", "sverdlov oblast"),
        region("сахалинская", "sakhalin oblast"),
        region("саратовская", "saratov oblast"),
        region("рязанская", "ryazan oblast"),
        region("ростовская", "rostov oblast"),
        region("псковская", "pskov oblast"),
        region("пермский", "permsky krai"),
        region("пензенская", "penza oblast"),
        region("орловская", "orel oblast"),
        region("оренбургская", "orenburg oblast"),
        region("омская", "omsk oblast").excluding("костро"),
        region("новосибирская", "novosibirsk oblast"),
        region("новгородская", "novgorod oblast"),
        region("мурманская", "murmansk oblast"),
        region("московская", "moscow oblast"),
        region("магаданская", "magadan oblast"),
        region("липецкая", "lipetsk oblast"),
        region("ленинградская", "leningrad oblast"),
        region("курская", "kursk oblast"),
        region("курганская", "kurgan oblast"),
        region("самарская", "samara oblast"),
        region("костромская", "kostroma oblast"),
        region("кировская", "kirov oblast"),
        region("кемеровская", "kemerovo oblast"),
        region("камчатский", "kamchatsky krai"),
        region("калужская", "kaluga oblast"),
        region("тверская", "tver oblast"),
        region("калининградская", "kaliningrad oblast"),
        region("иркутская", "irkutsk oblast"),
        region("ивановская", "ivanovo oblast"),
        region("нижегородская", "nizhny novgorod oblast"),
        region("воронежская", "voronezh oblast"),
        region("вологодская", "vologda oblast"),
        region("волгоградская", "volgograd oblast"),
        region("владимирская", "vladimir oblast"),
        region("брянская", "bryansk oblast"),
        region("белгородская", "belgorod oblast"),
        region("астраханская", "astrakhan oblast"),
        region("архангельская", "arkhangelsk oblast"),
        region("амурская", "amur oblast"),
        region("хабаровский", "khabarovsky krai"),
        region("ставропольский", "stavropolsky krai"),
        region("приморский", "primorsky krai"),
        region("красноярский", "krasnoyarsky krai"),
        region("краснодарский", "krasnodarsky krai"),
        region("алтайский", "altai krai"),
        region("якутия", "sakha (yakutia)"),
        region("чувашская", "chuvashia"),
        region("ингушетия", "ingushetia"),
        region("удмуртская", "udmurtia"),
        region("тыва", "tyva"),
        region("татарстан", "tatarstan"),
        region("осетия", "north osetia - alania"),
        region("мордовия", "mordovia"),
        region("марий", "mariy el"),
        region("коми", "komi"),
        region("карелия", "karelia"),
        region("калмыкия", "kalmykia"),
        region("кабардино", "kabardino-balkaria"),
        region("дагестан", "dagestan"),
        region("бурятия", "buryatia"),
        region("башкортостан", "bashkortostan"),
    ])
}

/// The three catalogs the tax table is classified with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyCatalogs {
    pub tax_categories: RuleCatalog<TaxCategory>,
    pub destination_buckets: RuleCatalog<DestinationBucket>,
    pub regions: RuleCatalog<String>,
}

impl Default for TaxonomyCatalogs {
    fn default() -> Self {
        Self {
            tax_categories: tax_category_catalog(),
            destination_buckets: destination_bucket_catalog(),
            regions: region_catalog(),
        }
    }
}

impl TaxonomyCatalogs {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let catalogs: TaxonomyCatalogs = serde_json::from_str(json)?;
        catalogs.validate()?;
        Ok(catalogs)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.tax_categories.validate("tax category")?;
        self.destination_buckets.validate("destination bucket")?;
        self.regions.validate("region")?;

        let mut codes = BTreeSet::new();
        for rule in &self.tax_categories.rules {
            if !codes.insert(rule.outcome.code.as_str()) {
                return Err(ReconcileError::Catalog(format!(
                    "tax code {} is assigned by more than one rule",
                    rule.outcome.code
                )));
            }
        }
        Ok(())
    }
}

/// One row of the wide ministry table: a region, a tax/destination line and
/// one amount per year in thousands of roubles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxCollectionRow {
    pub region_label: String,
    pub description: String,
    pub values: BTreeMap<i32, Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxCollectionTable {
    pub rows: Vec<TaxCollectionRow>,
}

impl TaxCollectionTable {
    /// Reads `region,tax,<year>,<year>,...` CSV.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(false).from_reader(reader);
        let headers = csv_reader.headers()?.clone();
        if headers.len() < 3 {
            return Err(ReconcileError::ReferenceShape {
                table: "tax collection".to_string(),
                expected: 3,
                found: headers.len(),
            });
        }

        let years = headers
            .iter()
            .skip(2)
            .enumerate()
            .map(|(idx, h)| {
                h.trim().parse::<i32>().map_err(|_| ReconcileError::ReferenceValue {
                    table: "tax collection".to_string(),
                    row: 0,
                    details: format!("column {} header '{}' is not a year", idx + 2, h),
                })
            })
            .collect::<Result<Vec<i32>>>()?;

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let values = years
                .iter()
                .zip(record.iter().skip(2))
                .map(|(year, raw)| (*year, canonical_amount(&Cell::from(raw))))
                .collect();
            rows.push(TaxCollectionRow {
                region_label: record.get(0).unwrap_or_default().to_string(),
                description: record.get(1).unwrap_or_default().to_string(),
                values,
            });
        }

        Ok(Self { rows })
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ReconcileError::MissingReference(path.display().to_string())
            }
            _ => ReconcileError::IoError(e),
        })?;
        Self::from_csv_reader(file)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub rows_seen: usize,
    pub category_misses: usize,
    pub bucket_misses: usize,
    /// Native region labels no fragment matched, kept for manual triage.
    pub unresolved_regions: BTreeSet<String>,
    pub records_emitted: usize,
}

impl ClassificationReport {
    pub fn miss_rate(&self) -> f64 {
        if self.rows_seen == 0 {
            return 0.0;
        }
        let misses = self.category_misses + self.bucket_misses;
        misses as f64 / self.rows_seen as f64
    }
}

/// Classifies every row of the ministry table and melts it to one record per year.
///
/// Rows without a tax category or destination bucket are dropped and counted.
/// Rows whose region does not resolve are kept with `region_name: None` so the
/// joiner can count them; their labels are reported and logged.
pub fn classify_tax_table(
    table: &TaxCollectionTable,
    catalogs: &TaxonomyCatalogs,
    config: &PipelineConfig,
) -> (Vec<TaxRecord>, ClassificationReport) {
    let mut report = ClassificationReport::default();
    let mut records = Vec::new();

    for row in &table.rows {
        report.rows_seen += 1;
        let description = canonical_label(&row.description);

        let Some(category) = catalogs.tax_categories.classify(&description) else {
            report.category_misses += 1;
            debug!("No tax category for '{}'", description);
            continue;
        };
        let Some(bucket) = catalogs.destination_buckets.classify(&description) else {
            report.bucket_misses += 1;
            debug!("No destination bucket for '{}'", description);
            continue;
        };

        let region_label = canonical_label(&row.region_label);
        let region_name = catalogs.regions.classify(&region_label).cloned();
        if region_name.is_none() {
            report.unresolved_regions.insert(region_label.clone());
        }

        for (&year, value) in &row.values {
            let Some(amount) = value else { continue };
            if !config.contains_year(year) {
                continue;
            }
            records.push(TaxRecord {
                tax_category_code: category.code.clone(),
                tax_label_eng: category.label_eng.clone(),
                tax_label_rus: category.label_rus.clone(),
                destination_bucket: *bucket,
                region_label_native: region_label.clone(),
                region_name: region_name.clone(),
                year,
                amount: amount * config.tax_unit_multiplier,
            });
        }
    }

    report.records_emitted = records.len();

    for label in &report.unresolved_regions {
        warn!("Tax table region label '{}' matches no region fragment", label);
    }

    let miss_rate = report.miss_rate();
    if miss_rate > config.classification_miss_warning_rate {
        warn!(
            "Tax classification miss rate {:.1}% exceeds the {:.1}% baseline ({} of {} rows); the catalog may be out of date",
            miss_rate * 100.0,
            config.classification_miss_warning_rate * 100.0,
            report.category_misses + report.bucket_misses,
            report.rows_seen
        );
    }

    info!(
        "Classified tax table: {} rows, {} records, {} category misses, {} bucket misses",
        report.rows_seen, report.records_emitted, report.category_misses, report.bucket_misses
    );

    (records, report)
}
