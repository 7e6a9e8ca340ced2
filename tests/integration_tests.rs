use regional_budget_reconciler::*;
use std::io::Cursor;

const REGIONS: [(u32, &str); 2] = [(1, "adygea"), (2, "bashkortostan")];
const SUBNATIONAL_YEARS: [i32; 4] = [2011, 2012, 2016, 2017];

/// Base amounts of the treasury revenue lines; each file scales them.
const REVENUE_LINES: [(&str, &str, f64); 5] = [
    ("Доходы бюджета - всего", "10000000000000000", 1000.0),
    ("Налоги на прибыль, доходы", "10100000000000000", 600.0),
    ("Налог на доходы физических лиц", "10102000010000110", 500.0),
    ("Доходы от использования имущества", "11100000000000000", 400.0),
    ("Безвозмездные поступления от других бюджетов", "20200000000000000", 300.0),
];

fn series_csv(rows: &[(&str, &str, &str, &str)]) -> String {
    let config = PipelineConfig::default();
    let mut out = String::from("budget_code,region_eng,region_rus");
    for year in config.years() {
        out.push_str(&format!(",{}", year));
    }
    out.push('\n');
    for (code, eng, rus, value) in rows {
        out.push_str(&format!("{},{},{}", code, eng, rus));
        for _ in config.years() {
            out.push(',');
            out.push_str(value);
        }
        out.push('\n');
    }
    out
}

fn reference_tables() -> ReferenceTables {
    let bytes = |text: &str| Cursor::new(text.as_bytes().to_vec());
    let roster = series_csv(&[
        ("0", "Russia", "Российская Федерация", "142865433"),
        ("1", "Adygea", "Республика Адыгея", "440000"),
        ("2", "Bashkortostan", "Республика Башкортостан", "4070000"),
    ]);
    let real_income = series_csv(&[
        ("0", "Russia", "Российская Федерация", "101.2"),
        ("1", "Adygea", "Республика Адыгея", "100.4"),
        ("2", "Bashkortostan", "Республика Башкортостан", "99.1"),
    ]);
    let income_per_capita = series_csv(&[
        ("0", "Russia", "Российская Федерация", "30000"),
        ("1", "Adygea", "Республика Адыгея", "22000"),
        ("2", "Bashkortostan", "Республика Башкортостан", "28000"),
    ]);
    let poverty = series_csv(&[
        ("0", "Russia", "Российская Федерация", "12.7"),
        ("1", "Adygea", "Республика Адыгея", "14.2"),
        ("2", "Bashkortostan", "Республика Башкортостан", ""),
    ]);

    let sources = ReferenceSources {
        revenue_codes: bytes(
            "code,revenue_indicator\n\
             10000000000000000,Own revenue\n\
             10100000000000000,Profit and income taxes\n\
             10102000010000110,Personal income tax\n\
             10102010010000110,PIT on agents\n\
             10102010011000110,PIT on agents\n\
             11100000000000000,Property income\n\
             20200000000000000,Transfers\n",
        ),
        spending_codes: bytes(
            "code,spending_indicator\n0700,Education\n0701,Preschool education\n",
        ),
        region_roster: bytes(&roster),
        real_income: bytes(&real_income),
        income_per_capita: bytes(&income_per_capita),
        poverty: bytes(&poverty),
        exchange_rates: None,
    };
    ReferenceTables::from_sources(sources, &PipelineConfig::default()).unwrap()
}

fn t(s: &str) -> Cell {
    Cell::from(s)
}

fn decoy_sheet(source: &str, year: i32) -> RawExtract {
    RawExtract::new(
        source,
        year,
        vec!["Unnamed: 0".into()],
        vec![vec![t("Отчет об исполнении бюджета")], vec![t("на 1 января")]],
    )
}

fn revenue_sheet(source: &str, year: i32, scale: f64, extra: &[(&str, &str, f64)]) -> RawExtract {
    let mut rows = vec![vec![
        t("Наименование показателя, в том числе"),
        t("Код"),
        t("Консолидированный бюджет субъекта РФ"),
    ]];
    for (label, code, base) in REVENUE_LINES.iter().chain(extra.iter()) {
        rows.push(vec![t(label), t(code), Cell::Number(base * scale)]);
    }
    RawExtract::new(source, year, vec!["a".into(), "b".into(), "c".into()], rows)
}

fn spending_sheet(source: &str, year: i32, scale: f64, program_offset: usize) -> RawExtract {
    let width = program_offset + 3;
    let amount_col = width - 1;
    let line = |label: &str, marker: &str, section: &str, article: &str, amount: f64| {
        let mut row = vec![Cell::Empty; width];
        row[0] = t(label);
        row[1] = t(marker);
        row[3] = t(section);
        row[program_offset] = t(article);
        row[amount_col] = Cell::Number(amount * scale);
        row
    };

    let mut header = vec![Cell::Empty; width];
    header[0] = t("Наименование показателя, в том числе");
    header[amount_col] = t("Консолидированный бюджет субъекта РФ");

    let mut total = vec![Cell::Empty; width];
    total[0] = t("Расходы бюджета - всего");
    total[1] = t("200");
    total[amount_col] = Cell::Number(500.0 * scale);

    RawExtract::new(
        source,
        year,
        (0..width).map(|i| format!("Unnamed: {}", i)).collect(),
        vec![
            header,
            total,
            line("Образование", "210", "0700", "0000000", 200.0),
            line("Дошкольное образование", "211", "0701", "0000000", 120.0),
            line("Дошкольное образование", "211", "0701", "5200000", 80.0),
        ],
    )
}

fn subnational_workbook(
    file: &str,
    year: i32,
    scale: f64,
    extra_revenue: &[(&str, &str, f64)],
) -> Workbook {
    let config = PipelineConfig::default();
    let layout = SubnationalLayout::for_year(year, &config);
    let source_id = format!("reg_{}/{}.xls", year, file);

    let mut sheets = Vec::new();
    if layout.revenue_sheet == 1 {
        sheets.push(decoy_sheet(&source_id, year));
    }
    sheets.push(revenue_sheet(&source_id, year, scale, extra_revenue));
    sheets.push(spending_sheet(&source_id, year, scale, layout.program_offset));

    Workbook {
        source_id,
        year,
        sheets,
    }
}

fn subnational_workbooks() -> Vec<Workbook> {
    let mut workbooks = Vec::new();
    for year in SUBNATIONAL_YEARS {
        let factor = (year - 2010) as f64;
        for (code, name) in REGIONS {
            workbooks.push(subnational_workbook(
                &format!("{:02}_{}", code, name),
                year,
                code as f64 * factor,
                &[],
            ));
        }
        if year != 2011 {
            workbooks.push(subnational_workbook("00_russia", year, 3.0 * factor, &[]));
        }
    }
    workbooks
}

fn national_revenue_sheet(source: &str, year: i32, factor: f64) -> RawExtract {
    let header = |text: &str| vec![t(text), t(""), t(text), t(text)];
    let line = |label: &str, code: &str, amount: f64| {
        vec![t(label), t(""), t(code), Cell::Number(amount * factor)]
    };
    RawExtract::new(
        source,
        year,
        vec![],
        vec![
            header("Наименование показателя"),
            header("1"),
            header("Код дохода"),
            header("Исполнено"),
            line("Доходы бюджета - всего", "х", 11000.0),
            line("Налоговые и неналоговые доходы", "10000000000000000", 9000.0),
            line("Налоги на прибыль, доходы", "10100000000000000", 5000.0),
            line("Налог на доходы физических лиц", "10102000010000110", 1000.0),
            line("Доходы от использования имущества", "11100000000000000", 1500.0),
            line("Налог на добычу полезных ископаемых", "10701000010000110", 700.0),
        ],
    )
}

fn national_spending_sheet(
    source: &str,
    year: i32,
    layout: NationalLayout,
    factor: f64,
) -> RawExtract {
    let amount_col = layout.spending_columns().amount;
    let width = amount_col + 1;
    let line = |label: &str, agency: &str, section: &str, article: &str, amount: f64| {
        let mut row = vec![Cell::Empty; width];
        row[0] = t(label);
        row[2] = t(agency);
        row[3] = t(section);
        row[4] = t(article);
        row[amount_col] = Cell::Number(amount * factor);
        row
    };

    let header_rows = layout.spending_header_rows();
    let last_header = header_rows.iter().copied().max().unwrap_or(0);
    let mut rows: Vec<Vec<Cell>> = (0..=last_header)
        .map(|idx| {
            if header_rows.contains(&idx) {
                vec![t("hdr"); width]
            } else {
                line("Расходы бюджета - всего", "х", "х", "х", 900.0)
            }
        })
        .collect();
    rows.push(line("Министерство просвещения", "074", "0700", "0000000", 300.0));
    rows.push(line("Министерство науки", "075", "0700", "", 100.0));
    rows.push(line("Министерство просвещения", "074", "0701", "5200000", 50.0));
    rows.push(line("Дефицит/профицит", "", "", "", -50.0));

    RawExtract::new(source, year, vec![], rows)
}

fn national_workbooks() -> Vec<Workbook> {
    let config = PipelineConfig::default();
    [2011, 2012]
        .into_iter()
        .map(|year| {
            let source_id = format!("fed/{}.xlsx", year);
            let factor = (year - 2010) as f64;
            Workbook {
                source_id: source_id.clone(),
                year,
                sheets: vec![
                    decoy_sheet(&source_id, year),
                    national_revenue_sheet(&source_id, year, factor),
                    decoy_sheet(&source_id, year),
                    national_spending_sheet(&source_id, year, config.national_layout(year), factor),
                ],
            }
        })
        .collect()
}

fn tax_table() -> TaxCollectionTable {
    let csv = "region,tax,2011,2012\n\
        Российская Федерация,Всего поступило налогов в федеральный бюджет,,50\n\
        Республика Адыгея,Всего поступило налогов в федеральный бюджет,10,12\n\
        Республика Башкортостан,Всего поступило налогов в федеральный бюджет,30,35\n\
        Республика Адыгея,Налог на доходы физических лиц в федеральный бюджет,,2\n\
        Республика Адыгея,Налог на доходы физических лиц в бюджеты субъектов Российской Федерации,,48\n\
        Республика Башкортостан,Налог на добычу полезных ископаемых в федеральный бюджет,,7\n\
        Неизвестная область,Всего поступило налогов в федеральный бюджет,1,1\n";
    TaxCollectionTable::from_csv_reader(csv.as_bytes()).unwrap()
}

fn inputs() -> ReconciliationInputs {
    ReconciliationInputs {
        subnational: subnational_workbooks(),
        national: national_workbooks(),
        tax_table: tax_table(),
    }
}

fn reconciler() -> BudgetReconciler {
    BudgetReconciler::with_default_catalogs(PipelineConfig::default(), reference_tables()).unwrap()
}

fn value_at(
    table: &FactTable,
    region: &str,
    year: i32,
    matches: impl Fn(&ClassificationPath) -> bool,
) -> Option<f64> {
    let rows: Vec<&FactRow> = table
        .rows_for(region, year)
        .filter(|row| matches(&row.path))
        .collect();
    assert_eq!(
        rows.len(),
        1,
        "expected exactly one row for {} {}, found {:?}",
        region,
        year,
        rows
    );
    rows[0].value
}

fn labelled(label: &'static str) -> impl Fn(&ClassificationPath) -> bool {
    move |path| path.category_label == label
}

#[test]
fn test_full_reconciliation() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    let table = &reconciliation.table;
    let report = &reconciliation.report;

    assert_eq!(report.subnational_files, 11);
    assert_eq!(report.national_files, 2);
    assert!(report.skipped_files.is_empty());
    assert_eq!(report.join.duplicate_source_lines, 0);
    assert!(report.join.deviations.is_empty(), "country totals match the regional sums");
    assert_eq!(report.pivot.rows_without_region, 0);

    let own = |path: &ClassificationPath| {
        path.flow_type == 1 && path.r1 == 1 && path.r2 == 0 && path.r3 == 0
    };
    assert_eq!(value_at(table, "adygea", 2012, own), Some(2000.0));
    assert_eq!(value_at(table, "bashkortostan", 2012, own), Some(4000.0));
    assert_eq!(value_at(table, "adygea", 2012, labelled("transfers_to_reg")), Some(600.0));
    assert_eq!(value_at(table, "adygea", 2012, labelled("tax_to_fed")), Some(12000.0));

    let pit_own = value_at(table, "adygea", 2012, |p| {
        p.r1 == 1 && p.category_label == "personal income tax"
    });
    assert_eq!(pit_own, Some(1000.0));
    let pit_to_fed = table
        .rows_for("adygea", 2012)
        .find(|row| row.path.r1 == 3 && row.path.category_label == "personal income tax")
        .unwrap();
    let path = &pit_to_fed.path;
    assert_eq!((path.r2, path.r3, path.r4, path.r5), (1, 1, 2, 0));
    assert_eq!(pit_to_fed.value, Some(2000.0));

    let property = table
        .rows_for("adygea", 2012)
        .find(|row| row.path.category_label == "property income")
        .unwrap();
    assert_eq!((property.path.r1, property.path.r2, property.path.r3), (1, 2, 11));
    assert_eq!(property.value, Some(800.0));

    assert_eq!(value_at(table, "adygea", 2012, labelled("reg_spending")), Some(1000.0));
    let education = table
        .rows_for("adygea", 2012)
        .find(|row| row.path.category_label == "education")
        .unwrap();
    assert_eq!((education.path.flow_type, education.path.s1, education.path.s2), (2, 7, 0));
    assert_eq!(education.value, Some(400.0));
    assert_eq!(
        value_at(table, "adygea", 2012, labelled("preschool education")),
        Some(240.0),
        "only the zero target article is a section line"
    );

    assert_eq!(value_at(table, "adygea", 2012, labelled("population")), Some(440000.0));
    assert_eq!(value_at(table, "russia", 2012, labelled("rub_usd")), Some(31.088));
}

#[test]
fn test_reconciliation_is_idempotent_and_order_independent() {
    let reconciler = reconciler();
    let first = reconciler.reconcile(&inputs()).unwrap();
    let second = reconciler.reconcile(&inputs()).unwrap();
    assert_eq!(first.table, second.table);

    let mut shuffled = inputs();
    shuffled.subnational.reverse();
    shuffled.national.reverse();
    shuffled.tax_table.rows.reverse();
    let third = reconciler.reconcile(&shuffled).unwrap();
    assert_eq!(first.table, third.table);
    assert_eq!(first.table.to_csv_string().unwrap(), third.table.to_csv_string().unwrap());
}

#[test]
fn test_every_region_year_is_covered() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    let expected: Vec<(i32, &str)> = SUBNATIONAL_YEARS
        .iter()
        .flat_map(|&year| REGIONS.iter().map(move |&(_, name)| (year, name)))
        .collect();
    assert!(verify::check_coverage(&reconciliation.table, expected.iter().copied()).is_ok());

    for (year, name) in expected {
        let revenue_rows = reconciliation
            .table
            .rows_for(name, year)
            .filter(|row| row.path.scope == 1 && row.path.flow_type == 1)
            .count();
        assert!(revenue_rows > 0, "{} {} has no revenue rows", name, year);
    }
}

#[test]
fn test_revenue_and_spending_levels_never_mix() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    assert!(verify::check_mutual_exclusivity(&reconciliation.table).is_ok());
    for row in &reconciliation.table.rows {
        assert!(
            !(row.path.has_revenue_levels() && row.path.has_spending_levels()),
            "{} mixes revenue and spending levels",
            row.path
        );
    }
}

#[test]
fn test_missing_reference_values_stay_missing() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    let table = &reconciliation.table;

    assert_eq!(value_at(table, "bashkortostan", 2012, labelled("poverty")), None);
    assert_eq!(value_at(table, "adygea", 2012, labelled("poverty")), Some(14.2));
    assert!(verify::check_no_zero_fill(table).is_ok());

    for row in table.rows.iter().filter(|row| row.path.flow_type >= 5) {
        assert_ne!(
            row.value,
            Some(0.0),
            "{} for {} {} was zero-filled",
            row.path,
            row.region_name,
            row.year
        );
    }
}

#[test]
fn test_first_year_country_rows_are_regional_sums() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    let table = &reconciliation.table;
    let country = |path: &ClassificationPath| path.scope == 2 && path.domain == 1;

    let at = |label: &'static str| {
        value_at(table, "russia", 2011, move |p| country(p) && p.category_label == label)
    };
    assert_eq!(at("reg_own_revenue"), Some(3000.0));
    assert_eq!(at("transfers_to_reg"), Some(900.0));
    assert_eq!(at("tax_to_fed"), Some(40000.0), "no country tax figure in the first year");
    assert_eq!(at("reg_tax_revenue"), Some(1800.0));
    assert_eq!(at("reg_nontax_revenue"), Some(1200.0));
    assert_eq!(at("personal income tax"), Some(1500.0));
    assert_eq!(at("reg_spending"), Some(1500.0));
    assert_eq!(at("education"), Some(600.0));
    assert_eq!(at("preschool education"), Some(360.0));

    let later = |label: &'static str| {
        value_at(table, "russia", 2012, move |p| country(p) && p.category_label == label)
    };
    assert_eq!(later("reg_own_revenue"), Some(6000.0));
    assert_eq!(
        later("tax_to_fed"),
        Some(50000.0),
        "recorded country figure wins after the first year"
    );
    assert_eq!(later("reg_spending"), Some(3000.0));
}

#[test]
fn test_federal_rows() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    let table = &reconciliation.table;
    let federal = |label: &'static str| {
        move |p: &ClassificationPath| p.scope == 2 && p.domain == 2 && p.category_label == label
    };

    for (year, factor) in [(2011, 1.0), (2012, 2.0)] {
        assert_eq!(value_at(table, "russia", year, federal("fed_revenue")), Some(9000.0 * factor));
        assert_eq!(
            value_at(table, "russia", year, federal("fed_tax_revenue")),
            Some(5000.0 * factor)
        );
        assert_eq!(
            value_at(table, "russia", year, federal("fed_nontax_revenue")),
            Some(1500.0 * factor)
        );
        assert_eq!(value_at(table, "russia", year, federal("fed_spending")), Some(900.0 * factor));
        assert_eq!(
            value_at(table, "russia", year, federal("education")),
            Some(400.0 * factor),
            "section sums run across ministries"
        );
    }
    assert!(table
        .rows
        .iter()
        .all(|row| row.path.domain != 2 || row.path.category_label != "preschool education"));
}

#[test]
fn test_federal_lines_take_tax_catalog_labels() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    assert_eq!(reconciliation.report.join.federal_labels_borrowed, 2);

    for (year, factor) in [(2011, 1.0), (2012, 2.0)] {
        let mining = reconciliation
            .table
            .rows_for("russia", year)
            .find(|row| {
                row.path.domain == 2 && row.path.category_label == "minerals extraction tax"
            })
            .unwrap();
        assert_eq!(
            (mining.path.r1, mining.path.r2, mining.path.r3, mining.path.r4, mining.path.r5),
            (1, 1, 7, 1, 0)
        );
        assert_eq!(mining.value, Some(700.0 * factor));
    }
}

#[test]
fn test_layout_generations_read_the_same_lines() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    let table = &reconciliation.table;

    for (year, factor) in [(2016, 6.0), (2017, 7.0)] {
        assert_eq!(
            value_at(table, "adygea", year, labelled("reg_own_revenue")),
            Some(1000.0 * factor)
        );
        assert_eq!(value_at(table, "adygea", year, labelled("education")), Some(200.0 * factor));
        assert_eq!(
            value_at(table, "adygea", year, labelled("preschool education")),
            Some(120.0 * factor)
        );
    }
}

#[test]
fn test_spending_total_row_is_backfilled() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    for year in SUBNATIONAL_YEARS {
        let factor = (year - 2010) as f64;
        assert_eq!(
            value_at(&reconciliation.table, "bashkortostan", year, labelled("reg_spending")),
            Some(1000.0 * factor)
        );
    }
}

#[test]
fn test_tax_only_lines_are_kept() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    let report = &reconciliation.report;
    assert_eq!(report.join.tax_only_lines, 6);

    let mining = reconciliation
        .table
        .rows_for("bashkortostan", 2012)
        .find(|row| row.path.category_label == "minerals extraction tax")
        .unwrap();
    assert_eq!(
        (mining.path.r1, mining.path.r2, mining.path.r3, mining.path.r4, mining.path.r5),
        (3, 1, 7, 1, 0)
    );
    assert_eq!(mining.value, Some(7000.0));
}

#[test]
fn test_unresolved_tax_region_is_reported() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    let report = &reconciliation.report;
    assert!(report.classification.unresolved_regions.contains("неизвестная область"));
    assert_eq!(report.join.tax_records_unresolved, 2);
    assert_eq!(report.classification.category_misses, 0);
    assert_eq!(report.classification.bucket_misses, 0);
}

#[test]
fn test_duplicate_paths_abort_the_run() {
    let mut inputs = inputs();
    let with_agents = subnational_workbook(
        "01_adygea",
        2012,
        2.0,
        &[
            ("НДФЛ с доходов налоговых агентов", "10102010010000110", 10.0),
            ("НДФЛ с доходов налоговых агентов (пени)", "10102010011000110", 1.0),
        ],
    );
    let slot = inputs
        .subnational
        .iter_mut()
        .find(|wb| wb.source_id == with_agents.source_id)
        .unwrap();
    *slot = with_agents;

    match reconciler().reconcile(&inputs) {
        Err(ReconcileError::DuplicateFact { region, year, path }) => {
            assert_eq!(region, "adygea");
            assert_eq!(year, 2012);
            assert!(path.contains("pit on agents"));
        }
        other => panic!("expected a duplicate fact, got {:?}", other.map(|r| r.table.len())),
    }
}

#[test]
fn test_schema_drift_aborts_the_run() {
    let mut inputs = inputs();
    let source_id = "reg_2017/02_bashkortostan.xls".to_string();
    for workbook in inputs.subnational.iter_mut().filter(|wb| wb.source_id == source_id) {
        workbook.sheets.insert(0, decoy_sheet(&source_id, 2017));
    }

    match reconciler().reconcile(&inputs) {
        Err(ReconcileError::SchemaDrift { source_id: failed, year, .. }) => {
            assert_eq!(failed, source_id);
            assert_eq!(year, 2017);
        }
        other => panic!("expected schema drift, got {:?}", other.map(|r| r.table.len())),
    }
}

#[test]
fn test_tax_catalog_is_complete() {
    let catalogs = TaxonomyCatalogs::default();
    assert!(catalogs.validate().is_ok());
    assert_eq!(catalogs.tax_categories.len(), 27);

    for rule in &catalogs.tax_categories.rules {
        let category = catalogs.tax_categories.classify(&rule.pattern).unwrap();
        assert_eq!(category.code, rule.outcome.code, "pattern '{}' is shadowed", rule.pattern);
    }
}

#[test]
fn test_code_decomposition_round_trips() {
    for code in [
        "10000000000000000",
        "10102000010000110",
        "11100000000000000",
        "20200000000000000",
    ] {
        assert_eq!(RevenueCode::parse(code).unwrap().to_code_string(), code);
    }
    let pit = RevenueCode::parse("10102000010000110").unwrap();
    assert_eq!((pit.kind, pit.group, pit.subgroup, pit.item), (1, 1, 2, 0));
    assert_eq!(pit.band(), RevenueBand::Tax);

    let preschool = SpendingCode::parse("0701").unwrap();
    assert_eq!((preschool.section, preschool.subsection), (7, 1));
    assert_eq!(preschool.to_code_string(), "0701");

    assert!(matches!(
        RevenueCode::parse("1010200001000011"),
        Err(ReconcileError::MalformedCode { .. })
    ));
}

#[test]
fn test_output_formats() {
    let reconciliation = reconciler().reconcile(&inputs()).unwrap();
    let table = &reconciliation.table;

    let csv = table.to_csv_string().unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("scope,domain,flow_type,r1,r2,r3,r4,r5,s1,s2,category_label,region_name,year,value")
    );
    assert_eq!(csv.lines().count(), table.len() + 1);
    assert!(csv.contains("\n1,1,8,0,0,0,0,0,0,0,poverty,bashkortostan,2012,\n"));
    assert!(csv.contains("\n1,1,1,1,0,0,0,0,0,0,reg_own_revenue,adygea,2012,2000\n"));

    let parsed: Vec<FactRow> = serde_json::from_str(&table.to_json().unwrap()).unwrap();
    assert_eq!(parsed.len(), table.len());
    assert_eq!(parsed[0].path, table.rows[0].path);

    let schema = FactRow::schema_as_json().unwrap();
    assert!(schema.contains("region_name"));
    assert!(schema.contains("scope"));
}
