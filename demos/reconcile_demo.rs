use regional_budget_reconciler::*;
use std::io::Cursor;

fn t(s: &str) -> Cell {
    Cell::from(s)
}

fn reference(config: &PipelineConfig) -> anyhow::Result<ReferenceTables> {
    let series = |rows: &[(&str, &str, &str)]| {
        let mut out = String::from("budget_code,region_eng,region_rus");
        for year in config.years() {
            out.push_str(&format!(",{}", year));
        }
        out.push('\n');
        for (code, name, value) in rows {
            out.push_str(&format!("{},{},", code, name));
            for _ in config.years() {
                out.push(',');
                out.push_str(value);
            }
            out.push('\n');
        }
        Cursor::new(out.into_bytes())
    };
    let text = |s: &str| Cursor::new(s.as_bytes().to_vec());

    let sources = ReferenceSources {
        revenue_codes: text(
            "code,revenue_indicator\n10000000000000000,Own revenue\n10102000010000110,Personal income tax\n",
        ),
        spending_codes: text("code,spending_indicator\n0700,Education\n"),
        region_roster: series(&[("0", "Russia", "146000000"), ("1", "Adygea", "453000")]),
        real_income: series(&[("0", "Russia", "104.6"), ("1", "Adygea", "103.2")]),
        income_per_capita: series(&[("0", "Russia", "26629"), ("1", "Adygea", "19473")]),
        poverty: series(&[("0", "Russia", "10.7"), ("1", "Adygea", "")]),
        exchange_rates: None,
    };
    Ok(ReferenceTables::from_sources(sources, config)?)
}

fn adygea_2012() -> Workbook {
    let source_id = "reg_2012/01_adygea.xls".to_string();
    let revenue = RawExtract::new(
        source_id.clone(),
        2012,
        vec!["Unnamed: 0".into(), "Unnamed: 1".into(), "Unnamed: 2".into()],
        vec![
            vec![
                t("Наименование показателя, в том числе"),
                t("Код"),
                t("Консолиди-\nрованный бюджет субъекта РФ"),
            ],
            vec![t("Доходы бюджета - всего"), t("10000000000000000"), t("8 402 113,5")],
            vec![t("Налог на доходы физических лиц"), t("10102000010000110"), t("3 117 450,1")],
        ],
    );

    let mut header = vec![Cell::Empty; 9];
    header[0] = t("в том числе");
    header[8] = t("Консолидированный бюджет субъекта РФ");
    let mut total = vec![Cell::Empty; 9];
    total[0] = t("Расходы бюджета - всего");
    total[1] = t("200");
    total[8] = t("9 120 004,0");
    let mut education = vec![Cell::Empty; 9];
    education[0] = t("Образование");
    education[1] = t("210");
    education[3] = t("0700");
    education[6] = t("0000000");
    education[8] = t("3 550 200,0");
    let spending = RawExtract::new(source_id.clone(), 2012, vec![], vec![header, total, education]);

    Workbook {
        source_id: source_id.clone(),
        year: 2012,
        sheets: vec![RawExtract::new(source_id, 2012, vec![], vec![]), revenue, spending],
    }
}

fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::default();
    let reference = reference(&config)?;

    let tax_csv = "region,tax,2012\n\
        Республика Адыгея,Всего поступило налогов в федеральный бюджет,\"4 210,0\"\n\
        Республика Адыгея,Налог на доходы физических лиц в федеральный бюджет,\"15,3\"\n\
        Республика Адыгея,Налог на доходы физических лиц в бюджеты субъектов Российской Федерации,\"3 102,1\"\n";

    let inputs = ReconciliationInputs {
        subnational: vec![adygea_2012()],
        national: vec![],
        tax_table: TaxCollectionTable::from_csv_reader(tax_csv.as_bytes())?,
    };

    println!("Reconciling {} regional workbook(s)...", inputs.subnational.len());
    let reconciliation =
        BudgetReconciler::with_default_catalogs(config, reference)?.reconcile(&inputs)?;

    let report = &reconciliation.report;
    println!("\nRun summary:");
    println!("  Fact rows:             {}", reconciliation.table.len());
    println!("  Tax rows classified:   {}", report.classification.rows_seen);
    println!("  Tax-only lines:        {}", report.join.tax_only_lines);
    println!("  Gap-filled attributes: {}", report.join.gap_filled_values);

    println!("\nFirst rows:");
    let csv = reconciliation.table.to_csv_string()?;
    for line in csv.lines().take(12) {
        println!("  {}", line);
    }

    Ok(())
}
