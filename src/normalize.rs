use crate::canonical::{canonical_amount, canonical_code, CanonicalField};
use crate::config::PipelineConfig;
use crate::error::{ReconcileError, Result};
use crate::layout::{
    require_column, NationalLayout, SubnationalLayout, TieBreak, LABEL_MARKER,
    REVENUE_AMOUNT_MARKER, REVENUE_CODE_MARKER, SPENDING_AMOUNT_MARKER,
};
use crate::schema::{
    Cell, FlowDirection, NormalizedRecord, RawExtract, RegionKey, SourceDomain, Workbook,
};
use log::debug;
use std::collections::BTreeSet;

/// Marker in column 1 of the spending sheet's total line.
pub const SPENDING_TOTAL_MARKER: &str = "200";

/// National spending lines that are balances, not spending.
const NATIONAL_SPENDING_NOISE: [&str; 2] = [
    "дефицит/профицит",
    "результат исполнения федерального бюджета",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedWorkbook {
    pub revenue: Vec<NormalizedRecord>,
    pub spending: Vec<NormalizedRecord>,
}

/// Extracts the region from the leading digits of the file name in `source_id`,
/// e.g. `reg_2015/05_adygea.xls` is region 5.
pub fn region_from_provenance(
    source_id: &str,
    year: i32,
    config: &PipelineConfig,
) -> Result<RegionKey> {
    let file_name = source_id
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(source_id);
    let digits: String = file_name.chars().take_while(|c| c.is_ascii_digit()).collect();

    let code = digits.parse::<u32>().map_err(|_| {
        ReconcileError::drift(
            source_id,
            year,
            format!("file name '{}' does not start with a region code", file_name),
        )
    })?;

    if code == config.country_code {
        Ok(RegionKey::Country)
    } else {
        Ok(RegionKey::Region(code))
    }
}

fn lowercase_text(extract: &RawExtract) -> RawExtract {
    extract.map_text(|s| s.to_lowercase())
}

/// Undoes the line wrapping in the revenue sheet headers, which splits
/// "консолидированный" with hyphens and line breaks in some years.
fn repair_revenue_text(extract: &RawExtract) -> RawExtract {
    extract.map_text(|s| {
        s.to_lowercase()
            .replace('-', "")
            .replace('\n', "")
            .replace("ро ванный", "рованный")
    })
}

fn label_at(extract: &RawExtract, row: usize, col: usize) -> Option<String> {
    let cell = extract.cell(row, col);
    if cell.is_empty() {
        return None;
    }
    cell.render().map(|text| text.trim().to_string())
}

fn ensure_records(extract: &RawExtract, records: &[NormalizedRecord], what: &str) -> Result<()> {
    if records.is_empty() {
        return Err(ReconcileError::drift(
            &extract.source_id,
            extract.year,
            format!("{} sheet produced no complete rows", what),
        ));
    }
    Ok(())
}

pub fn normalize_subnational_revenue(
    extract: &RawExtract,
    region: RegionKey,
) -> Result<Vec<NormalizedRecord>> {
    let repaired = repair_revenue_text(extract);

    let label_col = require_column(&repaired, LABEL_MARKER, TieBreak::First)?;
    let amount_col = require_column(&repaired, REVENUE_AMOUNT_MARKER, TieBreak::Last)?;
    let code_col = require_column(&repaired, REVENUE_CODE_MARKER, TieBreak::First)?;

    debug!(
        "{}: revenue columns label={} code={} amount={}",
        extract.source_id, label_col, code_col, amount_col
    );

    let mut records = Vec::new();
    for row in 0..extract.rows.len() {
        let Some(label) = label_at(&repaired, row, label_col) else {
            continue;
        };
        let Some(code) =
            canonical_code(extract.cell(row, code_col), CanonicalField::SubnationalRevenueCode)
        else {
            continue;
        };
        let Some(amount) = canonical_amount(extract.cell(row, amount_col)) else {
            continue;
        };

        records.push(NormalizedRecord {
            category_label_native: label,
            category_code: code,
            program_code: None,
            agency_code: None,
            amount: Some(amount),
            year: extract.year,
            region,
            flow_direction: FlowDirection::Revenue,
            source_domain: SourceDomain::Subnational,
            source_id: extract.source_id.clone(),
        });
    }

    ensure_records(extract, &records, "revenue")?;
    Ok(records)
}

/// Replaces empty cells of the total spending line with zeros so the line
/// survives the completeness filter.
fn backfill_total_rows(extract: &RawExtract) -> RawExtract {
    let mut filled = extract.clone();
    for row in filled.rows.iter_mut() {
        let is_total = row
            .get(1)
            .and_then(|cell| cell.render())
            .map(|text| text.trim() == SPENDING_TOTAL_MARKER)
            .unwrap_or(false);
        if !is_total {
            continue;
        }
        let width = extract.width();
        row.resize(width, Cell::Empty);
        for cell in row.iter_mut() {
            if cell.is_empty() {
                *cell = Cell::Number(0.0);
            }
        }
    }
    filled
}

pub fn normalize_subnational_spending(
    extract: &RawExtract,
    region: RegionKey,
    layout: SubnationalLayout,
) -> Result<Vec<NormalizedRecord>> {
    let sheet = lowercase_text(&backfill_total_rows(extract));

    let label_col = require_column(&sheet, LABEL_MARKER, TieBreak::First)?;
    let amount_col = require_column(&sheet, SPENDING_AMOUNT_MARKER, TieBreak::Last)?;
    let section_col = label_col + layout.section_offset;
    let program_col = label_col + layout.program_offset;

    if program_col >= sheet.width() {
        return Err(ReconcileError::drift(
            &extract.source_id,
            extract.year,
            format!(
                "spending sheet has {} columns, code columns expected up to {}",
                sheet.width(),
                program_col
            ),
        ));
    }

    debug!(
        "{}: spending columns label={} section={} program={} amount={}",
        extract.source_id, label_col, section_col, program_col, amount_col
    );

    let mut records = Vec::new();
    for row in 0..sheet.rows.len() {
        let Some(label) = label_at(&sheet, row, label_col) else {
            continue;
        };
        if sheet.cell(row, section_col).is_empty() || sheet.cell(row, program_col).is_empty() {
            continue;
        }
        let Some(section) =
            canonical_code(sheet.cell(row, section_col), CanonicalField::SpendingCode)
        else {
            continue;
        };
        let Some(program) =
            canonical_code(sheet.cell(row, program_col), CanonicalField::ArticleCode)
        else {
            continue;
        };
        let Some(amount) = canonical_amount(sheet.cell(row, amount_col)) else {
            continue;
        };

        records.push(NormalizedRecord {
            category_label_native: label,
            category_code: section,
            program_code: Some(program),
            agency_code: None,
            amount: Some(amount),
            year: extract.year,
            region,
            flow_direction: FlowDirection::Spending,
            source_domain: SourceDomain::Subnational,
            source_id: extract.source_id.clone(),
        });
    }

    ensure_records(extract, &records, "spending")?;
    Ok(records)
}

fn check_width(extract: &RawExtract, needed: usize, what: &str) -> Result<()> {
    if extract.width() < needed {
        return Err(ReconcileError::drift(
            &extract.source_id,
            extract.year,
            format!(
                "{} sheet has {} columns, the report form needs {}",
                what,
                extract.width(),
                needed
            ),
        ));
    }
    Ok(())
}

pub fn normalize_national_revenue(
    extract: &RawExtract,
    layout: NationalLayout,
) -> Result<Vec<NormalizedRecord>> {
    check_width(extract, layout.min_revenue_width(), "revenue")?;
    let sheet = lowercase_text(extract);
    let cols = layout.revenue_columns();

    let complete_rows = (0..sheet.rows.len()).filter(|&row| {
        !sheet.cell(row, cols.label).is_empty()
            && !sheet.cell(row, cols.code).is_empty()
            && !sheet.cell(row, cols.amount).is_empty()
    });

    let mut records = Vec::new();
    for row in complete_rows.skip(layout.revenue_header_rows()) {
        let Some(label) = label_at(&sheet, row, cols.label) else {
            continue;
        };
        let Some(code) =
            canonical_code(sheet.cell(row, cols.code), CanonicalField::NationalRevenueCode)
        else {
            continue;
        };
        let Some(amount) = canonical_amount(sheet.cell(row, cols.amount)) else {
            continue;
        };

        records.push(NormalizedRecord {
            category_label_native: label,
            category_code: code,
            program_code: None,
            agency_code: None,
            amount: Some(amount),
            year: extract.year,
            region: RegionKey::Country,
            flow_direction: FlowDirection::Revenue,
            source_domain: SourceDomain::National,
            source_id: extract.source_id.clone(),
        });
    }

    ensure_records(extract, &records, "revenue")?;
    Ok(records)
}

fn article_code(sheet: &RawExtract, row: usize, col: usize) -> String {
    canonical_code(sheet.cell(row, col), CanonicalField::ArticleCode)
        .unwrap_or_else(|| "0".to_string())
}

pub fn normalize_national_spending(
    extract: &RawExtract,
    layout: NationalLayout,
) -> Result<Vec<NormalizedRecord>> {
    check_width(extract, layout.min_spending_width(), "spending")?;
    let sheet = lowercase_text(extract);
    let cols = layout.spending_columns();
    let header_rows: BTreeSet<usize> = layout.spending_header_rows().iter().copied().collect();

    let mut records = Vec::new();
    for row in (0..sheet.rows.len()).filter(|row| !header_rows.contains(row)) {
        let Some(label) = label_at(&sheet, row, cols.label) else {
            continue;
        };
        if NATIONAL_SPENDING_NOISE.iter().any(|noise| label.contains(noise)) {
            continue;
        }
        let Some(amount) = canonical_amount(sheet.cell(row, cols.amount)) else {
            continue;
        };
        let section = canonical_code(sheet.cell(row, cols.section), CanonicalField::SpendingCode)
            .unwrap_or_else(|| "0000".to_string());

        records.push(NormalizedRecord {
            category_label_native: label,
            category_code: section,
            program_code: Some(article_code(&sheet, row, cols.program)),
            agency_code: Some(article_code(&sheet, row, cols.agency)),
            amount: Some(amount),
            year: extract.year,
            region: RegionKey::Country,
            flow_direction: FlowDirection::Spending,
            source_domain: SourceDomain::National,
            source_id: extract.source_id.clone(),
        });
    }

    ensure_records(extract, &records, "spending")?;
    Ok(records)
}

fn sheet<'a>(workbook: &'a Workbook, index: usize, what: &str) -> Result<&'a RawExtract> {
    workbook.sheets.get(index).ok_or_else(|| {
        ReconcileError::drift(
            &workbook.source_id,
            workbook.year,
            format!(
                "{} sheet {} is missing, workbook has {} sheets",
                what,
                index,
                workbook.sheets.len()
            ),
        )
    })
}

/// Normalizes one regional treasury file: revenue and spending sheets picked
/// by the layout generation of its year.
pub fn normalize_subnational_workbook(
    workbook: &Workbook,
    config: &PipelineConfig,
) -> Result<NormalizedWorkbook> {
    let layout = SubnationalLayout::for_year(workbook.year, config);
    let region = region_from_provenance(&workbook.source_id, workbook.year, config)?;

    let revenue = normalize_subnational_revenue(
        sheet(workbook, layout.revenue_sheet, "revenue")?,
        region,
    )?;
    let spending = normalize_subnational_spending(
        sheet(workbook, layout.spending_sheet, "spending")?,
        region,
        layout,
    )?;

    debug!(
        "{} ({}, {}): {} revenue and {} spending records",
        workbook.source_id,
        workbook.year,
        region,
        revenue.len(),
        spending.len()
    );

    Ok(NormalizedWorkbook { revenue, spending })
}

/// Normalizes one federal budget execution file.
pub fn normalize_national_workbook(
    workbook: &Workbook,
    config: &PipelineConfig,
) -> Result<NormalizedWorkbook> {
    let layout = config.national_layout(workbook.year);

    let revenue = normalize_national_revenue(
        sheet(workbook, config.national_revenue_sheet, "revenue")?,
        layout,
    )?;
    let spending = normalize_national_spending(
        sheet(workbook, config.national_spending_sheet, "spending")?,
        layout,
    )?;

    debug!(
        "{} ({}, {:?} form): {} revenue and {} spending records",
        workbook.source_id,
        workbook.year,
        layout,
        revenue.len(),
        spending.len()
    );

    Ok(NormalizedWorkbook { revenue, spending })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Cell {
        Cell::from(s)
    }

    fn revenue_sheet(source: &str, year: i32) -> RawExtract {
        RawExtract::new(
            source,
            year,
            vec![
                "Unnamed: 0".into(),
                "Unnamed: 1".into(),
                "Unnamed: 2".into(),
                "Unnamed: 3".into(),
            ],
            vec![
                vec![
                    t("Наименование показателя, в том числе"),
                    t("Код"),
                    t("Консолиди-\nро ванный бюджет субъекта РФ"),
                    t(""),
                ],
                vec![t("Доходы бюджета - всего"), t("10000000000000000"), t("1 234,5"), t("")],
                vec![
                    t("Налог на доходы физических лиц"),
                    t("10102000010000110"),
                    t("1\u{a0}000,0"),
                    t(""),
                ],
                vec![t("Прочие"), t("х"), t("5,0"), t("")],
                vec![t("Итого"), t("10300000000000000"), t("-"), t("")],
            ],
        )
    }

    #[test]
    fn test_region_from_provenance() {
        let config = PipelineConfig::default();
        assert_eq!(
            region_from_provenance("budget_data/reg/reg_2015/05_adygea.xls", 2015, &config)
                .unwrap(),
            RegionKey::Region(5)
        );
        assert_eq!(
            region_from_provenance("00_russia.xls", 2015, &config).unwrap(),
            RegionKey::Country
        );
        assert!(matches!(
            region_from_provenance("reg_2015/adygea.xls", 2015, &config),
            Err(ReconcileError::SchemaDrift { .. })
        ));
    }

    #[test]
    fn test_subnational_revenue_repairs_headers() {
        let sheet = revenue_sheet("reg_2016/05_adygea.xls", 2016);
        let records = normalize_subnational_revenue(&sheet, RegionKey::Region(5)).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category_code, "10000000000000000");
        assert_eq!(records[0].amount, Some(1234.5));
        assert_eq!(records[0].category_label_native, "доходы бюджета  всего");
        assert_eq!(records[1].amount, Some(1000.0));
        assert!(records.iter().all(|r| r.flow_direction == FlowDirection::Revenue));
    }

    #[test]
    fn test_subnational_revenue_missing_marker_is_drift() {
        let sheet = RawExtract::new(
            "reg_2016/07_kbr.xls",
            2016,
            vec!["a".into(), "b".into()],
            vec![vec![t("в том числе"), t("10000000000000000")]],
        );
        match normalize_subnational_revenue(&sheet, RegionKey::Region(7)) {
            Err(ReconcileError::SchemaDrift { source_id, year, detail }) => {
                assert_eq!(source_id, "reg_2016/07_kbr.xls");
                assert_eq!(year, 2016);
                assert!(detail.contains("консолидированный"));
            }
            other => panic!("expected schema drift, got {:?}", other),
        }
    }

    fn spending_sheet(year: i32, program_offset: usize) -> RawExtract {
        let width = program_offset + 3;
        let mut header = vec![Cell::Empty; width];
        header[0] = t("в том числе");
        header[width - 1] = t("консолидированный бюджет субъекта рф");

        let mut total = vec![Cell::Empty; width];
        total[0] = t("Расходы бюджета - всего");
        total[1] = t("200");
        total[width - 1] = t("5 000,0");

        let mut section = vec![Cell::Empty; width];
        section[0] = t("Образование");
        section[1] = t("210");
        section[3] = t("0700");
        section[program_offset] = t("0000000");
        section[width - 1] = t("1 500,0");

        let mut detail = vec![Cell::Empty; width];
        detail[0] = t("Дошкольное образование");
        detail[1] = t("211");
        detail[3] = t("0701");
        detail[program_offset] = t("5200000");
        detail[width - 1] = t("");

        RawExtract::new(
            "reg_x/12_mari.xls",
            year,
            (0..width).map(|i| format!("Unnamed: {}", i)).collect(),
            vec![header, total, section, detail],
        )
    }

    #[test]
    fn test_total_spending_row_is_backfilled() {
        let config = PipelineConfig::default();
        let layout = SubnationalLayout::for_year(2018, &config);
        let sheet = spending_sheet(2018, layout.program_offset);
        let records =
            normalize_subnational_spending(&sheet, RegionKey::Region(12), layout).unwrap();

        let total = records
            .iter()
            .find(|r| r.category_code == "0000")
            .expect("total row must survive");
        assert_eq!(total.program_code.as_deref(), Some("0"));
        assert_eq!(total.amount, Some(5000.0));

        assert!(records.iter().any(|r| r.category_code == "0700"));
        assert!(
            !records.iter().any(|r| r.category_code == "0701"),
            "row without an amount must be dropped"
        );
    }

    #[test]
    fn test_spending_offsets_follow_generation() {
        let config = PipelineConfig::default();
        let old = SubnationalLayout::for_year(2013, &config);
        let sheet = spending_sheet(2013, old.program_offset);
        let records = normalize_subnational_spending(&sheet, RegionKey::Region(12), old).unwrap();
        assert!(records
            .iter()
            .any(|r| r.category_code == "0700" && r.program_code.as_deref() == Some("0000000")));
    }

    #[test]
    fn test_national_revenue_drops_header_rows() {
        let mut rows = vec![
            vec![t("header a"), t(""), t("h"), t("h")],
            vec![t("header b"), t(""), t("h"), t("h")],
            vec![t("header c"), t(""), t("h"), t("h")],
            vec![t("header d"), t(""), t("h"), t("h")],
        ];
        rows.push(vec![t("Доходы - всего"), t(""), t("10000000000000000"), t("11 000,0")]);
        rows.push(vec![t("Прочие"), t(""), t("x"), t("7")]);
        let sheet = RawExtract::new("fed/2012.xlsx", 2012, vec![], rows);

        let records = normalize_national_revenue(&sheet, NationalLayout::Generalized).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].region, RegionKey::Country);
        assert_eq!(records[0].amount, Some(11000.0));
        assert_eq!(records[1].category_code, "00000000000000000");
    }

    #[test]
    fn test_national_revenue_too_narrow_is_drift() {
        let sheet =
            RawExtract::new("fed/2014.xlsx", 2014, vec![], vec![vec![t("a"), t("b"), t("c")]]);
        assert!(matches!(
            normalize_national_revenue(&sheet, NationalLayout::Cumulative),
            Err(ReconcileError::SchemaDrift { .. })
        ));
    }

    #[test]
    fn test_national_spending_filters_noise() {
        let mut rows: Vec<Vec<Cell>> = (0..7).map(|_| vec![t("hdr"); 9]).collect();
        let line = |cells: [&str; 9]| cells.iter().map(|text| t(text)).collect::<Vec<Cell>>();
        rows.push(line(["Расходы - всего", "", "х", "х", "х", "х", "", "", "900"]));
        rows.push(line(["Минобрнауки", "", "074", "0700", "0000000", "", "", "", "300"]));
        rows.push(line(["Дефицит/профицит", "", "", "", "", "", "", "", "-50"]));
        rows.push(line(["", "", "", "", "", "", "", "", "1"]));
        let sheet = RawExtract::new("fed/2012.xlsx", 2012, vec![], rows);

        let records = normalize_national_spending(&sheet, NationalLayout::Generalized).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category_code, "0000");
        assert_eq!(records[0].agency_code.as_deref(), Some("0"));
        assert_eq!(records[1].agency_code.as_deref(), Some("074"));
        assert_eq!(records[1].category_code, "0700");
    }
}
