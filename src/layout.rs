use crate::config::PipelineConfig;
use crate::error::{ReconcileError, Result};
use crate::schema::RawExtract;
use serde::{Deserialize, Serialize};

/// "including": heads the line-description column in both treasury sheets.
pub const LABEL_MARKER: &str = "в том числе";
/// Heads the consolidated regional budget column of the revenue sheet.
pub const REVENUE_AMOUNT_MARKER: &str = "консолидированный бюджет субъекта";
/// The own-revenue total code; only the code column contains it.
pub const REVENUE_CODE_MARKER: &str = "10000000000000000";
/// Suffix of "consolidated regional budget" that survives the spending sheet's
/// hyphenated header wrapping.
pub const SPENDING_AMOUNT_MARKER: &str = "ванный бюджет субъекта";

/// Which of several matching columns wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    First,
    Last,
}

/// Finds the column whose label or any cell contains `marker`, compared in
/// lowercase. Returns `None` when no column matches.
pub fn locate_column(extract: &RawExtract, marker: &str, tie_break: TieBreak) -> Option<usize> {
    let marker = marker.to_lowercase();
    let contains = |text: &str| text.to_lowercase().contains(&marker);

    let mut matches = (0..extract.width()).filter(|&col| {
        extract
            .columns
            .get(col)
            .map(|label| contains(label))
            .unwrap_or(false)
            || extract.rows.iter().any(|row| {
                row.get(col)
                    .and_then(|cell| cell.render())
                    .map(|text| contains(&text))
                    .unwrap_or(false)
            })
    });

    match tie_break {
        TieBreak::First => matches.next(),
        TieBreak::Last => matches.last(),
    }
}

/// Same as [`locate_column`], but a miss is schema drift for this extract.
pub fn require_column(extract: &RawExtract, marker: &str, tie_break: TieBreak) -> Result<usize> {
    locate_column(extract, marker, tie_break).ok_or_else(|| {
        ReconcileError::drift(
            &extract.source_id,
            extract.year,
            format!("no column contains the marker '{}'", marker),
        )
    })
}

/// Sheet positions and code offsets of one sub-national layout generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnationalLayout {
    pub revenue_sheet: usize,
    pub spending_sheet: usize,
    /// Columns right of the label column holding the section code.
    pub section_offset: usize,
    /// Columns right of the label column holding the target-article code.
    pub program_offset: usize,
}

impl SubnationalLayout {
    pub fn for_year(year: i32, config: &PipelineConfig) -> Self {
        let (revenue_sheet, spending_sheet) = if year >= config.subnational_sheet_switch_year {
            (0, 1)
        } else {
            (1, 2)
        };
        let program_offset = if year < config.spending_offset_switch_year {
            6
        } else {
            5
        };

        Self {
            revenue_sheet,
            spending_sheet,
            section_offset: 3,
            program_offset,
        }
    }
}

/// Column positions of the national revenue sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevenueColumns {
    pub label: usize,
    pub code: usize,
    pub amount: usize,
}

/// Column positions of the national spending sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendingColumns {
    pub label: usize,
    pub agency: usize,
    pub section: usize,
    pub program: usize,
    pub expense_type: usize,
    pub amount: usize,
}

/// Report forms the treasury used for the federal budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NationalLayout {
    /// The first year's generalized report, with one extra header row.
    Early,
    Generalized,
    /// Cumulative report, used where the generalized one is incomplete.
    Cumulative,
}

impl NationalLayout {
    pub fn revenue_columns(self) -> RevenueColumns {
        match self {
            NationalLayout::Early | NationalLayout::Generalized => RevenueColumns {
                label: 0,
                code: 2,
                amount: 3,
            },
            NationalLayout::Cumulative => RevenueColumns {
                label: 0,
                code: 3,
                amount: 5,
            },
        }
    }

    /// Complete rows at the top of the revenue sheet that are really header.
    pub fn revenue_header_rows(self) -> usize {
        match self {
            NationalLayout::Early | NationalLayout::Generalized => 4,
            NationalLayout::Cumulative => 0,
        }
    }

    pub fn spending_columns(self) -> SpendingColumns {
        let amount = match self {
            NationalLayout::Early | NationalLayout::Generalized => 8,
            NationalLayout::Cumulative => 7,
        };
        SpendingColumns {
            label: 0,
            agency: 2,
            section: 3,
            program: 4,
            expense_type: 5,
            amount,
        }
    }

    /// Row positions of the spending sheet dropped as header.
    pub fn spending_header_rows(self) -> &'static [usize] {
        match self {
            NationalLayout::Early => &[0, 1, 2, 3, 4, 5, 7],
            NationalLayout::Generalized | NationalLayout::Cumulative => &[0, 1, 2, 3, 4, 6],
        }
    }

    pub fn min_revenue_width(self) -> usize {
        let cols = self.revenue_columns();
        cols.label.max(cols.code).max(cols.amount) + 1
    }

    pub fn min_spending_width(self) -> usize {
        self.spending_columns().amount + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Cell;

    fn extract(columns: &[&str], rows: Vec<Vec<Cell>>) -> RawExtract {
        RawExtract::new(
            "reg_2018/05_test.xls",
            2018,
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        )
    }

    #[test]
    fn test_locate_column_tie_breaks() {
        let ex = extract(
            &["a", "b", "c", "d"],
            vec![
                vec![
                    Cell::text("В том числе"),
                    Cell::Empty,
                    Cell::text("консолидированный бюджет субъекта"),
                    Cell::text("консолидированный бюджет субъекта рф"),
                ],
                vec![Cell::text("доходы"), Cell::text("в том числе"), Cell::Empty, Cell::Empty],
            ],
        );

        assert_eq!(locate_column(&ex, LABEL_MARKER, TieBreak::First), Some(0));
        assert_eq!(locate_column(&ex, LABEL_MARKER, TieBreak::Last), Some(1));
        assert_eq!(
            locate_column(&ex, REVENUE_AMOUNT_MARKER, TieBreak::Last),
            Some(3)
        );
        assert_eq!(
            locate_column(&ex, REVENUE_AMOUNT_MARKER, TieBreak::First),
            Some(2)
        );
    }

    #[test]
    fn test_locate_column_matches_numeric_cells() {
        let ex = extract(
            &["x", "y"],
            vec![vec![Cell::text("доходы"), Cell::Number(1e16)]],
        );
        assert_eq!(
            locate_column(&ex, REVENUE_CODE_MARKER, TieBreak::First),
            Some(1)
        );
    }

    #[test]
    fn test_locate_column_searches_header_labels() {
        let ex = extract(&["Наименование, в том числе", "сумма"], vec![]);
        assert_eq!(locate_column(&ex, LABEL_MARKER, TieBreak::First), Some(0));
    }

    #[test]
    fn test_require_column_reports_drift() {
        let ex = extract(&["a"], vec![vec![Cell::text("нет маркера")]]);
        match require_column(&ex, LABEL_MARKER, TieBreak::First) {
            Err(ReconcileError::SchemaDrift {
                source_id, year, ..
            }) => {
                assert_eq!(source_id, "reg_2018/05_test.xls");
                assert_eq!(year, 2018);
            }
            other => panic!("expected schema drift, got {:?}", other),
        }
    }

    #[test]
    fn test_subnational_generations() {
        let config = PipelineConfig::default();

        let old = SubnationalLayout::for_year(2014, &config);
        assert_eq!((old.revenue_sheet, old.spending_sheet), (1, 2));
        assert_eq!(old.program_offset, 6);

        let mid = SubnationalLayout::for_year(2016, &config);
        assert_eq!((mid.revenue_sheet, mid.spending_sheet), (1, 2));
        assert_eq!(mid.program_offset, 5);

        let new = SubnationalLayout::for_year(2017, &config);
        assert_eq!((new.revenue_sheet, new.spending_sheet), (0, 1));
        assert_eq!(new.section_offset, 3);
    }

    #[test]
    fn test_national_layout_columns() {
        assert_eq!(NationalLayout::Early.revenue_columns().amount, 3);
        assert_eq!(NationalLayout::Cumulative.revenue_columns().code, 3);
        assert_eq!(NationalLayout::Generalized.spending_columns().amount, 8);
        assert_eq!(NationalLayout::Cumulative.spending_columns().amount, 7);
        assert_eq!(NationalLayout::Early.spending_header_rows().len(), 7);
        assert_eq!(NationalLayout::Cumulative.min_revenue_width(), 6);
    }
}
