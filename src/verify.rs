use crate::error::{ReconcileError, Result};
use crate::pivot::FactTable;
use crate::schema::{FlowType, Scope};
use log::debug;
use std::collections::BTreeSet;

/// Attribute flows that must be either positive or missing.
const POSITIVE_ATTRIBUTES: [FlowType; 4] = [
    FlowType::Population,
    FlowType::RealIncome,
    FlowType::IncomePerCapita,
    FlowType::ExchangeRate,
];

/// Every row carries revenue levels or spending levels, never both.
pub fn check_mutual_exclusivity(table: &FactTable) -> Result<()> {
    if let Some(row) = table
        .rows
        .iter()
        .find(|row| row.path.has_revenue_levels() && row.path.has_spending_levels())
    {
        return Err(ReconcileError::InvariantViolation(format!(
            "row {} / {} / {} has both revenue and spending levels",
            row.path, row.region_name, row.year
        )));
    }
    Ok(())
}

pub fn check_no_zero_fill(table: &FactTable) -> Result<()> {
    let flows: BTreeSet<u8> = POSITIVE_ATTRIBUTES.iter().map(|f| f.index()).collect();
    for row in table.rows.iter().filter(|row| flows.contains(&row.path.flow_type)) {
        if let Some(value) = row.value {
            if value <= 0.0 || !value.is_finite() {
                return Err(ReconcileError::InvariantViolation(format!(
                    "attribute {} for {} in {} is {}, expected a positive value or none",
                    row.path.category_label, row.region_name, row.year, value
                )));
            }
        }
    }
    Ok(())
}

/// Every (year, region name) with a revenue extract has at least one
/// region-scope revenue row.
pub fn check_coverage<'a>(
    table: &FactTable,
    expected: impl IntoIterator<Item = (i32, &'a str)>,
) -> Result<()> {
    let covered: BTreeSet<(i32, &str)> = table
        .rows
        .iter()
        .filter(|row| {
            row.path.scope == Scope::Region.index()
                && row.path.flow_type == FlowType::Revenue.index()
        })
        .map(|row| (row.year, row.region_name.as_str()))
        .collect();

    let missing: Vec<String> = expected
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|pair| !covered.contains(pair))
        .map(|(year, name)| format!("{} {}", name, year))
        .collect();

    if !missing.is_empty() {
        return Err(ReconcileError::InvariantViolation(format!(
            "no region revenue rows for: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

pub fn verify_fact_table<'a>(
    table: &FactTable,
    expected: impl IntoIterator<Item = (i32, &'a str)>,
) -> Result<()> {
    check_mutual_exclusivity(table)?;
    check_no_zero_fill(table)?;
    check_coverage(table, expected)?;
    debug!("Fact table of {} rows passed verification", table.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassificationPath, FactRow};

    fn row(flow_type: u8, r1: u8, s1: u8, label: &str, value: Option<f64>) -> FactRow {
        FactRow {
            path: ClassificationPath {
                scope: 1,
                domain: 1,
                flow_type,
                r1,
                r2: 0,
                r3: 0,
                r4: 0,
                r5: 0,
                s1,
                s2: 0,
                category_label: label.to_string(),
            },
            region_name: "adygea".to_string(),
            year: 2012,
            value,
        }
    }

    #[test]
    fn test_mutual_exclusivity() {
        let ok = FactTable {
            rows: vec![
                row(1, 1, 0, "reg_own_revenue", Some(1.0)),
                row(2, 0, 7, "education", Some(2.0)),
            ],
        };
        assert!(check_mutual_exclusivity(&ok).is_ok());

        let bad = FactTable {
            rows: vec![row(1, 1, 7, "mixed", Some(1.0))],
        };
        assert!(matches!(
            check_mutual_exclusivity(&bad),
            Err(ReconcileError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_zero_attribute_is_rejected() {
        let missing = FactTable {
            rows: vec![row(5, 0, 0, "population", None), row(9, 0, 0, "rub_usd", Some(31.088))],
        };
        assert!(check_no_zero_fill(&missing).is_ok());

        let zeroed = FactTable {
            rows: vec![row(5, 0, 0, "population", Some(0.0))],
        };
        assert!(check_no_zero_fill(&zeroed).is_err());
    }

    #[test]
    fn test_coverage() {
        let table = FactTable {
            rows: vec![row(1, 1, 0, "reg_own_revenue", Some(1.0))],
        };
        assert!(check_coverage(&table, [(2012, "adygea")]).is_ok());
        assert!(check_coverage(&table, [(2012, "adygea"), (2013, "adygea")]).is_err());
    }
}
