use crate::canonical::{REVENUE_CODE_WIDTH, SPENDING_CODE_WIDTH};
use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Own-revenue total line of the treasury reports.
pub const OWN_REVENUE_CODE: &str = "10000000000000000";
/// Gratuitous receipts from other budgets (transfers) total line.
pub const TRANSFERS_CODE: &str = "20200000000000000";
/// Code the tax table's "total collected" row is filed under.
pub const TAX_TOTAL_CODE: &str = "00000000000000000";

/// Tax/non-tax split encoded in a revenue code's group digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RevenueBand {
    Total,
    Tax,
    NonTax,
}

impl RevenueBand {
    /// Groups 01..=09 are taxes, 10..=19 non-tax revenue; anything else is
    /// reported as a group total.
    pub fn of_group(group: u8) -> Self {
        match group {
            1..=9 => RevenueBand::Tax,
            10..=19 => RevenueBand::NonTax,
            _ => RevenueBand::Total,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            RevenueBand::Total => 0,
            RevenueBand::Tax => 1,
            RevenueBand::NonTax => 2,
        }
    }
}

/// A 17-digit budget revenue classification code split into its levels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevenueCode {
    /// Revenue kind: 1 own revenue, 2 gratuitous receipts.
    pub kind: u8,
    /// Two-digit group.
    pub group: u8,
    /// Two-digit subgroup.
    pub subgroup: u8,
    /// Three-digit item.
    pub item: u16,
    /// Administrator, element and economic classification digits, kept verbatim.
    pub remainder: String,
}

impl RevenueCode {
    pub fn parse(code: &str) -> Result<Self> {
        check_width("revenue", code, REVENUE_CODE_WIDTH)?;

        let remainder = &code[8..];
        if !remainder.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("revenue", code, "non-numeric trailing digits"));
        }

        Ok(Self {
            kind: slice_number("revenue", code, 0..1)? as u8,
            group: slice_number("revenue", code, 1..3)? as u8,
            subgroup: slice_number("revenue", code, 3..5)? as u8,
            item: slice_number("revenue", code, 5..8)? as u16,
            remainder: remainder.to_string(),
        })
    }

    pub fn to_code_string(&self) -> String {
        format!(
            "{}{:02}{:02}{:03}{}",
            self.kind, self.group, self.subgroup, self.item, self.remainder
        )
    }

    pub fn band(&self) -> RevenueBand {
        RevenueBand::of_group(self.group)
    }

    /// True when the code sits below the group total: a group, subgroup or item line.
    pub fn is_detail(&self) -> bool {
        self.group != 0
    }
}

impl fmt::Display for RevenueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_code_string())
    }
}

/// A 4-digit spending section code: section and subsection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpendingCode {
    pub section: u8,
    pub subsection: u8,
}

impl SpendingCode {
    pub fn parse(code: &str) -> Result<Self> {
        check_width("spending", code, SPENDING_CODE_WIDTH)?;
        Ok(Self {
            section: slice_number("spending", code, 0..2)? as u8,
            subsection: slice_number("spending", code, 2..4)? as u8,
        })
    }

    pub fn to_code_string(&self) -> String {
        format!("{:02}{:02}", self.section, self.subsection)
    }

    /// Section 00 is the spending total line.
    pub fn is_total(&self) -> bool {
        self.section == 0
    }
}

impl fmt::Display for SpendingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_code_string())
    }
}

fn check_width(kind: &'static str, code: &str, width: usize) -> Result<()> {
    if code.len() != width || !code.is_ascii() {
        return Err(malformed(
            kind,
            code,
            &format!("expected {} characters, found {}", width, code.chars().count()),
        ));
    }
    Ok(())
}

fn slice_number(kind: &'static str, code: &str, range: std::ops::Range<usize>) -> Result<u32> {
    let slice = &code[range.clone()];
    if !slice.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(
            kind,
            code,
            &format!("positions {}..{} ('{}') are not numeric", range.start, range.end, slice),
        ));
    }
    slice
        .parse::<u32>()
        .map_err(|e| malformed(kind, code, &e.to_string()))
}

fn malformed(kind: &'static str, code: &str, details: &str) -> ReconcileError {
    ReconcileError::MalformedCode {
        kind,
        code: code.to_string(),
        details: details.to_string(),
    }
}
