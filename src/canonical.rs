use crate::schema::Cell;

/// Placeholder the publishers print for "not applicable": Cyrillic and Latin `x`.
pub const PLACEHOLDER_TOKENS: [&str; 2] = ["х", "x"];

pub const REVENUE_CODE_WIDTH: usize = 17;
pub const SPENDING_CODE_WIDTH: usize = 4;

/// Numeric cells at or above 2^53 no longer hold every integer exactly.
pub const MAX_EXACT_CODE: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelMeaning {
    Zero,
    Missing,
}

/// Fields that go through canonicalization, each with its own placeholder rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    Amount,
    SubnationalRevenueCode,
    NationalRevenueCode,
    SpendingCode,
    /// Agency, target-article and expense-type codes: any width, placeholder means 0.
    ArticleCode,
}

impl CanonicalField {
    pub fn sentinel(self) -> SentinelMeaning {
        match self {
            CanonicalField::Amount => SentinelMeaning::Missing,
            CanonicalField::SubnationalRevenueCode => SentinelMeaning::Missing,
            CanonicalField::NationalRevenueCode => SentinelMeaning::Zero,
            CanonicalField::SpendingCode | CanonicalField::ArticleCode => SentinelMeaning::Zero,
        }
    }

    pub fn width(self) -> Option<usize> {
        match self {
            CanonicalField::Amount | CanonicalField::ArticleCode => None,
            CanonicalField::SubnationalRevenueCode | CanonicalField::NationalRevenueCode => {
                Some(REVENUE_CODE_WIDTH)
            }
            CanonicalField::SpendingCode => Some(SPENDING_CODE_WIDTH),
        }
    }
}

pub fn is_placeholder(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    PLACEHOLDER_TOKENS.contains(&lowered.as_str())
}

fn strip_separators(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}' | '\t'))
        .collect()
}

/// Coerces an amount cell to a number. Locale formatting (`1 234,5`) is undone;
/// placeholders, dashes and any other text come back as `None`.
pub fn canonical_amount(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Empty => None,
        Cell::Number(n) if n.is_nan() => None,
        Cell::Number(n) => Some(*n),
        Cell::Text(text) => {
            if is_placeholder(text) {
                return None;
            }
            let cleaned = strip_separators(text).replace(',', ".");
            if cleaned.is_empty() || cleaned.chars().all(|c| c == '-') {
                return None;
            }
            cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
        }
    }
}

/// Coerces a code cell to its fixed-width string form.
///
/// Integral numbers lose any `.0` rendering, separators are stripped and the
/// result is left-padded with zeros to the field width. Non-digit text is left
/// as is so the decomposition step can reject it. Negative numbers and numbers
/// too large to be stored exactly are rejected rather than rounded into a code.
pub fn canonical_code(cell: &Cell, field: CanonicalField) -> Option<String> {
    let raw = match cell {
        Cell::Empty => return None,
        Cell::Number(n) if n.is_nan() => return None,
        Cell::Number(n) if *n < 0.0 || n.abs() >= MAX_EXACT_CODE => {
            log::warn!("Rejecting numeric {:?} code {}: not an exact code value", field, n);
            return None;
        }
        Cell::Number(n) if n.fract() == 0.0 => format!("{:.0}", n),
        Cell::Number(n) => n.to_string(),
        Cell::Text(text) => {
            if is_placeholder(text) {
                return match field.sentinel() {
                    SentinelMeaning::Zero => Some(zero_code(field)),
                    SentinelMeaning::Missing => None,
                };
            }
            strip_separators(text)
        }
    };

    let raw = strip_float_suffix(&raw);
    if raw.is_empty() {
        return None;
    }

    Some(match field.width() {
        Some(width) => zero_pad(raw, width),
        None => raw.to_string(),
    })
}

fn zero_code(field: CanonicalField) -> String {
    "0".repeat(field.width().unwrap_or(1))
}

fn strip_float_suffix(raw: &str) -> &str {
    match raw.split_once('.') {
        Some((int_part, frac)) if !int_part.is_empty() && frac.chars().all(|c| c == '0') => {
            int_part
        }
        _ => raw,
    }
}

pub fn zero_pad(code: &str, width: usize) -> String {
    format!("{:0>width$}", code, width = width)
}

/// True for a code made only of zeros, which the publishers use for "no code".
pub fn is_zero_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c == '0')
}

/// Lowercases and trims a free-text label.
pub fn canonical_label(text: &str) -> String {
    text.trim().to_lowercase()
}
