//! FILENAME: olap-engine/src/format.rs
//! PURPOSE: Display formatting for raw values.
//! CONTEXT: Group keys compare and match records through formatted values,
//! so the core needs a small, culture-free formatter. Format strings follow
//! the .NET conventions used by pivot field configurations: `n2`, `f1`,
//! `d5`, `d`, `MMMM yyyy`, and so on. Dates are formatted and parsed through
//! chrono by translating the pattern into strftime items.

use chrono::format::{parse, Parsed, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::value::Value;

/// Format any raw value for display.
pub fn format_value(value: &Value, format: &str) -> String {
    match value {
        Value::Null => String::new(),
        Value::Number(n) => format_number(*n, format),
        Value::Text(s) => s.clone(),
        Value::Boolean(b) => b.to_string(),
        Value::Date(d) => format_date(d, format),
    }
}

// ============================================================================
// NUMBERS
// ============================================================================

/// Format a number according to a .NET-style standard format (`n2`, `f1`, `d5`).
/// Unsupported specifiers fall back to general formatting.
pub fn format_number(value: f64, format: &str) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }

    let mut chars = format.chars();
    let spec = match chars.next() {
        Some(c) => c.to_ascii_lowercase(),
        None => return format_general(value),
    };
    let precision: Option<usize> = {
        let rest = chars.as_str();
        if rest.is_empty() {
            None
        } else {
            match rest.parse() {
                Ok(p) => Some(p),
                Err(_) => return format_general(value),
            }
        }
    };

    match spec {
        'n' => format_decimal(value, precision.unwrap_or(2), true),
        'f' => format_decimal(value, precision.unwrap_or(2), false),
        'd' => format_integer(value, precision.unwrap_or(0)),
        _ => format_general(value),
    }
}

/// Format a number in general format (shortest faithful representation).
fn format_general(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }

    let abs_value = value.abs();

    if abs_value >= 1e15 || abs_value < 1e-4 {
        return format!("{:e}", value);
    }

    if value.fract() == 0.0 {
        return format!("{:.0}", value);
    }

    let formatted = format!("{:.10}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Format a number with fixed decimal places and optional thousands separator.
fn format_decimal(value: f64, decimal_places: usize, use_thousands_separator: bool) -> String {
    let rounded = format!("{:.prec$}", value, prec = decimal_places);

    if use_thousands_separator {
        add_thousands_separator(&rounded)
    } else {
        rounded
    }
}

fn format_integer(value: f64, min_digits: usize) -> String {
    let rounded = value.round();
    let digits = format!("{:0width$.0}", rounded.abs(), width = min_digits);
    if rounded < 0.0 {
        format!("-{}", digits)
    } else {
        digits
    }
}

/// Add thousands separators to a numeric string.
fn add_thousands_separator(s: &str) -> String {
    let (integer_part, decimal_part) = match s.split_once('.') {
        Some((i, d)) => (i, Some(d)),
        None => (s, None),
    };

    let negative = integer_part.starts_with('-');
    let digits: Vec<char> = integer_part.chars().filter(|c| c.is_ascii_digit()).collect();

    let mut result = String::with_capacity(s.len() + digits.len() / 3 + 1);
    if negative {
        result.push('-');
    }
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    if let Some(d) = decimal_part {
        result.push('.');
        result.push_str(d);
    }
    result
}

// ============================================================================
// DATES
// ============================================================================

/// Formats that keep the full date, so comparing through them changes nothing.
pub fn is_trivial_date_format(format: &str) -> bool {
    matches!(format, "" | "d" | "D")
}

/// Format a date according to a .NET-style pattern.
pub fn format_date(value: &NaiveDateTime, format: &str) -> String {
    let pattern = date_pattern(if format.is_empty() { "d" } else { format });
    value.format(&pattern).to_string()
}

/// Parse text produced by [`format_date`] back into a date.
///
/// Components missing from the pattern default to the start of their range
/// (January, the 1st, midnight; year 1900). Returns `None` when the text does
/// not match or the pattern carries no date or time component at all.
pub fn parse_date(text: &str, format: &str) -> Option<NaiveDateTime> {
    let pattern = date_pattern(if format.is_empty() { "d" } else { format });
    let mut parsed = Parsed::new();
    parse(&mut parsed, text, StrftimeItems::new(&pattern)).ok()?;

    let year = parsed.year.or_else(|| {
        parsed
            .year_mod_100
            .map(|y| if y < 70 { 2000 + y } else { 1900 + y })
    });
    let hour = match (parsed.hour_div_12, parsed.hour_mod_12) {
        (None, None) => None,
        (div, modulo) => Some(div.unwrap_or(0) * 12 + modulo.unwrap_or(0)),
    };

    if year.is_none()
        && parsed.month.is_none()
        && parsed.day.is_none()
        && hour.is_none()
        && parsed.minute.is_none()
        && parsed.second.is_none()
    {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(
        year.unwrap_or(1900),
        parsed.month.unwrap_or(1),
        parsed.day.unwrap_or(1),
    )?;
    let time = NaiveTime::from_hms_nano_opt(
        hour.unwrap_or(0),
        parsed.minute.unwrap_or(0),
        parsed.second.unwrap_or(0),
        parsed.nanosecond.unwrap_or(0),
    )?;
    Some(date.and_time(time))
}

/// Translate a .NET-style date pattern into a strftime pattern.
pub fn date_pattern(format: &str) -> String {
    if format.chars().count() == 1 {
        if let Some(standard) = standard_date_pattern(format) {
            return standard.to_string();
        }
    }

    let chars: Vec<char> = format.chars().collect();
    let mut out = String::with_capacity(format.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                i += 1;
                while i < chars.len() && chars[i] != c {
                    push_literal(&mut out, chars[i]);
                    i += 1;
                }
                i += 1;
            }
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    push_literal(&mut out, next);
                }
                i += 2;
            }
            'y' | 'M' | 'd' | 'H' | 'h' | 'm' | 's' | 't' | 'f' => {
                let mut run = 1;
                while i + run < chars.len() && chars[i + run] == c {
                    run += 1;
                }
                out.push_str(date_token(c, run));
                i += run;
            }
            _ => {
                push_literal(&mut out, c);
                i += 1;
            }
        }
    }

    out
}

fn standard_date_pattern(format: &str) -> Option<&'static str> {
    let pattern = match format {
        "d" => "%-m/%-d/%Y",
        "D" => "%A, %B %-d, %Y",
        "f" => "%A, %B %-d, %Y %-I:%M %p",
        "F" => "%A, %B %-d, %Y %-I:%M:%S %p",
        "g" => "%-m/%-d/%Y %-I:%M %p",
        "G" => "%-m/%-d/%Y %-I:%M:%S %p",
        "t" => "%-I:%M %p",
        "T" => "%-I:%M:%S %p",
        "M" | "m" => "%B %-d",
        "Y" | "y" => "%B %Y",
        "s" => "%Y-%m-%dT%H:%M:%S",
        _ => return None,
    };
    Some(pattern)
}

fn date_token(c: char, run: usize) -> &'static str {
    match (c, run) {
        ('y', 1..=2) => "%y",
        ('y', _) => "%Y",
        ('M', 1) => "%-m",
        ('M', 2) => "%m",
        ('M', 3) => "%b",
        ('M', _) => "%B",
        ('d', 1) => "%-d",
        ('d', 2) => "%d",
        ('d', 3) => "%a",
        ('d', _) => "%A",
        ('H', 1) => "%-H",
        ('H', _) => "%H",
        ('h', 1) => "%-I",
        ('h', _) => "%I",
        ('m', 1) => "%-M",
        ('m', _) => "%M",
        ('s', 1) => "%-S",
        ('s', _) => "%S",
        ('t', _) => "%p",
        ('f', 1..=3) => "%3f",
        ('f', 4..=6) => "%6f",
        _ => "%9f",
    }
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
