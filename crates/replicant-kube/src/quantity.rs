//! Kubernetes resource quantity parsing.
//!
//! Quantities are a decimal number followed by an optional suffix: a
//! binary multiple (`Ki`, `Mi`, ..., `Ei`), a decimal multiple (`n`, `u`,
//! `m`, `k`, `M`, ..., `E`) or a decimal exponent (`1e3`).

#[derive(Clone, Copy)]
enum Scale {
    /// Multiply by 10^n.
    Decimal(i32),
    /// Multiply by 1024^n.
    Binary(i32),
}

const SUFFIXES: &[(&str, Scale)] = &[
    ("Ki", Scale::Binary(1)),
    ("Mi", Scale::Binary(2)),
    ("Gi", Scale::Binary(3)),
    ("Ti", Scale::Binary(4)),
    ("Pi", Scale::Binary(5)),
    ("Ei", Scale::Binary(6)),
    ("n", Scale::Decimal(-9)),
    ("u", Scale::Decimal(-6)),
    ("m", Scale::Decimal(-3)),
    ("k", Scale::Decimal(3)),
    ("M", Scale::Decimal(6)),
    ("G", Scale::Decimal(9)),
    ("T", Scale::Decimal(12)),
    ("P", Scale::Decimal(15)),
    ("E", Scale::Decimal(18)),
];

/// Parse a quantity into its value in base units.
pub fn parse_quantity(s: &str) -> Option<f64> {
    parse_scaled(s, 0)
}

/// Parse a quantity and multiply it by 10^`exponent`, folding the exponent
/// into the suffix so common values ("250m" as millis) stay exact.
fn parse_scaled(s: &str, exponent: i32) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    // A trailing digit means no suffix (possibly an exponent like "1e3").
    if s.ends_with(|c: char| c.is_ascii_digit() || c == '.') {
        return parse_number(s).map(|n| n * 10f64.powi(exponent));
    }

    SUFFIXES.iter().find_map(|(suffix, scale)| {
        let n = parse_number(s.strip_suffix(suffix)?)?;
        Some(match *scale {
            Scale::Decimal(e) => n * 10f64.powi(e + exponent),
            Scale::Binary(p) => n * 1024f64.powi(p) * 10f64.powi(exponent),
        })
    })
}

fn parse_number(s: &str) -> Option<f64> {
    let n: f64 = s.parse().ok()?;
    (n.is_finite() && n >= 0.0).then_some(n)
}

/// Round up, ignoring float noise below one millionth.
fn ceil_whole(v: f64) -> u64 {
    if v.fract() < 1e-6 {
        v.floor() as u64
    } else {
        v.ceil() as u64
    }
}

/// CPU quantity in millicores, rounded up.
pub fn cpu_millis(s: &str) -> Option<u64> {
    parse_scaled(s, 3).map(ceil_whole)
}

/// Memory quantity in bytes, rounded up.
pub fn memory_bytes(s: &str) -> Option<u64> {
    parse_scaled(s, 0).map(ceil_whole)
}
