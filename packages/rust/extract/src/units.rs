//! Unit normalization to metres and square metres.

/// Factor converting one `unit` into its metric base (m or m²).
/// `unit` is matched case-insensitively with whitespace collapsed.
pub fn metric_factor(unit: &str) -> Option<f64> {
    let unit = normalize_unit(unit);
    let factor = match unit.as_str() {
        "feet" | "foot" | "ft" => 0.3048,
        "inches" | "inch" | "in" => 0.0254,
        "square feet" | "square foot" | "sq ft" | "sqft" | "sf" => 0.092903,
        "square meters" | "square meter" | "square metres" | "square metre" | "sq m" | "sqm"
        | "sm" => 1.0,
        "meters" | "meter" | "metres" | "metre" | "m" => 1.0,
        "acres" | "acre" => 4046.86,
        _ => return None,
    };
    Some(factor)
}

/// Lowercase, drop dots, collapse whitespace ("Sq.  Ft" -> "sq ft").
pub fn normalize_unit(unit: &str) -> String {
    unit.to_lowercase()
        .replace('.', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Round half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(value: f64, unit: &str) -> f64 {
        round2(value * metric_factor(unit).unwrap())
    }

    #[test]
    fn known_conversions() {
        assert_eq!(convert(10.0, "ft"), 3.05);
        assert_eq!(convert(3.0, "feet"), 0.91);
        assert_eq!(convert(500.0, "sq ft"), 46.45);
        assert_eq!(convert(500.0, "Square  Feet"), 46.45);
        assert_eq!(convert(1.0, "acre"), 4046.86);
        assert_eq!(convert(4.5, "meters"), 4.5);
        assert_eq!(convert(12.0, "in"), 0.3);
    }

    #[test]
    fn unknown_unit() {
        assert_eq!(metric_factor("cubits"), None);
    }
}
