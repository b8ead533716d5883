//! Ordered pattern tables. Within each table the first match wins.

use std::sync::LazyLock;

use regex::Regex;

/// Confidence of a pattern anchored on a "maximum"/"minimum" qualifier.
pub const QUALIFIED_CONFIDENCE: f64 = 0.95;
/// Confidence of a looser phrasing.
pub const LOOSE_CONFIDENCE: f64 = 0.85;
pub const UNIT_COUNT_CONFIDENCE: f64 = 0.9;
pub const PARKING_CONFIDENCE: f64 = 0.85;
pub const OWNER_REQUIRED_CONFIDENCE: f64 = 0.9;
pub const OWNER_NOT_REQUIRED_CONFIDENCE: f64 = 0.85;

const NUMBER: &str = r"(\d+(?:\.\d+)?)";
const GROUPED_NUMBER: &str = r"(\d+(?:,\d{3})*(?:\.\d+)?)";
const LENGTH_UNIT: &str = r"(feet|foot|ft|meters?|metres?|m)\b";
const AREA_UNIT: &str = r"(square\s+feet|sq\.?\s*ft|sqft|sf|square\s+(?:meters?|metres?)|sq\.?\s*m|sqm)\b";
const LOT_UNIT: &str =
    r"(square\s+feet|sq\.?\s*ft|sqft|sf|square\s+(?:meters?|metres?)|sq\.?\s*m|sqm|acres?)\b";

/// A measurement pattern: group 1 is the number, group 2 the unit.
pub struct MeasurePattern {
    pub re: Regex,
    pub confidence: f64,
}

fn measure(src: String) -> MeasurePattern {
    let confidence = if src.contains("maximum") || src.contains("minimum") {
        QUALIFIED_CONFIDENCE
    } else {
        LOOSE_CONFIDENCE
    };
    MeasurePattern {
        re: Regex::new(&format!("(?i){src}")).expect("valid measurement pattern"),
        confidence,
    }
}

fn ci(src: &str) -> Regex {
    Regex::new(&format!("(?i){src}")).expect("valid requirement pattern")
}

pub static HEIGHT: LazyLock<Vec<MeasurePattern>> = LazyLock::new(|| {
    vec![
        measure(format!(
            r"(?:maximum|max|not exceed)\s+height\s+(?:of\s+)?{NUMBER}\s*{LENGTH_UNIT}"
        )),
        measure(format!(
            r"height\s+(?:shall|must|may)\s+not\s+exceed\s+{NUMBER}\s*{LENGTH_UNIT}"
        )),
        measure(format!(r"{NUMBER}\s*{LENGTH_UNIT}\s+(?:maximum|max)\s+height")),
        measure(format!(
            r"height\s+(?:limit|limitation|restriction)\s+(?:of\s+)?{NUMBER}\s*{LENGTH_UNIT}"
        )),
    ]
});

pub static FLOOR_AREA: LazyLock<Vec<MeasurePattern>> = LazyLock::new(|| {
    vec![
        measure(format!(
            r"(?:maximum|max|not exceed)\s+(?:floor\s+)?(?:area|space|size)\s+(?:of\s+)?{GROUPED_NUMBER}\s*{AREA_UNIT}"
        )),
        measure(format!(
            r"(?:floor\s+)?(?:area|space|size)\s+(?:shall|must|may)\s+not\s+exceed\s+{GROUPED_NUMBER}\s*{AREA_UNIT}"
        )),
        measure(format!(
            r"{GROUPED_NUMBER}\s*{AREA_UNIT}\s+(?:maximum|max)\s+(?:floor\s+)?(?:area|space|size)"
        )),
    ]
});

pub static LOT_SIZE: LazyLock<Vec<MeasurePattern>> = LazyLock::new(|| {
    vec![
        measure(format!(
            r"(?:minimum|min)\s+lot\s+size\s+(?:of\s+)?{GROUPED_NUMBER}\s*{LOT_UNIT}"
        )),
        measure(format!(
            r"lot\s+size\s+(?:shall|must)\s+(?:be\s+)?(?:at\s+least|minimum\s+of)\s+{GROUPED_NUMBER}\s*{LOT_UNIT}"
        )),
        measure(format!(
            r"{GROUPED_NUMBER}\s*{LOT_UNIT}\s+(?:minimum|min)\s+lot\s+size"
        )),
    ]
});

fn setback(side: &str) -> Vec<MeasurePattern> {
    vec![
        measure(format!(
            r"(?:minimum|min)\s+{side}\s+setback\s+(?:of\s+)?{NUMBER}\s*{LENGTH_UNIT}"
        )),
        measure(format!(
            r"{side}\s+setback\s+(?:shall|must)\s+(?:be\s+)?(?:at\s+least|minimum\s+of)\s+{NUMBER}\s*{LENGTH_UNIT}"
        )),
        measure(format!(
            r"{NUMBER}\s*{LENGTH_UNIT}\s+(?:minimum|min)\s+{side}\s+setback"
        )),
        measure(format!(
            r"{side}\s+yard\s+(?:of\s+)?(?:at\s+least\s+)?{NUMBER}\s*{LENGTH_UNIT}"
        )),
    ]
}

pub static FRONT_SETBACK: LazyLock<Vec<MeasurePattern>> = LazyLock::new(|| setback("front"));
pub static REAR_SETBACK: LazyLock<Vec<MeasurePattern>> = LazyLock::new(|| setback("rear"));
pub static SIDE_SETBACK: LazyLock<Vec<MeasurePattern>> = LazyLock::new(|| setback("side"));

/// Group 1, when present, is the count; otherwise the phrasing implies one.
pub static UNIT_COUNT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:maximum|max|not more than|no more than)\s+(?:of\s+)?(\d+)\s+(?:accessory dwelling )?units?\b",
        r"\b(?:one|1)\s+(?:accessory dwelling )?unit\s+(?:per|for each)\b",
        r"\b(?:single|one|1)\s+(?:accessory dwelling )?unit\s+(?:shall|may|is)\s+be\s+(?:allowed|permitted)",
    ]
    .iter()
    .map(|p| ci(p))
    .collect()
});

pub static PARKING: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:minimum|min|at least)\s+(\d+)\s+parking\s+spaces?",
        r"(\d+)\s+parking\s+spaces?\s+(?:shall|must)\s+be\s+(?:provided|required)",
        r"parking\s+(?:requirement|spaces?)\s+(?:of\s+)?(\d+)",
        r"\b(?:one|1)\s+parking\s+space\s+(?:per|for each)\s+(?:accessory dwelling )?unit",
    ]
    .iter()
    .map(|p| ci(p))
    .collect()
});

/// Checked before [`OWNER_REQUIRED`] so that "no owner occupancy required"
/// is not read as a requirement.
pub static OWNER_NOT_REQUIRED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bno\s+owner\s+occup(?:y|ancy)\s+(?:required|requirement)",
        r"owner\s+occup(?:y|ancy)\s+(?:is\s+)?not\s+(?:required|necessary)",
        r"(?:rental|tenant)\s+(?:allowed|permitted)",
    ]
    .iter()
    .map(|p| ci(p))
    .collect()
});

pub static OWNER_REQUIRED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"owner\s+(?:must\s+)?occup(?:y|ancy)",
        r"owner\s+(?:shall\s+)?resid(?:e|ence)",
        r"owner\s+(?:occupied|occupancy)\s+(?:required|mandatory)",
        r"(?:primary|principal)\s+residence\s+(?:required|mandatory)",
    ]
    .iter()
    .map(|p| ci(p))
    .collect()
});

/// Qualitative rules: (key, patterns).
pub static OTHER: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    let table: [(&str, &[&str]); 4] = [
        (
            "design_compatibility",
            &[
                r"(?:architectural|design)\s+(?:compatibility|consistency|harmony)",
                r"(?:same|similar|compatible)\s+(?:design|style|appearance)",
                r"(?:match|complement)\s+(?:the\s+)?(?:principal|main|primary)\s+(?:dwelling|building)",
            ],
        ),
        (
            "kitchen_required",
            &[
                r"(?:full|complete)\s+kitchen\s+(?:required|mandatory)",
                r"kitchen\s+(?:facilities|equipment)\s+(?:required|mandatory)",
                r"(?:cooking|food preparation)\s+(?:facilities|area)",
            ],
        ),
        (
            "separate_entrance",
            &[
                r"(?:separate|independent|private)\s+(?:entrance|entry)",
                r"(?:direct|exterior)\s+(?:access|entrance|entry)",
                r"no\s+(?:shared|common)\s+(?:entrance|entry)",
            ],
        ),
        (
            "separate_utilities",
            &[
                r"(?:separate|independent)\s+(?:utilities|metering)",
                r"(?:individual|separate)\s+(?:water|electrical|gas)\s+(?:meter|connection)",
                r"(?:shared|common)\s+(?:utilities|metering)",
            ],
        ),
    ];
    table
        .iter()
        .map(|(key, patterns)| (*key, patterns.iter().map(|p| ci(p)).collect()))
        .collect()
});

/// Terms that mark text as concerning accessory dwellings.
pub static RELEVANCE: LazyLock<Regex> = LazyLock::new(|| {
    ci(r"\b(?:accessory\s+dwelling\s+units?|adus?|secondary\s+suites?|in-law\s+suites?|granny\s+flats?|carriage\s+houses?|laneway\s+houses?|garden\s+suites?|basement\s+suites?|accessory\s+units?|secondary\s+units?|ancillary\s+units?)\b")
});
