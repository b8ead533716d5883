//! Accessory dwelling unit requirement extraction.
//!
//! [`RequirementExtractor::extract`] gates text on a fixed set of ADU terms,
//! then runs an ordered pattern table per field. Measurements are converted
//! to metres or square metres and rounded to two decimals. Each field is
//! extracted independently: a field that fails to parse is logged and
//! omitted without affecting the others.

mod fields;
mod patterns;
pub mod units;
mod validate;

use std::collections::BTreeMap;

use chrono::Utc;
use scraper::Html;
use tracing::{debug, instrument, warn};

pub use fields::{FieldValue, OtherRequirement, Requirement, RequirementField, RequirementSet};
pub use validate::{ValidationReport, validate};

use patterns::MeasurePattern;

/// Why a single field could not be extracted.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
    #[error("pattern matched without a value")]
    MissingValue,
}

/// Where the text came from.
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    pub source_url: Option<String>,
}

impl ExtractionContext {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            source_url: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementExtractor;

impl RequirementExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Whether the text mentions accessory dwellings at all.
    pub fn is_relevant(&self, text: &str) -> bool {
        patterns::RELEVANCE.is_match(text)
    }

    /// Extract every field the text supports. Markup is stripped first.
    #[instrument(skip_all, fields(source_url = context.source_url.as_deref().unwrap_or("")))]
    pub fn extract(&self, text: &str, context: &ExtractionContext) -> RequirementSet {
        let text = normalize_text(text);
        if !self.is_relevant(&text) {
            return RequirementSet::irrelevant();
        }

        let mut fields = BTreeMap::new();
        for field in RequirementField::ALL {
            match extract_field(field, &text) {
                Ok(Some(requirement)) => {
                    fields.insert(field, requirement);
                }
                Ok(None) => {}
                Err(e) => warn!(%field, error = %e, "field extraction failed, omitting"),
            }
        }

        let overall_confidence = if fields.is_empty() {
            0.0
        } else {
            fields.values().map(|r: &Requirement| r.confidence).sum::<f64>() / fields.len() as f64
        };

        let set = RequirementSet {
            relevant: true,
            source_url: context.source_url.clone(),
            extracted_at: Some(Utc::now()),
            fields,
            other_requirements: other_requirements(&text),
            overall_confidence,
        };
        debug!(
            fields = set.fields.len(),
            other = set.other_requirements.len(),
            overall_confidence = set.overall_confidence,
            "extracted requirements"
        );
        set
    }

    pub fn validate(&self, set: &RequirementSet) -> ValidationReport {
        validate(set)
    }
}

/// Plain text with markup removed and whitespace collapsed.
pub fn normalize_text(input: &str) -> String {
    if input.contains('<') {
        let fragment = Html::parse_fragment(input);
        collapse_whitespace(fragment.root_element().text())
    } else {
        collapse_whitespace(std::iter::once(input))
    }
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_field(field: RequirementField, text: &str) -> Result<Option<Requirement>, ExtractError> {
    use RequirementField::*;
    match field {
        MaxHeight => measurement(&patterns::HEIGHT, text),
        MaxFloorArea => measurement(&patterns::FLOOR_AREA, text),
        MinLotSize => measurement(&patterns::LOT_SIZE, text),
        FrontSetback => measurement(&patterns::FRONT_SETBACK, text),
        RearSetback => measurement(&patterns::REAR_SETBACK, text),
        SideSetback => measurement(&patterns::SIDE_SETBACK, text),
        MaxUnits => count(&patterns::UNIT_COUNT, patterns::UNIT_COUNT_CONFIDENCE, text),
        ParkingSpaces => count(&patterns::PARKING, patterns::PARKING_CONFIDENCE, text),
        OwnerOccupancy => Ok(owner_occupancy(text)),
    }
}

fn measurement(table: &[MeasurePattern], text: &str) -> Result<Option<Requirement>, ExtractError> {
    let Some((pattern, caps)) = table
        .iter()
        .find_map(|p| p.re.captures(text).map(|c| (p, c)))
    else {
        return Ok(None);
    };

    let raw = caps.get(1).ok_or(ExtractError::MissingValue)?.as_str();
    let unit = caps.get(2).ok_or(ExtractError::MissingValue)?.as_str();
    let value: f64 = raw
        .replace(',', "")
        .parse()
        .map_err(|_| ExtractError::InvalidNumber(raw.to_string()))?;
    let factor = units::metric_factor(unit).ok_or_else(|| ExtractError::UnknownUnit(unit.to_string()))?;

    Ok(Some(Requirement {
        value: FieldValue::Measure(units::round2(value * factor)),
        confidence: pattern.confidence,
        source_text: caps[0].to_string(),
        original_value: Some(value),
        original_unit: Some(units::normalize_unit(unit)),
    }))
}

/// Counts: group 1 when the pattern captures one, else the phrasing means one.
fn count(
    table: &[regex::Regex],
    confidence: f64,
    text: &str,
) -> Result<Option<Requirement>, ExtractError> {
    let Some(caps) = table.iter().find_map(|re| re.captures(text)) else {
        return Ok(None);
    };
    let value = match caps.get(1) {
        Some(m) => m
            .as_str()
            .parse::<u32>()
            .map_err(|_| ExtractError::InvalidNumber(m.as_str().to_string()))?,
        None => 1,
    };
    Ok(Some(Requirement {
        value: FieldValue::Count(value),
        confidence,
        source_text: caps[0].to_string(),
        original_value: None,
        original_unit: None,
    }))
}

fn owner_occupancy(text: &str) -> Option<Requirement> {
    let flag = |required: bool, confidence: f64, source: &str| Requirement {
        value: FieldValue::Flag(required),
        confidence,
        source_text: source.to_string(),
        original_value: None,
        original_unit: None,
    };
    if let Some(m) = patterns::OWNER_NOT_REQUIRED.iter().find_map(|re| re.find(text)) {
        return Some(flag(false, patterns::OWNER_NOT_REQUIRED_CONFIDENCE, m.as_str()));
    }
    patterns::OWNER_REQUIRED
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| flag(true, patterns::OWNER_REQUIRED_CONFIDENCE, m.as_str()))
}

fn other_requirements(text: &str) -> BTreeMap<String, OtherRequirement> {
    let mut found = BTreeMap::new();
    for (key, table) in patterns::OTHER.iter() {
        if let Some(m) = table.iter().find_map(|re| re.find(text)) {
            let source_text = m.as_str().to_string();
            let required = if *key == "separate_utilities" {
                let lower = source_text.to_lowercase();
                lower.contains("separate") || lower.contains("independent")
            } else {
                true
            };
            found.insert(
                (*key).to_string(),
                OtherRequirement {
                    required,
                    source_text,
                },
            );
        }
    }
    found
}
