//! Extracted requirement types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured requirement field, serialized under its metric key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RequirementField {
    #[serde(rename = "max_height_m")]
    MaxHeight,
    #[serde(rename = "max_floor_area_sqm")]
    MaxFloorArea,
    #[serde(rename = "min_lot_size_sqm")]
    MinLotSize,
    #[serde(rename = "front_setback_m")]
    FrontSetback,
    #[serde(rename = "rear_setback_m")]
    RearSetback,
    #[serde(rename = "side_setback_m")]
    SideSetback,
    #[serde(rename = "max_units")]
    MaxUnits,
    #[serde(rename = "parking_spaces_required")]
    ParkingSpaces,
    #[serde(rename = "owner_occupancy_required")]
    OwnerOccupancy,
}

impl RequirementField {
    pub const ALL: [RequirementField; 9] = [
        Self::MaxHeight,
        Self::MaxFloorArea,
        Self::MinLotSize,
        Self::FrontSetback,
        Self::RearSetback,
        Self::SideSetback,
        Self::MaxUnits,
        Self::ParkingSpaces,
        Self::OwnerOccupancy,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::MaxHeight => "max_height_m",
            Self::MaxFloorArea => "max_floor_area_sqm",
            Self::MinLotSize => "min_lot_size_sqm",
            Self::FrontSetback => "front_setback_m",
            Self::RearSetback => "rear_setback_m",
            Self::SideSetback => "side_setback_m",
            Self::MaxUnits => "max_units",
            Self::ParkingSpaces => "parking_spaces_required",
            Self::OwnerOccupancy => "owner_occupancy_required",
        }
    }
}

impl std::fmt::Display for RequirementField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Count(u32),
    /// Metres or square metres, rounded to two decimals.
    Measure(f64),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Measure(v) => Some(*v),
            Self::Count(n) => Some(f64::from(*n)),
            Self::Flag(_) => None,
        }
    }
}

/// One extracted value with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub value: FieldValue,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// The matched span of the source text.
    pub source_text: String,
    /// Value before unit conversion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_unit: Option<String>,
}

/// A qualitative rule from the "other requirements" bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherRequirement {
    pub required: bool,
    pub source_text: String,
}

/// Everything extracted from one document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementSet {
    /// Whether the text passed the keyword gate.
    pub relevant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
    pub fields: BTreeMap<RequirementField, Requirement>,
    pub other_requirements: BTreeMap<String, OtherRequirement>,
    /// Mean confidence of the present fields; 0 when none are present.
    pub overall_confidence: f64,
}

impl RequirementSet {
    /// Result for text that failed the keyword gate.
    pub fn irrelevant() -> Self {
        Self {
            relevant: false,
            source_url: None,
            extracted_at: None,
            fields: BTreeMap::new(),
            other_requirements: BTreeMap::new(),
            overall_confidence: 0.0,
        }
    }

    pub fn get(&self, field: RequirementField) -> Option<&Requirement> {
        self.fields.get(&field)
    }

    /// Numeric value of `field`, if present.
    pub fn number(&self, field: RequirementField) -> Option<f64> {
        self.get(field).and_then(|r| r.value.as_f64())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.other_requirements.is_empty()
    }
}
