//! Plausibility checks over an extracted [`RequirementSet`].

use serde::{Deserialize, Serialize};

use crate::fields::{RequirementField, RequirementSet};

/// Plausible height range in metres.
pub const HEIGHT_RANGE: (f64, f64) = (2.0, 15.0);
/// Plausible floor area range in square metres.
pub const FLOOR_AREA_RANGE: (f64, f64) = (20.0, 200.0);
pub const SETBACK_RANGE: (f64, f64) = (0.5, 10.0);
pub const UNIT_RANGE: (f64, f64) = (1.0, 5.0);
pub const MAX_PARKING: f64 = 3.0;

/// Warnings about implausible values. Values themselves are never changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub warnings: Vec<String>,
}

pub fn validate(set: &RequirementSet) -> ValidationReport {
    let mut warnings = Vec::new();

    if let Some(height) = set.number(RequirementField::MaxHeight) {
        if height < HEIGHT_RANGE.0 {
            warnings.push(format!("height {height}m seems too low"));
        } else if height > HEIGHT_RANGE.1 {
            warnings.push(format!("height {height}m seems too high"));
        }
    }

    let area = set.number(RequirementField::MaxFloorArea);
    if let Some(area) = area {
        if area < FLOOR_AREA_RANGE.0 {
            warnings.push(format!("floor area {area}sqm seems too small"));
        } else if area > FLOOR_AREA_RANGE.1 {
            warnings.push(format!("floor area {area}sqm seems too large"));
        }
    }

    if let (Some(lot), Some(area)) = (set.number(RequirementField::MinLotSize), area) {
        if lot < area {
            warnings.push(format!("lot size {lot}sqm is smaller than floor area {area}sqm"));
        }
    }

    for field in [
        RequirementField::FrontSetback,
        RequirementField::RearSetback,
        RequirementField::SideSetback,
    ] {
        if let Some(setback) = set.number(field) {
            if setback < SETBACK_RANGE.0 {
                warnings.push(format!("{field} {setback}m seems too small"));
            } else if setback > SETBACK_RANGE.1 {
                warnings.push(format!("{field} {setback}m seems too large"));
            }
        }
    }

    if let Some(units) = set.number(RequirementField::MaxUnits) {
        if units < UNIT_RANGE.0 {
            warnings.push("unit count less than 1".to_string());
        } else if units > UNIT_RANGE.1 {
            warnings.push(format!("unit count {units} seems high"));
        }
    }

    if let Some(parking) = set.number(RequirementField::ParkingSpaces) {
        if parking > MAX_PARKING {
            warnings.push(format!("parking requirement {parking} seems high"));
        }
    }

    ValidationReport {
        is_valid: warnings.is_empty(),
        warnings,
    }
}
