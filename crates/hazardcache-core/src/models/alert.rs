use serde::{Deserialize, Serialize};

use crate::geo::format_distance;

/// Emitted when the subject is within the proximity radius of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityAlert {
    pub label: String,
    pub distance_meters: f64,
}

impl std::fmt::Display for ProximityAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, format_distance(self.distance_meters))
    }
}

/// A record paired with its distance from the current position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyRecord {
    pub record: super::Record,
    pub distance_meters: f64,
}

impl NearbyRecord {
    pub fn display_distance(&self) -> String {
        format_distance(self.distance_meters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_display() {
        let alert = ProximityAlert {
            label: "chantier A".to_string(),
            distance_meters: 68.4,
        };
        assert_eq!(alert.to_string(), "chantier A (68 m)");
    }
}
