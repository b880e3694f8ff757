use crate::types::RecordError;
use serde::{Deserialize, Serialize};

/// `community.lexicon.location.geo`: a WGS84 coordinate pair.
///
/// Latitude and longitude are decimal strings, not floats: the record encoding
/// used by the store has no float type, so numeric coordinates would be
/// rejected at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoCoordinates {
    #[serde(rename = "$type")]
    pub type_: String,
    pub latitude: String,
    pub longitude: String,
}

pub const GEO_TYPE: &str = "community.lexicon.location.geo";

impl GeoCoordinates {
    /// Build from numeric coordinates, validating ranges and formatting with
    /// the shortest representation that parses back to the same value.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, RecordError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(RecordError::NonFiniteCoordinate);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(RecordError::LatitudeOutOfRange(latitude.to_string()));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(RecordError::LongitudeOutOfRange(longitude.to_string()));
        }
        Ok(Self {
            type_: GEO_TYPE.to_string(),
            latitude: latitude.to_string(),
            longitude: longitude.to_string(),
        })
    }

    pub fn latitude_f64(&self) -> Option<f64> {
        self.latitude.parse().ok()
    }

    pub fn longitude_f64(&self) -> Option<f64> {
        self.longitude.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_are_stored_as_strings() {
        let geo = GeoCoordinates::new(52.0742969, 4.3468013).unwrap();
        assert_eq!(geo.latitude, "52.0742969");
        assert_eq!(geo.longitude, "4.3468013");

        let json = serde_json::to_value(&geo).unwrap();
        assert!(json["latitude"].is_string());
        assert!(json["longitude"].is_string());
        assert_eq!(json["$type"], GEO_TYPE);
    }

    #[test]
    fn coordinates_round_trip_to_the_same_value() {
        let geo = GeoCoordinates::new(52.0742969, -4.3468013).unwrap();
        assert_eq!(geo.latitude_f64(), Some(52.0742969));
        assert_eq!(geo.longitude_f64(), Some(-4.3468013));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert_eq!(
            GeoCoordinates::new(90.5, 0.0),
            Err(RecordError::LatitudeOutOfRange("90.5".into()))
        );
        assert_eq!(
            GeoCoordinates::new(0.0, -180.5),
            Err(RecordError::LongitudeOutOfRange("-180.5".into()))
        );
        assert_eq!(
            GeoCoordinates::new(f64::NAN, 0.0),
            Err(RecordError::NonFiniteCoordinate)
        );
    }

    #[test]
    fn boundary_coordinates_are_accepted() {
        assert!(GeoCoordinates::new(90.0, 180.0).is_ok());
        assert!(GeoCoordinates::new(-90.0, -180.0).is_ok());
    }
}
