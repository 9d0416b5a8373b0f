//! Hospital classification and ranking over already-fetched place and route
//! data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hospitals further than this are dropped from results.
pub const MAX_TRAVEL_TIME_SECS: u64 = 3600;

const MULTISPECIALITY_KEYWORDS: [&str; 10] = [
    "multi",
    "general",
    "district",
    "medical center",
    "medical college",
    "aiims",
    "government",
    "state",
    "university",
    "memorial",
];

const EMERGENCY_KEYWORDS: [&str; 9] = [
    "emergency",
    "trauma",
    "accident",
    "emergency care",
    "24 hour",
    "24/7",
    "critical care",
    "casualty",
    "emergency department",
];

const EMERGENCY_TYPES: [&str; 3] = ["emergency_room", "emergency_service", "trauma_center"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub location: Option<LatLng>,
}

/// A nearby-search place result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hospital {
    pub place_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vicinity: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub user_ratings_total: Option<u32>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub geometry: Geometry,
}

impl Hospital {
    pub fn location(&self) -> Option<LatLng> {
        self.geometry.location
    }

    fn rating_at_least(&self, rating: f64, reviews: u32) -> bool {
        self.rating.unwrap_or(0.0) >= rating && self.user_ratings_total.unwrap_or(0) >= reviews
    }

    /// Name keyword, or a well-reviewed hospital (>= 4.0 over >= 50 reviews).
    pub fn is_multispeciality(&self) -> bool {
        let name = self.name.to_lowercase();
        MULTISPECIALITY_KEYWORDS.iter().any(|k| name.contains(k)) || self.rating_at_least(4.0, 50)
    }

    /// Name keyword, an emergency place type, or a very well-reviewed
    /// hospital (>= 4.5 over >= 100 reviews).
    pub fn has_emergency_services(&self) -> bool {
        let name = self.name.to_lowercase();
        EMERGENCY_KEYWORDS.iter().any(|k| name.contains(k))
            || self.types.iter().any(|t| EMERGENCY_TYPES.contains(&t.as_str()))
            || self.rating_at_least(4.5, 100)
    }
}

/// Route summary for one hospital, traffic included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelInfo {
    pub duration_secs: u64,
    pub distance_meters: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedHospital {
    pub hospital: Hospital,
    pub travel: TravelInfo,
    pub is_multispeciality: bool,
    pub has_emergency: bool,
}

/// Keep hospitals with a location and a route within `max_travel_secs`,
/// nearest first. `travel` is keyed by `place_id`.
pub fn rank_reachable(
    hospitals: Vec<Hospital>,
    travel: &HashMap<String, TravelInfo>,
    max_travel_secs: u64,
) -> Vec<RankedHospital> {
    let mut ranked: Vec<RankedHospital> = hospitals
        .into_iter()
        .filter(|h| h.location().is_some())
        .filter_map(|hospital| {
            let info = *travel.get(&hospital.place_id)?;
            (info.duration_secs <= max_travel_secs).then(|| RankedHospital {
                is_multispeciality: hospital.is_multispeciality(),
                has_emergency: hospital.has_emergency_services(),
                hospital,
                travel: info,
            })
        })
        .collect();
    ranked.sort_by_key(|h| h.travel.duration_secs);
    ranked
}

/// Display groups, each keeping travel-time order.
#[derive(Debug, Default, PartialEq)]
pub struct HospitalGroups<'a> {
    pub emergency: Vec<&'a RankedHospital>,
    pub multispeciality: Vec<&'a RankedHospital>,
    pub regular: Vec<&'a RankedHospital>,
}

pub fn partition(ranked: &[RankedHospital]) -> HospitalGroups<'_> {
    let mut groups = HospitalGroups::default();
    for h in ranked {
        if h.has_emergency {
            groups.emergency.push(h);
        } else if h.is_multispeciality {
            groups.multispeciality.push(h);
        } else {
            groups.regular.push(h);
        }
    }
    groups
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

pub fn format_travel_time(secs: u64) -> String {
    if secs < 60 {
        return format!("{} seconds", secs);
    }
    if secs < 3600 {
        return plural(secs / 60, "minute");
    }
    let hours = plural(secs / 3600, "hour");
    match (secs % 3600) / 60 {
        0 => hours,
        minutes => format!("{} and {}", hours, plural(minutes, "minute")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hospital(id: &str, name: &str) -> Hospital {
        Hospital {
            place_id: id.to_string(),
            name: name.to_string(),
            geometry: Geometry {
                location: Some(LatLng { lat: 12.97, lng: 77.59 }),
            },
            ..Default::default()
        }
    }

    fn route(duration_secs: u64) -> TravelInfo {
        TravelInfo {
            duration_secs,
            distance_meters: duration_secs * 10,
        }
    }

    #[test]
    fn test_multispeciality_by_name_or_rating() {
        assert!(hospital("a", "District General Hospital").is_multispeciality());
        assert!(!hospital("b", "Sunrise Clinic").is_multispeciality());

        let rated = Hospital {
            rating: Some(4.2),
            user_ratings_total: Some(80),
            ..hospital("c", "Sunrise Clinic")
        };
        assert!(rated.is_multispeciality());
    }

    #[test]
    fn test_emergency_by_name_type_or_rating() {
        assert!(hospital("a", "City Trauma Centre").has_emergency_services());

        let typed = Hospital {
            types: vec!["hospital".to_string(), "emergency_room".to_string()],
            ..hospital("b", "Sunrise Clinic")
        };
        assert!(typed.has_emergency_services());

        let rated = Hospital {
            rating: Some(4.6),
            user_ratings_total: Some(99),
            ..hospital("c", "Sunrise Clinic")
        };
        assert!(!rated.has_emergency_services());
    }

    #[test]
    fn test_rank_filters_and_sorts_by_travel_time() {
        let hospitals = vec![
            hospital("far", "Far Hospital"),
            hospital("near", "Near Emergency Hospital"),
            hospital("mid", "Mid Hospital"),
            hospital("no-route", "Unrouted Hospital"),
            Hospital {
                geometry: Geometry::default(),
                ..hospital("no-location", "Lost Hospital")
            },
        ];
        let travel = HashMap::from([
            ("far".to_string(), route(3601)),
            ("near".to_string(), route(300)),
            ("mid".to_string(), route(1800)),
            ("no-location".to_string(), route(10)),
        ]);

        let ranked = rank_reachable(hospitals, &travel, MAX_TRAVEL_TIME_SECS);
        let ids: Vec<&str> = ranked.iter().map(|h| h.hospital.place_id.as_str()).collect();

        assert_eq!(ids, vec!["near", "mid"]);
        assert!(ranked[0].has_emergency);
    }

    #[test]
    fn test_partition_prefers_emergency() {
        let hospitals = vec![
            hospital("e", "General Emergency Hospital"),
            hospital("m", "University Hospital"),
            hospital("r", "Sunrise Clinic"),
        ];
        let travel = HashMap::from([
            ("e".to_string(), route(900)),
            ("m".to_string(), route(600)),
            ("r".to_string(), route(60)),
        ]);

        let ranked = rank_reachable(hospitals, &travel, MAX_TRAVEL_TIME_SECS);
        let groups = partition(&ranked);

        assert_eq!(groups.emergency.len(), 1);
        assert_eq!(groups.emergency[0].hospital.place_id, "e");
        assert_eq!(groups.multispeciality[0].hospital.place_id, "m");
        assert_eq!(groups.regular[0].hospital.place_id, "r");
    }

    #[test]
    fn test_format_travel_time() {
        assert_eq!(format_travel_time(45), "45 seconds");
        assert_eq!(format_travel_time(60), "1 minute");
        assert_eq!(format_travel_time(150), "2 minutes");
        assert_eq!(format_travel_time(3600), "1 hour");
        assert_eq!(format_travel_time(3660), "1 hour and 1 minute");
        assert_eq!(format_travel_time(9000), "2 hours and 30 minutes");
    }

    #[test]
    fn test_place_json_deserializes() {
        let json = r#"{
            "place_id": "abc",
            "name": "AIIMS",
            "rating": 4.4,
            "user_ratings_total": 1200,
            "types": ["hospital", "health"],
            "geometry": {"location": {"lat": 28.56, "lng": 77.21}}
        }"#;
        let hospital: Hospital = serde_json::from_str(json).unwrap();
        assert_eq!(hospital.location(), Some(LatLng { lat: 28.56, lng: 77.21 }));
        assert!(hospital.is_multispeciality());
    }
}
