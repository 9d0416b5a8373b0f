//! Google Maps web services behind the hospital locator: geocoding, nearby
//! hospital search, traffic-aware routes and road speed limits.
//!
//! Every call returns `Result<_, ApiError>` so it can be wrapped by
//! [`RetryPolicy`]; an `OVER_QUERY_LIMIT` status is reported as a rate limit.

use crate::config::MapsConfig;
use crate::error::{ApiError, InvokeError};
use crate::hospital::{rank_reachable, Hospital, LatLng, RankedHospital, TravelInfo};
use crate::retry::{RetryCounter, RetryPolicy};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const ROUTE_FIELD_MASK: &str =
    "routes.duration,routes.distanceMeters,routes.polyline.encodedPolyline";

/// Points accepted by one speed-limit request.
pub const MAX_SPEED_LIMIT_POINTS: usize = 100;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    formatted_address: String,
    geometry: GeocodeGeometry,
}

#[derive(Debug, Deserialize)]
struct GeocodeGeometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct NearbySearchResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<Hospital>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRoutesRequest {
    origin: Waypoint,
    destination: Waypoint,
    travel_mode: &'static str,
    routing_preference: &'static str,
    compute_alternative_routes: bool,
    route_modifiers: RouteModifiers,
}

#[derive(Debug, Serialize)]
struct Waypoint {
    location: WaypointLocation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WaypointLocation {
    lat_lng: RoutesLatLng,
}

#[derive(Debug, Serialize)]
struct RoutesLatLng {
    latitude: f64,
    longitude: f64,
}

impl From<LatLng> for Waypoint {
    fn from(point: LatLng) -> Self {
        Waypoint {
            location: WaypointLocation {
                lat_lng: RoutesLatLng {
                    latitude: point.lat,
                    longitude: point.lng,
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RouteModifiers {
    avoid_tolls: bool,
    avoid_highways: bool,
    avoid_ferries: bool,
}

#[derive(Debug, Deserialize)]
struct ComputeRoutesResponse {
    #[serde(default)]
    routes: Vec<RouteDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteDto {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    distance_meters: u64,
    #[serde(default)]
    polyline: Option<PolylineDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolylineDto {
    #[serde(default)]
    encoded_polyline: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeedLimitsResponse {
    #[serde(default)]
    speed_limits: Vec<SpeedLimit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodedAddress {
    pub location: LatLng,
    pub formatted_address: String,
}

/// Fastest driving route, traffic included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub travel: TravelInfo,
    pub polyline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedLimit {
    pub place_id: String,
    pub speed_limit: f64,
    #[serde(default)]
    pub units: String,
}

/// Outcome of [`MapsClient::find_hospitals`].
#[derive(Debug, Clone, PartialEq)]
pub struct HospitalSearch {
    pub origin: GeocodedAddress,
    /// Reachable hospitals, nearest first
    pub ranked: Vec<RankedHospital>,
    /// Encoded route polylines keyed by `place_id`
    pub polylines: HashMap<String, String>,
}

/// Client for the Geocoding, Places, Routes and Roads APIs
#[derive(Debug, Clone)]
pub struct MapsClient {
    client: Client,
    config: MapsConfig,
}

impl MapsClient {
    pub fn new(config: MapsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn maps_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.maps_url.trim_end_matches('/'), path)
    }

    fn page_token_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.page_token_delay_secs)
            .unwrap_or(Duration::from_secs(2))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        debug!("Maps response status: {}", status);

        let response_text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), response_text));
        }
        debug!("Maps response: {}", response_text);

        Ok(serde_json::from_str(&response_text)?)
    }

    /// Resolve a free-form address, biased to the configured region.
    pub async fn geocode(&self, address: &str) -> Result<GeocodedAddress, ApiError> {
        let query = [
            ("address", address.to_string()),
            ("key", self.config.api_key.clone()),
            ("region", self.config.region.clone()),
        ];
        let response: GeocodeResponse = self
            .get_json(self.maps_endpoint("/maps/api/geocode/json"), &query)
            .await?;

        if response.status != "OK" {
            return Err(ApiError::from_service_status(
                &response.status,
                response.error_message,
            ));
        }

        let result = response
            .results
            .into_iter()
            .next()
            .ok_or(ApiError::EmptyResponse)?;
        Ok(GeocodedAddress {
            location: result.geometry.location,
            formatted_address: result.formatted_address,
        })
    }

    /// Hospitals within `radius_meters` of `origin`, following page tokens
    /// up to `max_pages`.
    ///
    /// A failing first page is an error; a failing later page ends the
    /// search with what was collected so far.
    pub async fn nearby_hospitals(&self, origin: LatLng) -> Result<Vec<Hospital>, ApiError> {
        let url = self.maps_endpoint("/maps/api/place/nearbysearch/json");
        let mut hospitals = Vec::new();
        let mut page_token: Option<String> = None;

        for page in 1..=self.config.max_pages {
            let query = match &page_token {
                None => vec![
                    ("location", format!("{},{}", origin.lat, origin.lng)),
                    ("radius", self.config.radius_meters.to_string()),
                    ("type", "hospital".to_string()),
                    ("key", self.config.api_key.clone()),
                ],
                Some(token) => vec![
                    ("pagetoken", token.clone()),
                    ("key", self.config.api_key.clone()),
                ],
            };
            let response: NearbySearchResponse = self.get_json(url.clone(), &query).await?;

            match response.status.as_str() {
                "OK" => {}
                "ZERO_RESULTS" => break,
                status if hospitals.is_empty() => {
                    return Err(ApiError::from_service_status(
                        status,
                        response.error_message,
                    ));
                }
                status => {
                    warn!("Nearby search stopped at page {}: {}", page, status);
                    break;
                }
            }

            debug!("Page {}: {} hospitals", page, response.results.len());
            hospitals.extend(response.results);

            match response.next_page_token {
                Some(token) if page < self.config.max_pages => {
                    sleep(self.page_token_delay()).await;
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        info!(
            "Found {} hospitals near {},{}",
            hospitals.len(),
            origin.lat,
            origin.lng
        );
        Ok(hospitals)
    }

    /// Traffic-aware driving route; `None` when the service finds no route.
    pub async fn compute_route(
        &self,
        origin: LatLng,
        destination: LatLng,
    ) -> Result<Option<Route>, ApiError> {
        let body = ComputeRoutesRequest {
            origin: origin.into(),
            destination: destination.into(),
            travel_mode: "DRIVE",
            routing_preference: "TRAFFIC_AWARE",
            compute_alternative_routes: false,
            route_modifiers: RouteModifiers {
                avoid_tolls: false,
                avoid_highways: false,
                avoid_ferries: false,
            },
        };

        let response = self
            .client
            .post(format!(
                "{}/directions/v2:computeRoutes",
                self.config.routes_url.trim_end_matches('/')
            ))
            .header("X-Goog-Api-Key", &self.config.api_key)
            .header("X-Goog-FieldMask", ROUTE_FIELD_MASK)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        debug!("Routes response status: {}", status);

        let response_text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), response_text));
        }

        let parsed: ComputeRoutesResponse = serde_json::from_str(&response_text)?;
        let Some(route) = parsed.routes.into_iter().next() else {
            return Ok(None);
        };
        let Some(duration_secs) = route.duration.as_deref().and_then(parse_duration_secs) else {
            warn!("Route without a usable duration: {:?}", route.duration);
            return Ok(None);
        };

        Ok(Some(Route {
            travel: TravelInfo {
                duration_secs,
                distance_meters: route.distance_meters,
            },
            polyline: route
                .polyline
                .map(|p| p.encoded_polyline)
                .unwrap_or_default(),
        }))
    }

    /// Posted limits along `path`. Longer paths are thinned evenly to
    /// [`MAX_SPEED_LIMIT_POINTS`].
    pub async fn speed_limits(&self, path: &[LatLng]) -> Result<Vec<SpeedLimit>, ApiError> {
        if path.is_empty() {
            return Ok(Vec::new());
        }
        let step = path.len().div_ceil(MAX_SPEED_LIMIT_POINTS);
        let path_param = path
            .iter()
            .step_by(step)
            .map(|p| format!("{},{}", p.lat, p.lng))
            .collect::<Vec<_>>()
            .join("|");

        let query = [("path", path_param), ("key", self.config.api_key.clone())];
        let response: SpeedLimitsResponse = self
            .get_json(
                format!(
                    "{}/v1/speedLimits",
                    self.config.roads_url.trim_end_matches('/')
                ),
                &query,
            )
            .await?;
        Ok(response.speed_limits)
    }

    /// Geocode `address`, search nearby hospitals and keep those reachable
    /// within `max_travel_secs`. Each call goes through `policy`; a hospital
    /// whose route lookup fails is skipped.
    pub async fn find_hospitals(
        &self,
        policy: &RetryPolicy,
        counter: &mut RetryCounter,
        address: &str,
        max_travel_secs: u64,
    ) -> Result<HospitalSearch, InvokeError<ApiError>> {
        let origin = policy
            .invoke(counter, move || self.geocode(address))
            .await?;
        info!("Searching around {}", origin.formatted_address);

        let from = origin.location;
        let hospitals = policy
            .invoke(counter, move || self.nearby_hospitals(from))
            .await?;

        let mut travel = HashMap::new();
        let mut polylines = HashMap::new();
        for hospital in &hospitals {
            let Some(to) = hospital.location() else {
                continue;
            };
            match policy
                .invoke(counter, move || self.compute_route(from, to))
                .await
            {
                Ok(Some(route)) => {
                    travel.insert(hospital.place_id.clone(), route.travel);
                    polylines.insert(hospital.place_id.clone(), route.polyline);
                }
                Ok(None) => debug!("No route to {}", hospital.name),
                Err(e) => warn!("Skipping {}: {}", hospital.name, e),
            }
        }

        let ranked = rank_reachable(hospitals, &travel, max_travel_secs);
        info!("{} hospitals reachable", ranked.len());
        Ok(HospitalSearch {
            origin,
            ranked,
            polylines,
        })
    }
}

/// `"845s"` or `"845.5s"` as whole seconds.
fn parse_duration_secs(duration: &str) -> Option<u64> {
    let secs: f64 = duration.strip_suffix('s')?.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| secs.round() as u64)
}

/// Decode an encoded polyline (precision 1e-5). `None` on malformed input.
pub fn decode_polyline(encoded: &str) -> Option<Vec<LatLng>> {
    let bytes = encoded.as_bytes();
    let mut index = 0;
    let (mut lat, mut lng) = (0i64, 0i64);
    let mut points = Vec::new();

    while index < bytes.len() {
        lat += next_polyline_value(bytes, &mut index)?;
        lng += next_polyline_value(bytes, &mut index)?;
        points.push(LatLng {
            lat: lat as f64 / 1e5,
            lng: lng as f64 / 1e5,
        });
    }
    Some(points)
}

fn next_polyline_value(bytes: &[u8], index: &mut usize) -> Option<i64> {
    let mut result = 0i64;
    let mut shift = 0;
    loop {
        let chunk = i64::from(*bytes.get(*index)?) - 63;
        if !(0..64).contains(&chunk) || shift > 30 {
            return None;
        }
        *index += 1;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }
    Some(if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    })
}
