//! External place directory used as the last categorization fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::category::Category;

/// Looks a merchant name up in a place directory and returns its type tags.
#[async_trait]
pub trait PlaceSearch: Send + Sync {
    async fn search(&self, name: &str) -> Result<Vec<String>, PlaceSearchError>;
}

/// Place types mapped to internal categories, most specific first.
const PLACE_TYPE_CATEGORIES: &[(&str, Category)] = &[
    ("gas_station", Category::Gas),
    ("electric_vehicle_charging_station", Category::Gas),
    ("grocery_store", Category::Groceries),
    ("supermarket", Category::Groceries),
    ("convenience_store", Category::Groceries),
    ("restaurant", Category::Dining),
    ("cafe", Category::Dining),
    ("coffee_shop", Category::Dining),
    ("bakery", Category::Dining),
    ("bar", Category::Dining),
    ("meal_takeaway", Category::Dining),
    ("meal_delivery", Category::Dining),
    ("fast_food_restaurant", Category::Dining),
    ("airport", Category::Travel),
    ("lodging", Category::Travel),
    ("hotel", Category::Travel),
    ("travel_agency", Category::Travel),
    ("car_rental", Category::Travel),
    ("taxi_stand", Category::Transportation),
    ("transit_station", Category::Transportation),
    ("train_station", Category::Transportation),
    ("bus_station", Category::Transportation),
    ("parking", Category::Transportation),
    ("pharmacy", Category::Health),
    ("drugstore", Category::Health),
    ("hospital", Category::Health),
    ("doctor", Category::Health),
    ("dentist", Category::Health),
    ("gym", Category::Health),
    ("movie_theater", Category::Entertainment),
    ("amusement_park", Category::Entertainment),
    ("night_club", Category::Entertainment),
    ("bowling_alley", Category::Entertainment),
    ("stadium", Category::Entertainment),
    ("electric_utility_company", Category::Utilities),
    ("telecommunications_service_provider", Category::Utilities),
    ("department_store", Category::Shopping),
    ("clothing_store", Category::Shopping),
    ("electronics_store", Category::Shopping),
    ("shopping_mall", Category::Shopping),
    ("home_goods_store", Category::Shopping),
    ("hardware_store", Category::Shopping),
    ("book_store", Category::Shopping),
    ("store", Category::Shopping),
];

/// Map place-type tags to a category. Tags are checked in the order the
/// directory returned them, so the primary type wins.
pub fn category_for_place_types(types: &[String]) -> Option<Category> {
    types.iter().find_map(|t| {
        PLACE_TYPE_CATEGORIES
            .iter()
            .find(|(tag, _)| t.eq_ignore_ascii_case(tag))
            .map(|(_, category)| *category)
    })
}

/// Google Places (New) text search client.
pub struct GooglePlacesClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextSearchRequest<'a> {
    text_query: &'a str,
    max_result_count: u32,
}

#[derive(Deserialize)]
struct TextSearchResponse {
    #[serde(default)]
    places: Vec<Place>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    primary_type: Option<String>,
    #[serde(default)]
    types: Vec<String>,
}

impl GooglePlacesClient {
    pub fn new(api_key: &str) -> Result<Self, PlaceSearchError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: "https://places.googleapis.com/v1".to_string(),
        })
    }
}

#[async_trait]
impl PlaceSearch for GooglePlacesClient {
    async fn search(&self, name: &str) -> Result<Vec<String>, PlaceSearchError> {
        let response = self
            .http
            .post(format!("{}/places:searchText", self.base_url))
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", "places.primaryType,places.types")
            .json(&TextSearchRequest {
                text_query: name,
                max_result_count: 1,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PlaceSearchError::Unavailable(format!(
                "Places API returned HTTP {}",
                response.status()
            )));
        }

        let body: TextSearchResponse = response.json().await?;
        Ok(body
            .places
            .into_iter()
            .next()
            .map(|p| p.primary_type.into_iter().chain(p.types).collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlaceSearchError {
    #[error("HTTP request to place directory failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Place directory unavailable: {0}")]
    Unavailable(String),
}
