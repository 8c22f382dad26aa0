// REST binding of DataStore against the managed backend: row reads and
// writes over its PostgREST-style endpoints, identity via the auth
// endpoint, image uploads via the storage endpoint. The change feed is a
// per-subscription polling task; consumers treat events as a coarse
// re-read trigger either way, so polling is an adequate transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{
    Booking, BookingPatch, Car, CarListing, CarPatch, CustomerDetails, Profile,
    UnavailabilityWindow,
};
use crate::store::{ChangeEvent, ChangeListener, ChangeOp, DataStore, StoreError, Subscription};

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Network(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    pub poll_interval: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            poll_interval: Duration::from_secs(5),
        }
    }
}

pub struct RestStore {
    http: reqwest::Client,
    config: RestConfig,
    access_token: RwLock<Option<String>>,
}

// Embedded read shape for car listings, one round-trip per page load.
const CAR_SELECT: &str = "*,profiles(full_name),unavailability(*),bookings(count)";

#[derive(Deserialize)]
struct CarRow {
    #[serde(flatten)]
    car: Car,
    profiles: Option<ProviderName>,
    #[serde(default)]
    unavailability: Vec<UnavailabilityWindow>,
    #[serde(default)]
    bookings: Vec<CountRow>,
}

#[derive(Deserialize)]
struct ProviderName {
    full_name: String,
}

#[derive(Deserialize)]
struct CountRow {
    count: usize,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: AuthUser,
}

impl From<CarRow> for CarListing {
    fn from(row: CarRow) -> Self {
        CarListing {
            car: row.car,
            provider_name: row.profiles.map(|p| p.full_name).unwrap_or_default(),
            windows: row.unavailability,
            booking_count: row.bookings.first().map(|c| c.count).unwrap_or(0),
        }
    }
}

impl RestStore {
    pub fn new(config: RestConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            access_token: RwLock::new(None),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.config.base_url, function)
    }

    fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.base_url, bucket, path
        )
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.config.api_key.clone())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.bearer())
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Backend(format!("{}: {}", status, body)))
    }

    // Password sign-in; the returned user id is what current_user() reports
    // until sign_out().
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<String, StoreError> {
        let url = format!(
            "{}/auth/v1/token?grant_type=password",
            self.config.base_url
        );
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.config.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let token: TokenResponse = Self::expect_success(response).await?.json().await?;
        *self.access_token.write() = Some(token.access_token);
        Ok(token.user.id)
    }

    pub fn sign_out(&self) {
        *self.access_token.write() = None;
    }

    async fn insert_row<T: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        row: &T,
        drop_empty_id: bool,
    ) -> Result<R, StoreError> {
        let mut body = serde_json::to_value(row)
            .map_err(|e| StoreError::Backend(format!("serialize {} row: {}", table, e)))?;
        if drop_empty_id {
            if let Some(object) = body.as_object_mut() {
                // Empty id means "backend assigns one".
                if object.get("id").and_then(Value::as_str) == Some("") {
                    object.remove("id");
                }
            }
        }

        let response = self
            .request(reqwest::Method::POST, &self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;
        let mut rows: Vec<R> = Self::expect_success(response).await?.json().await?;
        rows.pop()
            .ok_or_else(|| StoreError::Backend(format!("{} insert returned no row", table)))
    }

    async fn patch_row<T: serde::Serialize>(
        &self,
        table: &str,
        id: &str,
        patch: &T,
    ) -> Result<(), StoreError> {
        let url = format!("{}?id=eq.{}", self.table_url(table), id);
        let response = self
            .request(reqwest::Method::PATCH, &url)
            .json(patch)
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for RestStore {
    async fn list_cars(&self) -> Result<Vec<CarListing>, StoreError> {
        let url = format!("{}?select={}", self.table_url("cars"), CAR_SELECT);
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let rows: Vec<CarRow> = Self::expect_success(response).await?.json().await?;
        Ok(rows.into_iter().map(CarListing::from).collect())
    }

    async fn get_car(&self, car_id: &str) -> Result<CarListing, StoreError> {
        let url = format!(
            "{}?select={}&id=eq.{}",
            self.table_url("cars"),
            CAR_SELECT,
            car_id
        );
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let mut rows: Vec<CarRow> = Self::expect_success(response).await?.json().await?;
        rows.pop()
            .map(CarListing::from)
            .ok_or_else(|| StoreError::not_found("cars", car_id))
    }

    async fn insert_car(&self, car: Car) -> Result<Car, StoreError> {
        self.insert_row("cars", &car, true).await
    }

    async fn update_car(&self, car_id: &str, patch: CarPatch) -> Result<(), StoreError> {
        self.patch_row("cars", car_id, &patch).await
    }

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError> {
        self.insert_row("bookings", &booking, true).await
    }

    async fn get_booking(&self, booking_id: &str) -> Result<Booking, StoreError> {
        let url = format!("{}?id=eq.{}", self.table_url("bookings"), booking_id);
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let mut rows: Vec<Booking> = Self::expect_success(response).await?.json().await?;
        rows.pop()
            .ok_or_else(|| StoreError::not_found("bookings", booking_id))
    }

    async fn update_booking(
        &self,
        booking_id: &str,
        patch: BookingPatch,
    ) -> Result<(), StoreError> {
        self.patch_row("bookings", booking_id, &patch).await
    }

    async fn list_bookings_for_cars(
        &self,
        car_ids: &[String],
    ) -> Result<Vec<Booking>, StoreError> {
        if car_ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!(
            "{}?car_id=in.({})",
            self.table_url("bookings"),
            car_ids.join(",")
        );
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let rows: Vec<Booking> = Self::expect_success(response).await?.json().await?;
        Ok(rows)
    }

    async fn replace_unavailability(
        &self,
        car_id: &str,
        window: UnavailabilityWindow,
    ) -> Result<(), StoreError> {
        // Server-side function that deletes the car's unavailable windows
        // and inserts the new one inside a single transaction, so a crash
        // cannot leave the car fully available by accident.
        let response = self
            .request(reqwest::Method::POST, &self.rpc_url("replace_unavailability"))
            .json(&serde_json::json!({
                "p_car_id": car_id,
                "p_from": window.from,
                "p_to": window.to,
                "p_unavailable": window.unavailable,
            }))
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn insert_customer_details(
        &self,
        details: CustomerDetails,
    ) -> Result<CustomerDetails, StoreError> {
        self.insert_row("customer_details", &details, true).await
    }

    async fn current_user(&self) -> Result<Option<String>, StoreError> {
        let url = format!("{}/auth/v1/user", self.config.base_url);
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let user: AuthUser = Self::expect_success(response).await?.json().await?;
        Ok(Some(user.id))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        let url = format!("{}?id=eq.{}", self.table_url("profiles"), user_id);
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let mut rows: Vec<Profile> = Self::expect_success(response).await?.json().await?;
        rows.pop()
            .ok_or_else(|| StoreError::not_found("profiles", user_id))
    }

    async fn upload_image(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url, bucket, path
        );
        let response = self
            .request(reqwest::Method::POST, &url)
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(self.public_object_url(bucket, path))
    }

    fn subscribe(&self, table: &str, listener: ChangeListener) -> Subscription {
        let http = self.http.clone();
        let api_key = self.config.api_key.clone();
        let bearer = self.bearer();
        let url = format!("{}?select=*", self.table_url(table));
        let table = table.to_string();
        let interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut previous: Option<Vec<Value>> = None;
            loop {
                tokio::time::sleep(interval).await;

                let result = async {
                    let response = http
                        .get(&url)
                        .header("apikey", &api_key)
                        .bearer_auth(&bearer)
                        .send()
                        .await?;
                    response.json::<Vec<Value>>().await
                }
                .await;

                let rows = match result {
                    Ok(rows) => rows,
                    Err(err) => {
                        // Transient poll failures are skipped, not fatal.
                        warn!(table = %table, error = %err, "change-feed poll failed");
                        continue;
                    }
                };

                let changed = previous.as_ref().is_some_and(|prev| *prev != rows);
                if changed {
                    debug!(table = %table, "change detected, notifying");
                    listener(&ChangeEvent {
                        table: table.clone(),
                        op: ChangeOp::Update,
                        row_id: None,
                    });
                }
                previous = Some(rows);
            }
        });

        Subscription::new(move || handle.abort())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RestStore {
        RestStore::new(RestConfig::new("https://backend.example.com", "anon-key"))
    }

    #[test]
    fn test_url_construction() {
        let store = store();
        assert_eq!(
            store.table_url("bookings"),
            "https://backend.example.com/rest/v1/bookings"
        );
        assert_eq!(
            store.rpc_url("replace_unavailability"),
            "https://backend.example.com/rest/v1/rpc/replace_unavailability"
        );
        assert_eq!(
            store.public_object_url("car-images", "cars/car1/1.jpg"),
            "https://backend.example.com/storage/v1/object/public/car-images/cars/car1/1.jpg"
        );
    }

    #[test]
    fn test_bearer_falls_back_to_api_key() {
        let store = store();
        assert_eq!(store.bearer(), "anon-key");

        *store.access_token.write() = Some("user-token".to_string());
        assert_eq!(store.bearer(), "user-token");

        store.sign_out();
        assert_eq!(store.bearer(), "anon-key");
    }

    #[test]
    fn test_car_row_maps_embedded_relations() {
        let json = serde_json::json!({
            "id": "car1",
            "provider_id": "prov1",
            "model": "Corolla",
            "year": 2021,
            "license_plate": "ABC-123",
            "seats": 5,
            "daily_rate": 50.0,
            "profiles": { "full_name": "Pat Provider" },
            "unavailability": [{
                "id": "w1",
                "car_id": "car1",
                "from": "2024-06-10",
                "to": "2024-06-15",
                "unavailable": true
            }],
            "bookings": [{ "count": 3 }]
        });

        let row: CarRow = serde_json::from_value(json).unwrap();
        let listing = CarListing::from(row);
        assert_eq!(listing.provider_name, "Pat Provider");
        assert_eq!(listing.windows.len(), 1);
        assert_eq!(listing.booking_count, 3);
        assert_eq!(listing.car.model, "Corolla");
    }

    #[test]
    fn test_car_row_tolerates_missing_relations() {
        let json = serde_json::json!({
            "id": "car1",
            "provider_id": "prov1",
            "model": "Corolla",
            "year": 2021,
            "license_plate": "ABC-123",
            "seats": 5,
            "daily_rate": 50.0
        });

        let row: CarRow = serde_json::from_value(json).unwrap();
        let listing = CarListing::from(row);
        assert_eq!(listing.provider_name, "");
        assert!(listing.windows.is_empty());
        assert_eq!(listing.booking_count, 0);
    }
}
