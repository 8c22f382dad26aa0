// Car catalog: customer-side browsing with range-aware availability
// annotation, and provider-side listing management (create/update cars,
// replace the unavailability window, upload the listing image).

use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use crate::availability::{annotate, filter_available};
use crate::domain::{Car, CarListing, CarPatch, DateRange, Role, UnavailabilityWindow};
use crate::session::SessionContext;
use crate::store::{DataStore, StoreError};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Sign in required")]
    AuthRequired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        CatalogError::Backend(err.to_string())
    }
}

// Provider form for listing a new car.
#[derive(Debug, Clone)]
pub struct NewCar {
    pub model: String,
    pub year: i32,
    pub license_plate: String,
    pub seats: u32,
    pub daily_rate: f64,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct CarCatalog {
    store: Arc<dyn DataStore>,
    session: SessionContext,
}

impl CarCatalog {
    pub fn new(store: Arc<dyn DataStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    fn require_provider(&self) -> Result<String, CatalogError> {
        let user = self.session.current().ok_or(CatalogError::AuthRequired)?;
        if user.profile.role != Role::Provider {
            return Err(CatalogError::Forbidden(
                "provider account required".to_string(),
            ));
        }
        Ok(user.user_id)
    }

    async fn require_owned_car(&self, car_id: &str) -> Result<CarListing, CatalogError> {
        let provider_id = self.require_provider()?;
        let listing = self.store.get_car(car_id).await?;
        if listing.car.provider_id != provider_id {
            return Err(CatalogError::Forbidden(
                "car belongs to another provider".to_string(),
            ));
        }
        Ok(listing)
    }

    fn selected_range(
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Option<DateRange>, CatalogError> {
        match (from, to) {
            (Some(from), Some(to)) => {
                let range = DateRange::new(from, to);
                if !range.is_ordered() {
                    return Err(CatalogError::Validation(
                        "return date must not be before the pick-up date".to_string(),
                    ));
                }
                Ok(Some(range))
            }
            // A half-selected range falls back to the optimistic default.
            _ => Ok(None),
        }
    }

    // Browse page: every listing, annotated with bookability for the
    // user's selected range. Advisory only; nothing holds the range.
    pub async fn browse(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<(CarListing, bool)>, CatalogError> {
        let range = Self::selected_range(from, to)?;
        let listings = self.store.list_cars().await?;
        Ok(annotate(listings, range))
    }

    // Same as browse, but with unavailable cars filtered out.
    pub async fn browse_available(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CarListing>, CatalogError> {
        let range = Self::selected_range(from, to)?;
        let listings = self.store.list_cars().await?;
        Ok(filter_available(listings, range))
    }

    pub async fn car_detail(&self, car_id: &str) -> Result<CarListing, CatalogError> {
        self.store.get_car(car_id).await.map_err(Into::into)
    }

    pub async fn add_car(&self, new_car: NewCar) -> Result<Car, CatalogError> {
        let provider_id = self.require_provider()?;

        if new_car.model.trim().is_empty() {
            return Err(CatalogError::Validation("model is required".to_string()));
        }
        if new_car.license_plate.trim().is_empty() {
            return Err(CatalogError::Validation(
                "license plate is required".to_string(),
            ));
        }
        if new_car.daily_rate <= 0.0 {
            return Err(CatalogError::Validation(
                "daily rate must be positive".to_string(),
            ));
        }

        let car = self
            .store
            .insert_car(Car {
                id: String::new(),
                provider_id,
                model: new_car.model,
                year: new_car.year,
                license_plate: new_car.license_plate,
                seats: new_car.seats,
                daily_rate: new_car.daily_rate,
                description: new_car.description,
                image_url: None,
            })
            .await?;

        info!(car_id = %car.id, "car listed");
        Ok(car)
    }

    pub async fn update_car(&self, car_id: &str, patch: CarPatch) -> Result<(), CatalogError> {
        self.require_owned_car(car_id).await?;
        if let Some(rate) = patch.daily_rate {
            if rate <= 0.0 {
                return Err(CatalogError::Validation(
                    "daily rate must be positive".to_string(),
                ));
            }
        }
        self.store.update_car(car_id, patch).await.map_err(Into::into)
    }

    // Replaces the car's unavailable window with the given one. Last write
    // wins; setting a new window discards the previous one rather than
    // accumulating.
    pub async fn set_unavailability(
        &self,
        car_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(), CatalogError> {
        self.require_owned_car(car_id).await?;

        let range = DateRange::new(from, to);
        if !range.is_ordered() {
            return Err(CatalogError::Validation(
                "window end must not be before its start".to_string(),
            ));
        }

        self.store
            .replace_unavailability(
                car_id,
                UnavailabilityWindow {
                    id: String::new(),
                    car_id: car_id.to_string(),
                    from,
                    to,
                    unavailable: true,
                },
            )
            .await?;

        info!(car_id, %from, %to, "unavailability window replaced");
        Ok(())
    }

    // Uploads the listing photo and points the car row at its public URL.
    pub async fn upload_car_image(
        &self,
        car_id: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, CatalogError> {
        self.require_owned_car(car_id).await?;

        let extension = match content_type {
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "jpg",
        };
        let path = format!("cars/{}/{}.{}", car_id, rand::random::<u32>(), extension);
        let url = self
            .store
            .upload_image("car-images", &path, data, content_type)
            .await?;

        self.store
            .update_car(
                car_id,
                CarPatch {
                    image_url: Some(url.clone()),
                    ..Default::default()
                },
            )
            .await?;

        info!(car_id, %url, "car image updated");
        Ok(url)
    }
}
