// The external data service boundary. Everything the booking core needs
// from the managed backend (rows, auth identity, object storage, change
// feed) goes through the DataStore trait; the rest of the crate never sees
// a concrete binding.
//
// MemoryStore is the in-process implementation used by the test suite. It
// mirrors the managed backend's observable semantics, including per-table
// change notifications and injectable failures.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::domain::{
    Booking, BookingPatch, Car, CarListing, CarPatch, CustomerDetails, Profile,
    UnavailabilityWindow,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{table} row not found: {id}")]
    NotFound { table: String, id: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl StoreError {
    pub fn not_found(table: &str, id: &str) -> Self {
        StoreError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        }
    }
}

// Row-change notification. The feed is coarse: consumers are expected to
// re-read whatever they care about, not to patch local state from events.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    pub row_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

// Handle returned by subscribe(); dropping it deregisters the listener.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// Logical operations the booking core issues against the managed backend.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    // Cars with embedded provider name, windows and booking count.
    async fn list_cars(&self) -> Result<Vec<CarListing>, StoreError>;
    async fn get_car(&self, car_id: &str) -> Result<CarListing, StoreError>;
    async fn insert_car(&self, car: Car) -> Result<Car, StoreError>;
    async fn update_car(&self, car_id: &str, patch: CarPatch) -> Result<(), StoreError>;

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError>;
    async fn get_booking(&self, booking_id: &str) -> Result<Booking, StoreError>;
    async fn update_booking(&self, booking_id: &str, patch: BookingPatch)
        -> Result<(), StoreError>;
    async fn list_bookings_for_cars(&self, car_ids: &[String])
        -> Result<Vec<Booking>, StoreError>;

    // Replaces the car's whole unavailable-window set with the given window
    // in one operation. Replacement, not append: prior unavailable windows
    // for the car are gone afterwards, and no intermediate "zero windows"
    // state is observable.
    async fn replace_unavailability(
        &self,
        car_id: &str,
        window: UnavailabilityWindow,
    ) -> Result<(), StoreError>;

    async fn insert_customer_details(
        &self,
        details: CustomerDetails,
    ) -> Result<CustomerDetails, StoreError>;

    async fn current_user(&self) -> Result<Option<String>, StoreError>;
    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError>;

    // Uploads an object and returns its public URL.
    async fn upload_image(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StoreError>;

    // Per-table change feed. The listener runs on the store's notification
    // context; keep it cheap and re-read from a task of your own.
    fn subscribe(&self, table: &str, listener: ChangeListener) -> Subscription;
}

fn generated_id(prefix: &str) -> String {
    format!("{}-{}", prefix, rand::random::<u32>())
}

struct ListenerEntry {
    id: u64,
    table: String,
    listener: ChangeListener,
}

// In-memory backend with the same observable behavior as the remote one.
pub struct MemoryStore {
    cars: DashMap<String, Car>,
    bookings: DashMap<String, Booking>,
    details: DashMap<String, CustomerDetails>,
    profiles: DashMap<String, Profile>,
    objects: DashMap<String, Bytes>,
    // Single lock so a window replacement is atomic for concurrent readers.
    windows: RwLock<Vec<UnavailabilityWindow>>,
    // Shared with subscription handles so a dropped handle can deregister.
    listeners: Arc<RwLock<Vec<ListenerEntry>>>,
    next_listener_id: AtomicU64,
    signed_in: Mutex<Option<String>>,
    fail_next: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cars: DashMap::new(),
            bookings: DashMap::new(),
            details: DashMap::new(),
            profiles: DashMap::new(),
            objects: DashMap::new(),
            windows: RwLock::new(Vec::new()),
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
            signed_in: Mutex::new(None),
            fail_next: AtomicUsize::new(0),
        })
    }

    // Seeds an identity row; test fixtures call this before sign_in.
    pub fn add_profile(&self, profile: Profile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn sign_in(&self, user_id: &str) {
        *self.signed_in.lock() = Some(user_id.to_string());
    }

    pub fn sign_out(&self) {
        *self.signed_in.lock() = None;
    }

    // The next `count` operations fail with a backend error. Mirrors how
    // the remote service intermittently rejects writes.
    pub fn fail_next_requests(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn object_exists(&self, bucket: &str, path: &str) -> bool {
        self.objects.contains_key(&format!("{}/{}", bucket, path))
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend(
                "simulated backend failure".to_string(),
            ));
        }
        Ok(())
    }

    fn notify(&self, table: &str, op: ChangeOp, row_id: Option<String>) {
        let event = ChangeEvent {
            table: table.to_string(),
            op,
            row_id,
        };
        let listeners = self.listeners.read();
        for entry in listeners.iter().filter(|e| e.table == table) {
            (entry.listener)(&event);
        }
    }

    fn listing_for(&self, car: Car) -> CarListing {
        let provider_name = self
            .profiles
            .get(&car.provider_id)
            .map(|p| p.full_name.clone())
            .unwrap_or_default();
        let windows = self
            .windows
            .read()
            .iter()
            .filter(|w| w.car_id == car.id)
            .cloned()
            .collect();
        let booking_count = self
            .bookings
            .iter()
            .filter(|entry| entry.value().car_id == car.id)
            .count();

        CarListing {
            car,
            provider_name,
            windows,
            booking_count,
        }
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn list_cars(&self) -> Result<Vec<CarListing>, StoreError> {
        self.check_failure()?;
        let mut listings: Vec<CarListing> = self
            .cars
            .iter()
            .map(|entry| self.listing_for(entry.value().clone()))
            .collect();
        listings.sort_by(|a, b| a.car.id.cmp(&b.car.id));
        Ok(listings)
    }

    async fn get_car(&self, car_id: &str) -> Result<CarListing, StoreError> {
        self.check_failure()?;
        let car = self
            .cars
            .get(car_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found("cars", car_id))?;
        Ok(self.listing_for(car))
    }

    async fn insert_car(&self, mut car: Car) -> Result<Car, StoreError> {
        self.check_failure()?;
        if car.id.is_empty() {
            car.id = generated_id("car");
        }
        debug!(car_id = %car.id, "inserting car");
        self.cars.insert(car.id.clone(), car.clone());
        self.notify("cars", ChangeOp::Insert, Some(car.id.clone()));
        Ok(car)
    }

    async fn update_car(&self, car_id: &str, patch: CarPatch) -> Result<(), StoreError> {
        self.check_failure()?;
        {
            let mut entry = self
                .cars
                .get_mut(car_id)
                .ok_or_else(|| StoreError::not_found("cars", car_id))?;
            let car = entry.value_mut();
            if let Some(model) = patch.model {
                car.model = model;
            }
            if let Some(year) = patch.year {
                car.year = year;
            }
            if let Some(license_plate) = patch.license_plate {
                car.license_plate = license_plate;
            }
            if let Some(seats) = patch.seats {
                car.seats = seats;
            }
            if let Some(daily_rate) = patch.daily_rate {
                car.daily_rate = daily_rate;
            }
            if let Some(description) = patch.description {
                car.description = Some(description);
            }
            if let Some(image_url) = patch.image_url {
                car.image_url = Some(image_url);
            }
        }
        self.notify("cars", ChangeOp::Update, Some(car_id.to_string()));
        Ok(())
    }

    async fn insert_booking(&self, mut booking: Booking) -> Result<Booking, StoreError> {
        self.check_failure()?;
        if booking.id.is_empty() {
            booking.id = generated_id("booking");
        }
        debug!(booking_id = %booking.id, car_id = %booking.car_id, "inserting booking");
        self.bookings.insert(booking.id.clone(), booking.clone());
        self.notify("bookings", ChangeOp::Insert, Some(booking.id.clone()));
        Ok(booking)
    }

    async fn get_booking(&self, booking_id: &str) -> Result<Booking, StoreError> {
        self.check_failure()?;
        self.bookings
            .get(booking_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found("bookings", booking_id))
    }

    async fn update_booking(
        &self,
        booking_id: &str,
        patch: BookingPatch,
    ) -> Result<(), StoreError> {
        self.check_failure()?;
        {
            let mut entry = self
                .bookings
                .get_mut(booking_id)
                .ok_or_else(|| StoreError::not_found("bookings", booking_id))?;
            let booking = entry.value_mut();
            if let Some(from) = patch.from {
                booking.from = from;
            }
            if let Some(to) = patch.to {
                booking.to = to;
            }
            if let Some(amount) = patch.amount {
                booking.amount = amount;
            }
            if let Some(status) = patch.status {
                booking.status = status;
            }
        }
        self.notify("bookings", ChangeOp::Update, Some(booking_id.to_string()));
        Ok(())
    }

    async fn list_bookings_for_cars(
        &self,
        car_ids: &[String],
    ) -> Result<Vec<Booking>, StoreError> {
        self.check_failure()?;
        let mut bookings: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|entry| car_ids.contains(&entry.value().car_id))
            .map(|entry| entry.value().clone())
            .collect();
        bookings.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(bookings)
    }

    async fn replace_unavailability(
        &self,
        car_id: &str,
        mut window: UnavailabilityWindow,
    ) -> Result<(), StoreError> {
        self.check_failure()?;
        if !self.cars.contains_key(car_id) {
            return Err(StoreError::not_found("cars", car_id));
        }
        if window.id.is_empty() {
            window.id = generated_id("window");
        }
        window.car_id = car_id.to_string();
        {
            // One write guard covers delete and insert, so no reader ever
            // observes the car with zero windows mid-replacement.
            let mut windows = self.windows.write();
            windows.retain(|w| !(w.car_id == car_id && w.unavailable));
            windows.push(window);
        }
        self.notify("unavailability", ChangeOp::Update, Some(car_id.to_string()));
        Ok(())
    }

    async fn insert_customer_details(
        &self,
        mut details: CustomerDetails,
    ) -> Result<CustomerDetails, StoreError> {
        self.check_failure()?;
        if details.id.is_empty() {
            details.id = generated_id("details");
        }
        self.details.insert(details.id.clone(), details.clone());
        self.notify(
            "customer_details",
            ChangeOp::Insert,
            Some(details.id.clone()),
        );
        Ok(details)
    }

    async fn current_user(&self) -> Result<Option<String>, StoreError> {
        self.check_failure()?;
        Ok(self.signed_in.lock().clone())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        self.check_failure()?;
        self.profiles
            .get(user_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found("profiles", user_id))
    }

    async fn upload_image(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<String, StoreError> {
        self.check_failure()?;
        let key = format!("{}/{}", bucket, path);
        self.objects.insert(key.clone(), data);
        Ok(format!("memory://{}", key))
    }

    fn subscribe(&self, table: &str, listener: ChangeListener) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push(ListenerEntry {
            id,
            table: table.to_string(),
            listener,
        });

        // The handle holds the listener list, not the whole store.
        let listeners = Arc::clone(&self.listeners);
        Subscription::new(move || {
            listeners.write().retain(|entry| entry.id != id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BookingStatus, Role};
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn provider_profile(id: &str) -> Profile {
        Profile {
            id: id.to_string(),
            role: Role::Provider,
            full_name: "Pat Provider".to_string(),
            phone: "555-0100".to_string(),
        }
    }

    fn car(id: &str, provider_id: &str) -> Car {
        Car {
            id: id.to_string(),
            provider_id: provider_id.to_string(),
            model: "Corolla".to_string(),
            year: 2021,
            license_plate: "ABC-123".to_string(),
            seats: 5,
            daily_rate: 50.0,
            description: None,
            image_url: None,
        }
    }

    fn window(car_id: &str, from: &str, to: &str) -> UnavailabilityWindow {
        UnavailabilityWindow {
            id: String::new(),
            car_id: car_id.to_string(),
            from: d(from),
            to: d(to),
            unavailable: true,
        }
    }

    #[tokio::test]
    async fn test_listing_embeds_provider_and_windows() {
        let store = MemoryStore::new();
        store.add_profile(provider_profile("prov1"));
        store.insert_car(car("car1", "prov1")).await.unwrap();
        store
            .replace_unavailability("car1", window("car1", "2024-06-10", "2024-06-15"))
            .await
            .unwrap();

        let listing = store.get_car("car1").await.unwrap();
        assert_eq!(listing.provider_name, "Pat Provider");
        assert_eq!(listing.windows.len(), 1);
        assert_eq!(listing.booking_count, 0);
    }

    #[tokio::test]
    async fn test_replace_unavailability_is_replace_not_append() {
        let store = MemoryStore::new();
        store.add_profile(provider_profile("prov1"));
        store.insert_car(car("car1", "prov1")).await.unwrap();

        store
            .replace_unavailability("car1", window("car1", "2024-06-10", "2024-06-15"))
            .await
            .unwrap();
        store
            .replace_unavailability("car1", window("car1", "2024-07-01", "2024-07-05"))
            .await
            .unwrap();

        let listing = store.get_car("car1").await.unwrap();
        assert_eq!(listing.windows.len(), 1);
        assert_eq!(listing.windows[0].from, d("2024-07-01"));
        assert_eq!(listing.windows[0].to, d("2024-07-05"));
    }

    #[tokio::test]
    async fn test_replace_unavailability_scoped_to_one_car() {
        let store = MemoryStore::new();
        store.add_profile(provider_profile("prov1"));
        store.insert_car(car("car1", "prov1")).await.unwrap();
        store.insert_car(car("car2", "prov1")).await.unwrap();

        store
            .replace_unavailability("car1", window("car1", "2024-06-10", "2024-06-15"))
            .await
            .unwrap();
        store
            .replace_unavailability("car2", window("car2", "2024-07-01", "2024-07-05"))
            .await
            .unwrap();

        let car1 = store.get_car("car1").await.unwrap();
        assert_eq!(car1.windows.len(), 1);
        assert_eq!(car1.windows[0].from, d("2024-06-10"));
    }

    #[tokio::test]
    async fn test_failure_injection_rejects_then_recovers() {
        let store = MemoryStore::new();
        store.fail_next_requests(1);

        let err = store.insert_car(car("car1", "prov1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        // The next attempt goes through.
        assert!(store.insert_car(car("car1", "prov1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscription_fires_and_drop_deregisters() {
        use std::sync::atomic::AtomicUsize;

        let store = MemoryStore::new();
        store.add_profile(provider_profile("prov1"));
        store.insert_car(car("car1", "prov1")).await.unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let sub = store.subscribe(
            "bookings",
            Arc::new(move |event: &ChangeEvent| {
                assert_eq!(event.table, "bookings");
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let booking = Booking {
            id: String::new(),
            car_id: "car1".to_string(),
            customer_id: "cust1".to_string(),
            from: d("2024-06-01"),
            to: d("2024-06-02"),
            amount: 100.0,
            status: BookingStatus::Pending,
        };
        store.insert_booking(booking.clone()).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Car changes do not reach a bookings listener.
        store
            .update_car("car1", CarPatch { seats: Some(4), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(sub);
        store.insert_booking(booking).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_image_returns_public_url() {
        let store = MemoryStore::new();
        let url = store
            .upload_image(
                "car-images",
                "cars/car1/photo.jpg",
                Bytes::from_static(b"jpeg-bytes"),
                "image/jpeg",
            )
            .await
            .unwrap();
        assert_eq!(url, "memory://car-images/cars/car1/photo.jpg");
        assert!(store.object_exists("car-images", "cars/car1/photo.jpg"));
    }
}
