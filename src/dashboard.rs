// Provider dashboard: incoming bookings for the provider's cars, refreshed
// wholesale whenever the bookings table reports any change. The feed is a
// coarse invalidation trigger; the snapshot is always rebuilt from a full
// re-read, never patched incrementally.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::domain::{Booking, BookingStatus, CarListing, Role};
use crate::session::SessionContext;
use crate::store::{ChangeListener, DataStore, StoreError, Subscription};

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Sign in required")]
    AuthRequired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for DashboardError {
    fn from(err: StoreError) -> Self {
        DashboardError::Backend(err.to_string())
    }
}

// One full read of the provider's cars and their bookings.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub cars: Vec<CarListing>,
    pub bookings: Vec<Booking>,
}

impl DashboardSnapshot {
    // Confirmed bookings are the ones the dashboard surfaces prominently;
    // a booking only shows up here after the customer's finalize step.
    pub fn confirmed(&self) -> Vec<&Booking> {
        self.with_status(BookingStatus::Confirmed)
    }

    pub fn with_status(&self, status: BookingStatus) -> Vec<&Booking> {
        self.bookings.iter().filter(|b| b.status == status).collect()
    }
}

#[derive(Clone)]
pub struct ProviderDashboard {
    store: Arc<dyn DataStore>,
    session: SessionContext,
}

impl ProviderDashboard {
    pub fn new(store: Arc<dyn DataStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    fn require_provider(&self) -> Result<String, DashboardError> {
        let user = self.session.current().ok_or(DashboardError::AuthRequired)?;
        if user.profile.role != Role::Provider {
            return Err(DashboardError::Forbidden(
                "provider account required".to_string(),
            ));
        }
        Ok(user.user_id)
    }

    // Full re-read: the provider's cars, then every booking against them.
    pub async fn refresh(&self) -> Result<DashboardSnapshot, DashboardError> {
        let provider_id = self.require_provider()?;

        let cars: Vec<CarListing> = self
            .store
            .list_cars()
            .await?
            .into_iter()
            .filter(|listing| listing.car.provider_id == provider_id)
            .collect();

        let car_ids: Vec<String> = cars.iter().map(|listing| listing.car.id.clone()).collect();
        let bookings = self.store.list_bookings_for_cars(&car_ids).await?;

        debug!(
            provider_id = %provider_id,
            cars = cars.len(),
            bookings = bookings.len(),
            "dashboard refreshed"
        );
        Ok(DashboardSnapshot { cars, bookings })
    }

    // Fires the callback on any bookings-table change; the caller is
    // expected to respond by calling refresh(). Dropping the subscription
    // stops the notifications.
    pub fn watch(&self, on_change: ChangeListener) -> Subscription {
        self.store.subscribe("bookings", on_change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Booking, Car, Profile};
    use crate::session::{SessionEvent, SessionUser};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn profile(id: &str, role: Role) -> Profile {
        Profile {
            id: id.to_string(),
            role,
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

    fn booking(car_id: &str, status: BookingStatus) -> Booking {
        Booking {
            id: String::new(),
            car_id: car_id.to_string(),
            customer_id: "cust1".to_string(),
            from: d("2024-07-01"),
            to: d("2024-07-04"),
            amount: 200.0,
            status,
        }
    }

    async fn setup() -> (Arc<MemoryStore>, ProviderDashboard) {
        let store = MemoryStore::new();
        store.add_profile(profile("prov1", Role::Provider));
        store.add_profile(profile("prov2", Role::Provider));
        store.insert_car(car("car1", "prov1")).await.unwrap();
        store.insert_car(car("car2", "prov2")).await.unwrap();

        let session = SessionContext::new();
        session.dispatch(SessionEvent::SignedIn(SessionUser {
            user_id: "prov1".to_string(),
            profile: profile("prov1", Role::Provider),
        }));

        let dashboard = ProviderDashboard::new(store.clone() as Arc<dyn DataStore>, session);
        (store, dashboard)
    }

    #[tokio::test]
    async fn test_refresh_scopes_to_own_cars() -> anyhow::Result<()> {
        let (store, dashboard) = setup().await;
        store
            .insert_booking(booking("car1", BookingStatus::Pending))
            .await?;
        store
            .insert_booking(booking("car2", BookingStatus::Pending))
            .await?;

        let snapshot = dashboard.refresh().await?;
        assert_eq!(snapshot.cars.len(), 1);
        assert_eq!(snapshot.cars[0].car.id, "car1");
        assert_eq!(snapshot.bookings.len(), 1);
        assert_eq!(snapshot.bookings[0].car_id, "car1");
        Ok(())
    }

    #[tokio::test]
    async fn test_confirmed_filter_tracks_finalize() -> anyhow::Result<()> {
        let (store, dashboard) = setup().await;
        let pending = store
            .insert_booking(booking("car1", BookingStatus::Pending))
            .await?;

        let snapshot = dashboard.refresh().await?;
        assert!(snapshot.confirmed().is_empty());
        assert_eq!(snapshot.with_status(BookingStatus::Pending).len(), 1);

        store
            .update_booking(
                &pending.id,
                crate::domain::BookingPatch {
                    status: Some(BookingStatus::Confirmed),
                    ..Default::default()
                },
            )
            .await?;

        let snapshot = dashboard.refresh().await?;
        assert_eq!(snapshot.confirmed().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_watch_fires_on_booking_change_and_refresh_sees_it() -> anyhow::Result<()> {
        let (store, dashboard) = setup().await;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let sub = dashboard.watch(Arc::new(move |_event| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));

        store
            .insert_booking(booking("car1", BookingStatus::Pending))
            .await?;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // The notification carries no payload worth using; the dashboard
        // re-reads instead.
        let snapshot = dashboard.refresh().await?;
        assert_eq!(snapshot.bookings.len(), 1);

        drop(sub);
        store
            .insert_booking(booking("car1", BookingStatus::Pending))
            .await?;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_requires_provider() {
        let (_store, dashboard) = setup().await;

        dashboard.session.dispatch(SessionEvent::SignedIn(SessionUser {
            user_id: "cust1".to_string(),
            profile: profile("cust1", Role::Customer),
        }));
        let err = dashboard.refresh().await.unwrap_err();
        assert!(matches!(err, DashboardError::Forbidden(_)));

        dashboard.session.dispatch(SessionEvent::SignedOut);
        let err = dashboard.refresh().await.unwrap_err();
        assert!(matches!(err, DashboardError::AuthRequired));
    }
}
