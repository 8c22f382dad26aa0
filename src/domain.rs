// Domain rows shared between the booking core and the backend data service.
// Every struct here crosses the wire as a JSON row, so all of them carry
// serde derives and backend-assigned String ids.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// Role fixed at signup; determines which workflows are reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Provider,
}

// One per authenticated identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub role: Role,
    pub full_name: String,
    pub phone: String,
}

// A listed car, owned by exactly one provider profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    pub id: String,
    pub provider_id: String,
    pub model: String,
    pub year: i32,
    pub license_plate: String,
    pub seats: u32,
    pub daily_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

// Partial update for a car row; None fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CarPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_plate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seats: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

// Car-owned date interval. Only rows with `unavailable == true` affect
// booking eligibility; `unavailable == false` rows are informational.
// Invariant: from <= to (enforced at the catalog boundary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailabilityWindow {
    pub id: String,
    pub car_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub unavailable: bool,
}

// Read shape returned by list_cars/get_car: the car row plus the embedded
// relations the browse page needs in one round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarListing {
    pub car: Car,
    pub provider_name: String,
    pub windows: Vec<UnavailabilityWindow>,
    pub booking_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    // Transition guard for the booking state machine. Confirmed -> Confirmed
    // is allowed so that a retried finalize is a no-op rather than an error.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Confirmed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }
}

// A customer's reservation of one car for an inclusive date range.
// amount = daily_rate * inclusive day count at creation time, recomputed
// with the same formula on a date edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub car_id: String,
    pub customer_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub amount: f64,
    pub status: BookingStatus,
}

// Partial update for a booking row.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BookingStatus>,
}

// Contact and emergency-contact details captured once per booking during
// the payment step. All fields required; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub id: String,
    pub booking_id: String,
    pub customer_id: String,
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
}

// Closed calendar-date interval, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    // Inclusive interval intersection: [a.from, a.to] and [b.from, b.to]
    // overlap iff a.from <= b.to && a.to >= b.from. Touching endpoints and
    // zero-length intervals count as overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.from <= other.to && self.to >= other.from
    }

    // Inclusive day count: a same-day range is one day, Mon-Tue is two.
    pub fn day_count(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    pub fn is_ordered(&self) -> bool {
        self.from <= self.to
    }
}
