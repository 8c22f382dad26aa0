// Booking workflow state machine: pending -> confirmed via a two-phase
// details-then-finalize sequence, with pending -> cancelled and
// confirmed -> completed as the remaining legal transitions.
//
// Availability is advisory and checked at browse time only; nothing here
// re-validates it at write time, so overlapping pending bookings for the
// same car can coexist. That is the backend's observed contract, kept on
// purpose rather than patched over with a uniqueness constraint.

use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Booking, BookingPatch, BookingStatus, CustomerDetails, Role};
use crate::pricing::compute_amount;
use crate::session::SessionContext;
use crate::store::{DataStore, StoreError};

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Validation error: {0}")]
    Validation(String),

    // The caller should redirect to sign-in and retry.
    #[error("Sign in required")]
    AuthRequired,

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        WorkflowError::Backend(err.to_string())
    }
}

// Form payload for the payment-step detail capture. Every field required.
#[derive(Debug, Clone)]
pub struct CustomerDetailsForm {
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
}

impl CustomerDetailsForm {
    fn validate(&self) -> Result<(), WorkflowError> {
        let required = [
            ("full name", &self.full_name),
            ("phone", &self.phone),
            ("email", &self.email),
            ("emergency contact name", &self.emergency_contact_name),
            ("emergency contact phone", &self.emergency_contact_phone),
        ];
        for (label, value) in required {
            if value.trim().is_empty() {
                return Err(WorkflowError::Validation(format!("{} is required", label)));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct BookingWorkflow {
    store: Arc<dyn DataStore>,
    session: SessionContext,
}

impl BookingWorkflow {
    pub fn new(store: Arc<dyn DataStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    fn require_customer(&self) -> Result<String, WorkflowError> {
        let user = self.session.current().ok_or(WorkflowError::AuthRequired)?;
        if user.profile.role != Role::Customer {
            return Err(WorkflowError::AuthRequired);
        }
        Ok(user.user_id)
    }

    fn validate_range(
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<(NaiveDate, NaiveDate), WorkflowError> {
        let from = from.ok_or_else(|| {
            WorkflowError::Validation("pick-up date is required".to_string())
        })?;
        let to = to.ok_or_else(|| {
            WorkflowError::Validation("return date is required".to_string())
        })?;
        if from > to {
            return Err(WorkflowError::Validation(
                "return date must not be before the pick-up date".to_string(),
            ));
        }
        Ok((from, to))
    }

    // Creates a pending booking for the signed-in customer. Both range ends
    // are required; the amount is priced here and stored on the row. No
    // double-booking lock is taken.
    pub async fn create_booking(
        &self,
        car_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        daily_rate: f64,
    ) -> Result<Booking, WorkflowError> {
        let customer_id = self.require_customer()?;
        let (from, to) = Self::validate_range(from, to)?;
        let amount = compute_amount(from, to, daily_rate);

        let booking = self
            .store
            .insert_booking(Booking {
                id: String::new(),
                car_id: car_id.to_string(),
                customer_id,
                from,
                to,
                amount,
                status: BookingStatus::Pending,
            })
            .await?;

        info!(booking_id = %booking.id, car_id, amount, "booking created");
        Ok(booking)
    }

    // Overwrites the dates on a pending booking owned by the caller and
    // reprices it with the same formula used at creation. Availability is
    // not re-validated against other bookings.
    pub async fn edit_booking_dates(
        &self,
        booking_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        daily_rate: f64,
    ) -> Result<Booking, WorkflowError> {
        let customer_id = self.require_customer()?;
        let (from, to) = Self::validate_range(from, to)?;

        let booking = self.store.get_booking(booking_id).await?;
        if booking.customer_id != customer_id {
            return Err(WorkflowError::Validation(
                "booking belongs to another customer".to_string(),
            ));
        }
        if booking.status != BookingStatus::Pending {
            return Err(WorkflowError::Validation(
                "only pending bookings can be edited".to_string(),
            ));
        }

        let amount = compute_amount(from, to, daily_rate);
        self.store
            .update_booking(
                booking_id,
                BookingPatch {
                    from: Some(from),
                    to: Some(to),
                    amount: Some(amount),
                    status: None,
                },
            )
            .await?;

        info!(booking_id, amount, "booking dates edited");
        self.store.get_booking(booking_id).await.map_err(Into::into)
    }

    // Phase one of confirmation: persists the contact details row. Status
    // is deliberately untouched so a failed or abandoned payment step can
    // be retried without unwinding anything.
    pub async fn submit_customer_details(
        &self,
        booking_id: &str,
        form: CustomerDetailsForm,
    ) -> Result<CustomerDetails, WorkflowError> {
        let customer_id = self.require_customer()?;
        form.validate()?;

        let details = self
            .store
            .insert_customer_details(CustomerDetails {
                id: String::new(),
                booking_id: booking_id.to_string(),
                customer_id,
                full_name: form.full_name,
                phone: form.phone,
                email: form.email,
                emergency_contact_name: form.emergency_contact_name,
                emergency_contact_phone: form.emergency_contact_phone,
            })
            .await?;

        info!(booking_id, "customer details captured");
        Ok(details)
    }

    // Phase two: flips the booking to confirmed, making it visible on the
    // provider dashboard. Idempotent: finalizing an already-confirmed
    // booking is a no-op success, so a failed call is retried by calling
    // again.
    pub async fn finalize_booking(&self, booking_id: &str) -> Result<Booking, WorkflowError> {
        let booking = self.store.get_booking(booking_id).await?;

        if booking.status == BookingStatus::Confirmed {
            return Ok(booking);
        }
        if !booking.status.can_transition_to(BookingStatus::Confirmed) {
            warn!(booking_id, status = ?booking.status, "finalize rejected");
            return Err(WorkflowError::Validation(format!(
                "a {:?} booking cannot be confirmed",
                booking.status
            )));
        }

        self.store
            .update_booking(
                booking_id,
                BookingPatch {
                    status: Some(BookingStatus::Confirmed),
                    ..Default::default()
                },
            )
            .await?;

        info!(booking_id, "booking confirmed");
        self.store.get_booking(booking_id).await.map_err(Into::into)
    }

    // pending -> cancelled.
    pub async fn cancel_booking(&self, booking_id: &str) -> Result<Booking, WorkflowError> {
        self.transition(booking_id, BookingStatus::Cancelled).await
    }

    // confirmed -> completed, once the rental period is over.
    pub async fn complete_booking(&self, booking_id: &str) -> Result<Booking, WorkflowError> {
        self.transition(booking_id, BookingStatus::Completed).await
    }

    async fn transition(
        &self,
        booking_id: &str,
        next: BookingStatus,
    ) -> Result<Booking, WorkflowError> {
        let booking = self.store.get_booking(booking_id).await?;
        if !booking.status.can_transition_to(next) {
            return Err(WorkflowError::Validation(format!(
                "a {:?} booking cannot become {:?}",
                booking.status, next
            )));
        }

        self.store
            .update_booking(
                booking_id,
                BookingPatch {
                    status: Some(next),
                    ..Default::default()
                },
            )
            .await?;
        self.store.get_booking(booking_id).await.map_err(Into::into)
    }
}
