// Booking core for the car-rental front end: availability checks, pricing,
// and the booking workflow state machine, all over a narrow data-service
// boundary. Persistence, auth, storage and the change feed live in the
// managed backend behind the DataStore trait.

pub mod availability;
pub mod catalog;
pub mod dashboard;
pub mod domain;
pub mod pricing;
pub mod rest;
pub mod session;
pub mod store;
pub mod workflow;

// Re-export key types for convenience
pub use availability::{annotate, filter_available, is_available, UNKNOWN_AVAILABILITY_DEFAULT};
pub use catalog::{CarCatalog, CatalogError, NewCar};
pub use dashboard::{DashboardError, DashboardSnapshot, ProviderDashboard};
pub use domain::{
    Booking, BookingPatch, BookingStatus, Car, CarListing, CarPatch, CustomerDetails, DateRange,
    Profile, Role, UnavailabilityWindow,
};
pub use pricing::{compute_amount, day_count};
pub use rest::{RestConfig, RestStore};
pub use session::{ListenerHandle, SessionContext, SessionEvent, SessionUser};
pub use store::{
    ChangeEvent, ChangeListener, ChangeOp, DataStore, MemoryStore, StoreError, Subscription,
};
pub use workflow::{BookingWorkflow, CustomerDetailsForm, WorkflowError};
