// Availability check used at browse/filter time. This is advisory only:
// nothing re-validates availability when a booking row is written, so two
// sessions can still race to book the same car (see the workflow tests).

use crate::domain::{CarListing, DateRange, UnavailabilityWindow};

// Policy for cars with no usable availability data: treat them as bookable.
// An unknown car is available, not blocked. Named so tests can target it.
pub const UNKNOWN_AVAILABILITY_DEFAULT: bool = true;

// True when the car can be booked for the requested range.
//
// Only windows flagged `unavailable` count. A request with no range (either
// bound missing upstream collapses to `None` here) or a car with no windows
// falls back to UNKNOWN_AVAILABILITY_DEFAULT. Otherwise the car is blocked
// iff any unavailable window overlaps the request under inclusive
// interval-intersection semantics, endpoints included.
pub fn is_available(windows: &[UnavailabilityWindow], requested: Option<DateRange>) -> bool {
    let Some(range) = requested else {
        return UNKNOWN_AVAILABILITY_DEFAULT;
    };

    if windows.is_empty() {
        return UNKNOWN_AVAILABILITY_DEFAULT;
    }

    let blocked = windows
        .iter()
        .filter(|w| w.unavailable)
        .any(|w| range.overlaps(&DateRange::new(w.from, w.to)));

    !blocked
}

// Annotate each listing with its bookability for the requested range.
pub fn annotate(
    listings: Vec<CarListing>,
    requested: Option<DateRange>,
) -> Vec<(CarListing, bool)> {
    listings
        .into_iter()
        .map(|listing| {
            let available = is_available(&listing.windows, requested);
            (listing, available)
        })
        .collect()
}

// Keep only the listings bookable for the requested range.
pub fn filter_available(listings: Vec<CarListing>, requested: Option<DateRange>) -> Vec<CarListing> {
    listings
        .into_iter()
        .filter(|listing| is_available(&listing.windows, requested))
        .collect()
}
