//! The four pipeline stage handlers.

mod aggregation;
mod classification;
mod intake;
mod registration;

pub use aggregation::AggregationHandler;
pub use classification::ClassificationHandler;
pub use intake::IntakeHandler;
pub use registration::RegistrationHandler;
