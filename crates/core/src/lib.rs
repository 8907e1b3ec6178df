//! Domain layer shared by the HTTP surface, storage and partner integrations.
//!
//! Nothing in this crate performs I/O: it holds the flight model, the change
//! planner used by flight operations, and input validation for the
//! administrative endpoints.
pub mod change;
pub mod input;
pub mod types;
pub mod validation;

pub use change::{plan_change, plan_details, render_time, ChangePlan, FlightChange, TimesChange};
pub use validation::ValidationErrors;
