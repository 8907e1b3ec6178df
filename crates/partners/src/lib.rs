//! Outbound integrations with downstream partners (passenger messaging,
//! baggage handling).
pub mod client;
pub mod updater;

pub use client::{sign, PartnerClient, HEADER_EVENT_ID, HEADER_SIGNATURE};
pub use updater::{NotifierSet, NotifyError, StatusUpdater};
