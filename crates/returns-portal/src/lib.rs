//! Order lookup, normalization and return-eligibility evaluation for the
//! customer returns portal.

pub mod config;
pub mod error;
pub mod returns;
pub mod telemetry;
