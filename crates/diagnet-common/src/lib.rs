//! Shared types for the diagnet machine-telemetry platform.
//!
//! Defines the wire-facing reading DTO ([`types::RawReading`]), the validated
//! in-memory [`types::Reading`], the analysis result types, and the auth
//! request/response shapes exchanged over the REST surface. Validation of
//! incoming readings (range checks plus the cross-field quality rules) lives
//! in [`validate`].

pub mod types;
pub mod validate;
