//! Integration test suite for zoneops.
//!
//! These tests run whole sessions against an in-memory inventory and real
//! `bash` scripts written to temporary directories.
//!
//! # Test Categories
//!
//! - `session_e2e`: full operation sessions, from request to final frame
//! - `phase_ordering`: barriers between ordered phases
//! - `placement`: zone allocation through the public engine
//! - `timeouts`: backend timeouts and partial output

mod fixtures;

mod phase_ordering;
mod placement;
mod session_e2e;
mod timeouts;
