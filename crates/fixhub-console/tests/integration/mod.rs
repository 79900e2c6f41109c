//! Integration tests for fixhub-console.
//!
//! These tests drive the dashboard controller against an in-process hub:
//! - Credential gate and teardown
//! - Resource synchronization and the mutation gate
//! - Session polling, disconnect and the live feed

pub mod common;
