//! Test helper modules for dss-fulfill integration tests
//!
//! - MockUpstream: in-process fulfillment API (pending, permissions, queue actions)
//! - TestEngine: session + router wired to the mock upstream and an
//!   in-process live feed

#![allow(dead_code)]

pub mod mock_upstream;
pub mod test_engine;

pub use mock_upstream::MockUpstream;
pub use test_engine::{wait_for_buckets, TestEngine};
