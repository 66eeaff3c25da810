//! Common traits and helpers used across the httpecho library
//!
//! This module contains the traits that define the interface for echo
//! servers and clients, plus helpers for spinning up servers in tests.

pub mod test_utils;
pub mod traits;

pub use test_utils::{create_controlled_test_server_with_limit, create_test_server};
pub use traits::{EchoClient, EchoServerTrait};
