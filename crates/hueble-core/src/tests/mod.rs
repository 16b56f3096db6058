//! Test module for hueble-core
//!
//! Covers:
//! - Connection manager state machine against the fake transport
//! - Wire-level serialization of concurrent operations
//! - Pairing fallback and unsolicited disconnects
//! - Identity store and liveness marker persistence

mod manager_tests;
