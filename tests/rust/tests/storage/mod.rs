//! Storage layer integration tests.
