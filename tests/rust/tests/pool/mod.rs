//! Connection pool integration tests.

mod catalog;
mod registry;
mod supervisor;
