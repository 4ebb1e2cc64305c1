pub mod domain;
pub mod infra;
pub mod observability;
pub mod payments;
pub mod realtime;
pub mod usecases;
pub mod utils;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
