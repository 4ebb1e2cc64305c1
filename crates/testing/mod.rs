//! In-memory repositories and fake collaborators with the same conditional
//! update semantics as the Postgres implementations. Compiled for this
//! crate's tests and, through the `test-support` feature, for dependents.

pub mod fakes;
pub mod fixtures;
pub mod in_memory;
pub mod system;
