//! Storage backends for the coordinator.

pub mod memory;
pub mod traits;

pub use self::{
    memory::MemoryStore,
    traits::{
        Cas,
        Conflict,
        RoundStore,
        StorageError,
        StorageResult,
        SubmissionAdd,
        SubmissionAddError,
    },
};
