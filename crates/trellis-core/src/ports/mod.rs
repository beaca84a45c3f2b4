//! Ports: the seams between the engine and its infrastructure.

pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{
    JobGuard, JobMutation, JobSnapshot, Store, StoreError, TaskBatchMutation, TaskMutation,
};
