//! Application layer: wiring and the caller-facing API.

pub mod api;
pub mod builder;
pub mod status;

pub use self::api::{CancelResponse, ControlApi, DeleteResponse, StartResponse, SubmitResponse};
pub use self::builder::{BuildError, EngineBuilder};
pub use self::status::{JobStatusSnapshot, JobView};
