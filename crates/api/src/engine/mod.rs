pub mod request;
pub mod runner;

pub use request::{CreateJobRequest, JobSpec};
pub use runner::JobRunner;
