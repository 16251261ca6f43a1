//! Process-level concerns for running the pipeline as a service.

pub mod shutdown;
