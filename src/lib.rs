pub mod analysis;
pub mod config;
pub mod context;
pub mod errors;
pub mod pipeline;
pub mod refactor;
pub mod review;
pub mod sandbox;
pub mod task;
