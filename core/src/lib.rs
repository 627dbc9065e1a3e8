pub mod error;
pub mod monitors;
pub mod projections;
