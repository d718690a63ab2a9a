pub mod lifecycle;
pub mod observability;
