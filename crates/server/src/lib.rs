pub mod api;
pub mod collaborators;
pub mod metrics;
pub mod state;
