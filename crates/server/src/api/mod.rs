pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod transcodes;

pub use routes::create_router;
