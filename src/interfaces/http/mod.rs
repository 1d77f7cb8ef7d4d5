pub mod routes;
pub mod ws;

pub use routes::build_router;
