//! HTTP surface: state, handlers and routing.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
