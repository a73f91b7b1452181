pub mod routes;
pub mod rpc;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
