pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{in_memory_state, AppState};
