pub mod health;
pub mod limits;
pub mod routes;

pub use routes::{create_router, AppState};
