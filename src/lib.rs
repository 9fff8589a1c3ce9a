// Oxidized Analyst - ask questions about tabular data in plain language

pub mod config;
pub mod types;
pub mod models;
pub mod dataset;
pub mod llm;
pub mod query;
pub mod session;
pub mod routes;
pub mod middleware;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
