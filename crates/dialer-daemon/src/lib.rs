//! HTTP daemon: Control API (§6.1) + Provider Webhook ingress (§6.2) over a
//! shared [`state::AppState`]. Grounded on `mqk-daemon`'s
//! `routes`/`state`/`main` split.

pub mod api_types;
pub mod routes;
pub mod state;
mod webhook;

pub use routes::build_router;
pub use state::AppState;
