//! Web dashboard.
//!
//! Serves the configured figures to browsers over a websocket. Every
//! connected browser gets one view per figure; interactions in one browser
//! are applied to the server-side figure and pushed to all the others.

pub mod routes;
pub mod server;
pub mod session;
pub mod state;
pub mod templates;
pub mod websocket;

pub use server::start_dashboard;
pub use session::{ClientMessage, ServerMessage, SessionHandle};
pub use state::DashboardState;
