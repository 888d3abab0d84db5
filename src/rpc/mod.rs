mod connection;
mod dispatcher;
mod session;
mod state;

pub use session::Session;
pub use state::SessionState;
