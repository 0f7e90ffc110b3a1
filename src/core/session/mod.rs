// Session module - Session controller and adaptive read loop
pub mod reader;
pub mod session;
pub mod state;

pub use reader::ReaderStrategy;
pub use session::Session;
pub use state::{ConnectOutcome, SessionState};
