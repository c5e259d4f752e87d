pub mod controller;
pub mod messages;
pub mod state;

pub use controller::*;
pub use state::*;
