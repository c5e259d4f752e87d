pub mod rejection_log;

pub use rejection_log::*;
