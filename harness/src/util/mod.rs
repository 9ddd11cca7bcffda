pub mod wait;

pub use wait::{wait_for_success, Deadline, WaitConfig};
