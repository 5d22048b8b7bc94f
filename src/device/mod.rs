pub mod address;
pub mod constants;
pub mod state_machine;
pub mod timer;
pub mod types;
