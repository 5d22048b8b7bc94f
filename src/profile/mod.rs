pub mod policy;
pub mod registry;
pub mod service;
