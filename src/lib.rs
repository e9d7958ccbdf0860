pub mod bus;
pub mod generator;
pub mod memory;
pub mod processor;
pub mod request;
pub mod run_wrapper;

pub mod error;
