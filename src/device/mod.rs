pub mod btle;
pub mod constants;
pub mod holder;
pub mod mock;
pub mod scanner;
pub mod session;
pub mod state;
pub mod types;
