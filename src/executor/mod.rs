pub mod coordinator;
pub mod input;
