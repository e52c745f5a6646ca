pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod monitor;
pub mod poller;
pub mod state;
