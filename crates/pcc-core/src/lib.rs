pub mod autoscroll;
pub mod console_ipc;
pub mod env_config;
pub mod health;
pub mod log_buffer;
pub mod process_state;
pub mod query;
pub mod session;

pub use console_ipc::{ProcessCommand, ProcessId, WireEnvelope, WireMsg};
pub use log_buffer::LogBuffer;
pub use process_state::RunState;
pub use session::Session;
