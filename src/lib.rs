pub mod agent;
pub mod approval;
pub mod command;
pub mod config;
pub mod error;
pub mod gate;
pub mod launcher;
pub mod log;
pub mod queue;
pub mod review;
pub mod runtime;
pub mod skills;
pub mod spec;
pub mod supervisor;
pub mod workspace;

pub use agent::{AgentId, AgentState};
pub use error::{Error, Result};
pub use spec::AgentSpec;
pub use supervisor::{Supervisor, SupervisorOptions};
