pub mod bridge;
pub mod shell;
pub mod skills;
pub mod subagents;
