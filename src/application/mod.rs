pub mod history;
pub mod orchestrator;
pub mod parser;
pub mod registry;
pub mod tools;
