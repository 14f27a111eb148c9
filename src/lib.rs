pub mod agent;
pub mod config;
pub mod exchange;
pub mod llm;
