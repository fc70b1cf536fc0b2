pub mod core;
pub mod exchange;
pub mod llm;
pub mod notifier;
pub mod observability;
pub mod persistence;
