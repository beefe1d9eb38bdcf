pub mod agent;
pub mod database;
pub mod prompts;
pub mod storage;
