pub mod config;

pub use config::RunnerConfig;
