//! Runtime composition: wiring the gateway, memory, sessions, executor and
//! channel gateway together from configuration.

pub mod bootstrap;

pub use bootstrap::{
    build_executor, build_gateway, build_memory, build_summarizer, executor_config,
    ExecutorBridge,
};
