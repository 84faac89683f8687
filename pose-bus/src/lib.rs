pub mod artifact;
pub mod bus;
pub mod compositor;
pub mod error;
pub mod frame;
pub mod inference_log;
pub mod model;
pub mod pipeline;
pub mod recording;
pub mod registry;
pub mod replay;
pub mod source;
pub mod throughput;
pub mod types;

#[cfg(test)]
mod testing;
