pub mod aggregator;
pub mod detector;
pub mod dispatcher;
pub mod processor;
pub mod sampler;
pub mod storage;
