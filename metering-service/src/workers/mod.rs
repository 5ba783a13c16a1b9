pub mod aggregation;

pub use aggregation::AggregationWorker;
