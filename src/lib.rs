// System metrics collection engine: per-metric sources over kernel/driver
// counters, a TTL cache layer, the aggregator and the adaptive poll controller.

pub mod adaptive;
pub mod cache;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod models;
pub mod reader;
pub mod repo;
pub mod sources;
