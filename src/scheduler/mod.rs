// Batch driver and its schedule
pub mod batch;
pub mod schedule;

pub use batch::{BatchSummary, ReconciliationRun};
pub use schedule::{ReconciliationScheduler, ScheduleConfig, ScheduleFrequency};
