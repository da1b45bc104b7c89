// Timing and sampling primitives for the charge loop
// Single core, no preemption. The charge task is the only writer;
// everything else reads the published snapshot or sends commands.
//
// debounce: N-in-a-row confirmation with bypass classes
// sample:   fixed-capacity rings with percentile and mean readouts
// scheduler: 100ms tick driver and lifecycle command queue

pub mod debounce;
pub mod sample;
pub mod scheduler;
pub mod snapshot;
pub mod tasks;

pub use scheduler::{ChargeScheduler, Command};
pub use snapshot::{CHARGE_STATUS, SharedSnapshot, Snapshot};
