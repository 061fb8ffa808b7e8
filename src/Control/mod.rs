pub mod control_loop;
pub mod trigger;

pub use control_loop::{Actuator, ControlLoop, CycleOutcome, CyclePhase, LoopStats};
pub use trigger::{OnMeasurement, OnTimerWithCache, TriggerPolicy};
