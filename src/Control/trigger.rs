// When a control loop exchanges: per measurement, or per period from a cache.

use std::time::Duration;

use crate::Exchange::Structs::Message;

/// Decides which measurements turn into an exchange.
///
/// A policy is selected when the loop is constructed. The loop calls
/// `on_measurement` for every reported measurement and `on_timer` every time
/// its owner's timer fires; whichever returns `Some` is exchanged right away.
pub trait TriggerPolicy<O: Message> {
    fn on_measurement(&mut self, measurement: O) -> Option<O>;

    fn on_timer(&mut self) -> Option<O>;

    /// Period the owner should fire `on_timer` at, if the policy is timed.
    fn period(&self) -> Option<Duration>;
}

/// One exchange per reported measurement. Timers are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnMeasurement;

impl<O: Message> TriggerPolicy<O> for OnMeasurement {
    fn on_measurement(&mut self, measurement: O) -> Option<O> {
        Some(measurement)
    }

    fn on_timer(&mut self) -> Option<O> {
        None
    }

    fn period(&self) -> Option<Duration> {
        None
    }
}

/// One exchange per period with the most recent measurement.
///
/// Measurements only refresh the cache, so a burst of them never floods the
/// decision process and a quiet stretch never stalls the timer: before the
/// first measurement the initial observation is sent.
#[derive(Debug, Clone)]
pub struct OnTimerWithCache<O: Message> {
    period: Duration,
    cached: O,
    fresh: bool,
    refreshes: u64,
}

impl<O: Message> OnTimerWithCache<O> {
    pub fn new(period: Duration) -> Self {
        Self::with_initial(period, O::default())
    }

    pub fn with_initial(period: Duration, initial: O) -> Self {
        Self {
            period,
            cached: initial,
            fresh: false,
            refreshes: 0,
        }
    }

    pub fn cached(&self) -> &O {
        &self.cached
    }

    /// True if a measurement arrived since the last timer fire.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Measurements folded into the cache so far.
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }
}

impl<O: Message> TriggerPolicy<O> for OnTimerWithCache<O> {
    fn on_measurement(&mut self, measurement: O) -> Option<O> {
        self.cached = measurement;
        self.fresh = true;
        self.refreshes += 1;
        None
    }

    fn on_timer(&mut self) -> Option<O> {
        self.fresh = false;
        Some(self.cached)
    }

    fn period(&self) -> Option<Duration> {
        Some(self.period)
    }
}
