use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::spike_sum::FiringRates;

#[derive(Debug, Clone, Default)]
pub struct RunControl {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldPoint {
    Timestep { trial: usize, t: usize },
    Paused { trial: usize },
}

pub trait FrontEnd {
    fn process_pending_events(&mut self, point: YieldPoint, control: &RunControl);

    fn publish_firing_rates(&mut self, _trial: usize, _rates: &FiringRates) {}
}
