use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};
use std::ops::Range;

use crate::error::{SimError, SimResult};
use crate::params::ConnectivityParams;
use crate::types::{CellType, NUM_CELL_TYPES};
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpikeWindow {
    Cs,
    NonCs,
}

impl SpikeWindow {
    pub fn of(t: usize, cs_window: &Range<usize>) -> Self {
        if util::in_window(t, cs_window) {
            SpikeWindow::Cs
        } else {
            SpikeWindow::NonCs
        }
    }
}

// `cs_spike_sum` always equals the sum of `cs_spike_counter`, likewise for the
// non-CS pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeSum {
    num_cells: usize,
    non_cs_spike_sum: u64,
    cs_spike_sum: u64,
    non_cs_spike_counter: Vec<u32>,
    cs_spike_counter: Vec<u32>,
}

impl SpikeSum {
    pub fn new(num_cells: usize) -> Self {
        Self {
            num_cells,
            non_cs_spike_sum: 0,
            cs_spike_sum: 0,
            non_cs_spike_counter: vec![0; num_cells],
            cs_spike_counter: vec![0; num_cells],
        }
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn non_cs_spike_sum(&self) -> u64 {
        self.non_cs_spike_sum
    }

    pub fn cs_spike_sum(&self) -> u64 {
        self.cs_spike_sum
    }

    pub fn non_cs_spike_counter(&self) -> &[u32] {
        &self.non_cs_spike_counter
    }

    pub fn cs_spike_counter(&self) -> &[u32] {
        &self.cs_spike_counter
    }

    fn reset(&mut self) {
        self.non_cs_spike_sum = 0;
        self.cs_spike_sum = 0;
        self.non_cs_spike_counter.iter_mut().for_each(|c| *c = 0);
        self.cs_spike_counter.iter_mut().for_each(|c| *c = 0);
    }

    fn record(&mut self, window: SpikeWindow, spikes: &[u8]) {
        let (sum, counter) = match window {
            SpikeWindow::Cs => (&mut self.cs_spike_sum, &mut self.cs_spike_counter),
            SpikeWindow::NonCs => (&mut self.non_cs_spike_sum, &mut self.non_cs_spike_counter),
        };

        for (count, spike) in counter.iter_mut().zip(spikes) {
            if *spike != 0 {
                *count += 1;
                *sum += 1;
            }
        }
    }

    pub fn is_consistent(&self) -> bool {
        let cs: u64 = self.cs_spike_counter.iter().map(|c| *c as u64).sum();
        let non_cs: u64 = self.non_cs_spike_counter.iter().map(|c| *c as u64).sum();
        cs == self.cs_spike_sum && non_cs == self.non_cs_spike_sum
    }

    pub fn firing_rate(&self, cs_seconds: f32, non_cs_seconds: f32) -> FiringRate {
        FiringRate {
            non_cs_mean_fr: mean_rate(self.non_cs_spike_sum, self.num_cells, non_cs_seconds),
            non_cs_median_fr: median_rate(&self.non_cs_spike_counter, non_cs_seconds),
            cs_mean_fr: mean_rate(self.cs_spike_sum, self.num_cells, cs_seconds),
            cs_median_fr: median_rate(&self.cs_spike_counter, cs_seconds),
        }
    }
}

fn mean_rate(total: u64, num_cells: usize, seconds: f32) -> f32 {
    if seconds <= 0.0 || num_cells == 0 {
        return 0.0;
    }
    total as f32 / (seconds * num_cells as f32)
}

// Works on a copy; the counters stay in cell order.
fn median_rate(counter: &[u32], seconds: f32) -> f32 {
    if seconds <= 0.0 || counter.is_empty() {
        return 0.0;
    }
    let data = Data::new(counter.iter().map(|c| *c as f64).collect::<Vec<_>>());
    data.median() as f32 / seconds
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FiringRate {
    pub non_cs_mean_fr: f32,
    pub non_cs_median_fr: f32,
    pub cs_mean_fr: f32,
    pub cs_median_fr: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringRates {
    rates: [FiringRate; NUM_CELL_TYPES],
}

impl FiringRates {
    pub fn get(&self, cell_type: CellType) -> &FiringRate {
        &self.rates[cell_type.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellType, &FiringRate)> {
        CellType::ALL.into_iter().zip(self.rates.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpikeSumSnapshot {
    sums: Vec<SpikeSum>,
}

impl SpikeSumSnapshot {
    pub fn get(&self, cell_type: CellType) -> &SpikeSum {
        &self.sums[cell_type.index()]
    }

    pub fn firing_rates(&self, cs_seconds: f32, non_cs_seconds: f32) -> FiringRates {
        let mut rates = [FiringRate::default(); NUM_CELL_TYPES];
        for (rate, sum) in rates.iter_mut().zip(&self.sums) {
            *rate = sum.firing_rate(cs_seconds, non_cs_seconds);
        }
        FiringRates { rates }
    }
}

#[derive(Debug, Clone)]
pub struct SpikeSumAccumulator {
    sums: Vec<SpikeSum>,
}

impl SpikeSumAccumulator {
    pub fn new(con: &ConnectivityParams) -> Self {
        Self {
            sums: CellType::ALL
                .iter()
                .map(|cell_type| SpikeSum::new(con.num_cells(*cell_type)))
                .collect(),
        }
    }

    pub fn reset(&mut self) {
        for sum in &mut self.sums {
            sum.reset();
        }
    }

    // All lengths are checked before anything is counted, so a malformed export
    // leaves the accumulator unchanged.
    pub fn record_timestep(
        &mut self,
        window: SpikeWindow,
        spikes_by_type: &[&[u8]; NUM_CELL_TYPES],
    ) -> SimResult<()> {
        for (cell_type, (sum, spikes)) in CellType::ALL
            .iter()
            .zip(self.sums.iter().zip(spikes_by_type))
        {
            if spikes.len() != sum.num_cells {
                return Err(SimError::KernelStepFailure(format!(
                    "exported {} spikes for {} cells of type {}",
                    spikes.len(),
                    sum.num_cells,
                    cell_type
                )));
            }
        }

        for (sum, spikes) in self.sums.iter_mut().zip(spikes_by_type) {
            sum.record(window, spikes);
        }

        Ok(())
    }

    pub fn get(&self, cell_type: CellType) -> &SpikeSum {
        &self.sums[cell_type.index()]
    }

    pub fn snapshot(&self) -> SpikeSumSnapshot {
        SpikeSumSnapshot {
            sums: self.sums.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util;
    use float_cmp::assert_approx_eq;

    fn accumulator() -> SpikeSumAccumulator {
        SpikeSumAccumulator::new(&test_util::get_template_config().connectivity)
    }

    fn silent(con: &ConnectivityParams) -> Vec<Vec<u8>> {
        CellType::ALL
            .iter()
            .map(|cell_type| vec![0u8; con.num_cells(*cell_type)])
            .collect()
    }

    fn as_refs(spikes: &[Vec<u8>]) -> [&[u8]; NUM_CELL_TYPES] {
        std::array::from_fn(|i| spikes[i].as_slice())
    }

    #[test]
    fn window_membership_is_half_open() {
        let cs_window = 3..7;
        assert_eq!(SpikeWindow::of(2, &cs_window), SpikeWindow::NonCs);
        assert_eq!(SpikeWindow::of(3, &cs_window), SpikeWindow::Cs);
        assert_eq!(SpikeWindow::of(6, &cs_window), SpikeWindow::Cs);
        assert_eq!(SpikeWindow::of(7, &cs_window), SpikeWindow::NonCs);
    }

    #[test]
    fn golgi_scenario() {
        let con = test_util::get_template_config().connectivity;
        let mut sut = accumulator();
        let cs_window = 3..7;

        for t in 0..10 {
            let mut spikes = silent(&con);
            let go = &mut spikes[CellType::GO.index()];
            go[0] = [3, 5, 8].contains(&t) as u8;
            go[1] = [1, 4].contains(&t) as u8;

            sut.record_timestep(SpikeWindow::of(t, &cs_window), &as_refs(&spikes))
                .unwrap();

            for cell_type in CellType::ALL {
                assert!(sut.get(cell_type).is_consistent());
            }
        }

        let go = sut.get(CellType::GO);
        assert_eq!(go.cs_spike_sum(), 3);
        assert_eq!(go.non_cs_spike_sum(), 2);
        assert_eq!(&go.cs_spike_counter()[..2], &[2, 1]);
        assert_eq!(&go.non_cs_spike_counter()[..2], &[1, 1]);
    }

    #[test]
    fn each_timestep_credited_to_exactly_one_window() {
        let con = test_util::get_template_config().connectivity;
        let mut sut = accumulator();
        let cs_window = 2..5;

        for t in 0..8 {
            let mut spikes = silent(&con);
            spikes[CellType::PC.index()][0] = 1;
            sut.record_timestep(SpikeWindow::of(t, &cs_window), &as_refs(&spikes))
                .unwrap();
        }

        let pc = sut.get(CellType::PC);
        assert_eq!(pc.cs_spike_sum() + pc.non_cs_spike_sum(), 8);
        assert_eq!(pc.cs_spike_sum(), 3);
    }

    #[test]
    fn reset_is_idempotent() {
        let con = test_util::get_template_config().connectivity;
        let mut sut = accumulator();
        let mut spikes = silent(&con);
        spikes[CellType::GR.index()].iter_mut().for_each(|s| *s = 1);
        sut.record_timestep(SpikeWindow::Cs, &as_refs(&spikes)).unwrap();

        sut.reset();
        let once = sut.snapshot();
        sut.reset();
        let twice = sut.snapshot();

        assert_eq!(once, twice);
        for cell_type in CellType::ALL {
            let sum = once.get(cell_type);
            assert_eq!(sum.cs_spike_sum(), 0);
            assert_eq!(sum.non_cs_spike_sum(), 0);
            assert!(sum.cs_spike_counter().iter().all(|c| *c == 0));
            assert!(sum.is_consistent());
        }
    }

    #[test]
    fn malformed_export_leaves_counts_untouched() {
        let con = test_util::get_template_config().connectivity;
        let mut sut = accumulator();
        let mut spikes = silent(&con);
        spikes[CellType::MF.index()][0] = 1;
        spikes[CellType::DCN.index()].pop();

        let result = sut.record_timestep(SpikeWindow::Cs, &as_refs(&spikes));

        assert!(matches!(result, Err(SimError::KernelStepFailure(_))));
        assert_eq!(sut.get(CellType::MF).cs_spike_sum(), 0);
    }

    #[test]
    fn snapshot_is_detached_from_live_counters() {
        let con = test_util::get_template_config().connectivity;
        let mut sut = accumulator();
        let mut spikes = silent(&con);
        spikes[CellType::IO.index()][1] = 1;
        sut.record_timestep(SpikeWindow::Cs, &as_refs(&spikes)).unwrap();

        let snapshot = sut.snapshot();
        snapshot.firing_rates(1.0, 1.0);
        sut.record_timestep(SpikeWindow::Cs, &as_refs(&spikes)).unwrap();

        assert_eq!(snapshot.get(CellType::IO).cs_spike_counter(), &[0, 1]);
        assert_eq!(sut.get(CellType::IO).cs_spike_counter(), &[0, 2]);
    }

    #[test]
    fn mean_and_median_rates() {
        let mut sum = SpikeSum::new(4);
        for (cell, count) in [3u32, 1, 4, 2].iter().enumerate() {
            for _ in 0..*count {
                let mut spikes = [0u8; 4];
                spikes[cell] = 1;
                sum.record(SpikeWindow::Cs, &spikes);
            }
        }

        let rate = sum.firing_rate(2.0, 1.0);

        // mean: 10 spikes / (2 s * 4 cells); median: (2 + 3) / 2 spikes / 2 s
        assert_approx_eq!(f32, rate.cs_mean_fr, 1.25);
        assert_approx_eq!(f32, rate.cs_median_fr, 1.25);
        assert_approx_eq!(f32, rate.non_cs_mean_fr, 0.0);
        assert_eq!(sum.cs_spike_counter(), &[3, 1, 4, 2]);
    }

    #[test]
    fn zero_length_window_has_zero_rate() {
        let sum = SpikeSum::new(2);
        let rate = sum.firing_rate(0.0, 0.0);
        assert_approx_eq!(f32, rate.cs_mean_fr, 0.0);
        assert_approx_eq!(f32, rate.non_cs_median_fr, 0.0);
    }
}
