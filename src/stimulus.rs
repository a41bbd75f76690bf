use rand::{distributions::Uniform, prelude::Distribution, rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::ops::Range;

use crate::params::{ActivityParams, ConnectivityParams, FreqRange, StimulusParams};
use crate::seed::SeedProvider;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StimulusPhase {
    Background,
    CsPhasic,
    CsTonic,
}

impl StimulusPhase {
    // The phasic sub-window is `[cs_window.start, cs_window.start + phasic_size)`; the
    // rest of the CS window is tonic. Trials without CS stay on background input.
    pub fn at(t: usize, cs_window: &Range<usize>, phasic_size: usize, cs_active: bool) -> Self {
        if !cs_active || !util::in_window(t, cs_window) {
            StimulusPhase::Background
        } else if t < cs_window.start + phasic_size {
            StimulusPhase::CsPhasic
        } else {
            StimulusPhase::CsTonic
        }
    }
}

pub trait StimulusSource {
    fn background_rates(&self) -> &[f32];

    fn cs_tonic_rates(&self) -> &[f32];

    fn cs_phasic_rates(&self) -> &[f32];

    fn rates(&self, phase: StimulusPhase) -> &[f32] {
        match phase {
            StimulusPhase::Background => self.background_rates(),
            StimulusPhase::CsPhasic => self.cs_phasic_rates(),
            StimulusPhase::CsTonic => self.cs_tonic_rates(),
        }
    }

    fn compute_poisson_activity(&mut self, phase: StimulusPhase, zone_dcn_spikes: &[&[u8]]) -> &[u8];

    fn true_mossy_fiber_mask(&self) -> &[bool];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MfRole {
    Plain,
    Collateral,
    Tonic,
    Phasic,
    Context,
}

#[derive(Debug, Clone)]
pub struct MfFrequencies {
    roles: Vec<MfRole>,
    bg: Vec<f32>,
    cs_tonic: Vec<f32>,
    cs_phasic: Vec<f32>,
    true_mf: Vec<bool>,
}

impl MfFrequencies {
    pub fn new(num_mf: usize, params: &StimulusParams, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let count = |frac: f32| (frac * num_mf as f32).round() as usize;
        let num_collateral = if params.collaterals_off {
            0
        } else {
            count(params.collateral_frac)
        };

        let mut order: Vec<usize> = (0..num_mf).collect();
        order.shuffle(&mut rng);

        let mut roles = vec![MfRole::Plain; num_mf];
        let mut assigned = order.into_iter();
        for (role, n) in [
            (MfRole::Collateral, num_collateral),
            (MfRole::Tonic, count(params.cs_tonic_frac)),
            (MfRole::Phasic, count(params.cs_phasic_frac)),
            (MfRole::Context, count(params.context_frac)),
        ] {
            for idx in assigned.by_ref().take(n) {
                roles[idx] = role;
            }
        }

        let mut draw = |range: FreqRange| Uniform::new_inclusive(range.min, range.max).sample(&mut rng);

        let mut bg = Vec::with_capacity(num_mf);
        let mut cs_tonic = Vec::with_capacity(num_mf);
        let mut cs_phasic = Vec::with_capacity(num_mf);

        for role in &roles {
            let (bg_rate, tonic_rate, phasic_rate) = match role {
                MfRole::Collateral => (0.0, 0.0, 0.0),
                MfRole::Context => {
                    let rate = draw(params.context_freq);
                    (rate, rate, rate)
                }
                MfRole::Tonic => {
                    let rate = draw(params.tonic_freq);
                    (draw(params.bg_freq), rate, rate)
                }
                MfRole::Phasic => (
                    draw(params.bg_freq),
                    draw(params.cs_bg_freq),
                    draw(params.phasic_freq),
                ),
                MfRole::Plain => {
                    let cs_bg_rate = draw(params.cs_bg_freq);
                    (draw(params.bg_freq), cs_bg_rate, cs_bg_rate)
                }
            };
            bg.push(bg_rate);
            cs_tonic.push(tonic_rate);
            cs_phasic.push(phasic_rate);
        }

        let true_mf = roles.iter().map(|role| *role != MfRole::Collateral).collect();

        Self {
            roles,
            bg,
            cs_tonic,
            cs_phasic,
            true_mf,
        }
    }

    pub fn num_collaterals(&self) -> usize {
        self.roles
            .iter()
            .filter(|role| **role == MfRole::Collateral)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct PoissonMossyFibers {
    rng: StdRng,
    thresholds: Vec<f32>,
    recovery: f32,
    seconds_per_time_step: f32,
    num_zones: usize,
    num_nc: usize,
    spikes: Vec<u8>,
}

impl PoissonMossyFibers {
    pub fn new(
        num_mf: usize,
        seed: u64,
        thresh_decay_tau: f32,
        ms_per_time_step: f32,
        num_zones: usize,
        num_nc: usize,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            thresholds: vec![1.0; num_mf],
            recovery: 1.0 - util::get_decay_factor(ms_per_time_step, thresh_decay_tau),
            seconds_per_time_step: ms_per_time_step / 1000.0,
            num_zones,
            num_nc,
            spikes: vec![0; num_mf],
        }
    }

    pub fn calc_poisson_activity(
        &mut self,
        rates: &[f32],
        true_mf: &[bool],
        zone_dcn_spikes: &[&[u8]],
    ) -> &[u8] {
        for (mf_idx, spike) in self.spikes.iter_mut().enumerate() {
            let threshold = &mut self.thresholds[mf_idx];
            *threshold += (1.0 - *threshold) * self.recovery;

            let fired = if true_mf[mf_idx] {
                let p = rates[mf_idx] * self.seconds_per_time_step * *threshold;
                self.rng.gen::<f32>() < p
            } else {
                let zone_idx = mf_idx % self.num_zones;
                let nc_idx = (mf_idx / self.num_zones) % self.num_nc;
                zone_dcn_spikes
                    .get(zone_idx)
                    .and_then(|spikes| spikes.get(nc_idx))
                    .map_or(false, |s| *s != 0)
            };

            if fired {
                *threshold = 0.0;
            }
            *spike = fired as u8;
        }

        &self.spikes
    }
}

pub struct MossyFiberStimulus {
    freqs: MfFrequencies,
    cells: PoissonMossyFibers,
}

impl MossyFiberStimulus {
    pub fn new(
        con: &ConnectivityParams,
        act: &ActivityParams,
        params: &StimulusParams,
        seed: u64,
    ) -> Self {
        let mut seeds = SeedProvider::new(seed);
        Self {
            freqs: MfFrequencies::new(con.num_mf, params, seeds.next_seed()),
            cells: PoissonMossyFibers::new(
                con.num_mf,
                seeds.next_seed(),
                act.thresh_decay_tau,
                act.ms_per_time_step,
                con.num_zones,
                con.num_nc,
            ),
        }
    }
}

impl StimulusSource for MossyFiberStimulus {
    fn background_rates(&self) -> &[f32] {
        &self.freqs.bg
    }

    fn cs_tonic_rates(&self) -> &[f32] {
        &self.freqs.cs_tonic
    }

    fn cs_phasic_rates(&self) -> &[f32] {
        &self.freqs.cs_phasic
    }

    fn compute_poisson_activity(&mut self, phase: StimulusPhase, zone_dcn_spikes: &[&[u8]]) -> &[u8] {
        let rates = match phase {
            StimulusPhase::Background => &self.freqs.bg,
            StimulusPhase::CsPhasic => &self.freqs.cs_phasic,
            StimulusPhase::CsTonic => &self.freqs.cs_tonic,
        };
        self.cells
            .calc_poisson_activity(rates, &self.freqs.true_mf, zone_dcn_spikes)
    }

    fn true_mossy_fiber_mask(&self) -> &[bool] {
        &self.freqs.true_mf
    }
}
