use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::activity::{
    InNetActivityState, MZoneActivityState, PlasticityTrace, MAX_CASCADE_LEVEL, RESTING_VOLTAGE,
};
use crate::connectivity::{InNetConnectivityState, MZoneConnectivityState};
use crate::error::{SimError, SimResult};
use crate::params::{ActivityParams, ConnectivityParams};
use crate::state::SimulationState;
use crate::types::CellType;
use crate::util::get_decay_factor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pathway {
    MfGo,
    GrGo,
}

/// The numerical core that advances a [`SimulationState`] by one timestep.
///
/// Spike exports are 0/1 per cell and reflect the most recent `step`. Zonal cell
/// types are exported for zone 0.
pub trait SimKernel {
    fn step(&mut self, state: &mut SimulationState, mf_input: &[u8]) -> SimResult<()>;

    fn export_spikes(&self, cell_type: CellType) -> &[u8];

    fn export_nucleus_spikes(&self, zone_idx: usize) -> &[u8];

    fn export_conductance_sum(&self, pathway: Pathway) -> &[f32];

    fn update_error_drive(&mut self, state: &mut SimulationState, zone_idx: usize, magnitude: f32);
}

const CONDUCTANCE_TAU_MS: f32 = 5.0;
const ELIGIBILITY_TAU_MS: f32 = 20.0;
const BASE_SPIKE_PROBABILITY: f32 = 0.001;
const MAX_SPIKE_PROBABILITY: f32 = 0.5;
const VOLTAGE_GAIN: f32 = 20.0;

const MF_GR_WEIGHT: f32 = 0.05;
const GO_GAIN: f32 = 10.0;
const INTERNEURON_GAIN: f32 = 0.5;
const PF_PC_SCALE: f32 = 0.01;
const INTERNEURON_PC_WEIGHT: f32 = 0.05;
const NC_GAIN: f32 = 50.0;
const PC_NC_WEIGHT: f32 = 0.05;
const NC_IO_WEIGHT: f32 = 0.1;

const LTD_STEP: f32 = 0.05;
const LTP_STEP: f32 = 0.005;
const SWITCH_PROBABILITY: f32 = 0.1;
// GR spikes within the last 8 timesteps count as coincident with a climbing fiber.
const RECENT_SPIKE_MASK: u32 = 0xff;

fn fire(rng: &mut StdRng, excitation: f32, inhibition: f32) -> u8 {
    let p = (BASE_SPIKE_PROBABILITY + excitation - inhibition).clamp(0.0, MAX_SPIKE_PROBABILITY);
    (rng.gen::<f32>() < p) as u8
}

fn membrane_voltage(excitation: f32, inhibition: f32) -> f32 {
    RESTING_VOLTAGE + VOLTAGE_GAIN * (excitation - inhibition)
}

fn decay_all(values: &mut [f32], decay: f32) {
    for value in values {
        *value *= decay;
    }
}

fn spike_fraction(spikes: &[u8]) -> f32 {
    if spikes.is_empty() {
        0.0
    } else {
        spikes.iter().filter(|s| **s != 0).count() as f32 / spikes.len() as f32
    }
}

#[derive(Debug, Clone)]
struct ZoneSpikes {
    bc: Vec<u8>,
    pc: Vec<u8>,
    io: Vec<u8>,
    nc: Vec<u8>,
}

pub struct BernoulliKernel {
    rng: StdRng,
    num_mf: usize,
    conductance_decay: f32,
    eligibility_decay: f32,
    mf_go_weight: f32,
    go_gr_weight: f32,
    gr_go_weight: f32,
    go_go_weight: f32,
    init_pfpc_weight: f32,
    mf: Vec<u8>,
    gr: Vec<u8>,
    go: Vec<u8>,
    sc: Vec<u8>,
    zones: Vec<ZoneSpikes>,
    g_mf_go: Vec<f32>,
    g_gr_go: Vec<f32>,
}

impl BernoulliKernel {
    pub fn new(con: &ConnectivityParams, act: &ActivityParams, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            num_mf: con.num_mf,
            conductance_decay: get_decay_factor(act.ms_per_time_step, CONDUCTANCE_TAU_MS),
            eligibility_decay: get_decay_factor(act.ms_per_time_step, ELIGIBILITY_TAU_MS),
            mf_go_weight: act.mf_go_weight,
            go_gr_weight: act.go_gr_weight,
            gr_go_weight: act.gr_go_weight,
            go_go_weight: act.go_go_weight,
            init_pfpc_weight: act.init_pfpc_weight,
            mf: vec![0; con.num_mf],
            gr: vec![0; con.num_gr],
            go: vec![0; con.num_go],
            sc: vec![0; con.num_sc],
            zones: (0..con.num_zones)
                .map(|_| ZoneSpikes {
                    bc: vec![0; con.num_bc],
                    pc: vec![0; con.num_pc],
                    io: vec![0; con.num_io],
                    nc: vec![0; con.num_nc],
                })
                .collect(),
            g_mf_go: vec![0.0; con.num_go],
            g_gr_go: vec![0.0; con.num_go],
        }
    }

    fn step_input_network(&mut self, conn: &InNetConnectivityState, act: &mut InNetActivityState) {
        let decay = self.conductance_decay;
        decay_all(&mut act.g_sum_mf_gr, decay);
        decay_all(&mut act.g_sum_go_gr, decay);
        decay_all(&mut act.g_sum_mf_go, decay);
        decay_all(&mut act.g_sum_gr_go, decay);

        for mf_idx in self.mf.iter().enumerate().filter(|(_, s)| **s != 0).map(|(i, _)| i) {
            for gr_idx in conn.mf_gr.targets_of(mf_idx) {
                act.g_sum_mf_gr[*gr_idx as usize] += MF_GR_WEIGHT;
            }
            for go_idx in conn.mf_go.targets_of(mf_idx) {
                act.g_sum_mf_go[*go_idx as usize] += self.mf_go_weight;
            }
        }

        // GO and GR feed back with last timestep's spikes
        let mut go_go_inhibition = vec![0.0; self.go.len()];
        for go_idx in self.go.iter().enumerate().filter(|(_, s)| **s != 0).map(|(i, _)| i) {
            for gr_idx in conn.go_gr.targets_of(go_idx) {
                act.g_sum_go_gr[*gr_idx as usize] += self.go_gr_weight;
            }
            for target in conn.go_go.targets_of(go_idx) {
                go_go_inhibition[*target as usize] += self.go_go_weight;
            }
        }

        for gr_idx in self.gr.iter().enumerate().filter(|(_, s)| **s != 0).map(|(i, _)| i) {
            for (syn_idx, go_idx) in conn.gr_go.synapse_range(gr_idx).zip(conn.gr_go.targets_of(gr_idx)) {
                act.g_sum_gr_go[*go_idx as usize] += self.gr_go_weight * act.w_gr_go[syn_idx];
            }
        }

        for (gr_idx, spike) in self.gr.iter_mut().enumerate() {
            let (exc, inh) = (act.g_sum_mf_gr[gr_idx], act.g_sum_go_gr[gr_idx]);
            *spike = fire(&mut self.rng, exc, inh);
            act.v_gr[gr_idx] = membrane_voltage(exc, inh);
            act.ap_hist_gr[gr_idx] = (act.ap_hist_gr[gr_idx] << 1) | *spike as u32;
        }

        for (go_idx, spike) in self.go.iter_mut().enumerate() {
            let exc = GO_GAIN * (act.g_sum_mf_go[go_idx] + act.g_sum_gr_go[go_idx]);
            let inh = go_go_inhibition[go_idx];
            *spike = fire(&mut self.rng, exc, inh);
            act.v_go[go_idx] = membrane_voltage(exc, inh);
        }

        let pf_drive = INTERNEURON_GAIN * spike_fraction(&self.gr);
        for (sc_idx, spike) in self.sc.iter_mut().enumerate() {
            *spike = fire(&mut self.rng, pf_drive, 0.0);
            act.v_sc[sc_idx] = membrane_voltage(pf_drive, 0.0);
        }

        self.g_mf_go.copy_from_slice(&act.g_sum_mf_go);
        self.g_gr_go.copy_from_slice(&act.g_sum_gr_go);
    }

    fn step_zone(
        &mut self,
        zone_idx: usize,
        gr_history: &[u32],
        conn: &MZoneConnectivityState,
        act: &mut MZoneActivityState,
    ) {
        let rng = &mut self.rng;
        let spikes = &mut self.zones[zone_idx];

        decay_all(&mut act.g_sum_pf_pc, self.conductance_decay);
        for gr_idx in self.gr.iter().enumerate().filter(|(_, s)| **s != 0).map(|(i, _)| i) {
            for (syn_idx, pc_idx) in conn.gr_pc.synapse_range(gr_idx).zip(conn.gr_pc.targets_of(gr_idx)) {
                act.g_sum_pf_pc[*pc_idx as usize] += PF_PC_SCALE * act.w_pf_pc[syn_idx];
            }
        }

        let pf_drive = INTERNEURON_GAIN * spike_fraction(&self.gr);
        for (bc_idx, spike) in spikes.bc.iter_mut().enumerate() {
            *spike = fire(rng, pf_drive, 0.0);
            act.v_bc[bc_idx] = membrane_voltage(pf_drive, 0.0);
        }

        let mut pc_inhibition = vec![0.0; spikes.pc.len()];
        for (projection, pre_spikes) in [(&conn.bc_pc, &spikes.bc), (&conn.sc_pc, &self.sc)] {
            for pre_idx in pre_spikes.iter().enumerate().filter(|(_, s)| **s != 0).map(|(i, _)| i) {
                for pc_idx in projection.targets_of(pre_idx) {
                    pc_inhibition[*pc_idx as usize] += INTERNEURON_PC_WEIGHT;
                }
            }
        }

        for (pc_idx, spike) in spikes.pc.iter_mut().enumerate() {
            let exc = act.g_sum_pf_pc[pc_idx];
            *spike = fire(rng, exc, pc_inhibition[pc_idx]);
            act.v_pc[pc_idx] = membrane_voltage(exc, pc_inhibition[pc_idx]);
        }

        let mut nc_excitation = vec![0.0; spikes.nc.len()];
        for mf_idx in self.mf.iter().enumerate().filter(|(_, s)| **s != 0).map(|(i, _)| i) {
            for (syn_idx, nc_idx) in conn.mf_nc.synapse_range(mf_idx).zip(conn.mf_nc.targets_of(mf_idx)) {
                nc_excitation[*nc_idx as usize] += NC_GAIN * act.w_mf_nc[syn_idx];
            }
        }
        let mut nc_inhibition = vec![0.0; spikes.nc.len()];
        for pc_idx in spikes.pc.iter().enumerate().filter(|(_, s)| **s != 0).map(|(i, _)| i) {
            for nc_idx in conn.pc_nc.targets_of(pc_idx) {
                nc_inhibition[*nc_idx as usize] += PC_NC_WEIGHT;
            }
        }
        for (nc_idx, spike) in spikes.nc.iter_mut().enumerate() {
            *spike = fire(rng, nc_excitation[nc_idx], nc_inhibition[nc_idx]);
            act.v_nc[nc_idx] = membrane_voltage(nc_excitation[nc_idx], nc_inhibition[nc_idx]);
        }

        let mut io_inhibition = vec![0.0; spikes.io.len()];
        for nc_idx in spikes.nc.iter().enumerate().filter(|(_, s)| **s != 0).map(|(i, _)| i) {
            for io_idx in conn.nc_io.targets_of(nc_idx) {
                io_inhibition[*io_idx as usize] += NC_IO_WEIGHT;
            }
        }
        for (io_idx, spike) in spikes.io.iter_mut().enumerate() {
            *spike = fire(rng, act.err_drive, io_inhibition[io_idx]);
            act.v_io[io_idx] = membrane_voltage(act.err_drive, io_inhibition[io_idx]);
        }
        act.err_drive = 0.0;

        let mut climbing_fiber = vec![false; spikes.pc.len()];
        for io_idx in spikes.io.iter().enumerate().filter(|(_, s)| **s != 0).map(|(i, _)| i) {
            for pc_idx in conn.io_pc.targets_of(io_idx) {
                climbing_fiber[*pc_idx as usize] = true;
            }
        }

        let plasticity = PfPcPlasticity {
            eligibility_decay: self.eligibility_decay,
            w_high: self.init_pfpc_weight,
        };
        plasticity.apply(rng, conn, act, gr_history, &climbing_fiber);
    }
}

struct PfPcPlasticity {
    eligibility_decay: f32,
    w_high: f32,
}

impl PfPcPlasticity {
    fn apply(
        &self,
        rng: &mut StdRng,
        conn: &MZoneConnectivityState,
        act: &mut MZoneActivityState,
        gr_history: &[u32],
        climbing_fiber: &[bool],
    ) {
        if let PlasticityTrace::None = act.plasticity {
            return;
        }

        for (gr_idx, history) in gr_history.iter().enumerate() {
            let spiked_now = history & 1 != 0;
            let recent = history & RECENT_SPIKE_MASK != 0;

            for (syn_idx, pc_idx) in conn.gr_pc.synapse_range(gr_idx).zip(conn.gr_pc.targets_of(gr_idx)) {
                let cf = climbing_fiber[*pc_idx as usize];
                let weight = &mut act.w_pf_pc[syn_idx];

                match &mut act.plasticity {
                    PlasticityTrace::None => {}
                    PlasticityTrace::Graded { eligibility } => {
                        let trace = &mut eligibility[syn_idx];
                        *trace = *trace * self.eligibility_decay + spiked_now as u8 as f32;
                        if cf {
                            *weight -= LTD_STEP * *trace;
                        } else if spiked_now {
                            *weight += LTP_STEP;
                        }
                        *weight = weight.clamp(0.0, 1.0);
                    }
                    PlasticityTrace::Binary { syn_states } => {
                        let state = &mut syn_states[syn_idx];
                        if cf && recent {
                            *state = 0;
                        } else if spiked_now && rng.gen::<f32>() < SWITCH_PROBABILITY {
                            *state = 1;
                        }
                        *weight = self.weight_of(*state);
                    }
                    PlasticityTrace::Cascade {
                        syn_states,
                        cascade_levels,
                    } => {
                        let target = if cf && recent {
                            Some(0)
                        } else if spiked_now {
                            Some(1)
                        } else {
                            None
                        };
                        if let Some(target) = target {
                            let state = &mut syn_states[syn_idx];
                            let level = &mut cascade_levels[syn_idx];
                            if *state == target {
                                *level = level.saturating_add(1).min(MAX_CASCADE_LEVEL);
                            } else if rng.gen::<f32>() < SWITCH_PROBABILITY / (1u32 << *level) as f32 {
                                *state = target;
                                *level = 0;
                            }
                            *weight = self.weight_of(*state);
                        }
                    }
                }
            }
        }
    }

    fn weight_of(&self, syn_state: u8) -> f32 {
        if syn_state == 0 {
            0.0
        } else {
            self.w_high
        }
    }
}

impl SimKernel for BernoulliKernel {
    fn step(&mut self, state: &mut SimulationState, mf_input: &[u8]) -> SimResult<()> {
        if mf_input.len() != self.num_mf {
            return Err(SimError::KernelStepFailure(format!(
                "mossy fiber input has {} entries, expected {}",
                mf_input.len(),
                self.num_mf
            )));
        }

        if state.num_zones() != self.zones.len() {
            return Err(SimError::KernelStepFailure(format!(
                "state has {} zones, kernel was built for {}",
                state.num_zones(),
                self.zones.len()
            )));
        }

        for (dst, src) in self.mf.iter_mut().zip(mf_input) {
            *dst = (*src != 0) as u8;
        }

        let (innet_conn, innet_act, zones) = state.split_mut();
        self.step_input_network(innet_conn, innet_act);

        for (zone_idx, zone) in zones.iter_mut().enumerate() {
            self.step_zone(zone_idx, &innet_act.ap_hist_gr, &zone.connectivity, &mut zone.activity);
        }

        Ok(())
    }

    fn export_spikes(&self, cell_type: CellType) -> &[u8] {
        match cell_type {
            CellType::MF => &self.mf,
            CellType::GR => &self.gr,
            CellType::GO => &self.go,
            CellType::SC => &self.sc,
            zonal => match self.zones.first() {
                Some(zone) => match zonal {
                    CellType::BC => &zone.bc,
                    CellType::PC => &zone.pc,
                    CellType::IO => &zone.io,
                    _ => &zone.nc,
                },
                None => &[],
            },
        }
    }

    fn export_nucleus_spikes(&self, zone_idx: usize) -> &[u8] {
        match self.zones.get(zone_idx) {
            Some(zone) => &zone.nc,
            None => &[],
        }
    }

    fn export_conductance_sum(&self, pathway: Pathway) -> &[f32] {
        match pathway {
            Pathway::MfGo => &self.g_mf_go,
            Pathway::GrGo => &self.g_gr_go,
        }
    }

    fn update_error_drive(&mut self, state: &mut SimulationState, zone_idx: usize, magnitude: f32) {
        state.zone_activity_mut(zone_idx).err_drive += magnitude;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PlasticityMode;
    use crate::util::test_util;

    fn fixture(mode: PlasticityMode) -> (SimulationState, BernoulliKernel, usize) {
        let mut config = test_util::get_template_config();
        config.activity.plasticity = mode;
        let state = SimulationState::create(&config.connectivity, &config.activity);
        let kernel = BernoulliKernel::new(&config.connectivity, &config.activity, 9);
        (state, kernel, config.connectivity.num_mf)
    }

    #[test]
    fn exports_have_population_lengths() {
        let config = test_util::get_template_config();
        let (mut state, mut sut, num_mf) = fixture(PlasticityMode::Graded);

        sut.step(&mut state, &vec![1; num_mf]).unwrap();

        for cell_type in CellType::ALL {
            assert_eq!(
                sut.export_spikes(cell_type).len(),
                config.connectivity.num_cells(cell_type)
            );
        }
        assert_eq!(sut.export_nucleus_spikes(1).len(), config.connectivity.num_nc);
        assert_eq!(sut.export_conductance_sum(Pathway::MfGo).len(), config.connectivity.num_go);
    }

    #[test]
    fn mf_spikes_raise_conductance() {
        let (mut state, mut sut, num_mf) = fixture(PlasticityMode::Off);

        sut.step(&mut state, &vec![0; num_mf]).unwrap();
        assert!(sut.export_conductance_sum(Pathway::MfGo).iter().all(|g| *g == 0.0));

        sut.step(&mut state, &vec![1; num_mf]).unwrap();
        assert!(sut.export_conductance_sum(Pathway::MfGo).iter().sum::<f32>() > 0.0);
        assert!(state.innet_activity().g_sum_mf_gr.iter().sum::<f32>() > 0.0);
    }

    #[test]
    fn wrong_input_length_fails() {
        let (mut state, mut sut, num_mf) = fixture(PlasticityMode::Off);
        let result = sut.step(&mut state, &vec![0; num_mf + 1]);
        assert!(matches!(result, Err(SimError::KernelStepFailure(_))));
    }

    #[test]
    fn error_drive_is_consumed() {
        let (mut state, mut sut, num_mf) = fixture(PlasticityMode::Graded);
        sut.update_error_drive(&mut state, 1, 0.3);
        assert_eq!(state.zone(1).activity.err_drive, 0.3);
        assert_eq!(state.zone(0).activity.err_drive, 0.0);

        sut.step(&mut state, &vec![0; num_mf]).unwrap();
        assert_eq!(state.zone(1).activity.err_drive, 0.0);
    }

    #[test]
    fn plasticity_off_keeps_weights() {
        let (mut state, mut sut, num_mf) = fixture(PlasticityMode::Off);
        let before = state.zone(0).activity.w_pf_pc.clone();

        for _ in 0..20 {
            sut.update_error_drive(&mut state, 0, 1.0);
            sut.step(&mut state, &vec![1; num_mf]).unwrap();
        }

        assert_eq!(state.zone(0).activity.w_pf_pc, before);
    }

    #[test]
    fn graded_climbing_fiber_depresses_active_synapses() {
        let (mut state, mut sut, num_mf) = fixture(PlasticityMode::Graded);
        let before: f32 = state.zone(0).activity.w_pf_pc.iter().sum();

        for _ in 0..50 {
            sut.update_error_drive(&mut state, 0, 1.0);
            sut.step(&mut state, &vec![1; num_mf]).unwrap();
        }

        let after: f32 = state.zone(0).activity.w_pf_pc.iter().sum();
        assert!(after < before);
        assert!(state
            .zone(0)
            .activity
            .w_pf_pc
            .iter()
            .all(|w| (0.0..=1.0).contains(w)));
    }

    #[test]
    fn binary_weights_stay_bistable() {
        let (mut state, mut sut, num_mf) = fixture(PlasticityMode::Binary);
        let w_high = state.zone(0).activity.w_pf_pc[0];

        for _ in 0..30 {
            sut.update_error_drive(&mut state, 0, 1.0);
            sut.step(&mut state, &vec![1; num_mf]).unwrap();
        }

        assert!(state
            .zone(0)
            .activity
            .w_pf_pc
            .iter()
            .all(|w| *w == 0.0 || *w == w_high));
    }

    #[test]
    fn same_seed_same_trajectory() {
        let (mut state_a, mut kernel_a, num_mf) = fixture(PlasticityMode::Cascade);
        let (mut state_b, mut kernel_b, _) = fixture(PlasticityMode::Cascade);
        let input: Vec<u8> = (0..num_mf).map(|i| (i % 3 == 0) as u8).collect();

        for _ in 0..10 {
            kernel_a.step(&mut state_a, &input).unwrap();
            kernel_b.step(&mut state_b, &input).unwrap();
            assert_eq!(kernel_a.export_spikes(CellType::GR), kernel_b.export_spikes(CellType::GR));
        }
        assert_eq!(state_a, state_b);
    }
}
