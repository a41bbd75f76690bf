use log::debug;
use rand::{distributions::Uniform, prelude::Distribution, rngs::StdRng, SeedableRng};
use std::io::{self, Read, Write};

use crate::connectivity::{InNetConnectivityState, MZoneConnectivityState};
use crate::error::{SimError, SimResult};
use crate::params::{ActivityParams, ConnectivityParams, PlasticityMode};
use crate::stream;

pub const RESTING_VOLTAGE: f32 = -60.0;
const IO_VOLTAGE_JITTER: f32 = 5.0;
pub const MAX_CASCADE_LEVEL: u8 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct InNetActivityState {
    pub v_gr: Vec<f32>,
    pub v_go: Vec<f32>,
    pub v_sc: Vec<f32>,
    pub g_sum_mf_gr: Vec<f32>,
    pub g_sum_go_gr: Vec<f32>,
    pub g_sum_mf_go: Vec<f32>,
    pub g_sum_gr_go: Vec<f32>,
    // One bit per past timestep, most recent in the lowest bit.
    pub ap_hist_gr: Vec<u32>,
    pub w_gr_go: Vec<f32>,
}

impl InNetActivityState {
    pub fn new(con: &ConnectivityParams, conn: &InNetConnectivityState) -> Self {
        Self {
            v_gr: vec![RESTING_VOLTAGE; con.num_gr],
            v_go: vec![RESTING_VOLTAGE; con.num_go],
            v_sc: vec![RESTING_VOLTAGE; con.num_sc],
            g_sum_mf_gr: vec![0.0; con.num_gr],
            g_sum_go_gr: vec![0.0; con.num_gr],
            g_sum_mf_go: vec![0.0; con.num_go],
            g_sum_gr_go: vec![0.0; con.num_go],
            ap_hist_gr: vec![0; con.num_gr],
            w_gr_go: vec![1.0; conn.gr_go.num_synapses()],
        }
    }

    pub fn from_stream<R: Read>(
        r: &mut R,
        con: &ConnectivityParams,
        conn: &InNetConnectivityState,
    ) -> SimResult<Self> {
        Ok(Self {
            v_gr: stream::read_vec(r, con.num_gr, "gr voltages")?,
            v_go: stream::read_vec(r, con.num_go, "go voltages")?,
            v_sc: stream::read_vec(r, con.num_sc, "sc voltages")?,
            g_sum_mf_gr: stream::read_vec(r, con.num_gr, "mf->gr conductances")?,
            g_sum_go_gr: stream::read_vec(r, con.num_gr, "go->gr conductances")?,
            g_sum_mf_go: stream::read_vec(r, con.num_go, "mf->go conductances")?,
            g_sum_gr_go: stream::read_vec(r, con.num_go, "gr->go conductances")?,
            ap_hist_gr: stream::read_vec(r, con.num_gr, "gr spike history")?,
            w_gr_go: stream::read_vec(r, conn.gr_go.num_synapses(), "gr->go weights")?,
        })
    }

    pub fn write_state<W: Write>(&self, w: &mut W) -> io::Result<()> {
        stream::write_vec(w, &self.v_gr)?;
        stream::write_vec(w, &self.v_go)?;
        stream::write_vec(w, &self.v_sc)?;
        stream::write_vec(w, &self.g_sum_mf_gr)?;
        stream::write_vec(w, &self.g_sum_go_gr)?;
        stream::write_vec(w, &self.g_sum_mf_go)?;
        stream::write_vec(w, &self.g_sum_gr_go)?;
        stream::write_vec(w, &self.ap_hist_gr)?;
        stream::write_vec(w, &self.w_gr_go)
    }

    pub fn read_state<R: Read>(&mut self, r: &mut R) -> SimResult<()> {
        stream::read_vec_into(r, &mut self.v_gr, "gr voltages")?;
        stream::read_vec_into(r, &mut self.v_go, "go voltages")?;
        stream::read_vec_into(r, &mut self.v_sc, "sc voltages")?;
        stream::read_vec_into(r, &mut self.g_sum_mf_gr, "mf->gr conductances")?;
        stream::read_vec_into(r, &mut self.g_sum_go_gr, "go->gr conductances")?;
        stream::read_vec_into(r, &mut self.g_sum_mf_go, "mf->go conductances")?;
        stream::read_vec_into(r, &mut self.g_sum_gr_go, "gr->go conductances")?;
        stream::read_vec_into(r, &mut self.ap_hist_gr, "gr spike history")?;
        stream::read_vec_into(r, &mut self.w_gr_go, "gr->go weights")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlasticityTrace {
    None,
    Graded {
        eligibility: Vec<f32>,
    },
    Binary {
        syn_states: Vec<u8>,
    },
    Cascade {
        syn_states: Vec<u8>,
        cascade_levels: Vec<u8>,
    },
}

impl PlasticityTrace {
    pub fn new(mode: PlasticityMode, num_synapses: usize) -> Self {
        match mode {
            PlasticityMode::Off => PlasticityTrace::None,
            PlasticityMode::Graded => PlasticityTrace::Graded {
                eligibility: vec![0.0; num_synapses],
            },
            PlasticityMode::Binary => PlasticityTrace::Binary {
                syn_states: vec![1; num_synapses],
            },
            PlasticityMode::Cascade => PlasticityTrace::Cascade {
                syn_states: vec![1; num_synapses],
                cascade_levels: vec![0; num_synapses],
            },
        }
    }

    pub fn mode(&self) -> PlasticityMode {
        match self {
            PlasticityTrace::None => PlasticityMode::Off,
            PlasticityTrace::Graded { .. } => PlasticityMode::Graded,
            PlasticityTrace::Binary { .. } => PlasticityMode::Binary,
            PlasticityTrace::Cascade { .. } => PlasticityMode::Cascade,
        }
    }

    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        stream::write_u8(w, mode_tag(self.mode()))?;
        match self {
            PlasticityTrace::None => Ok(()),
            PlasticityTrace::Graded { eligibility } => stream::write_vec(w, eligibility),
            PlasticityTrace::Binary { syn_states } => stream::write_vec(w, syn_states),
            PlasticityTrace::Cascade {
                syn_states,
                cascade_levels,
            } => {
                stream::write_vec(w, syn_states)?;
                stream::write_vec(w, cascade_levels)
            }
        }
    }

    fn read<R: Read>(r: &mut R, mode: PlasticityMode, num_synapses: usize) -> SimResult<Self> {
        let tag = stream::read_u8(r, "plasticity mode")?;
        if tag != mode_tag(mode) {
            return Err(SimError::corrupt(format!(
                "plasticity mode tag {} does not match expected mode {:?}",
                tag, mode
            )));
        }

        Ok(match mode {
            PlasticityMode::Off => PlasticityTrace::None,
            PlasticityMode::Graded => PlasticityTrace::Graded {
                eligibility: stream::read_vec(r, num_synapses, "pf->pc eligibility")?,
            },
            PlasticityMode::Binary => PlasticityTrace::Binary {
                syn_states: read_syn_states(r, num_synapses)?,
            },
            PlasticityMode::Cascade => {
                let syn_states = read_syn_states(r, num_synapses)?;
                let cascade_levels: Vec<u8> =
                    stream::read_vec(r, num_synapses, "pf->pc cascade levels")?;
                if let Some(level) = cascade_levels.iter().find(|level| **level > MAX_CASCADE_LEVEL) {
                    return Err(SimError::corrupt(format!(
                        "pf->pc cascade level {} exceeds {}",
                        level, MAX_CASCADE_LEVEL
                    )));
                }
                PlasticityTrace::Cascade {
                    syn_states,
                    cascade_levels,
                }
            }
        })
    }
}

fn mode_tag(mode: PlasticityMode) -> u8 {
    match mode {
        PlasticityMode::Off => 0,
        PlasticityMode::Graded => 1,
        PlasticityMode::Binary => 2,
        PlasticityMode::Cascade => 3,
    }
}

fn read_syn_states<R: Read>(r: &mut R, num_synapses: usize) -> SimResult<Vec<u8>> {
    let syn_states: Vec<u8> = stream::read_vec(r, num_synapses, "pf->pc synapse states")?;
    if let Some(state) = syn_states.iter().find(|state| **state > 1) {
        return Err(SimError::corrupt(format!(
            "pf->pc synapse state {} is not binary",
            state
        )));
    }
    Ok(syn_states)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MZoneActivityState {
    pub v_pc: Vec<f32>,
    pub v_bc: Vec<f32>,
    pub v_nc: Vec<f32>,
    pub v_io: Vec<f32>,
    pub g_sum_pf_pc: Vec<f32>,
    pub w_pf_pc: Vec<f32>,
    pub w_mf_nc: Vec<f32>,
    pub err_drive: f32,
    pub plasticity: PlasticityTrace,
}

impl MZoneActivityState {
    pub fn new(
        seed: u64,
        con: &ConnectivityParams,
        act: &ActivityParams,
        conn: &MZoneConnectivityState,
    ) -> Self {
        debug!("Generating microzone activity (seed {})", seed);
        let mut rng = StdRng::seed_from_u64(seed);
        let io_jitter = Uniform::new_inclusive(-IO_VOLTAGE_JITTER, IO_VOLTAGE_JITTER);

        let num_pf_synapses = conn.gr_pc.num_synapses();

        Self {
            v_pc: vec![RESTING_VOLTAGE; con.num_pc],
            v_bc: vec![RESTING_VOLTAGE; con.num_bc],
            v_nc: vec![RESTING_VOLTAGE; con.num_nc],
            v_io: (0..con.num_io)
                .map(|_| RESTING_VOLTAGE + io_jitter.sample(&mut rng))
                .collect(),
            g_sum_pf_pc: vec![0.0; con.num_pc],
            w_pf_pc: vec![act.init_pfpc_weight; num_pf_synapses],
            w_mf_nc: vec![act.init_mfnc_weight; conn.mf_nc.num_synapses()],
            err_drive: 0.0,
            plasticity: PlasticityTrace::new(act.plasticity, num_pf_synapses),
        }
    }

    pub fn from_stream<R: Read>(
        r: &mut R,
        con: &ConnectivityParams,
        plasticity: PlasticityMode,
        conn: &MZoneConnectivityState,
    ) -> SimResult<Self> {
        let num_pf_synapses = conn.gr_pc.num_synapses();

        Ok(Self {
            v_pc: stream::read_vec(r, con.num_pc, "pc voltages")?,
            v_bc: stream::read_vec(r, con.num_bc, "bc voltages")?,
            v_nc: stream::read_vec(r, con.num_nc, "nc voltages")?,
            v_io: stream::read_vec(r, con.num_io, "io voltages")?,
            g_sum_pf_pc: stream::read_vec(r, con.num_pc, "pf->pc conductances")?,
            w_pf_pc: stream::read_vec(r, num_pf_synapses, "pf->pc weights")?,
            w_mf_nc: stream::read_vec(r, conn.mf_nc.num_synapses(), "mf->nc weights")?,
            err_drive: stream::read_f32(r, "error drive")?,
            plasticity: PlasticityTrace::read(r, plasticity, num_pf_synapses)?,
        })
    }

    pub fn plasticity_mode(&self) -> PlasticityMode {
        self.plasticity.mode()
    }

    pub fn write_state<W: Write>(&self, w: &mut W) -> io::Result<()> {
        stream::write_vec(w, &self.v_pc)?;
        stream::write_vec(w, &self.v_bc)?;
        stream::write_vec(w, &self.v_nc)?;
        stream::write_vec(w, &self.v_io)?;
        stream::write_vec(w, &self.g_sum_pf_pc)?;
        stream::write_vec(w, &self.w_pf_pc)?;
        stream::write_vec(w, &self.w_mf_nc)?;
        stream::write_f32(w, self.err_drive)?;
        self.plasticity.write(w)
    }

    pub fn read_state<R: Read>(&mut self, r: &mut R) -> SimResult<()> {
        stream::read_vec_into(r, &mut self.v_pc, "pc voltages")?;
        stream::read_vec_into(r, &mut self.v_bc, "bc voltages")?;
        stream::read_vec_into(r, &mut self.v_nc, "nc voltages")?;
        stream::read_vec_into(r, &mut self.v_io, "io voltages")?;
        stream::read_vec_into(r, &mut self.g_sum_pf_pc, "pf->pc conductances")?;
        stream::read_vec_into(r, &mut self.w_pf_pc, "pf->pc weights")?;
        stream::read_vec_into(r, &mut self.w_mf_nc, "mf->nc weights")?;
        self.err_drive = stream::read_f32(r, "error drive")?;
        self.plasticity = PlasticityTrace::read(r, self.plasticity.mode(), self.w_pf_pc.len())?;
        Ok(())
    }
}
