use serde::{Deserialize, Serialize};
use simple_error::SimpleError;
use std::path::PathBuf;

use crate::types::{CellType, HashSet};

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub connectivity: ConnectivityParams,
    pub activity: ActivityParams,
    pub stimulus: StimulusParams,
    pub trials: TrialParams,
    pub raster: Option<RasterParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityParams {
    pub num_mf: usize,
    pub num_gr: usize,
    pub num_go: usize,
    pub num_bc: usize,
    pub num_sc: usize,
    pub num_pc: usize,
    pub num_io: usize,
    pub num_nc: usize,
    pub num_zones: usize,
    pub mf_gr_fan_out: usize,
    pub mf_go_fan_out: usize,
    pub go_gr_fan_out: usize,
    pub gr_go_fan_out: usize,
    pub go_go_fan_out: usize,
    pub bc_pc_fan_out: usize,
    pub sc_pc_fan_out: usize,
    pub pc_nc_fan_out: usize,
    pub nc_io_fan_out: usize,
    pub mf_nc_fan_out: usize,
    pub seed_override: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlasticityMode {
    Off,
    Graded,
    Binary,
    Cascade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityParams {
    pub ms_per_time_step: f32,
    pub mf_go_weight: f32,
    pub go_gr_weight: f32,
    pub gr_go_weight: f32,
    pub go_go_weight: f32,
    pub spill_frac: f32,
    pub init_pfpc_weight: f32,
    pub init_mfnc_weight: f32,
    pub plasticity: PlasticityMode,
    pub us_magnitude: f32,
    pub thresh_decay_tau: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreqRange {
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusParams {
    pub cs_tonic_frac: f32,
    pub cs_phasic_frac: f32,
    pub context_frac: f32,
    pub collateral_frac: f32,
    pub collaterals_off: bool,
    pub bg_freq: FreqRange,
    pub cs_bg_freq: FreqRange,
    pub context_freq: FreqRange,
    pub tonic_freq: FreqRange,
    pub phasic_freq: FreqRange,
    pub seed_override: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialParams {
    pub trial_time: usize,
    pub cs_onset: usize,
    pub cs_length: usize,
    pub cs_phasic_size: usize,
    pub us_onset: Option<usize>,
    pub cs_percent: f32,
    pub homeo_tuning_trials: usize,
    pub granule_act_detect_trials: usize,
    pub num_training_trials: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterParams {
    pub cell_types: Vec<CellType>,
    pub ms_pre_cs: usize,
    pub ms_post_cs: usize,
    pub gr_sample_size: usize,
    pub num_recorded_trials: usize,
    pub output_dir: Option<PathBuf>,
}

impl TrialParams {
    pub fn cs_offset(&self) -> usize {
        self.cs_onset + self.cs_length
    }

    pub fn pre_trial_number(&self) -> usize {
        self.homeo_tuning_trials + self.granule_act_detect_trials
    }

    pub fn num_total_trials(&self) -> usize {
        self.pre_trial_number() + self.num_training_trials
    }
}

impl RasterParams {
    pub fn window_len(&self, cs_length: usize) -> usize {
        self.ms_pre_cs + cs_length + self.ms_post_cs
    }
}

impl ConnectivityParams {
    pub fn num_cells(&self, cell_type: CellType) -> usize {
        match cell_type {
            CellType::MF => self.num_mf,
            CellType::GR => self.num_gr,
            CellType::GO => self.num_go,
            CellType::BC => self.num_bc,
            CellType::SC => self.num_sc,
            CellType::PC => self.num_pc,
            CellType::IO => self.num_io,
            CellType::DCN => self.num_nc,
        }
    }
}

impl Default for ConnectivityParams {
    fn default() -> Self {
        Self {
            num_mf: 4096,
            num_gr: 1048576,
            num_go: 4096,
            num_bc: 128,
            num_sc: 512,
            num_pc: 32,
            num_io: 4,
            num_nc: 8,
            num_zones: 1,
            mf_gr_fan_out: 40,
            mf_go_fan_out: 20,
            go_gr_fan_out: 12,
            gr_go_fan_out: 12,
            go_go_fan_out: 12,
            bc_pc_fan_out: 4,
            sc_pc_fan_out: 8,
            pc_nc_fan_out: 5,
            nc_io_fan_out: 4,
            mf_nc_fan_out: 5,
            seed_override: None,
        }
    }
}

impl Default for ActivityParams {
    fn default() -> Self {
        Self {
            ms_per_time_step: 1.0,
            mf_go_weight: 0.0035 * 0.9,
            go_gr_weight: 0.017,
            gr_go_weight: 0.0007 * 0.9,
            go_go_weight: 0.0125,
            spill_frac: 0.15,
            init_pfpc_weight: 0.5,
            init_mfnc_weight: 0.00085,
            plasticity: PlasticityMode::Graded,
            us_magnitude: 0.3,
            thresh_decay_tau: 4.0,
        }
    }
}

impl Default for StimulusParams {
    fn default() -> Self {
        Self {
            cs_tonic_frac: 0.05,
            cs_phasic_frac: 0.03,
            context_frac: 0.0,
            collateral_frac: 0.02,
            collaterals_off: false,
            bg_freq: FreqRange { min: 1.0, max: 10.0 },
            cs_bg_freq: FreqRange { min: 1.0, max: 5.0 },
            context_freq: FreqRange { min: 20.0, max: 50.0 },
            tonic_freq: FreqRange { min: 40.0, max: 50.0 },
            phasic_freq: FreqRange { min: 120.0, max: 150.0 },
            seed_override: None,
        }
    }
}

impl Default for TrialParams {
    fn default() -> Self {
        Self {
            trial_time: 5000,
            cs_onset: 2000,
            cs_length: 2000,
            cs_phasic_size: 50,
            us_onset: None,
            cs_percent: 1.0,
            homeo_tuning_trials: 0,
            granule_act_detect_trials: 0,
            num_training_trials: 100,
        }
    }
}

impl Default for RasterParams {
    fn default() -> Self {
        Self {
            cell_types: vec![
                CellType::GO,
                CellType::GR,
                CellType::PC,
                CellType::DCN,
                CellType::IO,
            ],
            ms_pre_cs: 400,
            ms_post_cs: 400,
            gr_sample_size: 4096,
            num_recorded_trials: 1,
            output_dir: None,
        }
    }
}

pub fn validate_simulation_config(config: &SimulationConfig) -> Result<(), SimpleError> {
    validate_connectivity_params(&config.connectivity)?;
    validate_activity_params(&config.activity)?;
    validate_stimulus_params(&config.stimulus)?;
    validate_trial_params(&config.trials)?;

    if let Some(raster_params) = &config.raster {
        validate_raster_params(raster_params, &config.connectivity)?;
    }

    Ok(())
}

pub fn validate_connectivity_params(con_params: &ConnectivityParams) -> Result<(), SimpleError> {
    for cell_type in CellType::ALL {
        if con_params.num_cells(cell_type) == 0 {
            return Err(SimpleError::new(format!(
                "num_{} must be strictly positive",
                cell_type.to_string().to_lowercase()
            )));
        }
    }

    if con_params.num_zones == 0 {
        return Err(SimpleError::new("num_zones must be strictly positive"));
    }

    let fan_outs = [
        ("mf_gr_fan_out", con_params.mf_gr_fan_out, con_params.num_gr),
        ("mf_go_fan_out", con_params.mf_go_fan_out, con_params.num_go),
        ("go_gr_fan_out", con_params.go_gr_fan_out, con_params.num_gr),
        ("gr_go_fan_out", con_params.gr_go_fan_out, con_params.num_go),
        ("go_go_fan_out", con_params.go_go_fan_out, con_params.num_go),
        ("bc_pc_fan_out", con_params.bc_pc_fan_out, con_params.num_pc),
        ("sc_pc_fan_out", con_params.sc_pc_fan_out, con_params.num_pc),
        ("pc_nc_fan_out", con_params.pc_nc_fan_out, con_params.num_nc),
        ("nc_io_fan_out", con_params.nc_io_fan_out, con_params.num_io),
        ("mf_nc_fan_out", con_params.mf_nc_fan_out, con_params.num_nc),
    ];

    for (name, fan_out, num_post) in fan_outs {
        if fan_out > num_post {
            return Err(SimpleError::new(format!(
                "{} must not exceed the number of target cells ({})",
                name, num_post
            )));
        }
    }

    if u32::try_from(con_params.num_gr).is_err() {
        return Err(SimpleError::new("num_gr must fit into 32 bits"));
    }

    Ok(())
}

pub fn validate_activity_params(act_params: &ActivityParams) -> Result<(), SimpleError> {
    if act_params.ms_per_time_step <= 0.0 {
        return Err(SimpleError::new("ms_per_time_step must be strictly positive"));
    }

    let weights = [
        ("mf_go_weight", act_params.mf_go_weight),
        ("go_gr_weight", act_params.go_gr_weight),
        ("gr_go_weight", act_params.gr_go_weight),
        ("go_go_weight", act_params.go_go_weight),
        ("init_pfpc_weight", act_params.init_pfpc_weight),
        ("init_mfnc_weight", act_params.init_mfnc_weight),
    ];

    for (name, weight) in weights {
        if weight < 0.0 {
            return Err(SimpleError::new(format!("{} must not be negative", name)));
        }
    }

    if act_params.spill_frac < 0.0 || act_params.spill_frac > 1.0 {
        return Err(SimpleError::new("spill_frac must be in [0, 1]"));
    }

    if act_params.thresh_decay_tau <= 0.0 {
        return Err(SimpleError::new("thresh_decay_tau must be strictly positive"));
    }

    Ok(())
}

pub fn validate_stimulus_params(stim_params: &StimulusParams) -> Result<(), SimpleError> {
    let fracs = [
        ("cs_tonic_frac", stim_params.cs_tonic_frac),
        ("cs_phasic_frac", stim_params.cs_phasic_frac),
        ("context_frac", stim_params.context_frac),
        ("collateral_frac", stim_params.collateral_frac),
    ];

    for (name, frac) in fracs {
        if !(0.0..=1.0).contains(&frac) {
            return Err(SimpleError::new(format!("{} must be in [0, 1]", name)));
        }
    }

    if fracs.iter().map(|(_, frac)| frac).sum::<f32>() > 1.0 {
        return Err(SimpleError::new(
            "mossy fiber population fractions must not sum to more than 1",
        ));
    }

    let ranges = [
        ("bg_freq", stim_params.bg_freq),
        ("cs_bg_freq", stim_params.cs_bg_freq),
        ("context_freq", stim_params.context_freq),
        ("tonic_freq", stim_params.tonic_freq),
        ("phasic_freq", stim_params.phasic_freq),
    ];

    for (name, range) in ranges {
        if range.min < 0.0 || range.min > range.max {
            return Err(SimpleError::new(format!(
                "{} must satisfy 0 <= min <= max",
                name
            )));
        }
    }

    Ok(())
}

pub fn validate_trial_params(trial_params: &TrialParams) -> Result<(), SimpleError> {
    if trial_params.trial_time == 0 {
        return Err(SimpleError::new("trial_time must be strictly positive"));
    }

    if trial_params.cs_offset() > trial_params.trial_time {
        return Err(SimpleError::new(
            "cs_onset + cs_length must not exceed trial_time",
        ));
    }

    if trial_params.cs_phasic_size > trial_params.cs_length {
        return Err(SimpleError::new(
            "cs_phasic_size must not exceed cs_length",
        ));
    }

    match trial_params.us_onset {
        Some(us_onset) if us_onset >= trial_params.trial_time => {
            return Err(SimpleError::new("us_onset must be less than trial_time"));
        }
        None if trial_params.cs_offset() >= trial_params.trial_time => {
            return Err(SimpleError::new(
                "cs_onset + cs_length must be less than trial_time when us_onset defaults to the CS offset",
            ));
        }
        _ => {}
    }

    if !(0.0..=1.0).contains(&trial_params.cs_percent) {
        return Err(SimpleError::new("cs_percent must be in [0, 1]"));
    }

    Ok(())
}

pub fn validate_raster_params(
    raster_params: &RasterParams,
    con_params: &ConnectivityParams,
) -> Result<(), SimpleError> {
    if raster_params.gr_sample_size > con_params.num_gr {
        return Err(SimpleError::new("gr_sample_size must not exceed num_gr"));
    }

    if raster_params.num_recorded_trials == 0 {
        return Err(SimpleError::new(
            "num_recorded_trials must be strictly positive",
        ));
    }

    let mut seen = HashSet::default();
    for cell_type in &raster_params.cell_types {
        if !seen.insert(*cell_type) {
            return Err(SimpleError::new(format!(
                "duplicate raster cell type: {}",
                cell_type
            )));
        }
    }

    Ok(())
}
