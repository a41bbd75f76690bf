use cbmsim::params::SimulationConfig;

pub fn get_scenario_params() -> SimulationConfig {
    let params_yaml_str = r#"
connectivity:
  num_mf: 512
  num_gr: 16384
  num_go: 256
  num_bc: 128
  num_sc: 512
  num_pc: 32
  num_io: 4
  num_nc: 8
  num_zones: 1
  mf_gr_fan_out: 40
  mf_go_fan_out: 20
  go_gr_fan_out: 12
  gr_go_fan_out: 12
  go_go_fan_out: 12
  bc_pc_fan_out: 4
  sc_pc_fan_out: 8
  pc_nc_fan_out: 5
  nc_io_fan_out: 4
  mf_nc_fan_out: 5
  seed_override: 0
activity:
  ms_per_time_step: 1.0
  mf_go_weight: 0.00315
  go_gr_weight: 0.017
  gr_go_weight: 0.00063
  go_go_weight: 0.0125
  spill_frac: 0.15
  init_pfpc_weight: 0.5
  init_mfnc_weight: 0.00085
  plasticity: Graded
  us_magnitude: 0.3
  thresh_decay_tau: 4.0
stimulus:
  cs_tonic_frac: 0.05
  cs_phasic_frac: 0.03
  context_frac: 0.0
  collateral_frac: 0.02
  collaterals_off: false
  bg_freq:
    min: 1.0
    max: 10.0
  cs_bg_freq:
    min: 1.0
    max: 5.0
  context_freq:
    min: 20.0
    max: 50.0
  tonic_freq:
    min: 40.0
    max: 50.0
  phasic_freq:
    min: 120.0
    max: 150.0
  seed_override: 1
trials:
  trial_time: 5000
  cs_onset: 2000
  cs_length: 2000
  cs_phasic_size: 50
  us_onset: null
  cs_percent: 1.0
  homeo_tuning_trials: 1
  granule_act_detect_trials: 1
  num_training_trials: 10
raster:
  cell_types: [GO, GR, PC, DCN, IO]
  ms_pre_cs: 400
  ms_post_cs: 400
  gr_sample_size: 4096
  num_recorded_trials: 1
  output_dir: null
"#;

    serde_yaml::from_str(params_yaml_str).unwrap()
}
