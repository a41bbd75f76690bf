use log::{error, info};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use simple_error::SimpleError;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{SimError, SimResult};
use crate::front_end::{FrontEnd, RunControl, YieldPoint};
use crate::kernel::{Pathway, SimKernel};
use crate::raster::RasterRecorder;
use crate::seed;
use crate::session::{TrialDef, TrialSchedule};
use crate::simulation::Simulation;
use crate::spike_sum::{FiringRate, FiringRates, SpikeSumAccumulator, SpikeWindow};
use crate::stimulus::{StimulusPhase, StimulusSource};
use crate::types::CellType;
use crate::util::{self, in_window};

const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Serialize)]
pub struct CsReport {
    pub mean_g_gr_go: f32,
    pub mean_g_mf_go: f32,
    // `None` when the MF→GO conductance summed to zero.
    pub gr_mf_ratio: Option<f32>,
    pub go: FiringRate,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialSummary {
    pub trial: usize,
    pub name: String,
    pub post_tuning: bool,
    pub cs_delivered: bool,
    pub elapsed_secs: f64,
    pub cs_report: Option<CsReport>,
    pub firing_rates: FiringRates,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub summaries: Vec<TrialSummary>,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct CsConductance {
    g_gr_go: f64,
    g_mf_go: f64,
}

pub struct TrialController<K, S> {
    sim: Simulation,
    kernel: K,
    stimulus: S,
    accumulator: SpikeSumAccumulator,
    raster: Option<RasterRecorder>,
    control: RunControl,
}

impl<K: SimKernel, S: StimulusSource> TrialController<K, S> {
    pub fn new(sim: Simulation, kernel: K, stimulus: S) -> Self {
        let accumulator = SpikeSumAccumulator::new(&sim.config().connectivity);
        Self {
            sim,
            kernel,
            stimulus,
            accumulator,
            raster: None,
            control: RunControl::new(),
        }
    }

    pub fn with_raster(mut self, raster: RasterRecorder) -> Self {
        self.raster = Some(raster);
        self
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn raster(&self) -> Option<&RasterRecorder> {
        self.raster.as_ref()
    }

    pub fn accumulator(&self) -> &SpikeSumAccumulator {
        &self.accumulator
    }

    pub fn into_simulation(self) -> Simulation {
        self.sim
    }

    /// Runs every trial of `schedule` unless cancelled.
    ///
    /// Without a front end the run is non-interactive: there is no per-timestep yield
    /// and firing rates are not published, but pause and cancel set on
    /// [`TrialController::control`] from another thread are still honored at trial ends.
    pub fn run(
        &mut self,
        schedule: &TrialSchedule,
        mut front_end: Option<&mut dyn FrontEnd>,
    ) -> SimResult<RunOutcome> {
        self.check_schedule(schedule)?;
        let mut outcome = RunOutcome::default();

        for (trial, def) in schedule.iter().enumerate() {
            if self.control.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let summary = self.run_trial(trial, def, &mut front_end)?;
            outcome.summaries.push(summary);

            self.wait_while_paused(trial, &mut front_end);
            self.accumulator.reset();
            self.flush_rasters_after(trial);
        }

        if self.control.is_cancelled() && outcome.summaries.len() < schedule.len() {
            info!("Run cancelled after {} trials", outcome.summaries.len());
            outcome.cancelled = true;
        }

        Ok(outcome)
    }

    fn run_trial(
        &mut self,
        trial: usize,
        def: &TrialDef,
        front_end: &mut Option<&mut dyn FrontEnd>,
    ) -> SimResult<TrialSummary> {
        let config = self.sim.config();
        let trial_params = config.trials.clone();
        let us_magnitude = config.activity.us_magnitude;
        let ms_per_time_step = config.activity.ms_per_time_step;

        self.accumulator.reset();

        let post_tuning = trial >= trial_params.homeo_tuning_trials;
        info!(
            "{} trial number: {}",
            if post_tuning { "Post-tuning" } else { "Pre-tuning" },
            trial + 1
        );

        let cs_delivered = def.use_cs && self.draw_cs(trial, def.cs_percent);
        let cs_window = def.cs_window();
        let raster_slot = trial.checked_sub(trial_params.pre_trial_number());
        let num_zones = self.sim.state().num_zones();

        let mut conductance = CsConductance::default();
        let mut cs_report = None;
        let start = Instant::now();

        for t in 0..trial_params.trial_time {
            if def.use_us && t == def.us_onset {
                for zone_idx in 0..num_zones {
                    self.kernel
                        .update_error_drive(self.sim.state_mut(), zone_idx, us_magnitude);
                }
            }

            let phase = StimulusPhase::at(t, &cs_window, trial_params.cs_phasic_size, cs_delivered);
            let mf_input = {
                let kernel = &self.kernel;
                let zone_dcn_spikes: Vec<&[u8]> = (0..num_zones)
                    .map(|zone_idx| kernel.export_nucleus_spikes(zone_idx))
                    .collect();
                self.stimulus.compute_poisson_activity(phase, &zone_dcn_spikes)
            };

            self.kernel.step(self.sim.state_mut(), mf_input)?;

            let kernel = &self.kernel;
            let spikes_by_type = CellType::ALL.map(move |cell_type| kernel.export_spikes(cell_type));
            self.accumulator
                .record_timestep(SpikeWindow::of(t, &cs_window), &spikes_by_type)?;

            if in_window(t, &cs_window) {
                conductance.g_gr_go += sum(kernel.export_conductance_sum(Pathway::GrGo));
                conductance.g_mf_go += sum(kernel.export_conductance_sum(Pathway::MfGo));
            }

            if t == cs_window.end {
                cs_report = self.report_cs(def, &conductance);
            }

            if let (Some(raster), Some(slot)) = (self.raster.as_mut(), raster_slot) {
                raster.record(slot, t, &cs_window, &self.kernel);
            }

            if let Some(front_end) = front_end.as_mut() {
                front_end.process_pending_events(YieldPoint::Timestep { trial, t }, &self.control);
            }
        }

        if cs_window.end == trial_params.trial_time {
            cs_report = self.report_cs(def, &conductance);
        }

        let elapsed = start.elapsed();
        info!("{} took {:.3}s", def.name, elapsed.as_secs_f64());

        let firing_rates = self.accumulator.snapshot().firing_rates(
            util::ms_to_seconds(def.cs_length, ms_per_time_step),
            util::ms_to_seconds(trial_params.trial_time - def.cs_length, ms_per_time_step),
        );

        if let Some(front_end) = front_end.as_mut() {
            front_end.publish_firing_rates(trial, &firing_rates);
        }

        Ok(TrialSummary {
            trial,
            name: def.name.clone(),
            post_tuning,
            cs_delivered,
            elapsed_secs: elapsed.as_secs_f64(),
            cs_report,
            firing_rates,
        })
    }

    fn check_schedule(&self, schedule: &TrialSchedule) -> SimResult<()> {
        let trials = &self.sim.config().trials;
        schedule.validate(trials.trial_time)?;

        if let Some(raster) = &self.raster {
            let first = trials.pre_trial_number();
            let recorded = first..first + raster.num_recorded_trials();
            for (trial, def) in schedule.iter().enumerate() {
                if recorded.contains(&trial) && !raster.accepts(&def.cs_window()) {
                    return Err(SimError::InvalidConfig(SimpleError::new(format!(
                        "trial {} ('{}') has cs_length {}, the rasters are sized for {}",
                        trial + 1,
                        def.name,
                        def.cs_length,
                        trials.cs_length
                    ))));
                }
            }
        }

        Ok(())
    }

    fn draw_cs(&self, trial: usize, cs_percent: f32) -> bool {
        if cs_percent >= 1.0 {
            return true;
        }
        let mut rng = StdRng::seed_from_u64(seed::trial_seed(self.sim.run_seed(), trial));
        rng.gen::<f32>() < cs_percent
    }

    fn report_cs(&self, def: &TrialDef, conductance: &CsConductance) -> Option<CsReport> {
        if def.cs_length == 0 {
            return None;
        }

        let config = self.sim.config();
        let normalizer = (config.connectivity.num_go * def.cs_length) as f64;
        let go = self.accumulator.get(CellType::GO).firing_rate(
            util::ms_to_seconds(def.cs_length, config.activity.ms_per_time_step),
            util::ms_to_seconds(
                config.trials.trial_time - def.cs_length,
                config.activity.ms_per_time_step,
            ),
        );

        let report = CsReport {
            mean_g_gr_go: (conductance.g_gr_go / normalizer) as f32,
            mean_g_mf_go: (conductance.g_mf_go / normalizer) as f32,
            gr_mf_ratio: (conductance.g_mf_go > 0.0)
                .then(|| (conductance.g_gr_go / conductance.g_mf_go) as f32),
            go,
        };

        info!("mean gGRGO   = {}", report.mean_g_gr_go);
        info!("mean gMFGO   = {}", report.mean_g_mf_go);
        match report.gr_mf_ratio {
            Some(ratio) => info!("GR:MF ratio  = {}", ratio),
            None => info!("GR:MF ratio  = n/a"),
        }
        info!(
            "GO CS rate   = {} Hz mean, {} Hz median",
            report.go.cs_mean_fr, report.go.cs_median_fr
        );

        Some(report)
    }

    fn wait_while_paused(&self, trial: usize, front_end: &mut Option<&mut dyn FrontEnd>) {
        if !self.control.is_paused() || self.control.is_cancelled() {
            return;
        }

        info!("Simulation is paused at end of trial {}", trial + 1);

        while self.control.is_paused() && !self.control.is_cancelled() {
            match front_end.as_mut() {
                Some(front_end) => {
                    front_end.process_pending_events(YieldPoint::Paused { trial }, &self.control)
                }
                None => thread::sleep(PAUSE_POLL_INTERVAL),
            }
        }

        if !self.control.is_cancelled() {
            info!("Continuing...");
        }
    }

    // Writes the rasters once the last recorded trial has finished. A failed write is
    // logged and the run goes on.
    fn flush_rasters_after(&self, trial: usize) {
        let raster = match &self.raster {
            Some(raster) => raster,
            None => return,
        };

        let last_recorded = self.sim.config().trials.pre_trial_number() + raster.num_recorded_trials() - 1;
        if trial != last_recorded {
            return;
        }

        if let Some(dir) = raster.output_dir() {
            match raster.write_to(dir) {
                Ok(paths) => info!("Wrote {} raster files to '{}'", paths.len(), dir.display()),
                Err(err) => error!("Failed to write rasters: {}", err),
            }
        }
    }
}

fn sum(values: &[f32]) -> f64 {
    values.iter().map(|value| *value as f64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::BernoulliKernel;
    use crate::simulation::SimulationBuilder;
    use crate::state::SimulationState;
    use crate::stimulus::MossyFiberStimulus;
    use crate::util::test_util;
    use float_cmp::assert_approx_eq;

    fn simulation() -> Simulation {
        let mut builder = SimulationBuilder::new();
        builder
            .with_params(test_util::get_template_config())
            .unwrap()
            .generate_state()
            .unwrap();
        builder.build().unwrap()
    }

    struct ScriptedKernel {
        t: usize,
        go_spike_times: Vec<(usize, Vec<usize>)>,
        spikes: Vec<Vec<u8>>,
        nc: Vec<u8>,
        g_gr_go: Vec<f32>,
        g_mf_go: Vec<f32>,
        error_drives: Vec<(usize, usize, f32)>,
        mf_inputs: Vec<usize>,
        fail_at: Option<usize>,
    }

    impl ScriptedKernel {
        fn new(sim: &Simulation) -> Self {
            let con = &sim.config().connectivity;
            Self {
                t: 0,
                go_spike_times: Vec::new(),
                spikes: CellType::ALL
                    .iter()
                    .map(|cell_type| vec![0; con.num_cells(*cell_type)])
                    .collect(),
                nc: vec![0; con.num_nc],
                g_gr_go: vec![2.0; con.num_go],
                g_mf_go: vec![1.0; con.num_go],
                error_drives: Vec::new(),
                mf_inputs: Vec::new(),
                fail_at: None,
            }
        }
    }

    impl SimKernel for ScriptedKernel {
        fn step(&mut self, _state: &mut SimulationState, mf_input: &[u8]) -> SimResult<()> {
            if self.fail_at == Some(self.t) {
                return Err(SimError::KernelStepFailure("scripted failure".to_string()));
            }

            self.mf_inputs.push(mf_input.len());
            let go = &mut self.spikes[CellType::GO.index()];
            go.iter_mut().for_each(|s| *s = 0);
            for (go_idx, times) in &self.go_spike_times {
                if times.contains(&self.t) {
                    go[*go_idx] = 1;
                }
            }
            self.t += 1;
            Ok(())
        }

        fn export_spikes(&self, cell_type: CellType) -> &[u8] {
            &self.spikes[cell_type.index()]
        }

        fn export_nucleus_spikes(&self, _zone_idx: usize) -> &[u8] {
            &self.nc
        }

        fn export_conductance_sum(&self, pathway: Pathway) -> &[f32] {
            match pathway {
                Pathway::GrGo => &self.g_gr_go,
                Pathway::MfGo => &self.g_mf_go,
            }
        }

        fn update_error_drive(&mut self, _state: &mut SimulationState, zone_idx: usize, magnitude: f32) {
            self.error_drives.push((self.t, zone_idx, magnitude));
        }
    }

    fn stimulus(sim: &Simulation) -> MossyFiberStimulus {
        let config = sim.config();
        MossyFiberStimulus::new(&config.connectivity, &config.activity, &config.stimulus, 3)
    }

    fn single_trial(cs_onset: usize, cs_length: usize) -> TrialSchedule {
        TrialSchedule::new(vec![TrialDef {
            name: "probe".to_string(),
            use_cs: true,
            cs_onset,
            cs_length,
            cs_percent: 1.0,
            use_us: true,
            us_onset: cs_onset + cs_length - 1,
        }])
    }

    #[test]
    fn us_delivered_once_per_zone() {
        let sim = simulation();
        let kernel = ScriptedKernel::new(&sim);
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus);

        let outcome = sut.run(&single_trial(40, 40), None).unwrap();
        assert_eq!(outcome.summaries.len(), 1);
        assert_eq!(sut.kernel.error_drives, vec![(79, 0, 0.3), (79, 1, 0.3)]);
        assert_eq!(sut.kernel.mf_inputs.len(), 100);
        assert!(sut.kernel.mf_inputs.iter().all(|len| *len == 64));
    }

    #[test]
    fn cs_report_normalizes_per_go_cell_and_timestep() {
        let sim = simulation();
        let kernel = ScriptedKernel::new(&sim);
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus);

        let outcome = sut.run(&single_trial(40, 40), None).unwrap();
        let report = outcome.summaries[0].cs_report.clone().unwrap();

        assert_approx_eq!(f32, report.mean_g_gr_go, 2.0);
        assert_approx_eq!(f32, report.mean_g_mf_go, 1.0);
        assert_approx_eq!(f32, report.gr_mf_ratio.unwrap(), 2.0);
    }

    #[test]
    fn go_spikes_are_windowed() {
        let sim = simulation();
        let mut kernel = ScriptedKernel::new(&sim);
        kernel.go_spike_times = vec![(0, vec![40, 50, 80]), (1, vec![10, 45])];
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus);

        let outcome = sut.run(&single_trial(40, 40), None).unwrap();
        let go = outcome.summaries[0].firing_rates.get(CellType::GO);

        // 3 CS spikes over 16 cells in 0.04 s, 2 non-CS spikes over 16 cells in 0.06 s
        assert_approx_eq!(f32, go.cs_mean_fr, 3.0 / (0.04 * 16.0), epsilon = 1e-3);
        assert_approx_eq!(f32, go.non_cs_mean_fr, 2.0 / (0.06 * 16.0), epsilon = 1e-3);
        assert_eq!(sut.accumulator().get(CellType::GO).cs_spike_sum(), 0);
    }

    #[test]
    fn kernel_failure_aborts_run() {
        let sim = simulation();
        let mut kernel = ScriptedKernel::new(&sim);
        kernel.fail_at = Some(5);
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus);

        let result = sut.run(&single_trial(40, 40), None);
        match result {
            Err(err) => assert!(err.is_fatal_for_run()),
            Ok(_) => panic!("expected the run to fail"),
        }
    }

    #[test]
    fn aborted_trial_does_not_leak_into_next_run() {
        let sim = simulation();
        let mut kernel = ScriptedKernel::new(&sim);
        kernel.go_spike_times = vec![(0, (0..30).collect())];
        kernel.fail_at = Some(30);
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus);

        assert!(sut.run(&single_trial(40, 40), None).is_err());
        assert_eq!(sut.accumulator().get(CellType::GO).non_cs_spike_sum(), 30);

        sut.kernel.fail_at = None;
        let outcome = sut.run(&single_trial(40, 40), None).unwrap();
        let go = outcome.summaries[0].firing_rates.get(CellType::GO);
        assert_approx_eq!(f32, go.non_cs_mean_fr, 0.0);
    }

    #[test]
    fn trial_longer_than_trial_time_is_rejected() {
        let sim = simulation();
        let kernel = ScriptedKernel::new(&sim);
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus);

        let mut trial = single_trial(40, 40).get(0).unwrap().clone();
        trial.cs_onset = 0;
        trial.cs_length = 150;
        trial.use_us = false;

        let result = sut.run(&TrialSchedule::new(vec![trial]), None);
        assert!(matches!(result, Err(SimError::InvalidConfig(_))));
        assert!(sut.kernel.mf_inputs.is_empty());
    }

    fn with_template_raster(
        sim: Simulation,
        kernel: ScriptedKernel,
    ) -> TrialController<ScriptedKernel, MossyFiberStimulus> {
        let config = sim.config().clone();
        let raster = RasterRecorder::new(
            config.raster.as_ref().unwrap(),
            &config.connectivity,
            &config.trials,
            1,
        );
        let stimulus = stimulus(&sim);
        TrialController::new(sim, kernel, stimulus).with_raster(raster)
    }

    #[test]
    fn rasters_follow_session_cs_onset() {
        let sim = simulation();
        let mut kernel = ScriptedKernel::new(&sim);
        // first recorded trial is trial 2; its CS starts at t = 50
        kernel.go_spike_times = vec![(0, vec![250])];
        let mut sut = with_template_raster(sim, kernel);

        let trial = single_trial(50, 40).get(0).unwrap().clone();
        sut.run(&TrialSchedule::new(vec![trial; 4]), None).unwrap();

        let go = sut.raster().unwrap().raster(CellType::GO).unwrap();
        assert_eq!(go.get(0, 10), 1);
        assert_eq!(go.get(0, 20), 0);
    }

    #[test]
    fn raster_window_mismatch_is_rejected() {
        let sim = simulation();
        let kernel = ScriptedKernel::new(&sim);
        let mut sut = with_template_raster(sim, kernel);

        let trial = single_trial(40, 30).get(0).unwrap().clone();
        let result = sut.run(&TrialSchedule::new(vec![trial; 4]), None);

        match result {
            Err(SimError::InvalidConfig(err)) => assert_eq!(
                err.as_str(),
                "trial 3 ('probe') has cs_length 30, the rasters are sized for 40"
            ),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(sut.kernel.mf_inputs.is_empty());
    }

    #[test]
    fn malformed_export_aborts_run() {
        let sim = simulation();
        let mut kernel = ScriptedKernel::new(&sim);
        kernel.spikes[CellType::PC.index()].push(0);
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus);

        let result = sut.run(&single_trial(40, 40), None);
        assert!(matches!(result, Err(SimError::KernelStepFailure(_))));
    }

    #[test]
    fn cs_percent_zero_never_delivers_cs() {
        let sim = simulation();
        let kernel = ScriptedKernel::new(&sim);
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus);

        let mut trial = single_trial(40, 40).get(0).unwrap().clone();
        trial.cs_percent = 0.0;
        let outcome = sut.run(&TrialSchedule::new(vec![trial; 3]), None).unwrap();

        assert!(outcome.summaries.iter().all(|summary| !summary.cs_delivered));
    }

    #[test]
    fn tuning_labels() {
        let sim = simulation();
        let trial_params = sim.config().trials.clone();
        let kernel = BernoulliKernel::new(&sim.config().connectivity, &sim.config().activity, 1);
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus);

        let outcome = sut.run(&TrialSchedule::tuning(&trial_params), None).unwrap();

        assert_eq!(outcome.summaries.len(), 4);
        assert!(!outcome.summaries[0].post_tuning);
        assert!(outcome.summaries[1..].iter().all(|summary| summary.post_tuning));
    }

    #[test]
    fn raster_write_failure_does_not_stop_run() {
        let mut config = test_util::get_template_config();
        let dir = tempfile::tempdir().unwrap();
        config.raster.as_mut().unwrap().output_dir = Some(dir.path().join("missing"));

        let mut builder = SimulationBuilder::new();
        builder.with_params(config.clone()).unwrap().generate_state().unwrap();
        let sim = builder.build().unwrap();

        let raster = RasterRecorder::new(
            config.raster.as_ref().unwrap(),
            &config.connectivity,
            &config.trials,
            1,
        );
        let kernel = ScriptedKernel::new(&sim);
        let stimulus = stimulus(&sim);
        let mut sut = TrialController::new(sim, kernel, stimulus).with_raster(raster);

        let outcome = sut.run(&TrialSchedule::tuning(&config.trials), None).unwrap();
        assert_eq!(outcome.summaries.len(), 4);
        assert!(!outcome.cancelled);
    }
}
