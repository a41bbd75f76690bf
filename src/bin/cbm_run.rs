use clap::Parser;
use log::{error, info};
use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;

use cbmsim::front_end::{FrontEnd, RunControl, YieldPoint};
use cbmsim::kernel::BernoulliKernel;
use cbmsim::params::SimulationConfig;
use cbmsim::raster::RasterRecorder;
use cbmsim::session::{SessionDefinition, TrialSchedule};
use cbmsim::simulation::{Simulation, SimulationBuilder};
use cbmsim::spike_sum::FiringRates;
use cbmsim::stimulus::MossyFiberStimulus;
use cbmsim::trial_controller::TrialController;

#[path = "../scenario_params.rs"]
mod scenario_params;

/// Runs cerebellar conditioning trials with the stochastic surrogate kernel
#[derive(Parser, Debug)]
#[command(name = "cbm_run", version, long_about = None)]
struct Args {
    /// YAML simulation config (defaults to the built-in scenario)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// YAML session definition (defaults to the tuning schedule)
    #[arg(short, long)]
    session: Option<PathBuf>,

    /// Load a state-only file instead of generating a fresh state
    #[arg(long, conflicts_with = "load_sim")]
    load_state: Option<PathBuf>,

    /// Load a simulation file (parameters and state)
    #[arg(long)]
    load_sim: Option<PathBuf>,

    /// Save the state after the run
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Save parameters and state after the run
    #[arg(long)]
    save_sim: Option<PathBuf>,

    /// Directory for raster files (overrides the config)
    #[arg(long)]
    raster_dir: Option<PathBuf>,

    /// Save PF->PC weights of zone 0 after the run
    #[arg(long)]
    pfpc_weights: Option<PathBuf>,

    /// Write per-trial summaries as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Read p(ause), c(ontinue) and q(uit) commands from stdin
    #[arg(short, long, default_value_t = false)]
    interactive: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

/// Logs firing rates at the end of every trial.
struct ConsoleFrontEnd;

impl FrontEnd for ConsoleFrontEnd {
    fn process_pending_events(&mut self, point: YieldPoint, _control: &RunControl) {
        if let YieldPoint::Paused { .. } = point {
            thread::sleep(std::time::Duration::from_millis(50));
        }
    }

    fn publish_firing_rates(&mut self, trial: usize, rates: &FiringRates) {
        for (cell_type, rate) in rates.iter() {
            info!(
                "trial {} {}: non-CS {:.2}/{:.2} Hz, CS {:.2}/{:.2} Hz (mean/median)",
                trial + 1,
                cell_type,
                rate.non_cs_mean_fr,
                rate.non_cs_median_fr,
                rate.cs_mean_fr,
                rate.cs_median_fr
            );
        }
    }
}

fn spawn_command_reader(control: RunControl) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line.as_deref().map(str::trim) {
                Ok("p") => control.pause(),
                Ok("c") => control.resume(),
                Ok("q") => {
                    control.cancel();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}

fn load_config(args: &Args) -> Result<SimulationConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => serde_yaml::from_str(&fs::read_to_string(path)?)?,
        None => scenario_params::get_scenario_params(),
    };

    if let Some(dir) = &args.raster_dir {
        if let Some(raster) = config.raster.as_mut() {
            raster.output_dir = Some(dir.clone());
        }
    }

    Ok(config)
}

fn build_simulation(
    args: &Args,
    config: SimulationConfig,
) -> Result<Simulation, Box<dyn std::error::Error>> {
    if let Some(path) = &args.load_sim {
        return Ok(Simulation::from_sim_file(path, config)?);
    }

    let mut builder = SimulationBuilder::new();
    builder.with_params(config)?;
    match &args.load_state {
        Some(path) => builder.load_state_file(path)?,
        None => builder.generate_state()?,
    };
    Ok(builder.build()?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let config = load_config(&args)?;
    let sim = build_simulation(&args, config)?;
    let config = sim.config().clone();

    let schedule = match &args.session {
        Some(path) => {
            let session = SessionDefinition::from_yaml(&fs::read_to_string(path)?)?;
            TrialSchedule::from_session(&session, config.trials.trial_time)?
        }
        None => TrialSchedule::tuning(&config.trials),
    };
    info!("Running {} trials", schedule.len());

    let mut seeds = sim.seed_provider();
    let stimulus = MossyFiberStimulus::new(
        &config.connectivity,
        &config.activity,
        &config.stimulus,
        seeds.next_seed(),
    );
    let kernel = BernoulliKernel::new(&config.connectivity, &config.activity, seeds.next_seed());

    let mut controller = TrialController::new(sim, kernel, stimulus);
    if let Some(raster_params) = &config.raster {
        controller = controller.with_raster(RasterRecorder::new(
            raster_params,
            &config.connectivity,
            &config.trials,
            seeds.next_seed(),
        ));
    }

    let mut console = ConsoleFrontEnd;
    let front_end: Option<&mut dyn FrontEnd> = if args.interactive {
        spawn_command_reader(controller.control().clone());
        Some(&mut console)
    } else {
        None
    };

    let outcome = controller.run(&schedule, front_end)?;
    if outcome.cancelled {
        info!("Stopped after {} of {} trials", outcome.summaries.len(), schedule.len());
    }

    if let Some(path) = &args.summary {
        fs::write(path, serde_json::to_vec_pretty(&outcome.summaries)?)?;
    }

    let sim = controller.into_simulation();

    if let Some(path) = &args.save_state {
        if let Err(err) = sim.save_state(path) {
            error!("{}", err);
        }
    }

    if let Some(path) = &args.save_sim {
        if let Err(err) = sim.save_sim(path) {
            error!("{}", err);
        }
    }

    if let Some(path) = &args.pfpc_weights {
        if let Err(err) = sim.save_pfpc_weights(0, path) {
            error!("{}", err);
        }
    }

    Ok(())
}
