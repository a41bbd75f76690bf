use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info};
use serde::de::DeserializeOwned;
use simple_error::try_with;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{SimError, SimResult};
use crate::params::{self, ActivityParams, ConnectivityParams, SimulationConfig};
use crate::seed::SeedProvider;
use crate::state::SimulationState;
use crate::stream;

#[derive(Default)]
pub struct SimulationBuilder {
    config: Option<SimulationConfig>,
    state: Option<SimulationState>,
}

impl SimulationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(&mut self, config: SimulationConfig) -> SimResult<&mut Self> {
        if self.state.is_some() {
            return Err(SimError::precondition(
                "parameters cannot change once the state is initialized",
            ));
        }

        try_with!(
            params::validate_simulation_config(&config),
            "invalid simulation parameters"
        );

        self.config = Some(config);
        Ok(self)
    }

    pub fn generate_state(&mut self) -> SimResult<&mut Self> {
        let config = self.config_for_state()?;
        let state = SimulationState::create(&config.connectivity, &config.activity);
        self.state = Some(state);
        Ok(self)
    }

    pub fn load_state_file(&mut self, path: &Path) -> SimResult<&mut Self> {
        let config = self.config_for_state()?;
        info!("Loading state from '{}'", path.display());

        let mut reader = open(path)?;
        let state = SimulationState::load(
            &mut reader,
            &config.connectivity,
            config.activity.plasticity,
        )?;
        expect_end_of_file(&mut reader, path)?;

        self.state = Some(state);
        Ok(self)
    }

    pub fn build(self) -> SimResult<Simulation> {
        let config = self
            .config
            .ok_or_else(|| SimError::precondition("no simulation parameters given"))?;
        let state = self
            .state
            .ok_or_else(|| SimError::precondition("no state to build the simulation from"))?;

        Ok(Simulation::new(config, state))
    }

    fn config_for_state(&self) -> SimResult<&SimulationConfig> {
        if self.state.is_some() {
            return Err(SimError::precondition("state is already initialized"));
        }

        self.config
            .as_ref()
            .ok_or_else(|| SimError::precondition("state requested before parameters"))
    }
}

pub struct Simulation {
    config: SimulationConfig,
    state: SimulationState,
    run_seed: u64,
}

impl Simulation {
    fn new(config: SimulationConfig, state: SimulationState) -> Self {
        let run_seed = SeedProvider::from_override(config.stimulus.seed_override).master_seed();
        Self {
            config,
            state,
            run_seed,
        }
    }

    // Reads a file written by [`Simulation::save_sim`]. Connectivity and activity
    // parameters come from the file; the remaining parameters from `base`.
    pub fn from_sim_file(path: &Path, base: SimulationConfig) -> SimResult<Self> {
        info!("Loading simulation from '{}'", path.display());
        let mut reader = open(path)?;

        let connectivity: ConnectivityParams = read_json_blob(&mut reader, "connectivity parameters")?;
        let activity: ActivityParams = read_json_blob(&mut reader, "activity parameters")?;

        let config = SimulationConfig {
            connectivity,
            activity,
            ..base
        };
        try_with!(
            params::validate_simulation_config(&config),
            "invalid simulation parameters in '{}'",
            path.display()
        );

        let state = SimulationState::load(
            &mut reader,
            &config.connectivity,
            config.activity.plasticity,
        )?;
        expect_end_of_file(&mut reader, path)?;

        Ok(Self::new(config, state))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    pub fn run_seed(&self) -> u64 {
        self.run_seed
    }

    pub fn seed_provider(&self) -> SeedProvider {
        SeedProvider::new(self.run_seed)
    }

    pub fn save_state(&self, path: &Path) -> SimResult<()> {
        debug!("Saving state to '{}'", path.display());
        write_file(path, |w| self.state.write_state(w))
    }

    pub fn save_sim(&self, path: &Path) -> SimResult<()> {
        debug!("Saving simulation to '{}'", path.display());
        write_file(path, |w| {
            stream::write_blob(w, &serde_json::to_vec(&self.config.connectivity)?)?;
            stream::write_blob(w, &serde_json::to_vec(&self.config.activity)?)?;
            self.state.write_state(w)
        })
    }

    pub fn save_pfpc_weights(&self, zone_idx: usize, path: &Path) -> SimResult<()> {
        if zone_idx >= self.state.num_zones() {
            return Err(SimError::precondition(format!(
                "zone {} does not exist, the simulation has {} zones",
                zone_idx,
                self.state.num_zones()
            )));
        }

        debug!("Saving zone {} pf->pc weights to '{}'", zone_idx, path.display());
        let weights = &self.state.zone(zone_idx).activity.w_pf_pc;
        write_file(path, |w| {
            for weight in weights {
                w.write_f32::<LittleEndian>(*weight)?;
            }
            Ok(())
        })
    }
}

fn open(path: &Path) -> SimResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| SimError::io(path, err))
}

fn write_file<F>(path: &Path, write: F) -> SimResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let file = File::create(path).map_err(|err| SimError::io(path, err))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)
        .and_then(|_| writer.flush())
        .map_err(|err| SimError::io(path, err))
}

fn read_json_blob<T: DeserializeOwned, R: Read>(r: &mut R, what: &str) -> SimResult<T> {
    let bytes = stream::read_blob(r, what)?;
    serde_json::from_slice(&bytes)
        .map_err(|err| SimError::corrupt(format!("unparseable {}: {}", what, err)))
}

fn expect_end_of_file<R: Read>(r: &mut R, path: &Path) -> SimResult<()> {
    let mut probe = [0u8; 1];
    match r.read(&mut probe) {
        Ok(0) => Ok(()),
        Ok(_) => Err(SimError::corrupt(format!(
            "trailing data after state in '{}'",
            path.display()
        ))),
        Err(err) => Err(SimError::io(path, err)),
    }
}
