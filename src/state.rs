use log::debug;
use std::io::{self, Read, Write};

use crate::activity::{InNetActivityState, MZoneActivityState};
use crate::connectivity::{InNetConnectivityState, MZoneConnectivityState};
use crate::error::{SimError, SimResult};
use crate::params::{ActivityParams, ConnectivityParams, PlasticityMode};
use crate::seed::{self, StateSeeds};

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub connectivity: MZoneConnectivityState,
    pub activity: MZoneActivityState,
}

/// The complete connectivity and activity state of one simulated cerebellum.
///
/// Persisted as `InNetConn, InNetAct, [ZoneConn_i, ZoneAct_i]` for every zone in
/// index order. The number of zones and the plasticity mode are not part of the
/// stream and must be supplied by the reader.
#[derive(Debug, Clone)]
pub struct SimulationState {
    innet_connectivity: InNetConnectivityState,
    innet_activity: InNetActivityState,
    zones: Vec<Zone>,
    master_seed: Option<u64>,
}

// The master seed is not persisted and takes no part in equality.
impl PartialEq for SimulationState {
    fn eq(&self, other: &Self) -> bool {
        self.innet_connectivity == other.innet_connectivity
            && self.innet_activity == other.innet_activity
            && self.zones == other.zones
    }
}

impl SimulationState {
    pub fn create(con: &ConnectivityParams, act: &ActivityParams) -> Self {
        let (master_seed, seeds) = seed::state_seeds_for(con);
        let mut state = Self::from_seeds(&seeds, con, act);
        state.master_seed = Some(master_seed);
        state
    }

    pub fn from_seeds(seeds: &StateSeeds, con: &ConnectivityParams, act: &ActivityParams) -> Self {
        debug!("Generating cbm state...");

        let innet_connectivity = InNetConnectivityState::generate(seeds.innet_connectivity, con);
        let innet_activity = InNetActivityState::new(con, &innet_connectivity);

        let zones = seeds
            .zones
            .iter()
            .map(|zone_seeds| {
                let connectivity = MZoneConnectivityState::generate(zone_seeds.connectivity, con);
                let activity =
                    MZoneActivityState::new(zone_seeds.activity, con, act, &connectivity);
                Zone {
                    connectivity,
                    activity,
                }
            })
            .collect();

        debug!("Finished generating cbm state.");

        Self {
            innet_connectivity,
            innet_activity,
            zones,
            master_seed: None,
        }
    }

    pub fn load<R: Read>(
        r: &mut R,
        con: &ConnectivityParams,
        plasticity: PlasticityMode,
    ) -> SimResult<Self> {
        debug!("Initializing cbm state from stream...");

        let innet_connectivity = InNetConnectivityState::from_stream(r, con)?;
        let innet_activity = InNetActivityState::from_stream(r, con, &innet_connectivity)?;

        let mut zones = Vec::with_capacity(con.num_zones);
        for zone_idx in 0..con.num_zones {
            let connectivity = MZoneConnectivityState::from_stream(r, con)
                .map_err(|err| in_zone(err, zone_idx))?;
            let activity = MZoneActivityState::from_stream(r, con, plasticity, &connectivity)
                .map_err(|err| in_zone(err, zone_idx))?;
            zones.push(Zone {
                connectivity,
                activity,
            });
        }

        debug!("Finished initializing cbm state.");

        Ok(Self {
            innet_connectivity,
            innet_activity,
            zones,
            master_seed: None,
        })
    }

    pub fn write_state<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.innet_connectivity.write_state(w)?;
        self.innet_activity.write_state(w)?;
        for zone in &self.zones {
            zone.connectivity.write_state(w)?;
            zone.activity.write_state(w)?;
        }
        Ok(())
    }

    // The stream is read into a scratch copy first so a failure leaves `self`
    // untouched.
    pub fn read_state<R: Read>(&mut self, r: &mut R) -> SimResult<()> {
        let mut scratch = self.clone();

        scratch.innet_connectivity.read_state(r)?;
        scratch.innet_activity.read_state(r)?;
        for (zone_idx, zone) in scratch.zones.iter_mut().enumerate() {
            zone.connectivity
                .read_state(r)
                .map_err(|err| in_zone(err, zone_idx))?;
            zone.activity
                .read_state(r)
                .map_err(|err| in_zone(err, zone_idx))?;
        }

        *self = scratch;
        Ok(())
    }

    pub fn num_zones(&self) -> usize {
        self.zones.len()
    }

    pub fn master_seed(&self) -> Option<u64> {
        self.master_seed
    }

    pub fn innet_connectivity(&self) -> &InNetConnectivityState {
        &self.innet_connectivity
    }

    pub fn innet_activity(&self) -> &InNetActivityState {
        &self.innet_activity
    }

    pub fn innet_activity_mut(&mut self) -> &mut InNetActivityState {
        &mut self.innet_activity
    }

    pub fn zone(&self, zone_idx: usize) -> &Zone {
        &self.zones[zone_idx]
    }

    pub fn zone_activity_mut(&mut self, zone_idx: usize) -> &mut MZoneActivityState {
        &mut self.zones[zone_idx].activity
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn split_mut(&mut self) -> (&InNetConnectivityState, &mut InNetActivityState, &mut [Zone]) {
        (
            &self.innet_connectivity,
            &mut self.innet_activity,
            &mut self.zones,
        )
    }
}

fn in_zone(err: SimError, zone_idx: usize) -> SimError {
    match err {
        SimError::CorruptState(msg) => SimError::corrupt(format!("zone {}: {}", zone_idx, msg)),
        other => other,
    }
}
