pub mod activity;
pub mod connectivity;
pub mod error;
pub mod front_end;
pub mod kernel;
pub mod params;
pub mod raster;
pub mod seed;
pub mod session;
pub mod simulation;
pub mod spike_sum;
pub mod state;
pub mod stimulus;
pub mod trial_controller;
pub mod types;

mod stream;
mod util;
