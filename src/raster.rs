use log::debug;
use rand::{rngs::StdRng, seq::index, SeedableRng};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{SimError, SimResult};
use crate::kernel::SimKernel;
use crate::params::{ConnectivityParams, RasterParams, TrialParams};
use crate::types::CellType;

#[derive(Debug, Clone)]
pub struct Raster {
    cell_type: CellType,
    num_rows: usize,
    num_cols: usize,
    data: Vec<u8>,
}

impl Raster {
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.data[row * self.num_cols + col]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

// Each recorded trial owns a block of `window_len` columns, so a raster holds
// `window_len * num_recorded_trials` columns. Columns are aligned to the onset of
// each recorded trial's own CS. GR rows are a fixed random sample.
#[derive(Debug, Clone)]
pub struct RasterRecorder {
    window_start_offset: usize,
    cs_length: usize,
    window_len: usize,
    num_slots: usize,
    gr_sample: Vec<usize>,
    rasters: Vec<Raster>,
    output_dir: Option<PathBuf>,
}

impl RasterRecorder {
    pub fn new(
        params: &RasterParams,
        con: &ConnectivityParams,
        trials: &TrialParams,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut gr_sample = index::sample(&mut rng, con.num_gr, params.gr_sample_size).into_vec();
        gr_sample.sort_unstable();

        let window_len = params.window_len(trials.cs_length);
        let num_cols = window_len * params.num_recorded_trials;

        let rasters = params
            .cell_types
            .iter()
            .map(|cell_type| {
                let num_rows = match cell_type {
                    CellType::GR => gr_sample.len(),
                    other => con.num_cells(*other),
                };
                Raster {
                    cell_type: *cell_type,
                    num_rows,
                    num_cols,
                    data: vec![0; num_rows * num_cols],
                }
            })
            .collect();

        Self {
            window_start_offset: params.ms_pre_cs,
            cs_length: trials.cs_length,
            window_len,
            num_slots: params.num_recorded_trials,
            gr_sample,
            rasters,
            output_dir: params.output_dir.clone(),
        }
    }

    pub fn num_recorded_trials(&self) -> usize {
        self.num_slots
    }

    pub fn gr_sample(&self) -> &[usize] {
        &self.gr_sample
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn accepts(&self, cs_window: &Range<usize>) -> bool {
        cs_window.len() == self.cs_length
    }

    fn column(&self, slot: usize, t: usize, cs_onset: usize) -> Option<usize> {
        if slot >= self.num_slots || t + self.window_start_offset < cs_onset {
            return None;
        }
        let col = t + self.window_start_offset - cs_onset;
        (col < self.window_len).then(|| slot * self.window_len + col)
    }

    pub fn record<K: SimKernel + ?Sized>(
        &mut self,
        slot: usize,
        t: usize,
        cs_window: &Range<usize>,
        kernel: &K,
    ) {
        let col = match self.column(slot, t, cs_window.start) {
            Some(col) => col,
            None => return,
        };

        for raster in &mut self.rasters {
            let spikes = kernel.export_spikes(raster.cell_type);
            let num_cols = raster.num_cols;

            if raster.cell_type == CellType::GR {
                for (row, gr_idx) in self.gr_sample.iter().enumerate() {
                    raster.data[row * num_cols + col] = spikes.get(*gr_idx).copied().unwrap_or(0);
                }
            } else {
                for (row, spike) in spikes.iter().take(raster.num_rows).enumerate() {
                    raster.data[row * num_cols + col] = *spike;
                }
            }
        }
    }

    pub fn raster(&self, cell_type: CellType) -> Option<&Raster> {
        self.rasters.iter().find(|raster| raster.cell_type == cell_type)
    }

    pub fn write_to(&self, dir: &Path) -> SimResult<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(self.rasters.len());

        for raster in &self.rasters {
            let path = dir.join(raster.cell_type.raster_file_name());
            debug!("Saving {} raster to '{}'", raster.cell_type, path.display());

            let file = File::create(&path).map_err(|err| SimError::io(&path, err))?;
            let mut writer = BufWriter::new(file);
            writer
                .write_all(&raster.data)
                .and_then(|_| writer.flush())
                .map_err(|err| SimError::io(&path, err))?;

            paths.push(path);
        }

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Pathway;
    use crate::state::SimulationState;
    use crate::util::test_util;
    use std::fs;

    struct FixedSpikes {
        spikes: Vec<Vec<u8>>,
    }

    impl SimKernel for FixedSpikes {
        fn step(&mut self, _state: &mut SimulationState, _mf_input: &[u8]) -> SimResult<()> {
            Ok(())
        }

        fn export_spikes(&self, cell_type: CellType) -> &[u8] {
            &self.spikes[cell_type.index()]
        }

        fn export_nucleus_spikes(&self, _zone_idx: usize) -> &[u8] {
            &[]
        }

        fn export_conductance_sum(&self, _pathway: Pathway) -> &[f32] {
            &[]
        }

        fn update_error_drive(&mut self, _state: &mut SimulationState, _zone_idx: usize, _magnitude: f32) {}
    }

    const CS: Range<usize> = 40..80;

    fn fixture() -> (RasterRecorder, FixedSpikes) {
        let config = test_util::get_template_config();
        let raster_params = config.raster.clone().unwrap();
        let sut = RasterRecorder::new(&raster_params, &config.connectivity, &config.trials, 1);
        let kernel = FixedSpikes {
            spikes: CellType::ALL
                .iter()
                .map(|cell_type| vec![1; config.connectivity.num_cells(*cell_type)])
                .collect(),
        };
        (sut, kernel)
    }

    #[test]
    fn shapes() {
        let (sut, _) = fixture();
        let go = sut.raster(CellType::GO).unwrap();
        assert_eq!(go.num_rows(), 16);
        assert_eq!(go.num_cols(), 60 * 2);
        assert_eq!(sut.raster(CellType::GR).unwrap().num_rows(), 32);
        assert!(sut.raster(CellType::IO).is_none());
    }

    #[test]
    fn gr_sample_is_distinct_and_in_range() {
        let (sut, _) = fixture();
        let sample = sut.gr_sample();
        assert_eq!(sample.len(), 32);
        assert!(sample.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(sample.iter().all(|idx| *idx < 512));
    }

    #[test]
    fn records_only_inside_window() {
        let (mut sut, kernel) = fixture();

        // window is [30, 90)
        sut.record(0, 29, &CS, &kernel);
        sut.record(0, 90, &CS, &kernel);
        sut.record(2, 50, &CS, &kernel);
        assert!(sut.raster(CellType::PC).unwrap().as_bytes().iter().all(|s| *s == 0));

        sut.record(0, 30, &CS, &kernel);
        sut.record(1, 89, &CS, &kernel);
        let pc = sut.raster(CellType::PC).unwrap();
        assert_eq!(pc.get(0, 0), 1);
        assert_eq!(pc.get(3, 60 + 59), 1);
        assert_eq!(pc.get(0, 1), 0);
    }

    #[test]
    fn columns_follow_the_trial_cs_onset() {
        let (mut sut, kernel) = fixture();
        let shifted = 60..100;
        assert!(sut.accepts(&shifted));
        assert!(!sut.accepts(&(60..90)));

        // window is [50, 110)
        sut.record(0, 49, &shifted, &kernel);
        assert!(sut.raster(CellType::PC).unwrap().as_bytes().iter().all(|s| *s == 0));

        sut.record(0, 50, &shifted, &kernel);
        let pc = sut.raster(CellType::PC).unwrap();
        assert_eq!(pc.get(0, 0), 1);
        assert_eq!(pc.get(0, 10), 0);
    }

    #[test]
    fn writes_one_file_per_cell_type() {
        let (mut sut, kernel) = fixture();
        sut.record(0, 40, &CS, &kernel);

        let dir = tempfile::tempdir().unwrap();
        let paths = sut.write_to(dir.path()).unwrap();

        assert_eq!(paths.len(), 3);
        let go_bytes = fs::read(dir.path().join("allGORaster.bin")).unwrap();
        assert_eq!(go_bytes.len(), 16 * 120);
        assert_eq!(go_bytes[10], 1);
    }

    #[test]
    fn unwritable_dir_is_io_failure() {
        let (sut, _) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        let result = sut.write_to(&missing);
        assert!(matches!(result, Err(SimError::IoFailure { .. })));
    }
}
