use log::debug;
use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use std::io::{self, Read, Write};

use crate::error::{SimError, SimResult};
use crate::params::ConnectivityParams;
use crate::stream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    num_pre: usize,
    num_post: usize,
    offsets: Vec<u32>,
    targets: Vec<u32>,
}

impl Projection {
    // Every presynaptic cell contacts `fan_out` distinct postsynaptic cells.
    pub fn fan_out(rng: &mut StdRng, num_pre: usize, num_post: usize, fan_out: usize) -> Self {
        let mut offsets = Vec::with_capacity(num_pre + 1);
        let mut targets = Vec::with_capacity(num_pre * fan_out);
        offsets.push(0);

        for _ in 0..num_pre {
            let mut chosen = index::sample(rng, num_post, fan_out).into_vec();
            chosen.sort_unstable();
            targets.extend(chosen.into_iter().map(|idx| idx as u32));
            offsets.push(targets.len() as u32);
        }

        Self {
            num_pre,
            num_post,
            offsets,
            targets,
        }
    }

    // Every postsynaptic cell receives exactly one presynaptic cell.
    pub fn convergent(rng: &mut StdRng, num_pre: usize, num_post: usize) -> Self {
        let parents: Vec<usize> = (0..num_post).map(|_| rng.gen_range(0..num_pre)).collect();

        let mut counts = vec![0u32; num_pre];
        for parent in &parents {
            counts[*parent] += 1;
        }

        let mut offsets = Vec::with_capacity(num_pre + 1);
        offsets.push(0);
        for count in &counts {
            let last = *offsets.last().unwrap_or(&0);
            offsets.push(last + count);
        }

        let mut cursor: Vec<u32> = offsets[..num_pre].to_vec();
        let mut targets = vec![0u32; num_post];
        for (post_idx, parent) in parents.iter().enumerate() {
            targets[cursor[*parent] as usize] = post_idx as u32;
            cursor[*parent] += 1;
        }

        Self {
            num_pre,
            num_post,
            offsets,
            targets,
        }
    }

    pub fn num_pre(&self) -> usize {
        self.num_pre
    }

    pub fn num_post(&self) -> usize {
        self.num_post
    }

    pub fn num_synapses(&self) -> usize {
        self.targets.len()
    }

    pub fn targets_of(&self, pre_idx: usize) -> &[u32] {
        let start = self.offsets[pre_idx] as usize;
        let end = self.offsets[pre_idx + 1] as usize;
        &self.targets[start..end]
    }

    pub fn synapse_range(&self, pre_idx: usize) -> std::ops::Range<usize> {
        self.offsets[pre_idx] as usize..self.offsets[pre_idx + 1] as usize
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        stream::write_vec(w, &self.offsets)?;
        stream::write_vec(w, &self.targets)
    }

    pub fn read<R: Read>(r: &mut R, num_pre: usize, num_post: usize, what: &str) -> SimResult<Self> {
        let offsets: Vec<u32> = stream::read_vec(r, num_pre + 1, &format!("{} offsets", what))?;

        if offsets.first() != Some(&0) {
            return Err(SimError::corrupt(format!("{} offsets must start at 0", what)));
        }

        if offsets.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(SimError::corrupt(format!(
                "{} offsets are not monotonic",
                what
            )));
        }

        let num_synapses = *offsets.last().unwrap_or(&0) as usize;
        if num_synapses > num_pre.saturating_mul(num_post) {
            return Err(SimError::corrupt(format!(
                "{} declares {} synapses for {}x{} cells",
                what, num_synapses, num_pre, num_post
            )));
        }

        let targets: Vec<u32> =
            stream::read_vec(r, num_synapses, &format!("{} targets", what))?;

        if let Some(target) = targets.iter().find(|t| **t as usize >= num_post) {
            return Err(SimError::corrupt(format!(
                "{} target {} out of range (num_post = {})",
                what, target, num_post
            )));
        }

        Ok(Self {
            num_pre,
            num_post,
            offsets,
            targets,
        })
    }

    pub fn read_in_place<R: Read>(&mut self, r: &mut R, what: &str) -> SimResult<()> {
        *self = Self::read(r, self.num_pre, self.num_post, what)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InNetConnectivityState {
    pub mf_gr: Projection,
    pub mf_go: Projection,
    pub go_gr: Projection,
    pub gr_go: Projection,
    pub go_go: Projection,
}

impl InNetConnectivityState {
    pub fn generate(seed: u64, con: &ConnectivityParams) -> Self {
        debug!("Generating input network connectivity (seed {})", seed);
        let mut rng = StdRng::seed_from_u64(seed);

        Self {
            mf_gr: Projection::fan_out(&mut rng, con.num_mf, con.num_gr, con.mf_gr_fan_out),
            mf_go: Projection::fan_out(&mut rng, con.num_mf, con.num_go, con.mf_go_fan_out),
            go_gr: Projection::fan_out(&mut rng, con.num_go, con.num_gr, con.go_gr_fan_out),
            gr_go: Projection::fan_out(&mut rng, con.num_gr, con.num_go, con.gr_go_fan_out),
            go_go: Projection::fan_out(&mut rng, con.num_go, con.num_go, con.go_go_fan_out),
        }
    }

    pub fn from_stream<R: Read>(r: &mut R, con: &ConnectivityParams) -> SimResult<Self> {
        Ok(Self {
            mf_gr: Projection::read(r, con.num_mf, con.num_gr, "mf->gr")?,
            mf_go: Projection::read(r, con.num_mf, con.num_go, "mf->go")?,
            go_gr: Projection::read(r, con.num_go, con.num_gr, "go->gr")?,
            gr_go: Projection::read(r, con.num_gr, con.num_go, "gr->go")?,
            go_go: Projection::read(r, con.num_go, con.num_go, "go->go")?,
        })
    }

    pub fn write_state<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.mf_gr.write(w)?;
        self.mf_go.write(w)?;
        self.go_gr.write(w)?;
        self.gr_go.write(w)?;
        self.go_go.write(w)
    }

    pub fn read_state<R: Read>(&mut self, r: &mut R) -> SimResult<()> {
        self.mf_gr.read_in_place(r, "mf->gr")?;
        self.mf_go.read_in_place(r, "mf->go")?;
        self.go_gr.read_in_place(r, "go->gr")?;
        self.gr_go.read_in_place(r, "gr->go")?;
        self.go_go.read_in_place(r, "go->go")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MZoneConnectivityState {
    pub gr_pc: Projection,
    pub bc_pc: Projection,
    pub sc_pc: Projection,
    pub pc_nc: Projection,
    pub io_pc: Projection,
    pub nc_io: Projection,
    pub mf_nc: Projection,
}

impl MZoneConnectivityState {
    pub fn generate(seed: u64, con: &ConnectivityParams) -> Self {
        debug!("Generating microzone connectivity (seed {})", seed);
        let mut rng = StdRng::seed_from_u64(seed);

        Self {
            gr_pc: Projection::fan_out(&mut rng, con.num_gr, con.num_pc, 1),
            bc_pc: Projection::fan_out(&mut rng, con.num_bc, con.num_pc, con.bc_pc_fan_out),
            sc_pc: Projection::fan_out(&mut rng, con.num_sc, con.num_pc, con.sc_pc_fan_out),
            pc_nc: Projection::fan_out(&mut rng, con.num_pc, con.num_nc, con.pc_nc_fan_out),
            io_pc: Projection::convergent(&mut rng, con.num_io, con.num_pc),
            nc_io: Projection::fan_out(&mut rng, con.num_nc, con.num_io, con.nc_io_fan_out),
            mf_nc: Projection::fan_out(&mut rng, con.num_mf, con.num_nc, con.mf_nc_fan_out),
        }
    }

    pub fn from_stream<R: Read>(r: &mut R, con: &ConnectivityParams) -> SimResult<Self> {
        Ok(Self {
            gr_pc: Projection::read(r, con.num_gr, con.num_pc, "gr->pc")?,
            bc_pc: Projection::read(r, con.num_bc, con.num_pc, "bc->pc")?,
            sc_pc: Projection::read(r, con.num_sc, con.num_pc, "sc->pc")?,
            pc_nc: Projection::read(r, con.num_pc, con.num_nc, "pc->nc")?,
            io_pc: Projection::read(r, con.num_io, con.num_pc, "io->pc")?,
            nc_io: Projection::read(r, con.num_nc, con.num_io, "nc->io")?,
            mf_nc: Projection::read(r, con.num_mf, con.num_nc, "mf->nc")?,
        })
    }

    pub fn write_state<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.gr_pc.write(w)?;
        self.bc_pc.write(w)?;
        self.sc_pc.write(w)?;
        self.pc_nc.write(w)?;
        self.io_pc.write(w)?;
        self.nc_io.write(w)?;
        self.mf_nc.write(w)
    }

    pub fn read_state<R: Read>(&mut self, r: &mut R) -> SimResult<()> {
        self.gr_pc.read_in_place(r, "gr->pc")?;
        self.bc_pc.read_in_place(r, "bc->pc")?;
        self.sc_pc.read_in_place(r, "sc->pc")?;
        self.pc_nc.read_in_place(r, "pc->nc")?;
        self.io_pc.read_in_place(r, "io->pc")?;
        self.nc_io.read_in_place(r, "nc->io")?;
        self.mf_nc.read_in_place(r, "mf->nc")
    }
}
