use itertools::izip;
use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::transport::maps::Transverse;

const PROTON_MASS: f64 = 0.938_272_088; // GeV

/// One entry of the input ensemble, momenta in GeV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InputParticle {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub e: f64,
    pub process_code: i32,
}

impl InputParticle {
    pub fn new(px: f64, py: f64, pz: f64) -> InputParticle {
        let p2 = px * px + py * py + pz * pz;
        InputParticle {
            px,
            py,
            pz,
            e: (p2 + PROTON_MASS * PROTON_MASS).sqrt(),
            process_code: 0,
        }
    }
}

/// Mutable state of a particle while it walks the beamline.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub sx: f64,
    pub sy: f64,
    pub lost: bool,
    pub separated: bool,
}

impl ParticleState {
    /// Starts a particle on axis at z = 0. `py_offset` is the crossing
    /// angle correction, added to py before the slope is taken.
    pub fn new(event: usize, prtl: &InputParticle, py_offset: f64) -> Result<ParticleState> {
        if !(prtl.pz.is_finite() && prtl.pz > 0.0) {
            return Err(Error::DegenerateMomentum {
                event,
                pz: prtl.pz,
            });
        }
        let py = prtl.py + py_offset;
        Ok(ParticleState {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            px: prtl.px,
            py,
            pz: prtl.pz,
            sx: prtl.px / prtl.pz,
            sy: py / prtl.pz,
            lost: false,
            separated: false,
        })
    }

    pub fn transverse(&self) -> Transverse {
        Transverse {
            x: self.x,
            y: self.y,
            sx: self.sx,
            sy: self.sy,
        }
    }

    /// Accepts a candidate state at the end of an element of length `l`.
    pub fn commit(&mut self, next: Transverse, l: f64) {
        self.x = next.x;
        self.y = next.y;
        self.sx = next.sx;
        self.sy = next.sy;
        self.z += l;
    }
}

/// Parameters of a generated ensemble: gaussian transverse momenta
/// around zero and a gaussian spread around the nominal pz.
#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticEnsemble {
    pub count: usize,
    #[serde(default)]
    pub seed: u64,
    pub pz: f64,
    pub sigma_pt: f64,
    pub sigma_pz: f64,
    #[serde(default)]
    pub process_code: i32,
}

pub fn generate(params: &SyntheticEnsemble) -> Vec<InputParticle> {
    let mut rng = StdRng::seed_from_u64(params.seed);
    (0..params.count)
        .map(|_| {
            let px = params.sigma_pt * rng.sample::<f64, _>(StandardNormal);
            let py = params.sigma_pt * rng.sample::<f64, _>(StandardNormal);
            let pz = params.pz + params.sigma_pz * rng.sample::<f64, _>(StandardNormal);
            let mut prtl = InputParticle::new(px, py, pz);
            prtl.process_code = params.process_code;
            prtl
        })
        .collect()
}

fn read_column<T: npy::Serializable>(dir: &Path, name: &str) -> Result<Vec<T>> {
    let bytes = std::fs::read(dir.join(format!("{}.npy", name)))?;
    let data = npy::NpyData::<T>::from_bytes(&bytes)?;
    Ok(data.to_vec())
}

/// Reads an ensemble stored as one npy file per column:
/// px, py, pz, e (f64) and process_code (i32).
pub fn read_npy_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<InputParticle>> {
    let dir = dir.as_ref();
    let px: Vec<f64> = read_column(dir, "px")?;
    let py: Vec<f64> = read_column(dir, "py")?;
    let pz: Vec<f64> = read_column(dir, "pz")?;
    let e: Vec<f64> = read_column(dir, "e")?;
    let process_code: Vec<i32> = read_column(dir, "process_code")?;

    let expected = px.len();
    for (column, found) in &[
        ("py", py.len()),
        ("pz", pz.len()),
        ("e", e.len()),
        ("process_code", process_code.len()),
    ] {
        if *found != expected {
            return Err(Error::EnsembleShape {
                column: column.to_string(),
                expected,
                found: *found,
            });
        }
    }

    Ok(izip!(px, py, pz, e, process_code)
        .map(|(px, py, pz, e, process_code)| InputParticle {
            px,
            py,
            pz,
            e,
            process_code,
        })
        .collect())
}
