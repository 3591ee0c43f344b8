use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

pub mod analysis;
pub mod aperture;
pub mod beamline;
pub mod error;
pub mod magnets;
pub mod prtls;
pub mod save;
pub mod scan;
pub mod transport;

pub use analysis::{AnalyzerOptions, DistributionsDifference, Variable};
pub use beamline::{BeamElement, Beamline, ElementKind};
pub use error::Error;
pub use magnets::{MagnetId, MagnetKind, Perturbations, Shift};
pub use prtls::{InputParticle, SyntheticEnsemble};
pub use scan::{Scan, ScanPoint, NOMINAL};
pub use transport::{MultipolePolicy, Strength, TrackingRun, Transport, TransportSettings};

/// Label of the single perturbed run when no scan is configured.
pub const PERTURBED: &str = "perturbed";

#[derive(Deserialize)]
pub struct Config {
    #[serde(default)]
    pub beam: Beam,
    pub beamline: Lattice,
    pub input: Input,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub analysis: Analysis,
    #[serde(default, rename = "perturbation")]
    pub perturbations: Vec<PerturbationCfg>,
    #[serde(default)]
    pub scan: Vec<ScanCfg>,
    #[serde(default)]
    pub sweep: Vec<SweepCfg>,
}

#[derive(Deserialize)]
pub struct Beam {
    #[serde(default = "nominal::energy")]
    pub energy: f64,
    #[serde(default = "nominal::crossing_angle")]
    pub crossing_angle: f64,
}

impl Default for Beam {
    fn default() -> Beam {
        Beam {
            energy: nominal::energy(),
            crossing_angle: nominal::crossing_angle(),
        }
    }
}

#[derive(Deserialize)]
pub struct Lattice {
    pub twiss_file: PathBuf,
    #[serde(default)]
    pub reference_marker: Option<String>,
    #[serde(default = "nominal::observation_point")]
    pub observation_point: f64,
    #[serde(default = "nominal::separation_threshold")]
    pub separation_threshold: f64,
    #[serde(default = "nominal::beampipe_separation")]
    pub beampipe_separation: f64,
    #[serde(default = "nominal::aperture_cut")]
    pub aperture_cut: bool,
    #[serde(default = "nominal::multipole_priority")]
    pub multipole_priority: Vec<Strength>,
    #[serde(default = "nominal::multipole_threshold")]
    pub multipole_threshold: f64,
}

#[derive(Deserialize)]
pub struct Input {
    #[serde(default)]
    pub ensemble_dir: Option<PathBuf>,
    #[serde(default)]
    pub synthetic: Option<SyntheticEnsemble>,
}

#[derive(Deserialize)]
pub struct Output {
    pub write_output: bool,
    #[serde(default = "nominal::output_dir")]
    pub output_dir: PathBuf,
}

impl Default for Output {
    fn default() -> Output {
        Output {
            write_output: false,
            output_dir: nominal::output_dir(),
        }
    }
}

#[derive(Default, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub exclude_lost: bool,
}

/// One `[[perturbation]]` table: a shift and/or a strength ratio for a
/// single magnet.
#[derive(Debug, Clone, Deserialize)]
pub struct PerturbationCfg {
    pub magnet: MagnetKind,
    pub index: u32,
    #[serde(default)]
    pub shift: Option<[f64; 3]>,
    #[serde(default)]
    pub strength_ratio: Option<f64>,
}

/// A named scan point with its own `[[scan.perturbation]]` entries.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanCfg {
    pub label: String,
    #[serde(default)]
    pub perturbation: Vec<PerturbationCfg>,
}

/// Expands into one scan point per strength ratio and one per shift of a
/// single magnet.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepCfg {
    pub magnet: MagnetKind,
    pub index: u32,
    #[serde(default)]
    pub strength_ratios: Vec<f64>,
    #[serde(default)]
    pub shifts: Vec<[f64; 3]>,
}

impl SweepCfg {
    fn expand(&self) -> Vec<(String, PerturbationCfg)> {
        let tag = format!("{}{}", self.magnet.name(), self.index);
        let entry = |shift: Option<[f64; 3]>, strength_ratio: Option<f64>| PerturbationCfg {
            magnet: self.magnet,
            index: self.index,
            shift,
            strength_ratio,
        };
        let ratios = self
            .strength_ratios
            .iter()
            .map(|&r| (format!("{}_ratio_{}", tag, r), entry(None, Some(r))));
        let shifts = self.shifts.iter().map(|&[dx, dy, dz]| {
            (
                format!("{}_shift_{}_{}_{}", tag, dx, dy, dz),
                entry(Some([dx, dy, dz]), None),
            )
        });
        ratios.chain(shifts).collect()
    }
}

fn registry<'a, I>(entries: I) -> Result<Perturbations>
where
    I: IntoIterator<Item = &'a PerturbationCfg>,
{
    let mut pert = Perturbations::new();
    for p in entries {
        let magnet = MagnetId::new(p.magnet, p.index);
        if p.index == 0 {
            return Err(Error::InvalidPerturbation {
                magnet,
                reason: "magnets are counted from 1".to_string(),
            }
            .into());
        }
        if let Some([dx, dy, dz]) = p.shift {
            pert.register_shift(magnet, Shift::new(dx, dy, dz))?;
        }
        if let Some(ratio) = p.strength_ratio {
            pert.register_strength_ratio(magnet, ratio)?;
        }
    }
    Ok(pert)
}

mod nominal {
    use crate::transport::{MultipolePolicy, Strength, TransportSettings};
    use std::path::PathBuf;

    pub fn energy() -> f64 {
        TransportSettings::default().energy
    }
    pub fn crossing_angle() -> f64 {
        TransportSettings::default().crossing_angle
    }
    pub fn observation_point() -> f64 {
        TransportSettings::default().observation_point
    }
    pub fn separation_threshold() -> f64 {
        TransportSettings::default().separation_threshold
    }
    pub fn beampipe_separation() -> f64 {
        TransportSettings::default().beampipe_separation
    }
    pub fn aperture_cut() -> bool {
        true
    }
    pub fn multipole_priority() -> Vec<Strength> {
        MultipolePolicy::default().priority
    }
    pub fn multipole_threshold() -> f64 {
        MultipolePolicy::default().threshold
    }
    pub fn output_dir() -> PathBuf {
        PathBuf::from("output")
    }
}

impl Config {
    pub fn new() -> Result<Config> {
        let contents =
            fs::read_to_string("config.toml").context("Could not open the config.toml file")?;
        Config::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Config> {
        toml::from_str(contents).with_context(|| "Could not parse Config file")
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            energy: self.beam.energy,
            crossing_angle: self.beam.crossing_angle,
            observation_point: self.beamline.observation_point,
            separation_threshold: self.beamline.separation_threshold,
            beampipe_separation: self.beamline.beampipe_separation,
            aperture_cut: self.beamline.aperture_cut,
            multipole: MultipolePolicy {
                priority: self.beamline.multipole_priority.clone(),
                threshold: self.beamline.multipole_threshold,
            },
        }
    }

    /// Builds the registry from the `[[perturbation]]` tables. A later
    /// table for the same magnet overrides an earlier one.
    pub fn perturbations(&self) -> Result<Perturbations> {
        registry(&self.perturbations)
    }

    /// One point per `[[scan]]` table and per expanded `[[sweep]]` entry,
    /// each on top of the top-level `[[perturbation]]` tables. Without
    /// either, the top-level tables form the single point `perturbed`.
    pub fn scan_points(&self) -> Result<Vec<ScanPoint>> {
        if self.scan.is_empty() && self.sweep.is_empty() {
            return Ok(vec![ScanPoint::new(PERTURBED, self.perturbations()?)]);
        }

        let mut points = Vec::new();
        for s in &self.scan {
            let pert = registry(self.perturbations.iter().chain(&s.perturbation))?;
            points.push(ScanPoint::new(&s.label, pert));
        }
        for sweep in &self.sweep {
            for (label, entry) in sweep.expand() {
                let pert = registry(self.perturbations.iter().chain(Some(&entry)))?;
                points.push(ScanPoint::new(&label, pert));
            }
        }

        let mut seen = BTreeSet::new();
        for point in &points {
            let label = point.label.as_str();
            if label == NOMINAL || label == analysis::DIFFERENCE {
                return Err(anyhow::anyhow!("Scan label {:?} is reserved", label));
            }
            if !seen.insert(label) {
                return Err(anyhow::anyhow!("Scan label {:?} is used twice", label));
            }
        }
        Ok(points)
    }

    pub fn analyzer_options(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            exclude_lost: self.analysis.exclude_lost,
        }
    }
}

impl Input {
    pub fn ensemble(&self) -> Result<Vec<InputParticle>> {
        match (&self.ensemble_dir, &self.synthetic) {
            (Some(dir), None) => prtls::read_npy_dir(dir)
                .with_context(|| format!("Could not read the ensemble in {}", dir.display())),
            (None, Some(params)) => Ok(prtls::generate(params)),
            (Some(_), Some(_)) => Err(anyhow::Error::msg(
                "Give either ensemble_dir or synthetic in [input], not both",
            )),
            (None, None) => Err(anyhow::Error::msg(
                "[input] needs an ensemble_dir or a synthetic ensemble",
            )),
        }
    }
}

fn write_outputs(outdir: &Path, scan: &Scan) -> Result<()> {
    save::save_run(&scan.nominal, outdir, NOMINAL)?;
    for point in &scan.points {
        save::save_run(&point.run, outdir, &point.label)?;
        save::save_summary(&point.difference, &outdir.join(&point.label))?;
    }
    save::save_scan_table(scan, outdir)
}

pub fn run(cfg: Config) -> Result<()> {
    let twiss_file = &cfg.beamline.twiss_file;
    let line = beamline::twiss::load(twiss_file, cfg.beamline.reference_marker.as_deref())
        .with_context(|| format!("Could not load the optics in {}", twiss_file.display()))?;
    info!(
        "beamline has {} elements over {:.3} m",
        line.len(),
        line.total_length()
    );

    let ensemble = cfg.input.ensemble()?;
    info!("ensemble of {} particles", ensemble.len());

    let settings = cfg.transport_settings();
    let points = cfg.scan_points()?;
    info!("{} scan points", points.len());

    let scan = scan::run_scan(
        &line,
        &ensemble,
        &settings,
        &points,
        cfg.analyzer_options(),
    )
    .context("Perturbation scan failed")?;

    if cfg.output.write_output {
        write_outputs(&cfg.output.output_dir, &scan)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) const E_TOL: f64 = 1e-12;

#[cfg(test)]
pub(crate) fn build_test_beamline() -> Beamline {
    // A short doublet, a bend and both correctors. 72 m long.
    Beamline::new(vec![
        BeamElement::marker("START"),
        BeamElement::drift(20.0),
        BeamElement::quadrupole("Q1", 3.0, 0.01),
        BeamElement::drift(5.0),
        BeamElement::quadrupole("Q2", 3.0, -0.01),
        BeamElement::drift(5.0),
        BeamElement::dipole("D1", 4.0, 1e-5),
        BeamElement::drift(10.0),
        BeamElement::hkicker("H1", 1.0, 1e-6),
        BeamElement::drift(5.0),
        BeamElement::vkicker("V1", 1.0, -1e-6),
        BeamElement::drift(15.0),
        BeamElement::marker("END"),
    ])
}
