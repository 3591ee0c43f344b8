//! Perturbation scans. The ensemble is tracked once through the nominal
//! beamline and once per scan point, and every perturbed run is compared
//! against the nominal one.

use tracing::info;

use crate::analysis::{AnalyzerOptions, DistributionsDifference};
use crate::beamline::Beamline;
use crate::error::Result;
use crate::magnets::Perturbations;
use crate::prtls::InputParticle;
use crate::transport::{TrackingRun, Transport, TransportSettings};

/// Label of the run tracked without perturbations.
pub const NOMINAL: &str = "nominal";

#[derive(Debug, Clone, PartialEq)]
pub struct ScanPoint {
    pub label: String,
    pub perturbations: Perturbations,
}

impl ScanPoint {
    pub fn new(label: &str, perturbations: Perturbations) -> ScanPoint {
        ScanPoint {
            label: label.to_string(),
            perturbations,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PointResult {
    pub label: String,
    pub run: TrackingRun,
    pub difference: DistributionsDifference,
}

#[derive(Debug, Clone)]
pub struct Scan {
    pub nominal: TrackingRun,
    pub points: Vec<PointResult>,
}

pub fn run_scan(
    line: &Beamline,
    ensemble: &[InputParticle],
    settings: &TransportSettings,
    points: &[ScanPoint],
    options: AnalyzerOptions,
) -> Result<Scan> {
    let unperturbed = Perturbations::new();
    let baseline = Transport::new(line, &unperturbed, settings);
    baseline.report_multipoles();
    let nominal = baseline.track(ensemble)?;

    let mut results = Vec::with_capacity(points.len());
    for point in points {
        info!(
            "scan point {}: {} perturbations",
            point.label,
            point.perturbations.len()
        );
        let run = Transport::new(line, &point.perturbations, settings).track(ensemble)?;
        let difference =
            DistributionsDifference::new(NOMINAL, &nominal, &point.label, &run, options)?;
        difference.log_summary();
        results.push(PointResult {
            label: point.label.clone(),
            run,
            difference,
        });
    }
    Ok(Scan {
        nominal,
        points: results,
    })
}
