use std::fs;
use std::path::PathBuf;

use transport_rs::{BeamElement, Beamline, InputParticle, TransportSettings};

/// Settings with the crossing angle switched off, so a particle with
/// zero transverse momentum stays on axis.
#[allow(dead_code)]
pub fn settings(observation_point: f64) -> TransportSettings {
    TransportSettings {
        crossing_angle: 0.0,
        observation_point,
        ..Default::default()
    }
}

/// Two quadrupoles of opposite sign, each followed by a 10 m drift.
/// Q1 ends at z = 12 m, Q2 at z = 24 m and the line at z = 35 m.
#[allow(dead_code)]
pub fn doublet() -> Beamline {
    Beamline::new(vec![
        BeamElement::drift(10.0),
        BeamElement::quadrupole("Q1", 2.0, 0.02),
        BeamElement::drift(10.0),
        BeamElement::quadrupole("Q2", 2.0, -0.02),
        BeamElement::drift(10.0),
        BeamElement::drift(1.0),
    ])
}

/// Three quadrupoles of alternating sign. Q2 spans z = 22..24 m and Q3
/// z = 34..36 m; the line ends at z = 47 m.
#[allow(dead_code)]
pub fn triplet() -> Beamline {
    Beamline::new(vec![
        BeamElement::drift(10.0),
        BeamElement::quadrupole("Q1", 2.0, 0.02),
        BeamElement::drift(10.0),
        BeamElement::quadrupole("Q2", 2.0, -0.02),
        BeamElement::drift(10.0),
        BeamElement::quadrupole("Q3", 2.0, 0.02),
        BeamElement::drift(10.0),
        BeamElement::drift(1.0),
    ])
}

/// A fan of particles with small transverse momenta at nominal pz.
#[allow(dead_code)]
pub fn fan(n: usize) -> Vec<InputParticle> {
    (0..n)
        .map(|i| {
            let t = i as f64 / n as f64 - 0.5;
            InputParticle::new(0.4 * t, -0.3 * t, 6500.0 - 10.0 * t)
        })
        .collect()
}

/// A scratch directory unique to this test process.
#[allow(dead_code)]
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("transport_rs_{}_{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}
