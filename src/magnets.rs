use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// The magnet families that carry an identity. Every other element
/// kind is anonymous and can't be perturbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagnetKind {
    Dipole,
    Quadrupole,
    VerticalKicker,
    HorizontalKicker,
}

impl MagnetKind {
    pub fn name(self) -> &'static str {
        match self {
            MagnetKind::Dipole => "dipole",
            MagnetKind::Quadrupole => "quadrupole",
            MagnetKind::VerticalKicker => "vertical_kicker",
            MagnetKind::HorizontalKicker => "horizontal_kicker",
        }
    }
}

/// A physical magnet: the `index`-th magnet of `kind` met along the
/// beamline, counting from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MagnetId {
    pub kind: MagnetKind,
    pub index: u32,
}

impl MagnetId {
    pub fn new(kind: MagnetKind, index: u32) -> MagnetId {
        MagnetId { kind, index }
    }
}

impl fmt::Display for MagnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind.name(), self.index)
    }
}

/// Per-particle occurrence counters. A fresh set is made at the top of
/// every propagation so the k-th dipole is always `(Dipole, k)`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MagnetCounters {
    dipole: u32,
    quadrupole: u32,
    vertical_kicker: u32,
    horizontal_kicker: u32,
}

impl MagnetCounters {
    /// Bumps the counter for `kind` and returns the identity of the
    /// magnet about to be transported.
    pub fn next(&mut self, kind: MagnetKind) -> MagnetId {
        let slot = match kind {
            MagnetKind::Dipole => &mut self.dipole,
            MagnetKind::Quadrupole => &mut self.quadrupole,
            MagnetKind::VerticalKicker => &mut self.vertical_kicker,
            MagnetKind::HorizontalKicker => &mut self.horizontal_kicker,
        };
        *slot += 1;
        MagnetId::new(kind, *slot)
    }
}

/// Misalignment of a magnet in metres.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl Shift {
    pub fn new(dx: f64, dy: f64, dz: f64) -> Shift {
        Shift { dx, dy, dz }
    }

    fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite() && self.dz.is_finite()
    }
}

/// Shifts and strength ratios keyed by magnet identity. Filled in
/// before a run and only read while particles are transported.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Perturbations {
    shifts: BTreeMap<MagnetId, Shift>,
    ratios: BTreeMap<MagnetId, f64>,
}

impl Perturbations {
    pub fn new() -> Perturbations {
        Perturbations::default()
    }

    /// Replaces any shift already registered for `magnet`.
    pub fn register_shift(&mut self, magnet: MagnetId, shift: Shift) -> Result<()> {
        if !shift.is_finite() {
            return Err(Error::InvalidPerturbation {
                magnet,
                reason: format!("shift {:?} is not finite", shift),
            });
        }
        self.shifts.insert(magnet, shift);
        Ok(())
    }

    /// Replaces any ratio already registered for `magnet`.
    pub fn register_strength_ratio(&mut self, magnet: MagnetId, ratio: f64) -> Result<()> {
        if !ratio.is_finite() {
            return Err(Error::InvalidPerturbation {
                magnet,
                reason: format!("strength ratio {} is not finite", ratio),
            });
        }
        self.ratios.insert(magnet, ratio);
        Ok(())
    }

    pub fn lookup_shift(&self, magnet: MagnetId) -> Option<Shift> {
        self.shifts.get(&magnet).copied()
    }

    pub fn lookup_ratio(&self, magnet: MagnetId) -> Option<f64> {
        self.ratios.get(&magnet).copied()
    }

    /// Scales a raw strength by the registered ratio, if any.
    pub fn scaled_strength(&self, magnet: MagnetId, strength: f64) -> f64 {
        match self.lookup_ratio(magnet) {
            Some(ratio) => strength * ratio,
            None => strength,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty() && self.ratios.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shifts.len() + self.ratios.len()
    }
}
