use serde::Serialize;
use std::ops::Index;

use crate::aperture::Aperture;
pub mod twiss;

/// One beamline component with the strengths its kind needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ElementKind {
    Marker,
    Drift,
    Dipole { k0l: f64 },
    HorizontalKicker { hkick: f64 },
    VerticalKicker { vkick: f64 },
    Quadrupole { k1l: f64 },
    Multipole(MultipoleStrengths),
    // Solenoids, collimators, monitors, instruments...
    Other { keyword: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct MultipoleStrengths {
    pub k0l: f64,
    pub hkick: f64,
    pub vkick: f64,
    pub k1l: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeamElement {
    pub name: String,
    pub kind: ElementKind,
    pub length: f64,
    /// Longitudinal position of the element end, measured from the
    /// reference point.
    pub position: f64,
    pub aperture: Aperture,
}

impl BeamElement {
    pub fn new(name: &str, kind: ElementKind, length: f64) -> BeamElement {
        BeamElement {
            name: name.to_string(),
            kind,
            length,
            position: 0.0,
            aperture: Aperture::UNLIMITED,
        }
    }

    pub fn marker(name: &str) -> BeamElement {
        BeamElement::new(name, ElementKind::Marker, 0.0)
    }

    pub fn drift(length: f64) -> BeamElement {
        BeamElement::new("DRIFT", ElementKind::Drift, length)
    }

    pub fn dipole(name: &str, length: f64, k0l: f64) -> BeamElement {
        BeamElement::new(name, ElementKind::Dipole { k0l }, length)
    }

    pub fn hkicker(name: &str, length: f64, hkick: f64) -> BeamElement {
        BeamElement::new(name, ElementKind::HorizontalKicker { hkick }, length)
    }

    pub fn vkicker(name: &str, length: f64, vkick: f64) -> BeamElement {
        BeamElement::new(name, ElementKind::VerticalKicker { vkick }, length)
    }

    pub fn quadrupole(name: &str, length: f64, k1l: f64) -> BeamElement {
        BeamElement::new(name, ElementKind::Quadrupole { k1l }, length)
    }

    pub fn multipole(name: &str, length: f64, strengths: MultipoleStrengths) -> BeamElement {
        BeamElement::new(name, ElementKind::Multipole(strengths), length)
    }

    pub fn with_aperture(mut self, aperture: Aperture) -> BeamElement {
        self.aperture = aperture;
        self
    }
}

/// The ordered element table. Read-only once built.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Beamline {
    elements: Vec<BeamElement>,
}

impl Beamline {
    /// Takes the elements in physical order and recomputes their
    /// cumulative positions from the lengths.
    pub fn new(mut elements: Vec<BeamElement>) -> Beamline {
        let mut s = 0.0;
        for elem in elements.iter_mut() {
            s += elem.length;
            elem.position = s;
        }
        Beamline { elements }
    }

    /// Keeps positions as given, e.g. the S column of an optics file.
    pub fn with_positions(elements: Vec<BeamElement>) -> Beamline {
        Beamline { elements }
    }

    pub fn elements(&self) -> &[BeamElement] {
        &self.elements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BeamElement> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn total_length(&self) -> f64 {
        self.elements.iter().map(|e| e.length).sum()
    }
}

impl Index<usize> for Beamline {
    type Output = BeamElement;
    fn index(&self, i: usize) -> &BeamElement {
        &self.elements[i]
    }
}

impl<'a> IntoIterator for &'a Beamline {
    type Item = &'a BeamElement;
    type IntoIter = std::slice::Iter<'a, BeamElement>;
    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_test_beamline, E_TOL};

    #[test]
    fn cumulative_positions() {
        let line = Beamline::new(vec![
            BeamElement::drift(1.5),
            BeamElement::marker("M1"),
            BeamElement::quadrupole("Q1", 2.0, 0.01),
            BeamElement::drift(0.5),
        ]);
        let positions: Vec<f64> = line.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1.5, 1.5, 3.5, 4.0]);
        assert!((line.total_length() - 4.0).abs() < E_TOL);
        assert_eq!(line[2].name, "Q1");
    }

    #[test]
    fn test_fixture_is_ordered() {
        let line = build_test_beamline();
        assert!(!line.is_empty());
        for pair in line.elements().windows(2) {
            assert!(pair[0].position <= pair[1].position);
        }
    }
}
