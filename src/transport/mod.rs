use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::beamline::{BeamElement, Beamline, ElementKind, MultipoleStrengths};
use crate::error::{Error, Result};
use crate::magnets::{MagnetCounters, MagnetKind, Perturbations, Shift};
use crate::prtls::{InputParticle, ParticleState};

pub mod maps;
pub mod observe;

use maps::is_negligible;
pub use observe::Observation;

/// Multipole strength fields, in the order a multipole may be treated
/// as a simpler magnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    K0L,
    Hkick,
    Vkick,
    K1L,
}

impl Strength {
    fn of(self, m: &MultipoleStrengths) -> f64 {
        match self {
            Strength::K0L => m.k0l,
            Strength::Hkick => m.hkick,
            Strength::Vkick => m.vkick,
            Strength::K1L => m.k1l,
        }
    }

    fn magnet(self) -> MagnetKind {
        match self {
            Strength::K0L => MagnetKind::Dipole,
            Strength::Hkick => MagnetKind::HorizontalKicker,
            Strength::Vkick => MagnetKind::VerticalKicker,
            Strength::K1L => MagnetKind::Quadrupole,
        }
    }
}

/// How a multipole is mapped onto a dipole, kicker or quadrupole: the
/// first field in `priority` above `threshold` wins, otherwise it is a
/// drift.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipolePolicy {
    pub priority: Vec<Strength>,
    pub threshold: f64,
}

impl Default for MultipolePolicy {
    fn default() -> MultipolePolicy {
        MultipolePolicy {
            priority: vec![Strength::K0L, Strength::Hkick, Strength::Vkick, Strength::K1L],
            threshold: 1e-10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    /// Beam energy in GeV the optics were computed for.
    pub energy: f64,
    /// Half crossing angle in rad, added to py as `crossing_angle * energy`.
    pub crossing_angle: f64,
    pub observation_point: f64,
    /// Past this z the beams are in separate pipes and x jumps by
    /// `beampipe_separation` once.
    pub separation_threshold: f64,
    pub beampipe_separation: f64,
    pub aperture_cut: bool,
    pub multipole: MultipolePolicy,
}

impl Default for TransportSettings {
    fn default() -> TransportSettings {
        TransportSettings {
            energy: 6500.0,
            crossing_angle: 140e-6,
            observation_point: 205.0,
            separation_threshold: 130.0,
            beampipe_separation: 97e-3,
            aperture_cut: true,
            multipole: MultipolePolicy::default(),
        }
    }
}

impl TransportSettings {
    pub fn py_offset(&self) -> f64 {
        self.crossing_angle * self.energy
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Recorded(Observation),
    NotReached,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Propagation {
    pub outcome: Outcome,
    /// The particle failed an aperture test somewhere along the way.
    pub lost: bool,
}

/// A particle that reached the observation point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Record {
    pub event: usize,
    pub process_code: i32,
    pub x: f64,
    pub y: f64,
    pub sx: f64,
    pub sy: f64,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub e: f64,
    pub lost: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LostParticle {
    pub event: usize,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
}

/// Everything one ensemble produced at the observation point, in input
/// order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrackingRun {
    pub records: Vec<Record>,
    pub lost: Vec<LostParticle>,
    pub not_reached: usize,
}

impl TrackingRun {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

enum Action {
    Marker,
    Drift(f64),
    Magnet { kind: MagnetKind, strength: f64 },
}

fn resolve(elem: &BeamElement, policy: &MultipolePolicy) -> Action {
    match &elem.kind {
        ElementKind::Marker => Action::Marker,
        ElementKind::Drift => Action::Drift(elem.length),
        ElementKind::Dipole { k0l } => Action::Magnet {
            kind: MagnetKind::Dipole,
            strength: *k0l,
        },
        ElementKind::HorizontalKicker { hkick } => Action::Magnet {
            kind: MagnetKind::HorizontalKicker,
            strength: *hkick,
        },
        ElementKind::VerticalKicker { vkick } => Action::Magnet {
            kind: MagnetKind::VerticalKicker,
            strength: *vkick,
        },
        ElementKind::Quadrupole { k1l } => Action::Magnet {
            kind: MagnetKind::Quadrupole,
            strength: *k1l,
        },
        ElementKind::Multipole(m) => policy
            .priority
            .iter()
            .find(|s| s.of(m).abs() > policy.threshold)
            .map(|s| Action::Magnet {
                kind: s.magnet(),
                strength: s.of(m),
            })
            .unwrap_or(Action::Drift(elem.length)),
        ElementKind::Other { .. } => {
            if elem.length > 0.0 {
                Action::Drift(elem.length)
            } else {
                Action::Marker
            }
        }
    }
}

// Moves the particle into the frame of a misaligned magnet.
fn enter_magnet(state: &mut ParticleState, shift: &Shift) {
    state.x -= shift.dx;
    state.y -= shift.dy;
    state.z -= shift.dz;
    state.x += state.sx * shift.dz;
    state.y += state.sy * shift.dz;
}

fn leave_magnet(state: &mut ParticleState, shift: &Shift) {
    state.x -= state.sx * shift.dz;
    state.y -= state.sy * shift.dz;
    state.x += shift.dx;
    state.y += shift.dy;
    state.z += shift.dz;
}

/// Propagates one particle through a beamline configuration.
pub fn propagate(
    event: usize,
    prtl: &InputParticle,
    beamline: &Beamline,
    perturbations: &Perturbations,
    settings: &TransportSettings,
) -> Result<Propagation> {
    Transport::new(beamline, perturbations, settings).propagate(event, prtl)
}

pub struct Transport<'a> {
    beamline: &'a Beamline,
    perturbations: &'a Perturbations,
    settings: &'a TransportSettings,
}

impl<'a> Transport<'a> {
    pub fn new(
        beamline: &'a Beamline,
        perturbations: &'a Perturbations,
        settings: &'a TransportSettings,
    ) -> Transport<'a> {
        Transport {
            beamline,
            perturbations,
            settings,
        }
    }

    /// Reports how every multipole of the beamline will be treated.
    pub fn report_multipoles(&self) {
        for elem in self.beamline {
            if let ElementKind::Multipole(_) = elem.kind {
                if let Action::Magnet { kind, .. } = resolve(elem, &self.settings.multipole) {
                    warn!(
                        "multipole {} at s = {} m taken as {}, check the optics file",
                        elem.name,
                        elem.position,
                        kind.name()
                    );
                }
            }
        }
    }

    pub fn propagate(&self, event: usize, prtl: &InputParticle) -> Result<Propagation> {
        let mut state = ParticleState::new(event, prtl, self.settings.py_offset())?;
        let outcome = match self.walk(&mut state)? {
            Some(obs) => Outcome::Recorded(obs),
            None => Outcome::NotReached,
        };
        Ok(Propagation {
            outcome,
            lost: state.lost,
        })
    }

    /// Steps through the elements until the observation point is passed.
    fn walk(&self, state: &mut ParticleState) -> Result<Option<Observation>> {
        let mut counters = MagnetCounters::default();
        let settings = self.settings;
        for elem in self.beamline {
            self.step(elem, state, &mut counters)?;

            if state.z > settings.separation_threshold && !state.separated {
                state.separated = true;
                state.x += settings.beampipe_separation;
            }
            if let Some(obs) = observe::observe(state, settings.observation_point) {
                return Ok(Some(obs));
            }
        }
        Ok(None)
    }

    fn step(
        &self,
        elem: &BeamElement,
        state: &mut ParticleState,
        counters: &mut MagnetCounters,
    ) -> Result<()> {
        match resolve(elem, &self.settings.multipole) {
            Action::Marker => {
                if (state.z - self.settings.observation_point).abs() < 1e-3 {
                    trace!(
                        "marker {}: z = {} x = {} y = {} sx = {} sy = {}",
                        elem.name,
                        state.z,
                        state.x,
                        state.y,
                        state.sx,
                        state.sy
                    );
                }
            }
            Action::Drift(l) => {
                let next = maps::drift(state.transverse(), l);
                state.commit(next, l);
            }
            Action::Magnet { kind, strength } => {
                self.magnet(elem, kind, strength, state, counters)?;
            }
        }
        Ok(())
    }

    fn magnet(
        &self,
        elem: &BeamElement,
        kind: MagnetKind,
        strength: f64,
        state: &mut ParticleState,
        counters: &mut MagnetCounters,
    ) -> Result<()> {
        let id = counters.next(kind);
        let strength = self.perturbations.scaled_strength(id, strength);
        let l = elem.length;

        if is_negligible(strength) {
            let next = maps::drift(state.transverse(), l);
            state.commit(next, l);
            return Ok(());
        }
        if kind == MagnetKind::Quadrupole && !(l > 0.0) {
            return Err(Error::DegenerateElement {
                name: elem.name.clone(),
                reason: format!("quadrupole with K1L = {} needs a positive length", strength),
            });
        }

        let shift = self.perturbations.lookup_shift(id);
        if let Some(shift) = &shift {
            enter_magnet(state, shift);
        }

        let rigidity = self.settings.energy / state.pz;
        let t = state.transverse();
        let next = match kind {
            MagnetKind::Dipole | MagnetKind::HorizontalKicker => {
                maps::horizontal_bend(t, l, strength * rigidity)
            }
            MagnetKind::VerticalKicker => maps::vertical_bend(t, l, strength * rigidity),
            MagnetKind::Quadrupole => maps::quadrupole(t, l, strength, rigidity),
        };

        if self.settings.aperture_cut && elem.aperture.is_lost(next.x, next.y) {
            // the particle is held where it was, later elements still run
            if !state.lost {
                debug!("particle lost in {} ({}) at z = {}", elem.name, id, state.z);
                state.lost = true;
            }
        } else {
            state.commit(next, l);
        }

        if let Some(shift) = &shift {
            leave_magnet(state, shift);
        }
        Ok(())
    }

    /// Propagates a whole ensemble in parallel. Records keep input order.
    pub fn track(&self, ensemble: &[InputParticle]) -> Result<TrackingRun> {
        let results = ensemble
            .par_iter()
            .enumerate()
            .map(|(event, prtl)| self.propagate(event, prtl))
            .collect::<Result<Vec<Propagation>>>()?;

        let mut run = TrackingRun::default();
        for (event, (prtl, prop)) in ensemble.iter().zip(results).enumerate() {
            if prop.lost {
                run.lost.push(LostParticle {
                    event,
                    px: prtl.px,
                    py: prtl.py,
                    pz: prtl.pz,
                });
            }
            match prop.outcome {
                Outcome::Recorded(obs) => run.records.push(Record {
                    event,
                    process_code: prtl.process_code,
                    x: obs.x,
                    y: obs.y,
                    sx: obs.sx,
                    sy: obs.sy,
                    px: prtl.px,
                    py: prtl.py,
                    pz: prtl.pz,
                    e: prtl.e,
                    lost: prop.lost,
                }),
                Outcome::NotReached => run.not_reached += 1,
            }
        }
        info!(
            "tracked {} particles: {} recorded, {} not reached, {} lost",
            ensemble.len(),
            run.records.len(),
            run.not_reached,
            run.lost.len()
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aperture::Aperture;
    use crate::magnets::MagnetId;
    use crate::{build_test_beamline, E_TOL};

    fn settings() -> TransportSettings {
        TransportSettings {
            energy: 6500.0,
            crossing_angle: 0.0,
            observation_point: 1000.0,
            ..Default::default()
        }
    }

    fn state(sx: f64, sy: f64) -> ParticleState {
        let prtl = InputParticle::new(sx * 6500.0, sy * 6500.0, 6500.0);
        ParticleState::new(0, &prtl, 0.0).unwrap()
    }

    fn run_one(elem: BeamElement, pert: &Perturbations, st: &mut ParticleState) {
        let line = Beamline::new(vec![]);
        let cfg = settings();
        let transport = Transport::new(&line, pert, &cfg);
        let mut counters = MagnetCounters::default();
        transport.step(&elem, st, &mut counters).unwrap();
    }

    #[test]
    fn zero_length_drift_is_identity() {
        let mut st = state(1e-4, -2e-4);
        st.x = 1e-3;
        let before = st.clone();
        run_one(BeamElement::drift(0.0), &Perturbations::new(), &mut st);
        assert_eq!(st, before);
    }

    #[test]
    fn zero_strength_magnets_are_drifts() {
        let tight = Aperture::circle(1e-9);
        let q1 = MagnetId::new(MagnetKind::Quadrupole, 1);
        let mut pert = Perturbations::new();
        pert.register_shift(q1, Shift::new(1e-3, 1e-3, 0.5)).unwrap();

        let mut expected = state(1e-4, 2e-4);
        run_one(BeamElement::drift(2.0), &pert, &mut expected);

        for elem in vec![
            BeamElement::dipole("D", 2.0, 0.0),
            BeamElement::hkicker("H", 2.0, 0.0),
            BeamElement::vkicker("V", 2.0, 0.0),
            BeamElement::quadrupole("Q", 2.0, 0.0),
        ] {
            let mut st = state(1e-4, 2e-4);
            run_one(elem.with_aperture(tight), &pert, &mut st);
            assert_eq!(st, expected);
        }
    }

    #[test]
    fn ratio_can_switch_a_magnet_off() {
        let mut pert = Perturbations::new();
        pert.register_strength_ratio(MagnetId::new(MagnetKind::Dipole, 1), 0.0)
            .unwrap();
        let mut st = state(0.0, 0.0);
        run_one(BeamElement::dipole("D", 3.0, 1e-4), &pert, &mut st);
        assert_eq!((st.x, st.sx, st.z), (0.0, 0.0, 3.0));
    }

    #[test]
    fn shift_round_trip() {
        let mut st = state(3e-4, -1e-4);
        st.x = 2e-3;
        st.y = -1e-3;
        st.z = 40.0;
        let before = st.clone();
        let shift = Shift::new(5e-4, -2e-4, 0.3);
        enter_magnet(&mut st, &shift);
        assert!((st.x - (2e-3 - 5e-4 + 3e-4 * 0.3)).abs() < E_TOL);
        leave_magnet(&mut st, &shift);
        assert!((st.x - before.x).abs() < E_TOL);
        assert!((st.y - before.y).abs() < E_TOL);
        assert!((st.z - before.z).abs() < E_TOL);
    }

    #[test]
    fn shifted_quadrupole_kicks_on_axis_particle() {
        let mut pert = Perturbations::new();
        pert.register_shift(
            MagnetId::new(MagnetKind::Quadrupole, 1),
            Shift::new(1e-3, 0.0, 0.0),
        )
        .unwrap();
        let mut st = state(0.0, 0.0);
        run_one(BeamElement::quadrupole("Q", 1.0, 0.01), &pert, &mut st);
        let qk = 0.1_f64;
        assert!((st.x - (1e-3 - qk.cos() * 1e-3)).abs() < E_TOL);
        assert!((st.sx - qk * qk.sin() * 1e-3).abs() < E_TOL);
        assert_eq!((st.y, st.sy), (0.0, 0.0));
        assert!((st.z - 1.0).abs() < E_TOL);
    }

    #[test]
    fn dipole_deflection() {
        let mut st = state(0.0, 0.0);
        run_one(
            BeamElement::dipole("D", 2.0, 1e-4),
            &Perturbations::new(),
            &mut st,
        );
        assert!((st.sx - 1e-4).abs() < E_TOL);
        assert!((st.x - 1e-4).abs() < E_TOL);
        assert_eq!(st.sy, 0.0);
    }

    #[test]
    fn loss_freezes_state() {
        let mut st = state(1e-3, 0.0);
        st.x = 4e-3;
        st.z = 10.0;
        let before = st.clone();
        let quad =
            BeamElement::quadrupole("Q", 2.0, -0.05).with_aperture(Aperture::circle(5e-3));
        run_one(quad, &Perturbations::new(), &mut st);
        assert!(st.lost);
        assert_eq!(
            (st.x, st.y, st.z, st.sx, st.sy),
            (before.x, before.y, before.z, before.sx, before.sy)
        );
    }

    #[test]
    fn lost_particle_keeps_walking() {
        let line = Beamline::new(vec![
            BeamElement::drift(1.0),
            BeamElement::hkicker("H", 1.0, 1e-3).with_aperture(Aperture::circle(1e-4)),
            BeamElement::drift(10.0),
        ]);
        let cfg = TransportSettings {
            observation_point: 5.0,
            ..settings()
        };
        let pert = Perturbations::new();
        let prtl = InputParticle::new(0.0, 0.0, 6500.0);
        let prop = propagate(0, &prtl, &line, &pert, &cfg).unwrap();
        assert!(prop.lost);
        // z froze at 1 m in the kicker, so the drift lands at 11 m
        match prop.outcome {
            Outcome::Recorded(obs) => assert_eq!((obs.x, obs.sx), (0.0, 0.0)),
            Outcome::NotReached => panic!("particle should still reach 5 m"),
        }
    }

    #[test]
    fn aperture_cut_can_be_disabled() {
        let mut st = state(1e-3, 0.0);
        st.x = 4e-3;
        let quad =
            BeamElement::quadrupole("Q", 2.0, -0.05).with_aperture(Aperture::circle(5e-3));
        let line = Beamline::new(vec![]);
        let cfg = TransportSettings {
            aperture_cut: false,
            ..settings()
        };
        let pert = Perturbations::new();
        let transport = Transport::new(&line, &pert, &cfg);
        transport
            .step(&quad, &mut st, &mut MagnetCounters::default())
            .unwrap();
        assert!(!st.lost);
        assert!((st.z - 2.0).abs() < E_TOL);
    }

    #[test]
    fn beampipe_separation_applies_once() {
        let line = Beamline::new(vec![
            BeamElement::drift(100.0),
            BeamElement::drift(40.0),
            BeamElement::drift(10.0),
        ]);
        let cfg = settings();
        let pert = Perturbations::new();
        let transport = Transport::new(&line, &pert, &cfg);
        let mut st = state(0.0, 0.0);
        assert!(transport.walk(&mut st).unwrap().is_none());
        assert!(st.separated);
        assert!((st.x - 97e-3).abs() < E_TOL);
    }

    #[test]
    fn multipole_follows_priority() {
        let both = MultipoleStrengths {
            k0l: 1e-4,
            k1l: 0.01,
            ..Default::default()
        };
        let line = Beamline::new(vec![
            BeamElement::multipole("MP", 1.0, both),
            BeamElement::dipole("D", 1.0, 1e-4),
        ]);
        // the multipole is dipole #1, so the real dipole is #2
        let mut pert = Perturbations::new();
        pert.register_strength_ratio(MagnetId::new(MagnetKind::Dipole, 2), 0.0)
            .unwrap();
        let cfg = settings();
        let transport = Transport::new(&line, &pert, &cfg);
        let mut st = state(0.0, 0.0);
        transport.walk(&mut st).unwrap();
        assert!((st.sx - 1e-4).abs() < E_TOL);

        let cfg = TransportSettings {
            multipole: MultipolePolicy {
                priority: vec![Strength::K1L, Strength::K0L],
                threshold: 1e-10,
            },
            ..settings()
        };
        let transport = Transport::new(&line, &pert, &cfg);
        let mut st = state(0.0, 0.0);
        transport.walk(&mut st).unwrap();
        // on axis the quadrupole does nothing, the dipole is #1 again
        assert!((st.sx - 1e-4).abs() < E_TOL);
        assert!((st.z - 2.0).abs() < E_TOL);
    }

    #[test]
    fn weak_multipole_is_drift() {
        let weak = MultipoleStrengths {
            k0l: 1e-12,
            hkick: 1e-12,
            ..Default::default()
        };
        let mut st = state(1e-4, 0.0);
        let sx = st.sx;
        run_one(
            BeamElement::multipole("MP", 2.0, weak),
            &Perturbations::new(),
            &mut st,
        );
        assert!((st.x - 2e-4).abs() < E_TOL);
        assert_eq!(st.sx, sx);
    }

    #[test]
    fn unknown_kinds() {
        let monitor = |l| {
            BeamElement::new(
                "BPM",
                ElementKind::Other {
                    keyword: "MONITOR".to_string(),
                },
                l,
            )
        };
        let mut st = state(1e-4, 0.0);
        run_one(monitor(0.0), &Perturbations::new(), &mut st);
        assert_eq!(st.z, 0.0);
        run_one(monitor(3.0), &Perturbations::new(), &mut st);
        assert!((st.z - 3.0).abs() < E_TOL);
        assert!((st.x - 3e-4).abs() < E_TOL);
    }

    #[test]
    fn thin_quadrupole_is_rejected() {
        let line = Beamline::new(vec![BeamElement::quadrupole("MQ", 0.0, 0.02)]);
        let cfg = settings();
        let pert = Perturbations::new();
        let prtl = InputParticle::new(0.0, 0.0, 6500.0);
        let res = propagate(0, &prtl, &line, &pert, &cfg);
        assert!(matches!(res, Err(Error::DegenerateElement { .. })));
    }

    #[test]
    fn crossing_angle_sets_vertical_slope() {
        let line = Beamline::new(vec![BeamElement::drift(10.0), BeamElement::drift(1.0)]);
        let cfg = TransportSettings {
            crossing_angle: 140e-6,
            observation_point: 10.0,
            ..settings()
        };
        let pert = Perturbations::new();
        let prtl = InputParticle::new(0.0, 0.0, 6500.0);
        let prop = propagate(0, &prtl, &line, &pert, &cfg).unwrap();
        match prop.outcome {
            Outcome::Recorded(obs) => {
                assert!((obs.sy - 140e-6).abs() < E_TOL);
                assert!((obs.y - 1.4e-3).abs() < E_TOL);
            }
            Outcome::NotReached => panic!("expected a record"),
        }
    }

    #[test]
    fn tracking_keeps_input_order() {
        let line = build_test_beamline();
        let cfg = TransportSettings {
            observation_point: 60.0,
            ..settings()
        };
        let pert = Perturbations::new();
        let ensemble: Vec<InputParticle> = (0..64)
            .map(|i| InputParticle::new(1e-3 * i as f64, 0.0, 6500.0))
            .collect();
        let run = Transport::new(&line, &pert, &cfg).track(&ensemble).unwrap();
        assert_eq!(run.len() + run.not_reached, ensemble.len());
        for pair in run.records.windows(2) {
            assert!(pair[0].event < pair[1].event);
        }
        for rec in &run.records {
            assert_eq!(rec.px, ensemble[rec.event].px);
        }
    }
}
