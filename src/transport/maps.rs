//! Closed-form transfer maps. Each takes the transverse state at the
//! element entrance and returns it at the exit; `z` is left to the caller.

/// Strengths and coordinates at or below this magnitude count as zero.
pub const NEGLIGIBLE: f64 = 1e-15;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Transverse {
    pub x: f64,
    pub y: f64,
    pub sx: f64,
    pub sy: f64,
}

impl Transverse {
    pub fn new(x: f64, y: f64, sx: f64, sy: f64) -> Transverse {
        Transverse { x, y, sx, sy }
    }

    /// Exchanges the horizontal and vertical planes.
    pub fn swapped(self) -> Transverse {
        Transverse {
            x: self.y,
            y: self.x,
            sx: self.sy,
            sy: self.sx,
        }
    }
}

#[inline(always)]
pub fn is_negligible(v: f64) -> bool {
    v.abs() < NEGLIGIBLE
}

#[inline(always)]
pub fn drift(t: Transverse, l: f64) -> Transverse {
    Transverse {
        x: t.x + l * t.sx,
        y: t.y + l * t.sy,
        ..t
    }
}

/// Uniform bend in the horizontal plane by `angle` (strength * E / pz).
/// The position picks up half the deflection over the length.
#[inline(always)]
pub fn horizontal_bend(t: Transverse, l: f64, angle: f64) -> Transverse {
    Transverse {
        x: t.x + l * t.sx + 0.5 * l * angle,
        y: t.y + l * t.sy,
        sx: t.sx + angle,
        sy: t.sy,
    }
}

#[inline(always)]
pub fn vertical_bend(t: Transverse, l: f64, angle: f64) -> Transverse {
    horizontal_bend(t.swapped(), l, angle).swapped()
}

// Drops the term when its coordinate operand is effectively on axis.
#[inline(always)]
fn term(operand: f64, value: f64) -> f64 {
    if operand.abs() > NEGLIGIBLE {
        value
    } else {
        0.0
    }
}

fn focus(u: f64, su: f64, qk: f64, qkl: f64) -> (f64, f64) {
    let (s, c) = qkl.sin_cos();
    (
        term(u, c * u) + term(su, s * su / qk),
        term(su, c * su) + term(u, -qk * s * u),
    )
}

fn defocus(u: f64, su: f64, qk: f64, qkl: f64) -> (f64, f64) {
    let (s, c) = (qkl.sinh(), qkl.cosh());
    (
        term(u, c * u) + term(su, s * su / qk),
        term(su, c * su) + term(u, qk * s * u),
    )
}

/// Thick quadrupole. `k1l >= 0` focuses horizontally and defocuses
/// vertically, negative `k1l` the other way round. `rigidity` is E / pz
/// and `l` must be positive.
pub fn quadrupole(t: Transverse, l: f64, k1l: f64, rigidity: f64) -> Transverse {
    let qk = (k1l.abs() * rigidity / l).sqrt();
    let qkl = qk * l;
    if k1l >= 0.0 {
        let (x, sx) = focus(t.x, t.sx, qk, qkl);
        let (y, sy) = defocus(t.y, t.sy, qk, qkl);
        Transverse { x, y, sx, sy }
    } else {
        let (y, sy) = focus(t.y, t.sy, qk, qkl);
        let (x, sx) = defocus(t.x, t.sx, qk, qkl);
        Transverse { x, y, sx, sy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::E_TOL;

    fn close(a: Transverse, b: Transverse) -> bool {
        (a.x - b.x).abs() < E_TOL
            && (a.y - b.y).abs() < E_TOL
            && (a.sx - b.sx).abs() < E_TOL
            && (a.sy - b.sy).abs() < E_TOL
    }

    #[test]
    fn zero_length_drift_is_identity() {
        let t = Transverse::new(1e-3, -2e-3, 4e-5, -1e-5);
        assert_eq!(drift(t, 0.0), t);
    }

    #[test]
    fn zero_angle_bend_is_drift() {
        let t = Transverse::new(1e-3, -2e-3, 4e-5, -1e-5);
        assert_eq!(horizontal_bend(t, 3.0, 0.0), drift(t, 3.0));
        assert_eq!(vertical_bend(t, 3.0, 0.0), drift(t, 3.0));
    }

    #[test]
    fn bends_act_in_their_plane() {
        let t = Transverse::default();
        let h = horizontal_bend(t, 2.0, 1e-4);
        assert!((h.x - 1e-4).abs() < E_TOL);
        assert!((h.sx - 1e-4).abs() < E_TOL);
        assert_eq!((h.y, h.sy), (0.0, 0.0));

        let v = vertical_bend(t, 2.0, 1e-4);
        assert!((v.y - 1e-4).abs() < E_TOL);
        assert!((v.sy - 1e-4).abs() < E_TOL);
        assert_eq!((v.x, v.sx), (0.0, 0.0));
    }

    #[test]
    fn quadrupole_planes_are_dual() {
        let t = Transverse::new(1.2e-3, -0.7e-3, 3e-5, 8e-5);
        let (l, k1l, rigidity) = (6.3, 0.0549, 1.0);
        let pos = quadrupole(t, l, k1l, rigidity);
        let neg = quadrupole(t.swapped(), l, -k1l, rigidity);
        assert!(close(pos, neg.swapped()));
    }

    #[test]
    fn quadrupole_focuses_and_defocuses() {
        let t = Transverse::new(1e-3, 1e-3, 0.0, 0.0);
        let out = quadrupole(t, 1.0, 0.01, 1.0);
        let qk = 0.1_f64;
        assert!((out.x - qk.cos() * 1e-3).abs() < E_TOL);
        assert!((out.sx + qk * qk.sin() * 1e-3).abs() < E_TOL);
        assert!((out.y - qk.cosh() * 1e-3).abs() < E_TOL);
        assert!((out.sy - qk * qk.sinh() * 1e-3).abs() < E_TOL);
        assert!(out.x < t.x);
        assert!(out.y > t.y);
    }

    #[test]
    fn on_axis_particle_stays_on_axis() {
        let t = Transverse::new(1e-16, 0.0, -1e-16, 0.0);
        assert_eq!(quadrupole(t, 2.0, 0.3, 1.0), Transverse::default());
    }
}
