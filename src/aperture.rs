use serde::Serialize;

/// Beam-pipe bounds of one element. A particle survives only inside
/// both the rectangle and the ellipse. Infinite bounds never cut.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aperture {
    pub rect_x: f64,
    pub rect_y: f64,
    pub ell_x: f64,
    pub ell_y: f64,
}

impl Aperture {
    pub const UNLIMITED: Aperture = Aperture {
        rect_x: f64::INFINITY,
        rect_y: f64::INFINITY,
        ell_x: f64::INFINITY,
        ell_y: f64::INFINITY,
    };

    /// Builds an aperture treating zero or negative bounds as "no cut",
    /// which is how optics files leave unset apertures.
    pub fn new(rect_x: f64, rect_y: f64, ell_x: f64, ell_y: f64) -> Aperture {
        Aperture {
            rect_x: bound(rect_x),
            rect_y: bound(rect_y),
            ell_x: bound(ell_x),
            ell_y: bound(ell_y),
        }
    }

    pub fn circle(radius: f64) -> Aperture {
        Aperture::new(radius, radius, radius, radius)
    }

    pub fn is_unlimited(&self) -> bool {
        *self == Aperture::UNLIMITED
    }

    pub fn is_lost(&self, x: f64, y: f64) -> bool {
        is_lost(x, y, self.rect_x, self.rect_y, self.ell_x, self.ell_y)
    }
}

impl Default for Aperture {
    fn default() -> Aperture {
        Aperture::UNLIMITED
    }
}

fn bound(v: f64) -> f64 {
    if v > 0.0 {
        v
    } else {
        f64::INFINITY
    }
}

#[inline(always)]
pub fn is_lost(x: f64, y: f64, rect_x: f64, rect_y: f64, ell_x: f64, ell_y: f64) -> bool {
    let ex = x / ell_x;
    let ey = y / ell_y;
    ex * ex + ey * ey > 1.0 || x.abs() > rect_x || y.abs() > rect_y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_axis_survives() {
        assert!(!is_lost(0.0, 0.0, 0.01, 0.01, 0.01, 0.01));
    }

    #[test]
    fn rectangle_cut() {
        assert!(is_lost(0.02, 0.0, 0.01, 0.01, 0.01, 0.01));
        assert!(is_lost(0.0, -0.011, 0.01, 0.01, 1.0, 1.0));
    }

    #[test]
    fn ellipse_cut_inside_rectangle() {
        assert!(is_lost(0.007, 0.007, 0.01, 0.01, 0.008, 0.008));
        assert!(!is_lost(0.005, 0.005, 0.01, 0.01, 0.008, 0.008));
    }

    #[test]
    fn zero_bounds_mean_no_cut() {
        let ap = Aperture::new(0.0, 0.0, 0.0, 0.0);
        assert!(ap.is_unlimited());
        assert!(!ap.is_lost(10.0, -10.0));

        let ap = Aperture::new(0.02, 0.0, 0.0, 0.0);
        assert!(ap.is_lost(0.03, 0.0));
        assert!(!ap.is_lost(0.01, 5.0));
    }

    #[test]
    fn circle() {
        let ap = Aperture::circle(0.01);
        assert!(!ap.is_lost(0.006, 0.006));
        assert!(ap.is_lost(0.008, 0.008));
    }
}
