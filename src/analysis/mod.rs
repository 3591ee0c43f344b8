//! Statistics of the event-by-event difference between two tracking
//! runs of the same input ensemble.

use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::error::{Error, Result};
use crate::transport::{Record, TrackingRun};

/// Name of the run set holding the `a - b` differences.
pub const DIFFERENCE: &str = "difference";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variable {
    X,
    Y,
    Sx,
    Sy,
    Px,
    Py,
    Pz,
}

impl Variable {
    pub const ALL: [Variable; 7] = [
        Variable::X,
        Variable::Y,
        Variable::Sx,
        Variable::Sy,
        Variable::Px,
        Variable::Py,
        Variable::Pz,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variable::X => "x",
            Variable::Y => "y",
            Variable::Sx => "sx",
            Variable::Sy => "sy",
            Variable::Px => "px",
            Variable::Py => "py",
            Variable::Pz => "pz",
        }
    }

    pub fn of(self, rec: &Record) -> f64 {
        match self {
            Variable::X => rec.x,
            Variable::Y => rec.y,
            Variable::Sx => rec.sx,
            Variable::Sy => rec.sy,
            Variable::Px => rec.px,
            Variable::Py => rec.py,
            Variable::Pz => rec.pz,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Variable {
    type Err = Error;
    fn from_str(s: &str) -> Result<Variable> {
        Variable::ALL
            .iter()
            .copied()
            .find(|v| v.name() == s)
            .ok_or_else(|| Error::UnknownVariable(s.to_string()))
    }
}

/// Closed interval a histogram of the values has to cover.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct ValueRange {
    pub lo: f64,
    pub hi: f64,
}

impl ValueRange {
    pub fn of(values: &[f64]) -> Option<ValueRange> {
        values
            .iter()
            .copied()
            .minmax()
            .into_option()
            .map(|(lo, hi)| ValueRange { lo, hi })
    }

    pub fn union(self, other: ValueRange) -> ValueRange {
        ValueRange {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    /// Range of every possible `a - b` with `a` in `self` and `b` in `other`.
    pub fn difference(self, other: ValueRange) -> ValueRange {
        ValueRange {
            lo: self.lo - other.hi,
            hi: self.hi - other.lo,
        }
    }

    pub fn contains(&self, v: f64) -> bool {
        self.lo <= v && v <= self.hi
    }
}

/// Mean and RMS spread about the mean.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct Moments {
    pub entries: usize,
    pub mean: f64,
    pub rms: f64,
}

impl Moments {
    pub fn of(values: &[f64]) -> Moments {
        if values.is_empty() {
            return Moments::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Moments {
            entries: values.len(),
            mean,
            rms: var.sqrt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifferenceStatistic {
    pub variable: Variable,
    pub run_a: Moments,
    pub run_b: Moments,
    pub difference: Moments,
    /// Covers the raw values of both runs.
    pub raw_range: ValueRange,
    /// Covers every difference `a - b`, outliers included.
    pub difference_range: ValueRange,
}

impl DifferenceStatistic {
    fn compute(variable: Variable, a: &[f64], b: &[f64], diff: &[f64]) -> DifferenceStatistic {
        let range_a = ValueRange::of(a).unwrap_or_default();
        let range_b = ValueRange::of(b).unwrap_or_default();
        DifferenceStatistic {
            variable,
            run_a: Moments::of(a),
            run_b: Moments::of(b),
            difference: Moments::of(diff),
            raw_range: range_a.union(range_b),
            difference_range: range_a.difference(range_b),
        }
    }
}

/// Difference variables whose joint distribution is kept.
pub const JOINT_PAIRS: [(Variable, Variable); 3] = [
    (Variable::X, Variable::Y),
    (Variable::X, Variable::Sx),
    (Variable::Y, Variable::Sy),
];

/// Joint moments of two difference variables over the same pairs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointStatistic {
    pub first: Variable,
    pub second: Variable,
    pub mean_first: f64,
    pub mean_second: f64,
    pub rms_first: f64,
    pub rms_second: f64,
    pub covariance: f64,
    /// Zero when either side has no spread.
    pub correlation: f64,
}

impl JointStatistic {
    fn compute(first: Variable, second: Variable, u: &[f64], v: &[f64]) -> JointStatistic {
        let mu = Moments::of(u);
        let mv = Moments::of(v);
        let covariance = if u.is_empty() {
            0.0
        } else {
            u.iter()
                .zip(v)
                .map(|(a, b)| (a - mu.mean) * (b - mv.mean))
                .sum::<f64>()
                / u.len() as f64
        };
        let spread = mu.rms * mv.rms;
        JointStatistic {
            first,
            second,
            mean_first: mu.mean,
            mean_second: mv.mean,
            rms_first: mu.rms,
            rms_second: mv.rms,
            covariance,
            correlation: if spread > 0.0 { covariance / spread } else { 0.0 },
        }
    }

    /// e.g. `x_diff_vs_sx_diff`
    pub fn name(&self) -> String {
        format!("{}_diff_vs_{}_diff", self.first, self.second)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct AnalyzerOptions {
    /// Skip pairs where either particle failed an aperture test.
    pub exclude_lost: bool,
}

/// Pairs two runs record by record and keeps the per-variable moments
/// of each run and of their difference.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionsDifference {
    label_a: String,
    label_b: String,
    pairs: usize,
    stats: BTreeMap<Variable, DifferenceStatistic>,
    joints: Vec<JointStatistic>,
}

impl DistributionsDifference {
    pub fn new(
        label_a: &str,
        run_a: &TrackingRun,
        label_b: &str,
        run_b: &TrackingRun,
        options: AnalyzerOptions,
    ) -> Result<DistributionsDifference> {
        if run_a.len() != run_b.len() {
            return Err(Error::PairingMismatch {
                left: run_a.len(),
                right: run_b.len(),
            });
        }
        for (index, (a, b)) in run_a.records.iter().zip(&run_b.records).enumerate() {
            if a.event != b.event {
                return Err(Error::EventMismatch {
                    index,
                    left: a.event,
                    right: b.event,
                });
            }
        }
        let pairs: Vec<(&Record, &Record)> = run_a
            .records
            .iter()
            .zip(run_b.records.iter())
            .filter(|(a, b)| !(options.exclude_lost && (a.lost || b.lost)))
            .collect();

        let mut stats = BTreeMap::new();
        let mut diffs = BTreeMap::new();
        for &var in Variable::ALL.iter() {
            let (a, b): (Vec<f64>, Vec<f64>) =
                pairs.iter().map(|(ra, rb)| (var.of(ra), var.of(rb))).unzip();
            let diff: Vec<f64> = a.iter().zip(&b).map(|(va, vb)| va - vb).collect();
            stats.insert(var, DifferenceStatistic::compute(var, &a, &b, &diff));
            diffs.insert(var, diff);
        }
        let joints = JOINT_PAIRS
            .iter()
            .map(|&(u, v)| JointStatistic::compute(u, v, &diffs[&u], &diffs[&v]))
            .collect();

        Ok(DistributionsDifference {
            label_a: label_a.to_string(),
            label_b: label_b.to_string(),
            pairs: pairs.len(),
            stats,
            joints,
        })
    }

    pub fn pairs(&self) -> usize {
        self.pairs
    }

    pub fn labels(&self) -> (&str, &str) {
        (&self.label_a, &self.label_b)
    }

    pub fn statistic(&self, var: Variable) -> &DifferenceStatistic {
        &self.stats[&var]
    }

    pub fn statistics(&self) -> impl Iterator<Item = &DifferenceStatistic> {
        self.stats.values()
    }

    fn moments(&self, set: &str, var: Variable) -> Result<Moments> {
        let stat = self.statistic(var);
        if set == DIFFERENCE {
            Ok(stat.difference)
        } else if set == self.label_a {
            Ok(stat.run_a)
        } else if set == self.label_b {
            Ok(stat.run_b)
        } else {
            Err(Error::UnknownRunSet(set.to_string()))
        }
    }

    pub fn mean_of(&self, set: &str, variable: &str) -> Result<f64> {
        Ok(self.moments(set, variable.parse()?)?.mean)
    }

    pub fn rms_of(&self, set: &str, variable: &str) -> Result<f64> {
        Ok(self.moments(set, variable.parse()?)?.rms)
    }

    pub fn joints(&self) -> impl Iterator<Item = &JointStatistic> {
        self.joints.iter()
    }

    pub fn joint(&self, first: Variable, second: Variable) -> Result<&JointStatistic> {
        self.joints
            .iter()
            .find(|j| j.first == first && j.second == second)
            .ok_or_else(|| Error::UnknownJoint {
                first: first.to_string(),
                second: second.to_string(),
            })
    }

    /// Looks a joint statistic up by variable names, e.g. `("x", "sx")`.
    pub fn joint_of(&self, first: &str, second: &str) -> Result<&JointStatistic> {
        self.joint(first.parse()?, second.parse()?)
    }

    pub fn means(&self, set: &str) -> Result<BTreeMap<Variable, f64>> {
        Variable::ALL
            .iter()
            .map(|&v| -> Result<(Variable, f64)> { Ok((v, self.moments(set, v)?.mean)) })
            .collect()
    }

    pub fn rmss(&self, set: &str) -> Result<BTreeMap<Variable, f64>> {
        Variable::ALL
            .iter()
            .map(|&v| -> Result<(Variable, f64)> { Ok((v, self.moments(set, v)?.rms)) })
            .collect()
    }

    pub fn log_summary(&self) {
        info!(
            "{} - {}: {} paired particles",
            self.label_a, self.label_b, self.pairs
        );
        for stat in self.statistics() {
            info!(
                "  {:>2}: mean diff = {:+.6e}, rms diff = {:.6e}",
                stat.variable, stat.difference.mean, stat.difference.rms
            );
        }
        for joint in self.joints() {
            info!(
                "  {}: covariance = {:+.6e}, correlation = {:+.4}",
                joint.name(),
                joint.covariance,
                joint.correlation
            );
        }
    }
}
