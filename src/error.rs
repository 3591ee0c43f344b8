use thiserror::Error;

use crate::magnets::MagnetId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("particle {event} has degenerate longitudinal momentum pz = {pz}")]
    DegenerateMomentum { event: usize, pz: f64 },

    #[error("element {name} is degenerate: {reason}")]
    DegenerateElement { name: String, reason: String },

    #[error("invalid perturbation for {magnet}: {reason}")]
    InvalidPerturbation { magnet: MagnetId, reason: String },

    #[error("twiss file has no '*' line naming its columns")]
    MissingHeader,

    #[error("reference marker {0:?} not found in twiss file")]
    MissingReference(String),

    #[error("twiss file is missing required column {0}")]
    MissingColumn(String),

    #[error("line {line}: could not parse column {column} from {value:?}")]
    MalformedField {
        line: usize,
        column: String,
        value: String,
    },

    #[error("cannot pair runs of different sizes ({left} vs {right} recorded particles)")]
    PairingMismatch { left: usize, right: usize },

    #[error("record {index} pairs event {left} with event {right}")]
    EventMismatch {
        index: usize,
        left: usize,
        right: usize,
    },

    #[error("no run set named {0:?}")]
    UnknownRunSet(String),

    #[error("unknown variable {0:?}")]
    UnknownVariable(String),

    #[error("no joint statistic for {first} vs {second}")]
    UnknownJoint { first: String, second: String },

    #[error("ensemble column {column} has {found} entries, expected {expected}")]
    EnsembleShape {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
