//! Reader for MAD-X twiss tables (TFS format).
//!
//! `@` lines are header parameters, the `*` line names the columns, the
//! `$` line carries their types and every other line is an element.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::aperture::Aperture;
use crate::beamline::{BeamElement, Beamline, ElementKind, MultipoleStrengths};
use crate::error::{Error, Result};

const REQUIRED: [&str; 7] = ["KEYWORD", "S", "L", "HKICK", "VKICK", "K0L", "K1L"];
const APERTURE: [&str; 5] = ["APERTYPE", "APER_1", "APER_2", "APER_3", "APER_4"];

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn parse(line: &str) -> Result<Columns> {
        let index: HashMap<String, usize> = line
            .split_whitespace()
            .skip(1)
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        for name in REQUIRED.iter() {
            if !index.contains_key(*name) {
                return Err(Error::MissingColumn(name.to_string()));
            }
        }
        if APERTURE.iter().any(|name| !index.contains_key(*name)) {
            warn!("aperture columns missing from twiss file, apertures will not be considered");
        }
        Ok(Columns { index })
    }

    fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

struct Row<'a> {
    line: usize,
    fields: Vec<&'a str>,
}

impl<'a> Row<'a> {
    fn text(&self, cols: &Columns, name: &str) -> Option<&'a str> {
        cols.index
            .get(name)
            .and_then(|&i| self.fields.get(i))
            .map(|v| v.trim_matches('"'))
    }

    fn number(&self, cols: &Columns, name: &str) -> Result<f64> {
        let value = self.text(cols, name).ok_or_else(|| Error::MalformedField {
            line: self.line,
            column: name.to_string(),
            value: String::new(),
        })?;
        value.parse::<f64>().map_err(|_| Error::MalformedField {
            line: self.line,
            column: name.to_string(),
            value: value.to_string(),
        })
    }

    fn optional_number(&self, cols: &Columns, name: &str) -> Result<f64> {
        if cols.has(name) {
            self.number(cols, name)
        } else {
            Ok(0.0)
        }
    }
}

pub fn load<P: AsRef<Path>>(path: P, reference_marker: Option<&str>) -> Result<Beamline> {
    let contents = fs::read_to_string(path)?;
    parse(&contents, reference_marker)
}

/// Builds a beamline from twiss text. With a `reference_marker`,
/// everything before that NAME is dropped and positions are measured
/// from it; a marker absent from the table is an error.
pub fn parse(contents: &str, reference_marker: Option<&str>) -> Result<Beamline> {
    let mut cols: Option<Columns> = None;
    let mut rows = Vec::new();

    for (n, line) in contents.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('@') || trimmed.starts_with('$') {
            continue;
        }
        if trimmed.starts_with('*') {
            cols = Some(Columns::parse(trimmed)?);
            continue;
        }
        if cols.is_none() {
            return Err(Error::MissingHeader);
        }
        rows.push(Row {
            line: n + 1,
            fields: trimmed.split_whitespace().collect(),
        });
    }
    let cols = cols.ok_or(Error::MissingHeader)?;

    let start = match reference_marker {
        Some(marker) => rows
            .iter()
            .position(|row| row.text(&cols, "NAME") == Some(marker))
            .ok_or_else(|| Error::MissingReference(marker.to_string()))?,
        None => 0,
    };
    let s_ref = match rows.get(start) {
        Some(row) if reference_marker.is_some() => row.number(&cols, "S")?,
        _ => 0.0,
    };

    let mut elements = Vec::with_capacity(rows.len() - start);
    for row in &rows[start..] {
        elements.push(element(&cols, row, s_ref)?);
    }
    debug!(
        "parsed {} twiss rows, kept {} from the reference point",
        rows.len(),
        elements.len()
    );
    Ok(Beamline::with_positions(elements))
}

fn element(cols: &Columns, row: &Row, s_ref: f64) -> Result<BeamElement> {
    let keyword = row.text(cols, "KEYWORD").unwrap_or_default();
    let name = row.text(cols, "NAME").unwrap_or(keyword);
    let length = row.number(cols, "L")?;
    let hkick = row.number(cols, "HKICK")?;
    let vkick = row.number(cols, "VKICK")?;
    let k0l = row.number(cols, "K0L")?;
    let k1l = row.number(cols, "K1L")?;

    let kind = match keyword {
        "MARKER" => ElementKind::Marker,
        "DRIFT" => ElementKind::Drift,
        "RBEND" | "SBEND" => ElementKind::Dipole { k0l },
        "HKICKER" => ElementKind::HorizontalKicker { hkick },
        "VKICKER" => ElementKind::VerticalKicker { vkick },
        "QUADRUPOLE" => ElementKind::Quadrupole { k1l },
        "MULTIPOLE" => ElementKind::Multipole(MultipoleStrengths {
            k0l,
            hkick,
            vkick,
            k1l,
        }),
        other => ElementKind::Other {
            keyword: other.to_string(),
        },
    };

    Ok(BeamElement {
        name: name.to_string(),
        kind,
        length,
        position: row.number(cols, "S")? - s_ref,
        aperture: aperture(cols, row)?,
    })
}

fn aperture(cols: &Columns, row: &Row) -> Result<Aperture> {
    let aper = [
        row.optional_number(cols, "APER_1")?,
        row.optional_number(cols, "APER_2")?,
        row.optional_number(cols, "APER_3")?,
        row.optional_number(cols, "APER_4")?,
    ];
    let ap = match row.text(cols, "APERTYPE").unwrap_or("NONE") {
        "RECTELLIPSE" => Aperture::new(aper[0], aper[1], aper[2], aper[3]),
        "CIRCLE" => Aperture::circle(aper[0]),
        "ELLIPSE" => Aperture::new(0.0, 0.0, aper[0], aper[1]),
        "RECTANGLE" => Aperture::new(aper[0], aper[1], 0.0, 0.0),
        _ => Aperture::UNLIMITED,
    };
    Ok(ap)
}
