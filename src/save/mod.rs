use crate::{
    analysis::{DifferenceStatistic, DistributionsDifference, JointStatistic, Variable},
    scan::{Scan, NOMINAL},
    transport::{Record, TrackingRun},
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

fn save_column<T: npy::Serializable>(dir: &Path, name: &str, data: Vec<T>) -> Result<()> {
    npy::to_file(dir.join(format!("{}.npy", name)), data)
        .with_context(|| format!("Could not save {} data to file", name))
}

/// Writes every recorded variable of `run` as its own npy file under
/// `outdir/label`.
pub fn save_run(run: &TrackingRun, outdir: &Path, label: &str) -> Result<()> {
    let dir = outdir.join(label);
    std::fs::create_dir_all(&dir).context("Unable to create output directory")?;
    info!("saving {} records to {}", run.len(), dir.display());

    let recs = &run.records;
    let columns: [(&str, fn(&Record) -> f64); 8] = [
        ("x", |r| r.x),
        ("y", |r| r.y),
        ("sx", |r| r.sx),
        ("sy", |r| r.sy),
        ("px", |r| r.px),
        ("py", |r| r.py),
        ("pz", |r| r.pz),
        ("e", |r| r.e),
    ];
    for (name, get) in columns.iter() {
        save_column(&dir, name, recs.iter().map(get).collect::<Vec<f64>>())?;
    }
    save_column(
        &dir,
        "process_code",
        recs.iter().map(|r| r.process_code).collect::<Vec<i32>>(),
    )?;
    save_column(
        &dir,
        "event",
        recs.iter().map(|r| r.event as u64).collect::<Vec<u64>>(),
    )?;
    save_column(
        &dir,
        "lost",
        recs.iter().map(|r| r.lost as u8).collect::<Vec<u8>>(),
    )?;

    save_column(&dir, "lost_px", run.lost.iter().map(|l| l.px).collect::<Vec<f64>>())?;
    save_column(&dir, "lost_py", run.lost.iter().map(|l| l.py).collect::<Vec<f64>>())?;
    save_column(&dir, "lost_pz", run.lost.iter().map(|l| l.pz).collect::<Vec<f64>>())?;
    Ok(())
}

#[derive(Serialize)]
struct Summary<'a> {
    run_a: &'a str,
    run_b: &'a str,
    pairs: usize,
    variables: Vec<&'a DifferenceStatistic>,
    joint: Vec<&'a JointStatistic>,
}

pub fn summary_toml(diff: &DistributionsDifference) -> Result<String> {
    let (run_a, run_b) = diff.labels();
    let summary = Summary {
        run_a,
        run_b,
        pairs: diff.pairs(),
        variables: diff.statistics().collect(),
        joint: diff.joints().collect(),
    };
    toml::to_string(&summary).context("Could not serialize the difference summary")
}

pub fn save_summary(diff: &DistributionsDifference, outdir: &Path) -> Result<()> {
    std::fs::create_dir_all(outdir).context("Unable to create output directory")?;
    let path = outdir.join("difference.toml");
    std::fs::write(&path, summary_toml(diff)?)
        .with_context(|| format!("Could not write {}", path.display()))
}

/// One row per scan point: the mean and RMS of every difference variable.
#[derive(Serialize)]
struct ScanRow<'a> {
    label: &'a str,
    pairs: usize,
    mean: BTreeMap<&'static str, f64>,
    rms: BTreeMap<&'static str, f64>,
}

#[derive(Serialize)]
struct ScanTable<'a> {
    baseline: &'a str,
    points: Vec<ScanRow<'a>>,
}

pub fn scan_toml(scan: &Scan) -> Result<String> {
    let points = scan
        .points
        .iter()
        .map(|p| {
            let diff = &p.difference;
            let pick = |f: fn(&DifferenceStatistic) -> f64| -> BTreeMap<&'static str, f64> {
                Variable::ALL
                    .iter()
                    .map(|&v| (v.name(), f(diff.statistic(v))))
                    .collect()
            };
            ScanRow {
                label: &p.label,
                pairs: diff.pairs(),
                mean: pick(|s| s.difference.mean),
                rms: pick(|s| s.difference.rms),
            }
        })
        .collect();
    let table = ScanTable {
        baseline: NOMINAL,
        points,
    };
    toml::to_string(&table).context("Could not serialize the scan table")
}

/// Writes `scan.toml`, the per-point summary of a whole scan.
pub fn save_scan_table(scan: &Scan, outdir: &Path) -> Result<()> {
    std::fs::create_dir_all(outdir).context("Unable to create output directory")?;
    let path = outdir.join("scan.toml");
    std::fs::write(&path, scan_toml(scan)?)
        .with_context(|| format!("Could not write {}", path.display()))
}
