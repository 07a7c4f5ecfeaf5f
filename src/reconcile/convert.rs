//! convert.rs
//! Offline conversion of raw recordings into files with a regular time column.
//!
//! `<dir>/<stem>.csv[.gz]` → `<dir>/converted/<stem>.conv.csv.gz`. The input file
//! is never touched, and nothing is written if reconciliation fails. Rows of
//! other devices and all tagged rows are copied unchanged.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use flate2::{Compression, write::GzEncoder};
use log::info;

use crate::config::ReconcileConfig;
use crate::error::{DaqError, Result};
use crate::reconcile::{
    reader::{Entry, RawRecording},
    timeline::TimestampReconciler,
};
use crate::recording::writer::{TAG_SOFTTRIGGER, TAG_UDPDATA, single_line};

pub const CONVERTED_SUFFIX: &str = ".conv.csv.gz";
pub const CONVERTED_SUBFOLDER: &str = "converted";

fn is_recording_name(name: &str) -> bool {
    (name.ends_with(".csv") || name.ends_with(".csv.gz")) && !name.ends_with(CONVERTED_SUFFIX)
}

/// Where the converted counterpart of `path` lives.
pub fn converted_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let stem = name
        .strip_suffix(".csv.gz")
        .or_else(|| name.strip_suffix(".csv"))
        .unwrap_or(&name);
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    dir.join(CONVERTED_SUBFOLDER).join(format!("{}{}", stem, CONVERTED_SUFFIX))
}

/// Recordings in `folder` without a converted counterpart, sorted by name.
pub fn unconverted_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        let is_candidate = path.is_file()
            && path
                .file_name()
                .is_some_and(|n| is_recording_name(&n.to_string_lossy()));
        if is_candidate && !converted_path(&path).exists() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Converts one recording for `device_id`; returns the new file's path.
pub fn convert_file(path: &Path, device_id: u16, config: &ReconcileConfig) -> Result<PathBuf> {
    info!("[Convert] converting {}", path.display());
    let raw = RawRecording::read(path)?;
    if !raw.has_device_column() {
        let devices = raw.recorded_devices().len();
        if devices > 1 {
            return Err(DaqError::AmbiguousDevices { devices });
        }
    }
    let times = raw.timestamps(device_id);
    info!("[Convert] {} samples of device {}", times.len(), device_id);

    let reconciler = TimestampReconciler::new(config.clone());
    let reconciled = reconciler.reconcile(&times, &raw.lifecycle(device_id), device_id)?;

    let target = converted_path(path);
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir)?;
    }
    write_converted(&target, &raw, device_id, &reconciled.times)?;
    info!(
        "[Convert] wrote {} ({} periods)",
        target.display(),
        reconciled.periods.len()
    );
    Ok(target)
}

fn write_converted(target: &Path, raw: &RawRecording, device_id: u16, times: &[i64]) -> Result<()> {
    let mut w = GzEncoder::new(BufWriter::new(File::create(target)?), Compression::default());
    let mut next_time = times.iter();

    for entry in &raw.entries {
        let line = match entry {
            Entry::Comment(c) => c.clone(),
            Entry::Header(cols) => cols.join(","),
            Entry::Data(row) => {
                let mut fields = row.fields.clone();
                if RawRecording::row_matches(row, device_id) {
                    let t = next_time.next().ok_or_else(|| DaqError::Format {
                        line: 0,
                        reason: "time column shorter than data".into(),
                    })?;
                    fields[0] = t.to_string();
                }
                fields.join(",")
            }
            Entry::Lifecycle(ev) => format!("{},{},{}", TAG_SOFTTRIGGER, ev.time, ev.code()),
            Entry::SoftTrigger(t) => format!("{},{},{}", TAG_SOFTTRIGGER, t.time, single_line(&t.code)),
            Entry::Remote(ev) => format!("{},{},{}", TAG_UDPDATA, ev.time, ev.text()),
        };
        w.write_all(line.as_bytes())?;
        w.write_all(b"\n")?;
    }
    w.finish()?.flush()?;
    Ok(())
}

/// Converts a single file, or every unconverted recording of a folder.
/// The first failing file aborts the batch.
pub fn convert_path(path: &Path, device_id: u16, config: &ReconcileConfig) -> Result<Vec<PathBuf>> {
    if path.is_dir() {
        let files = unconverted_files(path)?;
        info!("[Convert] {} unconverted files in {}", files.len(), path.display());
        files.iter().map(|f| convert_file(f, device_id, config)).collect()
    } else {
        Ok(vec![convert_file(path, device_id, config)?])
    }
}
