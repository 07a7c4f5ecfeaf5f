//! writer.rs
//! Output file of a recording session.
//!
//! Layout:
//! ```text
//! #Recorded at <local time> with force_daq <version>
//! # Sensor: id=1, name=FT30436, cal-file=calibration/FT30436.cal
//! #<optional comment line>
//! time,[device_tag,]Fx,Fy,Fz,[Tx,Ty,Tz,]trigger1,[trigger2]
//! 1000,1.2500,-0.1250,9.8100,0.0000
//! #T,1000,started:1
//! #UDP,1003,stimulus onset
//! ```
//! Data rows carry the configured columns with fixed decimals. Lifecycle
//! events and soft triggers are `#T` rows, recorded remote payloads `#UDP`
//! rows. Remote-control commands are never written.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::Local;
use flate2::{Compression, write::GzEncoder};
use log::info;

use crate::acquisition::types::{ForceChannel, ForceSample, RecordItem};
use crate::config::OutputColumns;
use crate::error::Result;

pub const TAG_COMMENTS: &str = "#";
pub const TAG_SOFTTRIGGER: &str = "#T";
pub const TAG_UDPDATA: &str = "#UDP";
pub const DEFAULT_FILENAME: &str = "daq_recording.csv";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Free text as it goes into a tagged row: one line, no trailing whitespace.
pub fn single_line(text: &str) -> String {
    text.trim_end().replace(['\r', '\n'], " ")
}

/// What the header records about one sensor.
#[derive(Debug, Clone)]
pub struct SensorHeader {
    pub device_id: u16,
    pub name: String,
    pub calibration_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FileOptions {
    pub directory: PathBuf,
    /// Append `_YYYYmmddHHMM` to the file stem.
    pub timestamp_suffix: bool,
    /// Write the column-name row.
    pub varnames: bool,
    pub comment_line: String,
    pub zipped: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            timestamp_suffix: false,
            varnames: true,
            comment_line: String::new(),
            zipped: false,
        }
    }
}

/// Turns record items into text rows.
#[derive(Debug, Clone, Copy)]
pub struct RowFormat {
    pub columns: OutputColumns,
    pub decimals: usize,
}

impl RowFormat {
    pub fn new(columns: OutputColumns, decimals: usize) -> Self {
        Self { columns, decimals }
    }

    pub fn header(&self) -> String {
        let mut names = vec!["time"];
        if self.columns.device_id {
            names.push("device_tag");
        }
        for ch in ForceChannel::ALL {
            if self.columns.forces[ch.index()] {
                names.push(ch.name());
            }
        }
        if self.columns.triggers[0] {
            names.push("trigger1");
        }
        if self.columns.triggers[1] {
            names.push("trigger2");
        }
        names.join(",")
    }

    pub fn sample_row(&self, s: &ForceSample) -> String {
        let p = self.decimals;
        let mut line = format!("{}", s.time);
        if self.columns.device_id {
            line.push_str(&format!(",{}", s.device_id));
        }
        for (on, v) in self.columns.forces.iter().zip(s.forces.iter()) {
            if *on {
                line.push_str(&format!(",{:.*}", p, v));
            }
        }
        for (on, v) in self.columns.triggers.iter().zip(s.trigger.iter()) {
            if *on {
                line.push_str(&format!(",{:.*}", p, v));
            }
        }
        line
    }

    /// The row for `item`, `None` for remote-control commands.
    pub fn row(&self, item: &RecordItem) -> Option<String> {
        match item {
            RecordItem::Sample(s) => Some(self.sample_row(s)),
            RecordItem::Lifecycle(ev) => Some(format!("{},{},{}", TAG_SOFTTRIGGER, ev.time, ev.code())),
            RecordItem::SoftTrigger(t) => {
                Some(format!("{},{},{}", TAG_SOFTTRIGGER, t.time, single_line(&t.code)))
            }
            RecordItem::Remote(ev) if ev.is_remote_control_command() => None,
            RecordItem::Remote(ev) => Some(format!("{},{},{}", TAG_UDPDATA, ev.time, single_line(&ev.text()))),
        }
    }
}

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(w) => w,
            Sink::Gzip(w) => w,
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            Sink::Plain(mut w) => w.flush(),
            Sink::Gzip(w) => w.finish()?.flush(),
        }
    }
}

pub struct DataFile {
    path: PathBuf,
    sink: Option<Sink>,
    format: RowFormat,
    rows: u64,
}

impl DataFile {
    /// Creates the file under `opts.directory` (created if needed) without
    /// overwriting: an existing name gets `_1`, `_2`, ... before its extension.
    /// Writes the comment block and, with `varnames`, the header row.
    pub fn create(filename: &str, sensors: &[SensorHeader], format: RowFormat, opts: &FileOptions) -> Result<Self> {
        fs::create_dir_all(&opts.directory)?;
        let path = unique_path(&opts.directory, filename, opts.timestamp_suffix, opts.zipped);

        let file = BufWriter::new(File::create(&path)?);
        let sink = if opts.zipped {
            Sink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(file)
        };
        let mut data_file = Self {
            path,
            sink: Some(sink),
            format,
            rows: 0,
        };

        let mut head = format!(
            "{}Recorded at {} with force_daq {}\n",
            TAG_COMMENTS,
            Local::now().format("%a %b %e %H:%M:%S %Y"),
            VERSION
        );
        for s in sensors {
            let cal = s
                .calibration_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "None".into());
            head.push_str(&format!(
                "{} Sensor: id={}, name={}, cal-file={}\n",
                TAG_COMMENTS, s.device_id, s.name, cal
            ));
        }
        if !opts.comment_line.is_empty() {
            head.push_str(&format!("{}{}\n", TAG_COMMENTS, opts.comment_line));
        }
        if opts.varnames {
            head.push_str(&format.header());
            head.push('\n');
        }
        data_file.write_raw(&head)?;
        info!("[Recorder] new data file {}", data_file.path.display());
        Ok(data_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    fn write_raw(&mut self, text: &str) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.writer().write_all(text.as_bytes())?;
        }
        Ok(())
    }

    /// Serializes `items` in the given order; returns the number of rows written.
    pub fn write_items<'a>(&mut self, items: impl IntoIterator<Item = &'a RecordItem>) -> Result<usize> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(0);
        };
        let w = sink.writer();
        let mut n = 0;
        for item in items {
            if let Some(mut line) = self.format.row(item) {
                line.push('\n');
                w.write_all(line.as_bytes())?;
                n += 1;
            }
        }
        self.rows += n as u64;
        Ok(n)
    }

    /// Flushes and closes the file; further writes are dropped. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.take() {
            sink.finish()?;
            info!("[Recorder] closed {} ({} rows)", self.path.display(), self.rows);
        }
        Ok(())
    }
}

impl Drop for DataFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("[Recorder] closing {} failed: {}", self.path.display(), e);
        }
    }
}

/// Inserts `suffix` before the first `.` of `name` (or appends it).
fn insert_before_extension(name: &str, suffix: &str) -> String {
    match name.find('.') {
        Some(x) => format!("{}{}{}", &name[..x], suffix, &name[x..]),
        None => format!("{}{}", name, suffix),
    }
}

fn unique_path(directory: &Path, filename: &str, timestamp_suffix: bool, zipped: bool) -> PathBuf {
    let base = if filename.trim().is_empty() {
        DEFAULT_FILENAME
    } else {
        filename.trim()
    };
    let stamp = Local::now().format("_%Y%m%d%H%M").to_string();

    let mut cnt = 0u32;
    loop {
        let mut name = base.to_string();
        if cnt > 0 {
            name = insert_before_extension(&name, &format!("_{}", cnt));
        }
        if timestamp_suffix {
            name = insert_before_extension(&name, &stamp);
        }
        if zipped {
            name.push_str(".gz");
        }
        let path = directory.join(name);
        if !path.exists() {
            return path;
        }
        cnt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::types::{LifecycleEvent, LifecycleKind, RemoteEvent, SoftTrigger};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn sample(time: i64) -> ForceSample {
        ForceSample {
            time,
            device_id: 2,
            seq: 1,
            forces: [1.0, -2.5, 3.5, 4.0, 5.0, 6.0],
            trigger: [1.0, 0.0],
        }
    }

    fn headers() -> Vec<SensorHeader> {
        vec![SensorHeader {
            device_id: 2,
            name: "FT2".into(),
            calibration_file: None,
        }]
    }

    #[test]
    fn rows_follow_column_selection() {
        let fmt = RowFormat::new(OutputColumns::default(), 4);
        assert_eq!(fmt.header(), "time,Fx,Fy,Fz,trigger1");
        assert_eq!(fmt.sample_row(&sample(1000)), "1000,1.0000,-2.5000,3.5000,1.0000");

        let fmt = RowFormat::new(OutputColumns::all(), 2);
        assert_eq!(fmt.header(), "time,device_tag,Fx,Fy,Fz,Tx,Ty,Tz,trigger1,trigger2");
        assert_eq!(fmt.sample_row(&sample(7)), "7,2,1.00,-2.50,3.50,4.00,5.00,6.00,1.00,0.00");
    }

    #[test]
    fn tagged_rows_and_skipped_commands() {
        let fmt = RowFormat::new(OutputColumns::default(), 4);
        let ev = RecordItem::Lifecycle(LifecycleEvent {
            time: 5,
            device_id: 1,
            kind: LifecycleKind::Paused,
        });
        assert_eq!(fmt.row(&ev).unwrap(), "#T,5,pause:1");
        let st = RecordItem::SoftTrigger(SoftTrigger { time: 6, code: "go".into() });
        assert_eq!(fmt.row(&st).unwrap(), "#T,6,go");
        let multi = RecordItem::SoftTrigger(SoftTrigger { time: 6, code: "block\r\nend\n".into() });
        assert_eq!(fmt.row(&multi).unwrap(), "#T,6,block  end");
        let udp = RecordItem::Remote(RemoteEvent { time: 7, payload: b"cue\n".to_vec() });
        assert_eq!(fmt.row(&udp).unwrap(), "#UDP,7,cue");
        let cmd = RecordItem::Remote(RemoteEvent { time: 8, payload: b"$PSE".to_vec() });
        assert!(fmt.row(&cmd).is_none());
    }

    #[test]
    fn existing_files_get_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        let opts = FileOptions {
            directory: dir.path().to_path_buf(),
            ..FileOptions::default()
        };
        let fmt = RowFormat::new(OutputColumns::default(), 4);
        let mut a = DataFile::create("run.csv", &headers(), fmt, &opts).unwrap();
        let mut b = DataFile::create("run.csv", &headers(), fmt, &opts).unwrap();
        let mut c = DataFile::create("run.csv", &headers(), fmt, &opts).unwrap();
        assert_eq!(a.path().file_name().unwrap(), "run.csv");
        assert_eq!(b.path().file_name().unwrap(), "run_1.csv");
        assert_eq!(c.path().file_name().unwrap(), "run_2.csv");
        a.close().unwrap();
        b.close().unwrap();
        c.close().unwrap();
    }

    #[test]
    fn zipped_file_holds_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let opts = FileOptions {
            directory: dir.path().join("nested"),
            comment_line: "pilot".into(),
            zipped: true,
            ..FileOptions::default()
        };
        let fmt = RowFormat::new(OutputColumns::default(), 4);
        let mut f = DataFile::create("", &headers(), fmt, &opts).unwrap();
        let items = vec![
            RecordItem::Sample(sample(1)),
            RecordItem::Remote(RemoteEvent { time: 2, payload: b"$SRT".to_vec() }),
        ];
        assert_eq!(f.write_items(&items).unwrap(), 1);
        f.close().unwrap();
        f.close().unwrap();
        assert_eq!(f.write_items(&items).unwrap(), 0);

        assert_eq!(f.path().file_name().unwrap(), "daq_recording.csv.gz");
        let mut text = String::new();
        GzDecoder::new(File::open(f.path()).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("#Recorded at "));
        assert_eq!(lines[1], "# Sensor: id=2, name=FT2, cal-file=None");
        assert_eq!(lines[2], "#pilot");
        assert_eq!(lines[3], "time,Fx,Fy,Fz,trigger1");
        assert_eq!(lines[4], "1,1.0000,-2.5000,3.5000,1.0000");
        assert_eq!(lines.len(), 5);
    }
}
