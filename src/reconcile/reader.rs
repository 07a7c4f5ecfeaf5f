//! reader.rs
//! Reads a raw recording (plain or gzip) back into classified rows.
//!
//! Row classes, in file order:
//! - `#UDP,time,payload` → remote event
//! - `#T,time,code`      → lifecycle event (`started:N` / `pause:N`) or soft trigger
//! - other `#...`        → comment
//! - first plain row     → column names
//! - further plain rows  → data

use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use csv::{ReaderBuilder, StringRecord};
use flate2::read::GzDecoder;

use crate::acquisition::types::{LifecycleEvent, RemoteEvent, SoftTrigger};
use crate::error::{DaqError, Result};
use crate::recording::writer::{TAG_COMMENTS, TAG_SOFTTRIGGER, TAG_UDPDATA};

#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub time: i64,
    pub device_id: Option<u16>,
    /// All fields as written, time included.
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Comment(String),
    Header(Vec<String>),
    Data(DataRow),
    Lifecycle(LifecycleEvent),
    SoftTrigger(SoftTrigger),
    Remote(RemoteEvent),
}

#[derive(Debug, Clone, Default)]
pub struct RawRecording {
    pub entries: Vec<Entry>,
    pub columns: Vec<String>,
}

fn open(path: &Path) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    let gz = path.extension().is_some_and(|e| e == "gz");
    Ok(if gz { Box::new(GzDecoder::new(file)) } else { Box::new(file) })
}

fn join_tail(record: &StringRecord, from: usize) -> String {
    record.iter().skip(from).collect::<Vec<_>>().join(",")
}

fn parse_time(field: Option<&str>, line: usize) -> Result<i64> {
    let f = field.unwrap_or("").trim();
    f.parse::<i64>()
        .or_else(|_| f.parse::<f64>().map(|v| v.round() as i64))
        .map_err(|_| DaqError::Format {
            line,
            reason: format!("bad time value '{}'", f),
        })
}

impl RawRecording {
    pub fn read(path: &Path) -> Result<Self> {
        Self::from_reader(open(path)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut rec = RawRecording::default();
        let mut device_col: Option<usize> = None;
        let mut record = StringRecord::new();

        while rdr.read_record(&mut record)? {
            let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
            let first = record.get(0).unwrap_or("");

            let entry = if first == TAG_UDPDATA {
                Entry::Remote(RemoteEvent {
                    time: parse_time(record.get(1), line)?,
                    payload: join_tail(&record, 2).into_bytes(),
                })
            } else if first == TAG_SOFTTRIGGER {
                let time = parse_time(record.get(1), line)?;
                let code = join_tail(&record, 2);
                match LifecycleEvent::from_code(time, &code) {
                    Some(ev) => Entry::Lifecycle(ev),
                    None => Entry::SoftTrigger(SoftTrigger { time, code }),
                }
            } else if first.starts_with(TAG_COMMENTS) {
                Entry::Comment(join_tail(&record, 0))
            } else if rec.columns.is_empty() {
                let columns: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
                if columns.first().map(String::as_str) != Some("time") {
                    return Err(DaqError::Format {
                        line,
                        reason: "header row must start with 'time'".into(),
                    });
                }
                device_col = columns.iter().position(|c| c == "device_tag");
                rec.columns = columns.clone();
                Entry::Header(columns)
            } else if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            } else {
                let device_id = match device_col {
                    Some(c) => Some(record.get(c).unwrap_or("").trim().parse::<u16>().map_err(|_| {
                        DaqError::Format {
                            line,
                            reason: "bad device_tag".into(),
                        }
                    })?),
                    None => None,
                };
                Entry::Data(DataRow {
                    time: parse_time(record.get(0), line)?,
                    device_id,
                    fields: record.iter().map(str::to_string).collect(),
                })
            };
            rec.entries.push(entry);
        }
        Ok(rec)
    }

    pub fn has_device_column(&self) -> bool {
        self.columns.iter().any(|c| c == "device_tag")
    }

    /// Whether a data row belongs to `device_id`. Without a device column
    /// every row belongs to the (single) recorded device.
    pub fn row_matches(row: &DataRow, device_id: u16) -> bool {
        row.device_id.is_none_or(|d| d == device_id)
    }

    pub fn data_rows(&self) -> impl Iterator<Item = &DataRow> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Data(r) => Some(r),
            _ => None,
        })
    }

    /// Raw time column of one device, in file order.
    pub fn timestamps(&self, device_id: u16) -> Vec<i64> {
        self.data_rows()
            .filter(|r| Self::row_matches(r, device_id))
            .map(|r| r.time)
            .collect()
    }

    /// Lifecycle events of one device, in file order.
    pub fn lifecycle(&self, device_id: u16) -> Vec<LifecycleEvent> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                Entry::Lifecycle(ev) if ev.device_id == device_id => Some(*ev),
                _ => None,
            })
            .collect()
    }

    pub fn comments(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Comment(c) => Some(c.as_str()),
            _ => None,
        })
    }

    /// Device ids named by `# Sensor:` comment lines or by lifecycle events.
    pub fn recorded_devices(&self) -> BTreeSet<u16> {
        let from_comments = self.comments().filter_map(|c| {
            let rest = c.strip_prefix(TAG_COMMENTS)?.trim_start().strip_prefix("Sensor: id=")?;
            rest.split(',').next()?.trim().parse::<u16>().ok()
        });
        let from_events = self.entries.iter().filter_map(|e| match e {
            Entry::Lifecycle(ev) => Some(ev.device_id),
            _ => None,
        });
        from_comments.chain(from_events).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::types::LifecycleKind;

    const TEXT: &str = "\
#Recorded at Mon Jan  1 10:00:00 2024 with force_daq 0.1.0
# Sensor: id=1, name=FT1, cal-file=None
time,device_tag,Fx,Fy,Fz,trigger1
#T,1000,started:1
1000,1,0.1000,0.2000,0.3000,0.0000
1001,2,0.1000,0.2000,0.3000,0.0000
1002,1,0.1000,0.2000,0.3000,1.0000
#UDP,1001,cue, with comma
#T,1002,pause:1
#T,1003,block end
";

    #[test]
    fn classifies_rows() {
        let rec = RawRecording::from_reader(TEXT.as_bytes()).unwrap();
        assert!(rec.has_device_column());
        assert_eq!(rec.comments().count(), 2);
        assert_eq!(rec.timestamps(1), vec![1000, 1002]);
        assert_eq!(rec.timestamps(2), vec![1001]);

        let lc = rec.lifecycle(1);
        assert_eq!(lc.len(), 2);
        assert_eq!(lc[0].kind, LifecycleKind::Started);
        assert_eq!(lc[1].time, 1002);

        assert!(rec.entries.iter().any(|e| matches!(e, Entry::Remote(ev) if ev.payload == b"cue, with comma")));
        assert!(rec.entries.iter().any(|e| matches!(e, Entry::SoftTrigger(t) if t.code == "block end")));
    }

    #[test]
    fn rows_without_device_column_belong_to_any_device() {
        let text = "#c\ntime,Fx\n5,1.0\n6,1.0\n";
        let rec = RawRecording::from_reader(text.as_bytes()).unwrap();
        assert!(!rec.has_device_column());
        assert_eq!(rec.timestamps(7), vec![5, 6]);
    }

    #[test]
    fn devices_from_sensor_lines_and_events() {
        let rec = RawRecording::from_reader(TEXT.as_bytes()).unwrap();
        assert_eq!(rec.recorded_devices().into_iter().collect::<Vec<_>>(), vec![1]);

        let text = "# Sensor: id=4, name=A, cal-file=None\n# Sensor: id=9, name=B, cal-file=None\n\
                    time,Fx\n#T,10,started:5\n10,1.0\n";
        let rec = RawRecording::from_reader(text.as_bytes()).unwrap();
        assert_eq!(rec.recorded_devices().into_iter().collect::<Vec<_>>(), vec![4, 5, 9]);
    }

    #[test]
    fn bad_time_is_a_format_error() {
        let text = "time,Fx\nabc,1.0\n";
        let err = RawRecording::from_reader(text.as_bytes()).unwrap_err();
        assert!(matches!(err, DaqError::Format { line: 2, .. }));
    }
}
