//! types.rs
//! Items flowing from the sensor workers and the event source into the recorder.
//!
//! - `ForceSample`: one calibrated poll (immutable once built).
//! - `LifecycleEvent`: Started/Paused bracket around one continuous acquisition interval.
//! - `SoftTrigger`, `RemoteEvent`: application markers and raw remote payloads.
//! - `WorkerItem` / `RecordItem`: tagged unions matched exhaustively at the serializer.

use serde::Deserialize;

use crate::recording::remote::COMMAND_PREFIX;

/// The six force/torque channels, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum ForceChannel {
    Fx,
    Fy,
    Fz,
    Tx,
    Ty,
    Tz,
}

impl ForceChannel {
    pub const ALL: [ForceChannel; 6] = [
        ForceChannel::Fx,
        ForceChannel::Fy,
        ForceChannel::Fz,
        ForceChannel::Tx,
        ForceChannel::Ty,
        ForceChannel::Tz,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            ForceChannel::Fx => "Fx",
            ForceChannel::Fy => "Fy",
            ForceChannel::Fz => "Fz",
            ForceChannel::Tx => "Tx",
            ForceChannel::Ty => "Ty",
            ForceChannel::Tz => "Tz",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForceSample {
    /// Milliseconds on the session clock.
    pub time: i64,
    pub device_id: u16,
    /// Per-device poll counter; +1 per sample, never reset within a session.
    pub seq: u64,
    pub forces: [f32; 6],
    pub trigger: [f32; 2],
}

impl ForceSample {
    pub fn force(&self, channel: ForceChannel) -> f32 {
        self.forces[channel.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Started,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub time: i64,
    pub device_id: u16,
    pub kind: LifecycleKind,
}

impl LifecycleEvent {
    /// Code written to the `#T` row, e.g. `started:1` or `pause:1`.
    pub fn code(&self) -> String {
        match self.kind {
            LifecycleKind::Started => format!("started:{}", self.device_id),
            LifecycleKind::Paused => format!("pause:{}", self.device_id),
        }
    }

    /// Inverse of [`LifecycleEvent::code`]; `None` for ordinary soft-trigger codes.
    pub fn from_code(time: i64, code: &str) -> Option<Self> {
        let (tag, id) = code.trim().split_once(':')?;
        let kind = match tag {
            "started" => LifecycleKind::Started,
            "pause" => LifecycleKind::Paused,
            _ => return None,
        };
        let device_id = id.trim().parse().ok()?;
        Some(Self { time, device_id, kind })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftTrigger {
    pub time: i64,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    pub time: i64,
    pub payload: Vec<u8>,
}

impl RemoteEvent {
    pub fn is_remote_control_command(&self) -> bool {
        self.payload.starts_with(COMMAND_PREFIX)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// What a sensor worker buffers and hands off.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerItem {
    Sample(ForceSample),
    Lifecycle(LifecycleEvent),
}

/// Everything the recorder can serialize.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordItem {
    Sample(ForceSample),
    Lifecycle(LifecycleEvent),
    SoftTrigger(SoftTrigger),
    Remote(RemoteEvent),
}

impl From<WorkerItem> for RecordItem {
    fn from(item: WorkerItem) -> Self {
        match item {
            WorkerItem::Sample(s) => RecordItem::Sample(s),
            WorkerItem::Lifecycle(e) => RecordItem::Lifecycle(e),
        }
    }
}
