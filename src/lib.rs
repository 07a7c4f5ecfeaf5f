//! # force_daq
//! Multi-sensor force/torque acquisition at ~1 kHz.
//!
//! - **acquisition:** per-sensor worker threads with chunked buffer hand-off
//! - **recording:** remote event source, start/pause/bias protocol, CSV output
//! - **reconcile:** offline rebuild of a regular time column across pauses

pub mod acquisition;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod recording;
pub mod utils;

pub use acquisition::{
    clock::Clock,
    types::{ForceChannel, ForceSample, LifecycleEvent, LifecycleKind, RecordItem, RemoteEvent, SoftTrigger},
    worker::SensorWorker,
};
pub use config::{OutputColumns, ReconcileConfig, RecorderConfig, SensorSettings};
pub use error::{DaqError, Result};
pub use reconcile::{convert::convert_path, timeline::TimestampReconciler};
pub use recording::{event_source::EventSource, recorder::DataRecorder, writer::FileOptions};
