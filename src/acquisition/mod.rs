// Acquisition: one worker thread per force/torque sensor.
// Polls the analog source, applies the calibration transform, mirrors the
// latest forces in atomic cells and hands buffered samples to the recorder.

pub mod calibration;
pub mod clock;
pub mod handoff;
pub mod sensor;
pub mod signals;
pub mod source;
pub mod types;
pub mod worker;
