// Recording: the remote event source, the output file and the recorder that
// coordinates them with the sensor workers.

pub mod event_source;
pub mod recorder;
pub mod remote;
pub mod udp;
pub mod writer;
