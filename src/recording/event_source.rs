//! event_source.rs
//! EventSource: one thread polling the remote event channel.
//! - every received payload is timestamped and queued for the recorder
//! - outbound payloads are taken from a channel and forwarded to the peer
//! - connection changes are reported edge-triggered (`connection_changed()`)
//! - non-command payloads raise every attached worker's trigger flag

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{Receiver, Sender, unbounded};
use crossbeam_queue::SegQueue;
use log::{error, info};

use crate::acquisition::{
    clock::{Clock, sleeper},
    signals::{EventFlag, WorkerSignals},
    types::RemoteEvent,
};
use crate::error::Result;
use crate::recording::{remote::COMMAND_PREFIX, udp::EventChannel};
use crate::utils::polling_profile::PollingTimeProfile;

/// Sleep between polls while no peer is connected.
const DISCONNECTED_BACKOFF: Duration = Duration::from_millis(5);
/// Sleep between empty polls while connected.
const CONNECTED_BACKOFF: Duration = Duration::from_micros(200);

#[derive(Debug, Default)]
struct SourceState {
    quit_request: EventFlag,
    connected: AtomicBool,
    connection_changed: AtomicBool,
}

pub struct EventSource {
    received: Arc<SegQueue<RemoteEvent>>,
    outbox: Sender<Vec<u8>>,
    state: Arc<SourceState>,
    handle: Option<JoinHandle<()>>,
}

impl EventSource {
    /// Starts the polling thread. `triggers` are the flag sets of the workers
    /// whose next sample is marked when data (not a command) arrives.
    pub fn spawn(channel: Box<dyn EventChannel>, clock: Clock, triggers: Vec<Arc<WorkerSignals>>) -> Result<Self> {
        let received = Arc::new(SegQueue::new());
        let (outbox, outbound) = unbounded();
        let state = Arc::new(SourceState::default());

        let event_loop = EventLoop {
            channel,
            clock,
            triggers,
            received: received.clone(),
            outbound,
            state: state.clone(),
        };
        let handle = thread::Builder::new()
            .name("event-source".into())
            .spawn(move || event_loop.run())?;

        Ok(Self {
            received,
            outbox,
            state,
            handle: Some(handle),
        })
    }

    /// Queues a payload for the peer; dropped if no peer is connected at send time.
    pub fn send(&self, payload: impl Into<Vec<u8>>) {
        let _ = self.outbox.send(payload.into());
    }

    /// All events received since the last call, in arrival order.
    pub fn drain(&self) -> Vec<RemoteEvent> {
        let mut events = Vec::with_capacity(self.received.len());
        while let Some(ev) = self.received.pop() {
            events.push(ev);
        }
        events
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// `Some(connected)` once per change of the connection state.
    pub fn connection_changed(&self) -> Option<bool> {
        if self.state.connection_changed.swap(false, Ordering::AcqRel) {
            Some(self.is_connected())
        } else {
            None
        }
    }

    /// Stops the thread; safe to call repeatedly.
    pub fn quit(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.state.quit_request.set();
        if handle.join().is_err() {
            error!("[EventSource] thread panicked");
        }
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.quit();
    }
}

struct EventLoop {
    channel: Box<dyn EventChannel>,
    clock: Clock,
    triggers: Vec<Arc<WorkerSignals>>,
    received: Arc<SegQueue<RemoteEvent>>,
    outbound: Receiver<Vec<u8>>,
    state: Arc<SourceState>,
}

impl EventLoop {
    fn run(mut self) {
        info!("[EventSource] started");
        let mut profile = PollingTimeProfile::default();
        let sleeper = sleeper();
        let mut failures = 0u64;

        while !self.state.quit_request.is_set() {
            let got_data = match self.channel.poll() {
                Ok(Some(payload)) => {
                    let time = self.clock.time();
                    profile.update(time);
                    if !payload.starts_with(COMMAND_PREFIX) {
                        for t in &self.triggers {
                            t.trigger.set();
                        }
                    }
                    self.received.push(RemoteEvent { time, payload });
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    failures += 1;
                    if failures == 1 || failures % 1000 == 0 {
                        error!("[EventSource] poll failed ({} times): {}", failures, e);
                    }
                    false
                }
            };

            while let Ok(out) = self.outbound.try_recv() {
                self.channel.send(&out);
            }

            let connected = self.channel.is_connected();
            if connected != self.state.connected.load(Ordering::Acquire) {
                self.state.connected.store(connected, Ordering::Release);
                self.state.connection_changed.store(true, Ordering::Release);
            }

            if !got_data {
                sleeper.sleep(if connected { CONNECTED_BACKOFF } else { DISCONNECTED_BACKOFF });
            }
        }

        self.channel.close();
        info!("[EventSource] quit, profile {}", profile.summary());
    }
}

/// In-process event channel: the application side injects payloads and reads
/// what the source sent. Stands in for UDP in simulations and tests.
pub struct LoopbackChannel {
    incoming: Receiver<Vec<u8>>,
    sent: Sender<Vec<u8>>,
    connected: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct LoopbackPeer {
    inject: Sender<Vec<u8>>,
    sent: Receiver<Vec<u8>>,
    connected: Arc<AtomicBool>,
}

impl LoopbackChannel {
    pub fn pair() -> (LoopbackChannel, LoopbackPeer) {
        let (inject, incoming) = unbounded();
        let (sent_tx, sent_rx) = unbounded();
        let connected = Arc::new(AtomicBool::new(true));
        (
            LoopbackChannel {
                incoming,
                sent: sent_tx,
                connected: connected.clone(),
            },
            LoopbackPeer {
                inject,
                sent: sent_rx,
                connected,
            },
        )
    }
}

impl EventChannel for LoopbackChannel {
    fn poll(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.incoming.try_recv().ok())
    }

    fn send(&mut self, payload: &[u8]) -> bool {
        self.is_connected() && self.sent.send(payload.to_vec()).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl LoopbackPeer {
    pub fn inject(&self, payload: &[u8]) {
        let _ = self.inject.send(payload.to_vec());
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        self.sent.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let t0 = Instant::now();
        while t0.elapsed() < Duration::from_secs(2) {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn payloads_are_timestamped_in_order() {
        let (channel, peer) = LoopbackChannel::pair();
        let mut src = EventSource::spawn(Box::new(channel), Clock::new(), Vec::new()).unwrap();
        for p in [&b"a"[..], b"$PSE", b"b"] {
            peer.inject(p);
        }

        let mut got = Vec::new();
        assert!(wait_for(|| {
            got.extend(src.drain());
            got.len() == 3
        }));
        let payloads: Vec<&[u8]> = got.iter().map(|e| e.payload.as_slice()).collect();
        assert_eq!(payloads, vec![&b"a"[..], b"$PSE", b"b"]);
        assert!(got.windows(2).all(|w| w[0].time <= w[1].time));
        src.quit();
        src.quit();
    }

    #[test]
    fn data_raises_worker_triggers_commands_do_not() {
        let (channel, peer) = LoopbackChannel::pair();
        let signals = Arc::new(WorkerSignals::new());
        let mut src = EventSource::spawn(Box::new(channel), Clock::new(), vec![signals.clone()]).unwrap();

        peer.inject(b"$PNG");
        assert!(wait_for(|| !src.received.is_empty()));
        assert!(!signals.trigger.is_set());

        peer.inject(b"stimulus");
        assert!(wait_for(|| signals.trigger.is_set()));
        src.quit();
    }

    #[test]
    fn connection_change_is_edge_triggered() {
        let (channel, peer) = LoopbackChannel::pair();
        let mut src = EventSource::spawn(Box::new(channel), Clock::new(), Vec::new()).unwrap();
        let mut change = None;

        assert!(wait_for(|| {
            change = src.connection_changed();
            change.is_some()
        }));
        assert_eq!(change, Some(true));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(src.connection_changed(), None);

        peer.set_connected(false);
        assert!(wait_for(|| {
            change = src.connection_changed();
            change.is_some()
        }));
        assert_eq!(change, Some(false));
        assert!(!src.is_connected());
        src.quit();
    }

    #[test]
    fn outbound_payloads_reach_the_peer() {
        let (channel, peer) = LoopbackChannel::pair();
        let mut src = EventSource::spawn(Box::new(channel), Clock::new(), Vec::new()).unwrap();
        src.send(&b"$xFBstarted"[..]);
        let mut sent = Vec::new();
        assert!(wait_for(|| {
            sent.extend(peer.take_sent());
            !sent.is_empty()
        }));
        assert_eq!(sent[0], b"$xFBstarted".to_vec());
        src.quit();
    }
}
