#![allow(dead_code)]

use std::time::{Duration, Instant};

use tempolink::engine::{LoopbackEngine, ManualClock};
use tempolink::{Bridge, ClockConfig, ClockEvent, Interpreter, LinkClock, Micros, TimeDomain, Value};

/// An interpreter that records every handler call.
#[derive(Default)]
pub struct Recorder {
    pub can_call_os: bool,
    pub calls: Vec<Call>,
    /// Set while a handler runs.
    pub busy: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub receiver: Value,
    pub selector: String,
    pub args: Vec<Value>,
    pub could_call_os: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            can_call_os: true,
            ..Default::default()
        }
    }
}

impl Interpreter for Recorder {
    type Error = String;

    fn can_call_os(&self) -> bool {
        self.can_call_os
    }

    fn set_can_call_os(&mut self, allowed: bool) {
        self.can_call_os = allowed;
    }

    fn call(&mut self, receiver: Value, selector: &str, args: &[Value]) -> Result<(), String> {
        assert!(!self.busy, "handler re-entered");
        self.busy = true;
        self.calls.push(Call {
            receiver,
            selector: selector.to_string(),
            args: args.to_vec(),
            could_call_os: self.can_call_os,
        });
        self.busy = false;
        Ok(())
    }
}

/// A clock on a loopback engine whose time stands still at zero.
pub fn manual_clock(tempo: f64, quantum: f64) -> (LinkClock<LoopbackEngine>, Bridge, ManualClock) {
    let time = ManualClock::new(Micros(0));
    let engine = LoopbackEngine::with_clock(tempo * 60.0, time.clone());
    let domain = TimeDomain::capture(&engine);
    let config = ClockConfig::new(Value::Float(quantum)).with_event_capacity(1024);
    let (clock, bridge) = LinkClock::new(engine, domain, &config, tempo, 0.0, 0.0).unwrap();
    (clock, bridge, time)
}

/// Poll until at least `n` events are queued.
pub fn wait_for_events(bridge: &Bridge, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while bridge.pending() < n {
        assert!(Instant::now() < deadline, "timed out waiting for {} events", n);
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Drain the queue, waiting for `n` events first.
pub fn collect_events(bridge: &mut Bridge, n: usize) -> Vec<ClockEvent> {
    wait_for_events(bridge, n);
    core::iter::from_fn(|| bridge.try_next()).collect()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-5,
        "expected {} to be within 1e-5 of {}",
        actual,
        expected
    );
}
