mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{collect_events, manual_clock, Recorder};
use parking_lot::Mutex;
use tempolink::engine::{
    LoopbackEngine, LoopbackSession, ManualClock, NumPeersCallback, SessionState,
    StartStopCallback, SyncEngine, TempoCallback,
};
use tempolink::{
    ClockConfig, ClockEvent, ClockHandle, HostLock, Micros, TempoClock, TimeDomain, Value,
};

/// Wraps a loopback engine and stalls captures once armed, so a callback
/// can be caught halfway through.
struct StallingEngine {
    inner: LoopbackEngine,
    armed: AtomicBool,
    entered: Mutex<Option<mpsc::Sender<()>>>,
}

impl SyncEngine for StallingEngine {
    type Session = LoopbackSession;

    fn enable(&self, enabled: bool) {
        self.inner.enable(enabled)
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    fn enable_start_stop_sync(&self, enabled: bool) {
        self.inner.enable_start_stop_sync(enabled)
    }

    fn set_tempo_callback(&self, callback: TempoCallback) {
        self.inner.set_tempo_callback(callback)
    }

    fn set_start_stop_callback(&self, callback: StartStopCallback) {
        self.inner.set_start_stop_callback(callback)
    }

    fn set_num_peers_callback(&self, callback: NumPeersCallback) {
        self.inner.set_num_peers_callback(callback)
    }

    fn clock_micros(&self) -> Micros {
        self.inner.clock_micros()
    }

    fn capture_session_state(&self) -> LoopbackSession {
        if self.armed.load(Ordering::SeqCst) {
            if let Some(entered) = self.entered.lock().take() {
                entered.send(()).unwrap();
            }
            thread::sleep(Duration::from_millis(200));
        }
        self.inner.capture_session_state()
    }

    fn commit_session_state(&self, state: LoopbackSession) {
        self.inner.commit_session_state(state)
    }

    fn num_peers(&self) -> usize {
        self.inner.num_peers()
    }
}

#[test]
fn stopping_waits_for_a_running_callback() {
    let inner = LoopbackEngine::with_clock(120.0, ManualClock::default());
    let peer = inner.peer();
    let (entered_tx, entered_rx) = mpsc::channel();
    let engine = StallingEngine {
        inner,
        armed: AtomicBool::new(false),
        entered: Mutex::new(Some(entered_tx)),
    };
    let domain = TimeDomain::capture(&engine);
    let config = ClockConfig::new(Value::Float(4.0));
    let (mut handle, mut bridge) =
        ClockHandle::start(engine, domain, &config, Value::Float(2.0), Value::Int(0), Value::Int(0))
            .unwrap();

    handle.clock().unwrap().engine().armed.store(true, Ordering::SeqCst);
    assert!(peer.commit(|s| s.set_tempo(90.0, peer.now())));
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let start = Instant::now();
    handle.stop().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));

    // the interrupted callback finished before stop returned
    assert_eq!(bridge.pending(), 1);
    assert!(matches!(bridge.try_next(), Some(ClockEvent::TempoChanged { tempo, .. }) if tempo == 1.5));

    // nothing fires after teardown
    assert!(!peer.commit(|s| s.set_tempo(100.0, peer.now())));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(bridge.pending(), 0);
}

#[test]
fn tempo_and_beat_duration_are_never_torn() {
    let (clock, mut bridge, _time) = manual_clock(2.0, 4.0);
    let clock = Arc::new(clock);
    let done = Arc::new(AtomicBool::new(false));

    let remotes: Vec<_> = (0..2)
        .map(|n| {
            let peer = clock.engine().peer();
            thread::spawn(move || {
                for i in 0..200 {
                    let bpm = 60.0 + (n * 200 + i) as f64;
                    peer.commit(|s| {
                        s.set_tempo(bpm, peer.now());
                        s.set_is_playing(i % 2 == 0, peer.now());
                    });
                }
            })
        })
        .collect();

    let reader = {
        let clock = clock.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let tempo = clock.tempo_state().get();
                assert_eq!(tempo.beat_dur, 1.0 / tempo.tempo);
            }
        })
    };

    for i in 0..200 {
        clock.set_tempo_at_beat(1.0 + (i % 7) as f64 * 0.25, i as f64);
        let tempo = clock.tempo_state().get();
        assert_eq!(tempo.beat_dur, 1.0 / tempo.tempo);
    }

    for remote in remotes {
        remote.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    reader.join().unwrap();

    // let the dispatch thread catch up, then check what reached the host
    thread::sleep(Duration::from_millis(100));
    let events = collect_events(&mut bridge, 1);
    for event in events {
        if let ClockEvent::TempoChanged { tempo, .. } = event {
            assert!((20.0 / 60.0..=999.0 / 60.0).contains(&tempo), "tempo {}", tempo);
        }
    }
}

#[test]
fn delivery_never_overlaps_host_code() {
    let (clock, bridge, _time) = manual_clock(2.0, 4.0);
    let host = Arc::new(HostLock::new(Recorder::new()));
    let done = Arc::new(AtomicBool::new(false));

    let pump = {
        let host = host.clone();
        let done = done.clone();
        let mut bridge = bridge;
        thread::spawn(move || {
            let mut delivered = 0;
            while !done.load(Ordering::SeqCst) {
                delivered += bridge.pump(&*host).unwrap();
                thread::yield_now();
            }
            delivered + bridge.pump(&*host).unwrap()
        })
    };

    let peer = clock.engine().peer();
    for i in 0..100 {
        peer.commit(|s| s.set_tempo(100.0 + i as f64, peer.now()));
        host.with(|interp| {
            // host code runs under the same lock as delivery
            assert!(!interp.busy);
            assert!(interp.can_call_os);
        });
    }

    thread::sleep(Duration::from_millis(100));
    done.store(true, Ordering::SeqCst);
    let delivered = pump.join().unwrap();

    let interp = host.lock();
    assert_eq!(delivered, interp.calls.len());
    assert!(interp.calls.iter().all(|call| !call.could_call_os));
    assert!(interp.can_call_os);
}

#[test]
fn full_queue_drops_and_counts() {
    let time = ManualClock::new(Micros(0));
    let engine = LoopbackEngine::with_clock(120.0, time);
    let peer = engine.peer();
    let domain = TimeDomain::capture(&engine);
    let config = ClockConfig::new(Value::Float(4.0)).with_event_capacity(2);
    let (clock, mut bridge) =
        tempolink::LinkClock::new(engine, domain, &config, 2.0, 0.0, 0.0).unwrap();

    for bpm in [100.0, 110.0, 120.0, 130.0] {
        peer.commit(|s| s.set_tempo(bpm, peer.now()));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while bridge.dropped() < 2 {
        assert!(Instant::now() < deadline, "events were not dropped");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(bridge.pending(), 2);

    // the oldest events survive, the cache follows the latest
    let tempos: Vec<f64> = core::iter::from_fn(|| bridge.try_next())
        .map(|event| match event {
            ClockEvent::TempoChanged { tempo, .. } => tempo,
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(tempos, vec![100.0 / 60.0, 110.0 / 60.0]);
    assert_eq!(clock.tempo(), 130.0 / 60.0);
}
