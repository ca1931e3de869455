//! A clock following a simulated session peer
//!
//! Run with: cargo run --example loopback_session

use std::convert::Infallible;
use std::thread::sleep;
use std::time::Duration;

use tempolink::engine::{LoopbackEngine, SessionState};
use tempolink::{ClockConfig, ClockHandle, HostLock, Interpreter, TimeDomain, Value};

/// Prints every handler call instead of running it.
struct Printer {
    can_call_os: bool,
}

impl Interpreter for Printer {
    type Error = Infallible;

    fn can_call_os(&self) -> bool {
        self.can_call_os
    }

    fn set_can_call_os(&mut self, allowed: bool) {
        self.can_call_os = allowed;
    }

    fn call(&mut self, receiver: Value, selector: &str, args: &[Value]) -> Result<(), Infallible> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        println!("{}.{}({})", receiver, selector, args.join(", "));
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let engine = LoopbackEngine::new(120.0);
    let mut peer = engine.peer();
    let domain = TimeDomain::capture(&engine);
    let config = ClockConfig::new(Value::Float(4.0)).with_latency(0.05);

    let host = HostLock::new(Printer { can_call_os: true });
    let (handle, mut bridge) =
        ClockHandle::start(engine, domain, &config, Value::Float(2.0), Value::Int(0), Value::Int(0))?;

    // another peer shows up, starts the transport and speeds things up
    peer.join();
    peer.commit(|s| s.set_is_playing(true, peer.now()));

    for step in 0..8 {
        sleep(Duration::from_millis(250));
        if step == 3 {
            peer.commit(|s| s.set_tempo(150.0, peer.now()));
        }
        if step == 5 {
            handle.set_tempo_at_beat(Value::Float(1.5), Value::Int(16))?;
        }

        let delivered = bridge.pump(&host).unwrap_or_else(|never| match never {});
        let secs = (step + 1) as f64 * 0.25;
        println!(
            "t={:.2}s beat={:.3} tempo={:.3} peers={} ({} events)",
            secs,
            handle.secs_to_beats(Value::Float(secs))?,
            handle.tempo()?,
            handle.num_peers()?,
            delivered,
        );
    }

    peer.leave();
    Ok(())
}
