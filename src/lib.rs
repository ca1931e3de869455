//! Tempolink - a tempo clock kept in lock-step with a shared tempo session
//!
//! Design principles:
//! - Local elapsed seconds map to shared-session time through an explicit
//!   [`TimeDomain`], never a global
//! - Session changes are captured, proposed and committed as owned
//!   [`Transaction`](session::Transaction) values
//! - Tempo changes are anchored at a concrete beat or time
//! - Engine callbacks never call into the host; they queue [`ClockEvent`]s on
//!   a lock-free ring buffer that the host thread drains under its own lock
//!
//! # Example
//!
//! ```
//! use tempolink::engine::LoopbackEngine;
//! use tempolink::{ClockConfig, LinkClock, TempoClock, TimeDomain, Value};
//!
//! let engine = LoopbackEngine::new(120.0);
//! let domain = TimeDomain::capture(&engine);
//! let config = ClockConfig::new(Value::Float(4.0));
//!
//! let (clock, _bridge) = LinkClock::new(engine, domain, &config, 2.0, 0.0, 0.0).unwrap();
//! assert!((clock.secs_to_beats(1.0) - 2.0).abs() < 1e-5);
//! ```

pub mod engine;
pub mod session;
pub mod time;

mod bridge;
mod clock;
mod config;
mod error;
mod host;
mod link_clock;

pub use bridge::{Bridge, ClockEvent};
pub use clock::{FreeClock, Tempo, TempoClock, TempoState};
pub use config::{ClockConfig, HandlerNames, DEFAULT_EVENT_CAPACITY};
pub use error::{ClockError, ClockResult};
pub use host::{ClockHandle, HostLock, Interpreter, Value};
pub use link_clock::{ClockId, LinkClock};
pub use time::{Micros, TimeDomain};
