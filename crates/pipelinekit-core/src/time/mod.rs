//! Time abstraction: an injectable clock so retry, timeout and circuit
//! breaker logic can be driven deterministically in tests.
//!
//! # Why
//! Every component that waits on real time (backoff, deadlines, breaker
//! cool-down windows) depends on this module instead of calling
//! `Instant::now()` / `thread::sleep` directly, so a test can swap in
//! [`MockClock`] and advance time explicitly rather than racing the wall
//! clock.
//!
//! # What
//! - [`clock::Clock`]: the `now`/`sleep` primitives every timed component
//!   is generic (or dyn-dispatched) over.
//! - [`clock::SystemClock`]: thread-sleep based production implementation,
//!   chosen so the crate never has to pull in a specific async runtime
//!   just to get a timer.
//! - [`clock::MockClock`]: virtual clock with manual `advance`, used by the
//!   resilience middleware tests (see `SPEC_FULL.md` §8.4 S3, S6).

pub mod clock;

pub use clock::{Clock, MockClock, Sleep, SystemClock};
