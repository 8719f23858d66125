//! Workspace-level specs.
//!
//! Each module drives the public surface end to end the way an
//! embedding application would: a supervisor over the in-process
//! backend, scripted fetchers standing in for upstream providers, and
//! a fake clock driving every window, backoff, and cooldown. Tokio
//! time is started paused so the loops run on auto-advanced timers.

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/admission.rs"]
mod admission;
#[path = "specs/breaker.rs"]
mod breaker;
#[path = "specs/freshness.rs"]
mod freshness;
#[path = "specs/lifecycle.rs"]
mod lifecycle;
