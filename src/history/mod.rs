//! Bounded-memory rolling statistics
//!
//! [`RollingWindow`] is a fixed-capacity overwrite-oldest sample buffer;
//! [`Historian`] gates pushes into one by a wall-clock interval and fires a
//! callback on every accepted sample. Neither synchronizes internally: each
//! instance is owned by exactly one exchange task (see the router).

pub mod historian;
pub mod window;

pub use historian::Historian;
pub use window::RollingWindow;
