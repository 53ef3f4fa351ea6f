//! slotswap-health — the health gate for candidate environments.
//!
//! A slot is eligible for traffic once its health endpoint answers a
//! plain `GET` with a 2xx status. [`HealthProber`] polls the endpoint up
//! to `max_attempts` times, `interval` apart, and stops at the first
//! success. The verdict is made once, when the loop ends.
//!
//! ```text
//! HealthProber
//!   ├── HealthPolicy (path, max_attempts, interval, connect_timeout)
//!   └── dyn Probe
//!         └── HttpProbe → http_probe() → ProbeResult
//! ```
//!
//! The worst-case blocking time of one gate is
//! `max_attempts × (interval + connect_timeout)`.

pub mod checker;
pub mod prober;

pub use checker::{http_probe, HttpProbe, Probe, ProbeResult};
pub use prober::{HealthPolicy, HealthProber, HealthReport, HealthVerdict};
