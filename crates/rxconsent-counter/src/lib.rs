//! rxconsent counter: the session controller a pharmacy counter client
//! drives to obtain consent, wait for it, and read the patient's latest
//! prescription.

pub mod controller;
pub mod gateway;
pub mod session;

pub use controller::{CounterConfig, CounterController};
pub use gateway::ConsentGateway;
pub use session::{CounterSnapshot, CounterStatus, Notice};
