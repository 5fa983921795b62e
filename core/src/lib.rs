#![deny(clippy::all, clippy::pedantic, clippy::nursery, warnings)]
#![allow(clippy::missing_errors_doc)]
// TODO clean up panics and then enable and document them
#![allow(clippy::missing_panics_doc)]

pub mod action;
pub mod bpor;
pub mod debug;
pub mod dependency;
pub mod driver;
pub mod error;
pub mod ids;
pub mod memory;
pub mod scheduler;
pub mod stepper;
pub mod stm;
pub mod svar;
pub mod thread;
pub mod trace;
pub mod value;
pub mod world;
