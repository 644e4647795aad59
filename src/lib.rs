//! Patient-level microsimulation of diabetes complications: per-complication
//! progression, time-to-event sampling with common random numbers, and a small
//! discrete-event driver that accumulates life-years, costs and QALYs.

pub mod acute;
pub mod chronic;
pub mod complications;
pub mod config;
pub mod death;
pub mod draws;
pub mod economics;
pub mod error;
pub mod events;
pub mod factory;
pub mod params;
pub mod patient;
pub mod progression;
pub mod risk;
pub mod selector;
pub mod simulation;
pub mod stage;
pub mod time_to_event;
pub mod types;
