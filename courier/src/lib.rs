//! Configuration and scenarios for running a courier dispatcher

pub mod controller;
pub mod demo;
pub mod send;

pub use controller::Courier;
