#![deny(dead_code)]
#![deny(unused_imports)]

pub mod combine;
pub mod config;
pub mod copula;
pub mod distributions;
pub mod error;
pub mod evaluate;
pub mod progress;
pub mod regression;
pub mod selection;
pub mod simulation;
pub mod types;
