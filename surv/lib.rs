#![deny(dead_code)]
#![deny(unused_imports)]

pub mod artifact;
pub mod assemble;
pub mod data;
pub mod driver;
pub mod error;
pub mod hmc;
pub mod intervals;
pub mod model;
pub mod outcome;
pub mod panel;
pub mod regions;
