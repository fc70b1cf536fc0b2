pub mod adaptive_stops;
pub mod errors;
pub mod funding;
pub mod high_vol;
pub mod indicators;
pub mod market;
pub mod observation;
pub mod ports;
pub mod position;
pub mod repositories;
pub mod review;
pub mod signals;
