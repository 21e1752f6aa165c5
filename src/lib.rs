pub mod calibration;
pub mod capture;
pub mod config;
pub mod pose;
pub mod sink;
pub mod tracker;
pub mod vmt;
