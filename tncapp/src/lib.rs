#![doc = include_str!("../README.md")]

pub mod bridge;
pub mod cc1101;
pub mod config;
pub mod error;
pub mod radio;
pub mod serial;
