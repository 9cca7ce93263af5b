#![forbid(unsafe_code)]

pub mod alert;
pub mod cli;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod shopify;
pub mod task;
