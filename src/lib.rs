pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod ratelimit;
pub mod rest;

pub use client::{Client, ClientBuilder, StopHandle};
pub use config::Config;
