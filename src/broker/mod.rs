// src/broker/mod.rs
//! Broker connectivity

pub mod client;

pub use client::{client_id, qos_from_u8, BrokerClient};
