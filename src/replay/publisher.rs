// src/replay/publisher.rs
//! Outbound side of playback

use crate::utils::errors::Result;
use bytes::Bytes;
use std::future::Future;

/// Something frames can be published to
///
/// Implemented by [`crate::broker::BrokerClient`]; tests use in-memory
/// publishers that capture what was sent and when.
pub trait Publisher {
    fn publish(&self, topic: &str, payload: Bytes) -> impl Future<Output = Result<()>> + Send;
}

impl<P: Publisher + Sync> Publisher for &P {
    fn publish(&self, topic: &str, payload: Bytes) -> impl Future<Output = Result<()>> + Send {
        (**self).publish(topic, payload)
    }
}
