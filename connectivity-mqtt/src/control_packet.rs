// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT 3.1.1 control packet types used at the transport boundary.
//!
//! These are a small, protocol-version-neutral vocabulary rather than direct
//! aliases of the underlying client library's types, so the adapter module
//! is the only place that needs to know about `rumqttc`'s shapes.

use bytes::Bytes;

/// Quality of Service level for a publish or subscription, per MQTT 3.1.1 §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce,
    /// At least once delivery.
    AtLeastOnce,
    /// Exactly once delivery.
    ExactlyOnce,
}

impl QoS {
    /// The numeric QoS value as it appears on the wire.
    #[must_use]
    pub fn value(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    /// Parse a wire-level QoS value, if in range.
    #[must_use]
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// An inbound publish, as delivered to the dispatcher and consumer workers.
#[derive(Debug, Clone)]
pub struct Publish {
    /// The topic name the message was published to.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Quality of service the message was delivered at.
    pub qos: QoS,
    /// Whether this is a retained message.
    pub retain: bool,
    /// Packet identifier, present for QoS 1/2 publishes.
    pub pkid: u16,
    /// True if this publish has already been delivered before (broker-side redelivery).
    pub dup: bool,
}

impl From<rumqttc::Publish> for Publish {
    fn from(p: rumqttc::Publish) -> Self {
        Self {
            topic: p.topic,
            payload: p.payload,
            qos: p.qos.into(),
            retain: p.retain,
            pkid: p.pkid,
            dup: p.dup,
        }
    }
}
