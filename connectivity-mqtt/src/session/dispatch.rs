// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Routes incoming publishes from the single event loop to the consumer workers subscribed
//! to matching topic filters.

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::control_packet::Publish;
use crate::topic::{TopicFilter, TopicName};

/// Bounded channel capacity for a single registered receiver.
/// Overflow drops the oldest buffered publish (spec §5: "overflow policy: drop-head").
const RECEIVER_BUFFER_SIZE: usize = 256;

struct Registration {
    filter: TopicFilter,
    sender: mpsc::Sender<Publish>,
}

/// Fans a connection's incoming publishes out to every consumer registered against a matching
/// topic filter. One [`IncomingPublishDispatcher`] exists per MQTT connection generation.
#[derive(Default)]
pub struct IncomingPublishDispatcher {
    registrations: Mutex<Vec<Registration>>,
}

impl IncomingPublishDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new receiver for publishes matching `filter`. Multiple receivers may be
    /// registered against overlapping filters; a publish matching more than one is delivered
    /// to all of them (ordering across receivers is unspecified, per spec §5).
    pub fn register(&self, filter: TopicFilter) -> mpsc::Receiver<Publish> {
        let (tx, rx) = mpsc::channel(RECEIVER_BUFFER_SIZE);
        self.registrations
            .lock()
            .unwrap()
            .push(Registration { filter, sender: tx });
        rx
    }

    /// Deliver an incoming publish to every receiver whose filter matches its topic. Returns
    /// the number of receivers the publish was (attempted to be) delivered to.
    pub fn dispatch(&self, publish: &Publish) -> usize {
        let Ok(topic_name) = TopicName::from_string(publish.topic.clone()) else {
            log::warn!("dropping inbound publish with malformed topic: {}", publish.topic);
            return 0;
        };
        let mut delivered = 0;
        let mut stale = Vec::new();
        let registrations = self.registrations.lock().unwrap();
        for (idx, reg) in registrations.iter().enumerate() {
            if !topic_name.matches_topic_filter(&reg.filter) {
                continue;
            }
            match reg.sender.try_send(publish.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!(
                        "receiver for filter {} is at capacity; dropping oldest publish",
                        reg.filter
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => stale.push(idx),
            }
        }
        drop(registrations);
        if !stale.is_empty() {
            let mut registrations = self.registrations.lock().unwrap();
            for idx in stale.into_iter().rev() {
                registrations.remove(idx);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_to_matching_filter_only() {
        let dispatcher = IncomingPublishDispatcher::new();
        let mut matching = dispatcher.register(TopicFilter::from_string("a/+".to_string()).unwrap());
        let mut non_matching = dispatcher.register(TopicFilter::from_string("b/#".to_string()).unwrap());

        let publish = Publish {
            topic: "a/b".to_string(),
            payload: bytes::Bytes::from_static(b"hi"),
            qos: crate::control_packet::QoS::AtMostOnce,
            retain: false,
            pkid: 0,
            dup: false,
        };
        assert_eq!(dispatcher.dispatch(&publish), 1);
        assert!(matching.try_recv().is_ok());
        assert!(non_matching.try_recv().is_err());
    }

    #[test]
    fn fans_out_to_overlapping_filters() {
        let dispatcher = IncomingPublishDispatcher::new();
        let mut first = dispatcher.register(TopicFilter::from_string("a/#".to_string()).unwrap());
        let mut second = dispatcher.register(TopicFilter::from_string("a/b".to_string()).unwrap());

        let publish = Publish {
            topic: "a/b".to_string(),
            payload: bytes::Bytes::new(),
            qos: crate::control_packet::QoS::AtMostOnce,
            retain: false,
            pkid: 0,
            dup: false,
        };
        assert_eq!(dispatcher.dispatch(&publish), 2);
        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());
    }
}
