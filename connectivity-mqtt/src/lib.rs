// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! MQTT 3.1.1 transport primitives for the connectivity runtime: a supervised connection
//! (connect/reconnect loop), an incoming-publish dispatcher, MQTT topic name/filter grammar
//! and matching, and the reconnect policy that governs the connection's own network-level
//! reconnection. This is independent of `connectivity-core`'s publisher, which recreates its
//! own publish handles on its own backoff schedule (spec §4.7).

pub use crate::connection_settings::{
    MqttConnectionSettings, MqttConnectionSettingsBuilder, MqttConnectionSettingsBuilderError,
};

mod connection_settings;
pub mod control_packet;
pub mod error;
pub mod interface;
pub mod session;
pub mod topic;

mod rumqttc_adapter;
pub use rumqttc_adapter::{new_client, ClientAlias, EventLoopAlias};

#[macro_use]
extern crate derive_builder;
