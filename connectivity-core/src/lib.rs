// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Protocol-agnostic connectivity runtime: the placeholder and enforcement engine, payload and
//! header mapping, the message mapping processor, protocol-agnostic validators, the consumer and
//! publisher workers, and the per-connection client state machine. Protocol-specific transports
//! (AMQP 0.9.1/1.0, Kafka, HTTP push, MQTT) plug in via the traits this crate exposes.

pub mod consumer;
pub mod enforcement;
pub mod error;
pub mod header_mapping;
pub mod mapping;
pub mod model;
pub mod placeholder;
pub mod processor;
pub mod publisher;
pub mod state_machine;
pub mod validators;
