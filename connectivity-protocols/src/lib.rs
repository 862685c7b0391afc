// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Thin per-protocol adapters over mature client libraries, implementing
//! [`connectivity_core::publisher::HandleFactory`]/[`connectivity_core::publisher::PublishHandle`]
//! and driving [`connectivity_core::consumer`]'s `ConsumerEvent` stream. Each module wraps exactly
//! one client crate and reimplements no wire protocol of its own (spec §1 Non-goals).

pub mod amqp091;
pub mod amqp10;
pub mod http_push;
pub mod kafka;
pub mod mqtt;
