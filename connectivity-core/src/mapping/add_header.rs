// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The add-header mapper (spec §4.2): passes the twin envelope through unchanged, adding a
//! configured set of fixed inbound/outbound header pairs.

use std::collections::HashMap;

use crate::error::ConnectivityError;
use crate::mapping::twin_protocol::TwinProtocolMapper;
use crate::mapping::Mapper;
use crate::model::{ExternalMessage, Signal};

/// Passthrough mapper that injects fixed headers on top of the default twin-envelope mapping.
#[derive(Debug, Default, Clone)]
pub struct AddHeaderMapper {
    inbound_headers: HashMap<String, String>,
    outbound_headers: HashMap<String, String>,
    inner: TwinProtocolMapper,
}

impl Mapper for AddHeaderMapper {
    fn configure(&mut self, options: &HashMap<String, String>) {
        for (key, value) in options {
            if let Some(name) = key.strip_prefix("inbound.") {
                self.inbound_headers.insert(name.to_string(), value.clone());
            } else if let Some(name) = key.strip_prefix("outbound.") {
                self.outbound_headers
                    .insert(name.to_string(), value.clone());
            }
        }
    }

    fn map_inbound(&self, message: &ExternalMessage) -> Result<Vec<Signal>, ConnectivityError> {
        let mut signals = self.inner.map_inbound(message)?;
        for signal in &mut signals {
            for (name, value) in &self.inbound_headers {
                signal.headers.insert(name.clone(), value.clone());
            }
        }
        Ok(signals)
    }

    fn map_outbound(&self, signal: &Signal) -> Result<Vec<ExternalMessage>, ConnectivityError> {
        let mut messages = self.inner.map_outbound(signal)?;
        for message in &mut messages {
            for (name, value) in &self.outbound_headers {
                message.headers.insert(name.clone(), value.clone());
            }
        }
        Ok(messages)
    }
}
