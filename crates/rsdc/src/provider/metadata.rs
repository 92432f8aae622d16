// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DPWS device metadata answered over WS-Transfer Get.
//!
//! After resolve, a consumer fetches `ThisModel`/`ThisDevice`/`Relationship`
//! from an XAddr to learn the hosted-service endpoints. The metadata version
//! mirrors the discovery `MetadataVersion`.

use std::sync::Arc;

use roxmltree::Node;

use crate::biceps::actions;
use crate::biceps::qname::{ns, QName};
use crate::soap::{RequestContext, SoapDispatcher, SoapResponse};
use crate::xml::{reader, XmlWriter};
use crate::Result;

/// One hosted service advertised in the relationship section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedService {
    pub service_id: String,
    pub address: String,
    /// Port types, as prefixed lexical names resolvable against the
    /// canonical prefix table (`mdpws:GetService`).
    pub types: Vec<String>,
}

/// `ThisDevice`/`ThisModel` metadata plus the hosted-service map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceMetadata {
    pub friendly_name: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub manufacturer: String,
    pub model_name: String,
    pub model_number: String,
    pub hosted: Vec<HostedService>,
}

const MEX_DIALECT_MODEL: &str = "http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01/ThisModel";
const MEX_DIALECT_DEVICE: &str = "http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01/ThisDevice";
const MEX_DIALECT_RELATIONSHIP: &str =
    "http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01/Relationship";
const RELATIONSHIP_TYPE_HOST: &str = "http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01/host";

impl DeviceMetadata {
    /// Encode the `wsx:Metadata` body of a WS-Transfer GetResponse.
    pub fn encode(&self, host_endpoint: &str) -> String {
        let mut w = XmlWriter::new();
        w.open(QName::new(ns::WSX, "Metadata"));

        w.open(QName::new(ns::WSX, "MetadataSection"));
        w.attr("Dialect", MEX_DIALECT_MODEL);
        w.open(QName::new(ns::DPWS, "ThisModel"));
        w.leaf(QName::new(ns::DPWS, "Manufacturer"), &self.manufacturer);
        w.leaf(QName::new(ns::DPWS, "ModelName"), &self.model_name);
        w.leaf(QName::new(ns::DPWS, "ModelNumber"), &self.model_number);
        w.close();
        w.close();

        w.open(QName::new(ns::WSX, "MetadataSection"));
        w.attr("Dialect", MEX_DIALECT_DEVICE);
        w.open(QName::new(ns::DPWS, "ThisDevice"));
        w.leaf(QName::new(ns::DPWS, "FriendlyName"), &self.friendly_name);
        w.leaf(QName::new(ns::DPWS, "FirmwareVersion"), &self.firmware_version);
        w.leaf(QName::new(ns::DPWS, "SerialNumber"), &self.serial_number);
        w.close();
        w.close();

        w.open(QName::new(ns::WSX, "MetadataSection"));
        w.attr("Dialect", MEX_DIALECT_RELATIONSHIP);
        w.open(QName::new(ns::DPWS, "Relationship"));
        w.attr("Type", RELATIONSHIP_TYPE_HOST);
        w.open(QName::new(ns::DPWS, "Host"));
        w.open(QName::new(ns::WSA, "EndpointReference"));
        w.leaf(QName::new(ns::WSA, "Address"), host_endpoint);
        w.close();
        w.close();
        for hosted in &self.hosted {
            w.open(QName::new(ns::DPWS, "Hosted"));
            w.open(QName::new(ns::WSA, "EndpointReference"));
            w.leaf(QName::new(ns::WSA, "Address"), &hosted.address);
            w.close();
            w.leaf(QName::new(ns::DPWS, "Types"), &hosted.types.join(" "));
            w.leaf(QName::new(ns::DPWS, "ServiceId"), &hosted.service_id);
            w.close();
        }
        w.close();
        w.close();

        w.close();
        w.finish()
    }

    /// Decode a `wsx:Metadata` body (consumer side).
    pub fn decode(body: Node<'_, '_>) -> Result<Self> {
        let mut metadata = Self::default();
        for section in reader::children(body, ns::WSX, "MetadataSection") {
            if let Some(model) = reader::child(section, ns::DPWS, "ThisModel") {
                let leaf = |name: &str| {
                    reader::child(model, ns::DPWS, name)
                        .map(|n| reader::text(n).to_string())
                        .unwrap_or_default()
                };
                metadata.manufacturer = leaf("Manufacturer");
                metadata.model_name = leaf("ModelName");
                metadata.model_number = leaf("ModelNumber");
            }
            if let Some(device) = reader::child(section, ns::DPWS, "ThisDevice") {
                let leaf = |name: &str| {
                    reader::child(device, ns::DPWS, name)
                        .map(|n| reader::text(n).to_string())
                        .unwrap_or_default()
                };
                metadata.friendly_name = leaf("FriendlyName");
                metadata.firmware_version = leaf("FirmwareVersion");
                metadata.serial_number = leaf("SerialNumber");
            }
            if let Some(relationship) = reader::child(section, ns::DPWS, "Relationship") {
                for hosted in reader::children(relationship, ns::DPWS, "Hosted") {
                    let address = reader::child(hosted, ns::WSA, "EndpointReference")
                        .and_then(|epr| reader::child(epr, ns::WSA, "Address"))
                        .map(|n| reader::text(n).to_string())
                        .unwrap_or_default();
                    metadata.hosted.push(HostedService {
                        service_id: reader::child(hosted, ns::DPWS, "ServiceId")
                            .map(|n| reader::text(n).to_string())
                            .unwrap_or_default(),
                        address,
                        types: reader::child(hosted, ns::DPWS, "Types")
                            .map(|n| {
                                reader::text(n)
                                    .split_ascii_whitespace()
                                    .map(str::to_string)
                                    .collect()
                            })
                            .unwrap_or_default(),
                    });
                }
            }
        }
        Ok(metadata)
    }
}

/// Register the WS-Transfer Get handler serving device metadata.
pub fn register_metadata_handler(
    metadata: DeviceMetadata,
    host_endpoint: &str,
    dispatcher: &mut SoapDispatcher,
) {
    let host_endpoint = host_endpoint.to_string();
    dispatcher.register(
        actions::TRANSFER_GET,
        Arc::new(move |_: &RequestContext<'_, '_>| -> Result<SoapResponse> {
            Ok(SoapResponse::new(
                actions::TRANSFER_GET_RESPONSE,
                metadata.encode(&host_endpoint),
            ))
        }),
    );
}
