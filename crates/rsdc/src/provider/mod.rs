// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Provider role
//!
//! [`SdcProvider`] is the device side: it owns the MDIB, answers the get
//! services, executes control operations through its SCO, fans reports out
//! to subscribed consumers in commit order, and announces itself over
//! WS-Discovery.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rsdc::provider::SdcProvider;
//! use rsdc::mdib::TransactionKind;
//! # fn poster() -> std::sync::Arc<dyn rsdc::soap::SoapPoster> { unimplemented!() }
//!
//! # fn main() -> rsdc::Result<()> {
//! let provider = SdcProvider::builder()
//!     .xaddr("http://10.0.0.5:6464/device")
//!     .scope("sdc.ctxt.loc:/sdc/bldng/H1")
//!     .with_poster(poster())
//!     .build()?;
//!
//! // Populate and mutate through transactions; subscribers see every
//! // commit as an ordered report.
//! let t = provider.mdib().begin(TransactionKind::Descriptor);
//! // ... insert descriptors ...
//! t.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod metadata;
pub mod operations;
pub mod reporter;
pub mod services;
pub mod waveform;

pub use metadata::{DeviceMetadata, HostedService};
pub use operations::{
    DirectApplyHandler, OperationHandler, OperationOutcome, ScoController, SetRequest,
};
pub use reporter::PeriodicReporter;
pub use waveform::{WaveformPump, WaveformSource};

use std::sync::Arc;

use crate::biceps::actions;
use crate::config::{RuntimeConfig, SHUTDOWN_STAGE_DEADLINE};
use crate::discovery::{Announcement, QNameOwned, WsDiscovery};
use crate::eventing::SubscriptionManager;
use crate::ident::Uuid;
use crate::mdib::{messages, Mdib};
use crate::soap::{MdibHeaders, SoapDispatcher, SoapPoster};
use crate::{Error, Result};

/// Builder for [`SdcProvider`].
pub struct SdcProviderBuilder {
    metadata: DeviceMetadata,
    config: RuntimeConfig,
    poster: Option<Arc<dyn SoapPoster>>,
    xaddrs: Vec<String>,
    scopes: Vec<String>,
    subscription_address: Option<String>,
    fast_path: bool,
    periodic_reports: bool,
    waveform_source: Option<Box<dyn WaveformSource>>,
}

impl SdcProviderBuilder {
    fn new() -> Self {
        Self {
            metadata: DeviceMetadata::default(),
            config: RuntimeConfig::new(),
            poster: None,
            xaddrs: Vec::new(),
            scopes: Vec::new(),
            subscription_address: None,
            fast_path: false,
            periodic_reports: false,
            waveform_source: None,
        }
    }

    pub fn metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Outbound transport for notifications and subscription ends.
    pub fn with_poster(mut self, poster: Arc<dyn SoapPoster>) -> Self {
        self.poster = Some(poster);
        self
    }

    /// Transport address announced in ProbeMatch/ResolveMatch.
    pub fn xaddr(mut self, xaddr: &str) -> Self {
        self.xaddrs.push(xaddr.to_string());
        self
    }

    pub fn scope(mut self, scope: &str) -> Self {
        self.scopes.push(scope.to_string());
        self
    }

    /// Public address of the subscription manager endpoint. Defaults to the
    /// first XAddr with a `/subscriptions` suffix.
    pub fn subscription_address(mut self, address: &str) -> Self {
        self.subscription_address = Some(address.to_string());
        self
    }

    /// Answer set operations with an immediate `Fin` instead of `Wait`.
    pub fn fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    /// Emit Periodic*Report batches alongside the episodic stream.
    pub fn periodic_reports(mut self, enabled: bool) -> Self {
        self.periodic_reports = enabled;
        self
    }

    pub fn waveform_source(mut self, source: Box<dyn WaveformSource>) -> Self {
        self.waveform_source = Some(source);
        self
    }

    pub fn build(self) -> Result<SdcProvider> {
        let poster = self
            .poster
            .ok_or_else(|| Error::Config("a SoapPoster is required".to_string()))?;
        let subscription_address = self.subscription_address.unwrap_or_else(|| {
            format!(
                "{}/subscriptions",
                self.xaddrs.first().map(String::as_str).unwrap_or("http://localhost")
            )
        });

        let endpoint = Uuid::generate();
        let mdib = Arc::new(Mdib::new());
        let subscriptions =
            SubscriptionManager::new(&subscription_address, poster, self.config.clone());

        // The core wiring: every committed change-set becomes reports fanned
        // out in commit order (the observer runs under the commit lock).
        let fanout_manager = Arc::clone(&subscriptions);
        mdib.register_observer(Box::new(move |change| {
            let headers = MdibHeaders {
                mdib_version: change.mdib_version,
                sequence_id: change.sequence_id,
                instance_id: change.instance_id,
            };
            for (action, body) in messages::build_reports(change) {
                fanout_manager.publish(action, &body, headers);
            }
        }));

        let sco = ScoController::new(Arc::clone(&mdib), Arc::clone(&subscriptions), self.fast_path);

        let mut dispatcher = SoapDispatcher::new();
        services::register_get_handlers(&mdib, &mut dispatcher);
        subscriptions.register_handlers(&mut dispatcher);
        sco.register_handlers_on(&mut dispatcher);
        metadata::register_metadata_handler(
            self.metadata.clone(),
            &endpoint.to_urn(),
            &mut dispatcher,
        );

        let periodic = self.periodic_reports.then(|| {
            PeriodicReporter::spawn(
                Arc::clone(&mdib),
                Arc::clone(&subscriptions),
                self.config.clone(),
            )
        });
        let waveforms = self.waveform_source.map(|source| {
            WaveformPump::spawn(Arc::clone(&mdib), source, self.config.clone())
        });

        Ok(SdcProvider {
            endpoint,
            mdib,
            dispatcher: Arc::new(dispatcher),
            subscriptions,
            sco,
            discovery: parking_lot::Mutex::new(None),
            config: self.config,
            xaddrs: self.xaddrs,
            scopes: self.scopes,
            periodic,
            waveforms,
        })
    }
}

/// The device side of an SDC connection.
pub struct SdcProvider {
    endpoint: Uuid,
    mdib: Arc<Mdib>,
    dispatcher: Arc<SoapDispatcher>,
    subscriptions: Arc<SubscriptionManager>,
    sco: Arc<ScoController>,
    discovery: parking_lot::Mutex<Option<Arc<WsDiscovery>>>,
    config: RuntimeConfig,
    xaddrs: Vec<String>,
    scopes: Vec<String>,
    periodic: Option<PeriodicReporter>,
    waveforms: Option<WaveformPump>,
}

impl SdcProvider {
    pub fn builder() -> SdcProviderBuilder {
        SdcProviderBuilder::new()
    }

    /// Stable endpoint reference of this device.
    pub fn endpoint(&self) -> Uuid {
        self.endpoint
    }

    pub fn mdib(&self) -> &Arc<Mdib> {
        &self.mdib
    }

    pub fn sco(&self) -> &Arc<ScoController> {
        &self.sco
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Route one inbound request; the HTTP server glue posts the returned
    /// envelope back.
    pub fn dispatch(&self, request: &str) -> String {
        self.dispatcher.dispatch(request)
    }

    /// The announcement this device publishes over WS-Discovery.
    pub fn announcement(&self) -> Announcement {
        Announcement {
            endpoint: self.endpoint.to_urn(),
            types: vec![QNameOwned::dpws_device(), QNameOwned::medical_device()],
            scopes: self.scopes.clone(),
            xaddrs: self.xaddrs.clone(),
            metadata_version: 1,
        }
    }

    /// Bind the WS-Discovery node and announce this device (Hello).
    pub fn start_discovery(&self) -> Result<()> {
        let discovery = WsDiscovery::start(self.config.clone())?;
        discovery.announce(self.announcement());
        *self.discovery.lock() = Some(discovery);
        Ok(())
    }

    /// Emit a SystemErrorReport as an ordinary filterable action.
    pub fn report_system_error(&self, code: &str, text: &str) {
        let snapshot = self.mdib.snapshot();
        let body = messages::encode_system_error_report(
            snapshot.mdib_version,
            snapshot.sequence_id,
            code,
            text,
        );
        self.subscriptions.publish(
            actions::SYSTEM_ERROR_REPORT,
            &body,
            MdibHeaders {
                mdib_version: snapshot.mdib_version,
                sequence_id: snapshot.sequence_id,
                instance_id: snapshot.instance_id,
            },
        );
    }

    /// Staged graceful shutdown: stop accepting subscriptions, drain and
    /// end them, stop the pumps, say Bye, close sockets. Each stage is
    /// bounded by its own deadline.
    pub fn shutdown(&self) {
        self.subscriptions.shutdown(SHUTDOWN_STAGE_DEADLINE);
        if let Some(periodic) = &self.periodic {
            periodic.shutdown();
        }
        if let Some(waveforms) = &self.waveforms {
            waveforms.shutdown();
        }
        self.sco.shutdown();
        if let Some(discovery) = self.discovery.lock().take() {
            discovery.shutdown();
        }
    }
}

impl std::fmt::Debug for SdcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdcProvider")
            .field("endpoint", &self.endpoint)
            .field("mdib_version", &self.mdib.mdib_version())
            .field("subscriptions", &self.subscriptions.active_count())
            .finish()
    }
}
