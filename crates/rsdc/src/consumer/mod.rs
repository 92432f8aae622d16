// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Consumer role
//!
//! [`SdcConsumer`] is the client side: it discovers providers, fetches and
//! mirrors their MDIB, feeds inbound notifications through the report
//! processor (with automatic gap recovery), manages subscriptions and
//! drives control operations through their asynchronous lifecycle.
//!
//! Inbound transport is pluggable: whatever HTTP server receives
//! notifications hands the raw envelope to
//! [`SdcConsumer::process_notification`].

pub mod processor;

pub use processor::{
    PreApplyHook, ReportProcessor, ResyncListener, ResyncReason, StreamStats,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::biceps::{actions, InvocationState};
use crate::config::RuntimeConfig;
use crate::discovery::{Announcement, QNameOwned, WsDiscovery};
use crate::eventing::{EndReason, SubscriptionClient};
use crate::ident::Uuid;
use crate::mdib::messages::{decode_mdib, InvocationReportPart};
use crate::mdib::{ChangeObserver, Mdib, MdibSnapshot, Report};
use crate::provider::SetRequest;
use crate::soap::{
    body_element, parse_headers, parse_mdib_headers, EnvelopeBuilder, SoapClient, SoapPoster,
};
use crate::xml::reader;
use crate::{Error, Result};

/// Callback fired when the provider ends a subscription.
pub type SubscriptionEndListener = Box<dyn Fn(Option<EndReason>) + Send + Sync>;
/// Callback fired for SystemErrorReport notifications.
pub type SystemErrorListener = Box<dyn Fn(&str, &str) + Send + Sync>;
/// Callback fired for every operation-invoked report part.
pub type InvocationListener = Box<dyn Fn(&InvocationReportPart) + Send + Sync>;

/// The client side of an SDC connection to one provider.
pub struct SdcConsumer {
    soap: SoapClient,
    config: RuntimeConfig,
    mirror: Arc<Mdib>,
    processor: Arc<ReportProcessor>,
    subscriptions: Arc<SubscriptionClient>,
    discovery: Mutex<Option<Arc<WsDiscovery>>>,
    /// Provider service endpoint, set by `connect`.
    service_endpoint: Mutex<Option<String>>,
    resync_queue: Sender<ResyncReason>,
    waiters: Arc<DashMap<u64, Sender<InvocationReportPart>>>,
    unclaimed: Arc<DashMap<u64, InvocationReportPart>>,
    invocation_listener: Mutex<Option<InvocationListener>>,
    end_listener: Arc<Mutex<Option<SubscriptionEndListener>>>,
    error_listener: Mutex<Option<SystemErrorListener>>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SdcConsumer {
    /// Create a consumer. `notify_to` is the delivery endpoint announced in
    /// every Subscribe.
    pub fn new(poster: Arc<dyn SoapPoster>, notify_to: &str, config: RuntimeConfig) -> Arc<Self> {
        let soap = SoapClient::new(poster);
        let mirror = Arc::new(Mdib::new());
        let processor = Arc::new(ReportProcessor::new(Arc::clone(&mirror), config.clone()));
        let subscriptions =
            SubscriptionClient::new(soap.clone(), notify_to, config.clone());

        let (resync_tx, resync_rx) = unbounded::<ResyncReason>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let consumer = Arc::new(Self {
            soap,
            config,
            mirror,
            processor,
            subscriptions,
            discovery: Mutex::new(None),
            service_endpoint: Mutex::new(None),
            resync_queue: resync_tx.clone(),
            waiters: Arc::new(DashMap::new()),
            unclaimed: Arc::new(DashMap::new()),
            invocation_listener: Mutex::new(None),
            end_listener: Arc::new(Mutex::new(None)),
            error_listener: Mutex::new(None),
            shutdown,
            workers: Mutex::new(Vec::new()),
        });

        // Gap signals leave the processor through a channel; the recovery
        // worker performs the refetch outside the processor's lock.
        let queue = resync_tx;
        consumer.processor.on_resync(Box::new(move |reason| {
            let _ = queue.send(reason);
        }));

        let recovery = Arc::clone(&consumer);
        let recovery_shutdown = Arc::clone(&consumer.shutdown);
        consumer.workers.lock().push(thread::spawn(move || {
            while !recovery_shutdown.load(Ordering::Relaxed) {
                match resync_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(reason) => {
                        log::debug!("[consumer] gap recovery ({:?})", reason);
                        if let Err(error) = recovery.refetch() {
                            log::debug!("[consumer] refetch failed: {}", error);
                        }
                    }
                    Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        }));

        // Reorder-window ticker.
        let ticker = Arc::clone(&consumer.processor);
        let ticker_shutdown = Arc::clone(&consumer.shutdown);
        consumer.workers.lock().push(thread::spawn(move || {
            while !ticker_shutdown.load(Ordering::Relaxed) {
                ticker.tick();
                thread::sleep(Duration::from_millis(10));
            }
        }));

        // A re-created subscription means missed reports: same recovery.
        let gap_queue = consumer.resync_queue.clone();
        consumer.subscriptions.on_gap(Box::new(move |_| {
            let _ = gap_queue.send(ResyncReason::ReorderWindowExpired);
        }));

        consumer
    }

    pub fn mdib(&self) -> &Arc<Mdib> {
        &self.mirror
    }

    pub fn stats(&self) -> &StreamStats {
        self.processor.stats()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionClient> {
        &self.subscriptions
    }

    /// Register a post-commit observer over the mirror, keyed by
    /// change-set kind.
    pub fn register_mdib_observer(&self, observer: ChangeObserver) {
        self.mirror.register_observer(observer);
    }

    /// Register a pre-commit hook seeing each change-set before it lands
    /// in the mirror.
    pub fn register_pre_apply_hook(&self, hook: PreApplyHook) {
        self.processor.register_pre_apply_hook(hook);
    }

    pub fn on_subscription_end(&self, listener: SubscriptionEndListener) {
        *self.end_listener.lock() = Some(listener);
    }

    pub fn on_system_error(&self, listener: SystemErrorListener) {
        *self.error_listener.lock() = Some(listener);
    }

    pub fn on_operation_invoked(&self, listener: InvocationListener) {
        *self.invocation_listener.lock() = Some(listener);
    }

    // ------------------------------------------------------------ discovery

    /// Bind the WS-Discovery node (consumer side: probe/resolve only).
    pub fn start_discovery(&self) -> Result<()> {
        let discovery = WsDiscovery::start(self.config.clone())?;
        *self.discovery.lock() = Some(discovery);
        Ok(())
    }

    /// Probe for medical devices carrying all of `scopes`.
    pub fn probe(&self, scopes: &[String]) -> Result<Vec<Announcement>> {
        let discovery = self.discovery.lock().clone();
        let discovery = discovery
            .ok_or_else(|| Error::InvalidState("discovery not started".to_string()))?;
        Ok(discovery.probe(
            &[QNameOwned::dpws_device(), QNameOwned::medical_device()],
            scopes,
        ))
    }

    /// Resolve one endpoint reference to its transport addresses.
    pub fn resolve(&self, endpoint: &str) -> Result<Announcement> {
        let discovery = self.discovery.lock().clone();
        let discovery = discovery
            .ok_or_else(|| Error::InvalidState("discovery not started".to_string()))?;
        discovery.resolve(endpoint).ok_or(Error::DiscoveryTimeout)
    }

    // -------------------------------------------------------------- connect

    /// Fetch the provider's MDIB from `service_endpoint` and start
    /// mirroring it.
    pub fn connect(&self, service_endpoint: &str) -> Result<()> {
        *self.service_endpoint.lock() = Some(service_endpoint.to_string());
        let snapshot = self.fetch_mdib(service_endpoint)?;
        self.processor.reset(snapshot);
        Ok(())
    }

    /// Subscribe to every report action at the connected provider.
    pub fn subscribe_all_reports(&self) -> Result<Uuid> {
        let endpoint = self.require_endpoint()?;
        self.subscriptions
            .subscribe(&endpoint, actions::ALL_REPORTS, None)
    }

    /// Subscribe to a specific action filter.
    pub fn subscribe(&self, filter: &[&str]) -> Result<Uuid> {
        let endpoint = self.require_endpoint()?;
        self.subscriptions.subscribe(&endpoint, filter, None)
    }

    fn require_endpoint(&self) -> Result<String> {
        self.service_endpoint
            .lock()
            .clone()
            .ok_or_else(|| Error::InvalidState("not connected".to_string()))
    }

    fn fetch_mdib(&self, endpoint: &str) -> Result<MdibSnapshot> {
        let response = self.soap.request(
            endpoint,
            EnvelopeBuilder::new(actions::GET_MDIB).body("<msg:GetMdib/>"),
            true,
        )?;
        response.with_body(|body, input| decode_mdib(body, input))
    }

    /// One full gap recovery: refetch, reset, resume.
    fn refetch(&self) -> Result<()> {
        let endpoint = self.require_endpoint()?;
        let snapshot = self.fetch_mdib(&endpoint)?;
        self.processor.reset(snapshot);
        Ok(())
    }

    // -------------------------------------------------------- notifications

    /// Entry point for the inbound HTTP glue: feed one notification
    /// envelope.
    pub fn process_notification(&self, envelope: &str) -> Result<()> {
        let doc = reader::parse(envelope)?;
        let headers = parse_headers(&doc, envelope, true)?;

        match headers.action.as_str() {
            actions::SUBSCRIPTION_END => {
                let body = body_element(&doc)?;
                let (_, reason) =
                    crate::eventing::subscription::decode_subscription_end(body, envelope)?;
                log::debug!("[consumer] subscription ended: {:?}", reason);
                if let Some(listener) = self.end_listener.lock().as_ref() {
                    listener(reason);
                }
                Ok(())
            }
            actions::OPERATION_INVOKED_REPORT => {
                let body = body_element(&doc)?;
                match crate::mdib::messages::decode_report(&headers.action, body, envelope)? {
                    Report::OperationInvoked(parts) => {
                        for part in parts {
                            self.route_invocation(part);
                        }
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
            actions::SYSTEM_ERROR_REPORT => {
                let body = body_element(&doc)?;
                if let Report::SystemError { code, text } =
                    crate::mdib::messages::decode_report(&headers.action, body, envelope)?
                {
                    if let Some(listener) = self.error_listener.lock().as_ref() {
                        listener(&code, &text);
                    }
                }
                Ok(())
            }
            action => {
                let mdib_headers = parse_mdib_headers(&doc)?.ok_or_else(|| {
                    Error::Xml(format!("notification {} without MDIB headers", action))
                })?;
                let body = body_element(&doc)?;
                let report = crate::mdib::messages::decode_report(action, body, envelope)?;
                self.processor.on_report(mdib_headers, report);
                Ok(())
            }
        }
    }

    fn route_invocation(&self, part: InvocationReportPart) {
        if let Some(listener) = self.invocation_listener.lock().as_ref() {
            listener(&part);
        }
        if part.invocation_state.is_final() {
            match self.waiters.remove(&part.transaction_id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(part);
                }
                None => {
                    self.unclaimed.insert(part.transaction_id, part);
                }
            }
        }
    }

    // ----------------------------------------------------------- operations

    /// Invoke a set operation. Returns the provider's immediate
    /// `(TransactionId, InvocationState)`.
    pub fn invoke(&self, operation_handle: &str, request: SetRequest) -> Result<(u64, InvocationState)> {
        let endpoint = self.require_endpoint()?;
        let action = match &request {
            SetRequest::SetValue(_) => actions::SET_VALUE,
            SetRequest::SetString(_) => actions::SET_STRING,
            SetRequest::Activate(_) => actions::ACTIVATE,
            SetRequest::SetMetricState(_) => actions::SET_METRIC_STATE,
            SetRequest::SetComponentState(_) => actions::SET_COMPONENT_STATE,
            SetRequest::SetAlertState(_) => actions::SET_ALERT_STATE,
            SetRequest::SetContextState(_) => actions::SET_CONTEXT_STATE,
        };
        let body = request.encode(operation_handle);
        let response = self.soap.request(
            &endpoint,
            EnvelopeBuilder::new(action).body(&body),
            false,
        )?;
        response.with_body(|node, _| crate::provider::operations::decode_set_response(node))
    }

    /// Wait for the final OperationInvokedReport of a transaction.
    pub fn wait_for_invocation(
        &self,
        transaction_id: u64,
        timeout: Duration,
    ) -> Result<InvocationReportPart> {
        if let Some((_, part)) = self.unclaimed.remove(&transaction_id) {
            return Ok(part);
        }
        let (tx, rx) = bounded(1);
        self.waiters.insert(transaction_id, tx);
        // The report may have slipped in between the check and the insert.
        if let Some((_, part)) = self.unclaimed.remove(&transaction_id) {
            self.waiters.remove(&transaction_id);
            return Ok(part);
        }
        let result = rx
            .recv_timeout(timeout)
            .map_err(|_| Error::Timeout(format!("invocation {}", transaction_id)));
        self.waiters.remove(&transaction_id);
        result
    }

    /// Stop workers, unsubscribe everywhere, close discovery.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        self.subscriptions.shutdown();
        if let Some(discovery) = self.discovery.lock().take() {
            discovery.shutdown();
        }
    }
}

impl std::fmt::Debug for SdcConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdcConsumer")
            .field("mirror_version", &self.mirror.mdib_version())
            .field("subscriptions", &self.subscriptions.active_count())
            .finish()
    }
}
