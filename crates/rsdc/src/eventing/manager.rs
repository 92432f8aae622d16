// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Provider-side subscription manager: bookkeeping and ordered fan-out.
//!
//! Every subscription owns a bounded delivery lane drained by its own
//! worker thread, which preserves per-subscriber order while one slow
//! receiver cannot stall the rest. Under overflow the oldest waveform
//! notification is shed first; if nothing sheddable remains the
//! subscription ends with `DeliveryFailure`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::biceps::actions;
use crate::biceps::qname::{ns, QName};
use crate::config::{
    RuntimeConfig, DEFAULT_SUBSCRIPTION_EXPIRES, DELIVERY_QUEUE_DEPTH,
    SUBSCRIPTION_SWEEP_INTERVAL,
};
use crate::eventing::subscription::{
    encode_expires_response, encode_subscription_end, EndReason, EndpointReference,
    SubscribeRequest, SubscribeResponse,
};
use crate::ident::Uuid;
use crate::soap::{
    Fault, MdibHeaders, RequestContext, SoapDispatcher, SoapPoster, SoapResponse,
};
use crate::xml::{reader, XmlWriter};
use crate::{Error, Result};

const STATE_ACTIVE: u8 = 0;
const STATE_FAILED: u8 = 1;
const STATE_ENDED: u8 = 2;

struct Outbound {
    envelope: String,
    endpoint: String,
    /// Sheddable under backpressure (waveform stream).
    lossy: bool,
    /// Terminal item: worker exits after posting it.
    terminal: bool,
}

/// Bounded FIFO lane between `publish` and one delivery worker.
struct Lane {
    queue: Mutex<VecDeque<Outbound>>,
    ready: Condvar,
    capacity: usize,
}

impl Lane {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue with the overflow policy. Returns `false` when the lane is
    /// saturated with non-sheddable traffic (subscription must end).
    fn push(&self, item: Outbound, dropped_waveforms: &AtomicU64) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            if let Some(position) = queue.iter().position(|queued| queued.lossy) {
                queue.remove(position);
                dropped_waveforms.fetch_add(1, Ordering::Relaxed);
            } else {
                return false;
            }
        }
        queue.push_back(item);
        drop(queue);
        self.ready.notify_one();
        true
    }

    /// Jump the queue (terminal SubscriptionEnd).
    fn push_front(&self, item: Outbound) {
        let mut queue = self.queue.lock();
        queue.push_front(item);
        drop(queue);
        self.ready.notify_one();
    }

    fn pop(&self, stop: &AtomicBool) -> Option<Outbound> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(item) = queue.pop_front() {
                return Some(item);
            }
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            self.ready.wait_for(&mut queue, Duration::from_millis(100));
        }
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// One registered event sink.
pub struct SubscriptionEntry {
    pub id: Uuid,
    notify_to: EndpointReference,
    end_to: Option<EndpointReference>,
    filter: Vec<String>,
    expires_at: Mutex<Instant>,
    /// Monotonic per-subscription notification counter (observability).
    counter: AtomicU64,
    dropped_waveforms: AtomicU64,
    state: AtomicU8,
    stop: Arc<AtomicBool>,
    lane: Arc<Lane>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionEntry {
    fn is_active(&self) -> bool {
        self.state.load(Ordering::Relaxed) == STATE_ACTIVE
    }

    pub fn notifications_sent(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn dropped_waveforms(&self) -> u64 {
        self.dropped_waveforms.load(Ordering::Relaxed)
    }

    pub fn filter(&self) -> &[String] {
        &self.filter
    }

    fn end_endpoint(&self) -> &EndpointReference {
        self.end_to.as_ref().unwrap_or(&self.notify_to)
    }

    fn remaining(&self) -> Duration {
        self.expires_at
            .lock()
            .saturating_duration_since(Instant::now())
    }
}

/// Event-source bookkeeping, filter matching, renew/expire and fan-out.
pub struct SubscriptionManager {
    /// Public address of the subscription manager endpoint, used as the
    /// `SubscriptionManager` EPR in subscribe responses.
    address: String,
    subscriptions: DashMap<String, Arc<SubscriptionEntry>>,
    poster: Arc<dyn SoapPoster>,
    config: RuntimeConfig,
    accepting: AtomicBool,
    shutdown: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(address: &str, poster: Arc<dyn SoapPoster>, config: RuntimeConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            address: address.to_string(),
            subscriptions: DashMap::new(),
            poster,
            config,
            accepting: AtomicBool::new(true),
            shutdown: Arc::new(AtomicBool::new(false)),
            sweeper: Mutex::new(None),
        });
        let sweeper_ref = Arc::clone(&manager);
        let shutdown = Arc::clone(&manager.shutdown);
        *manager.sweeper.lock() = Some(thread::spawn(move || {
            sweeper_loop(&sweeper_ref, &shutdown);
        }));
        manager
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|entry| entry.value().is_active())
            .count()
    }

    /// Handle a Subscribe: clamp the expiration, register the sink, spawn
    /// its delivery worker.
    pub fn subscribe(&self, request: SubscribeRequest) -> Result<SubscribeResponse> {
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(Error::Fault(Fault::unable_to_process(
                "The event source is shutting down.",
            )));
        }
        if request.filter.is_empty() {
            return Err(Error::Fault(Fault::unable_to_process(
                "An action filter is required.",
            )));
        }

        let granted = self.clamp_expires(request.expires);
        let id = Uuid::generate();
        let stop = Arc::new(AtomicBool::new(false));
        let lane = Arc::new(Lane::new(DELIVERY_QUEUE_DEPTH));

        let entry = Arc::new(SubscriptionEntry {
            id,
            notify_to: request.notify_to,
            end_to: request.end_to,
            filter: request.filter,
            expires_at: Mutex::new(Instant::now() + granted),
            counter: AtomicU64::new(0),
            dropped_waveforms: AtomicU64::new(0),
            state: AtomicU8::new(STATE_ACTIVE),
            stop: Arc::clone(&stop),
            lane: Arc::clone(&lane),
            worker: Mutex::new(None),
        });

        let worker_entry = Arc::clone(&entry);
        let poster = Arc::clone(&self.poster);
        *entry.worker.lock() = Some(thread::spawn(move || {
            delivery_loop(&worker_entry, poster.as_ref());
        }));

        self.subscriptions.insert(id.to_string(), Arc::clone(&entry));
        log::debug!(
            "[eventing] subscribed {} -> {} ({} actions, {}s)",
            id,
            entry.notify_to.address,
            entry.filter.len(),
            granted.as_secs()
        );

        let mut manager_epr = EndpointReference::new(&self.address);
        manager_epr
            .reference_parameters
            .push(identifier_element(&id));
        Ok(SubscribeResponse {
            subscription_manager: manager_epr,
            expires: granted,
        })
    }

    pub fn renew(&self, id: &str, requested: Option<Duration>) -> Result<Duration> {
        let entry = self.lookup(id)?;
        let granted = self.clamp_expires(requested);
        *entry.expires_at.lock() = Instant::now() + granted;
        log::debug!("[eventing] renewed {} for {}s", id, granted.as_secs());
        Ok(granted)
    }

    pub fn get_status(&self, id: &str) -> Result<Duration> {
        Ok(self.lookup(id)?.remaining())
    }

    pub fn unsubscribe(&self, id: &str) -> Result<()> {
        let (_, entry) = self
            .subscriptions
            .remove(id)
            .ok_or_else(|| Error::Fault(Fault::unknown_subscription()))?;
        stop_entry(&entry);
        log::debug!("[eventing] unsubscribed {}", id);
        Ok(())
    }

    /// Fan one report out to every subscription whose filter lists its
    /// action. Called on the ordered change-set path; per-subscription
    /// lanes keep per-subscriber order.
    pub fn publish(&self, action: &str, body_xml: &str, mdib: MdibHeaders) {
        let lossy = actions::is_lossy(action);
        for item in self.subscriptions.iter() {
            let entry = item.value();
            if !entry.is_active() || !entry.filter.iter().any(|f| f == action) {
                continue;
            }
            let mut builder = crate::soap::EnvelopeBuilder::new(action)
                .to(&entry.notify_to.address)
                .mdib_headers(mdib)
                .body(body_xml);
            for parameter in &entry.notify_to.reference_parameters {
                builder = builder.reference_parameter(parameter);
            }
            let outbound = Outbound {
                envelope: builder.build(),
                endpoint: entry.notify_to.address.clone(),
                lossy,
                terminal: false,
            };
            if entry.lane.push(outbound, &entry.dropped_waveforms) {
                entry.counter.fetch_add(1, Ordering::Relaxed);
            } else {
                log::debug!(
                    "[eventing] lane overflow on {}, ending with DeliveryFailure",
                    entry.id
                );
                self.end_subscription(entry, EndReason::DeliveryFailure);
            }
        }
    }

    /// Staged shutdown: stop accepting, send `SubscriptionEnd` everywhere,
    /// drain lanes up to `deadline`, then stop workers and the sweeper.
    pub fn shutdown(&self, deadline: Duration) {
        self.accepting.store(false, Ordering::Relaxed);
        let entries: Vec<Arc<SubscriptionEntry>> = self
            .subscriptions
            .iter()
            .map(|item| Arc::clone(item.value()))
            .collect();
        for entry in &entries {
            if entry.is_active() {
                self.end_subscription(entry, EndReason::SourceShuttingDown);
            }
        }

        let drain_until = Instant::now() + deadline;
        for entry in &entries {
            while !entry.lane.is_empty() && Instant::now() < drain_until {
                thread::sleep(Duration::from_millis(10));
            }
            stop_entry(entry);
        }
        self.subscriptions.clear();

        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
    }

    fn end_subscription(&self, entry: &Arc<SubscriptionEntry>, reason: EndReason) {
        entry.state.store(STATE_ENDED, Ordering::Relaxed);
        let mut manager_epr = EndpointReference::new(&self.address);
        manager_epr
            .reference_parameters
            .push(identifier_element(&entry.id));
        let body = encode_subscription_end(&manager_epr, reason);
        let envelope = crate::soap::EnvelopeBuilder::new(actions::SUBSCRIPTION_END)
            .to(&entry.end_endpoint().address)
            .body(&body)
            .build();
        entry.lane.push_front(Outbound {
            envelope,
            endpoint: entry.end_endpoint().address.clone(),
            lossy: false,
            terminal: true,
        });
    }

    fn lookup(&self, id: &str) -> Result<Arc<SubscriptionEntry>> {
        self.subscriptions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|entry| entry.is_active())
            .ok_or_else(|| Error::Fault(Fault::unknown_subscription()))
    }

    fn clamp_expires(&self, requested: Option<Duration>) -> Duration {
        let max = self.config.timing().max_subscription_duration;
        requested
            .unwrap_or(DEFAULT_SUBSCRIPTION_EXPIRES)
            .min(max)
    }

    /// Remove expired and inert subscriptions. Expired ones go silently
    /// (no end-notification, per WS-Eventing).
    fn sweep(&self) {
        let mut purge = Vec::new();
        for item in self.subscriptions.iter() {
            let entry = item.value();
            let expired = entry.is_active() && entry.remaining() == Duration::ZERO;
            let inert = !entry.is_active();
            if expired || inert {
                purge.push((item.key().clone(), expired));
            }
        }
        for (key, expired) in purge {
            if let Some((_, entry)) = self.subscriptions.remove(&key) {
                if expired {
                    log::debug!("[eventing] subscription {} expired", key);
                }
                stop_entry(&entry);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn test_ids(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Register the WS-Eventing port type on a dispatcher.
    pub fn register_handlers(self: &Arc<Self>, dispatcher: &mut SoapDispatcher) {
        let manager = Arc::clone(self);
        dispatcher.register(
            actions::SUBSCRIBE,
            Arc::new(move |ctx: &RequestContext<'_, '_>| {
                let request = SubscribeRequest::decode(ctx.body, ctx.input)?;
                let response = manager.subscribe(request)?;
                Ok(SoapResponse::new(
                    actions::SUBSCRIBE_RESPONSE,
                    response.encode(),
                ))
            }),
        );

        let manager = Arc::clone(self);
        dispatcher.register(
            actions::RENEW,
            Arc::new(move |ctx: &RequestContext<'_, '_>| {
                let id = subscription_id_from(ctx)?;
                let requested = crate::eventing::subscription::decode_expires(ctx.body)
                    .map_err(|_| Error::Fault(Fault::invalid_expiration()))?;
                let granted = manager.renew(&id, requested)?;
                Ok(SoapResponse::new(
                    actions::RENEW_RESPONSE,
                    encode_expires_response("RenewResponse", granted),
                ))
            }),
        );

        let manager = Arc::clone(self);
        dispatcher.register(
            actions::GET_STATUS,
            Arc::new(move |ctx: &RequestContext<'_, '_>| {
                let id = subscription_id_from(ctx)?;
                let remaining = manager.get_status(&id)?;
                Ok(SoapResponse::new(
                    actions::GET_STATUS_RESPONSE,
                    encode_expires_response("GetStatusResponse", remaining),
                ))
            }),
        );

        let manager = Arc::clone(self);
        dispatcher.register(
            actions::UNSUBSCRIBE,
            Arc::new(move |ctx: &RequestContext<'_, '_>| {
                let id = subscription_id_from(ctx)?;
                manager.unsubscribe(&id)?;
                let mut w = XmlWriter::new();
                w.open(QName::new(ns::WSE, "UnsubscribeResponse"));
                w.close();
                Ok(SoapResponse::new(actions::UNSUBSCRIBE_RESPONSE, w.finish()))
            }),
        );
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
        for item in self.subscriptions.iter() {
            stop_entry(item.value());
        }
    }
}

/// The `wse:Identifier` reference parameter carrying the subscription id.
fn identifier_element(id: &Uuid) -> String {
    format!("<wse:Identifier>{}</wse:Identifier>", id.to_urn())
}

/// Extract the subscription id from the request's reference parameters.
fn subscription_id_from(ctx: &RequestContext<'_, '_>) -> Result<String> {
    for raw in &ctx.headers.reference_parameters {
        let fragment = reader::fragment_document(raw)?;
        let doc = reader::parse(&fragment)?;
        if let Some(identifier) = doc
            .descendants()
            .find(|n| n.has_tag_name((ns::WSE, "Identifier")))
        {
            if let Some(uuid) = Uuid::parse(reader::text(identifier)) {
                return Ok(uuid.to_string());
            }
        }
    }
    Err(Error::Fault(Fault::unknown_subscription()))
}

fn stop_entry(entry: &Arc<SubscriptionEntry>) {
    entry.stop.store(true, Ordering::Relaxed);
    entry.lane.ready.notify_one();
    if let Some(handle) = entry.worker.lock().take() {
        let _ = handle.join();
    }
}

/// Per-subscription delivery worker: single-lane FIFO, order-preserving.
fn delivery_loop(entry: &Arc<SubscriptionEntry>, poster: &dyn SoapPoster) {
    while let Some(item) = entry.lane.pop(&entry.stop) {
        match poster.post(&item.endpoint, &item.envelope) {
            Ok(_) => {
                if item.terminal {
                    break;
                }
            }
            Err(Error::Fault(fault)) if fault.ends_subscription() => {
                log::debug!(
                    "[eventing] {} rejected delivery authoritatively, ending",
                    entry.id
                );
                entry.state.store(STATE_ENDED, Ordering::Relaxed);
                break;
            }
            Err(Error::UnknownSubscription(_)) => {
                entry.state.store(STATE_ENDED, Ordering::Relaxed);
                break;
            }
            Err(error) => {
                // Transient: mark failed, no retries. The receiver's duty
                // is to resubscribe on gap.
                log::debug!("[eventing] delivery to {} failed: {}", entry.id, error);
                entry.state.store(STATE_FAILED, Ordering::Relaxed);
                break;
            }
        }
    }
}

fn sweeper_loop(manager: &Arc<SubscriptionManager>, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        manager.sweep();
        let wake_at = Instant::now() + SUBSCRIPTION_SWEEP_INTERVAL;
        while Instant::now() < wake_at {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    /// Records every posted envelope; optionally fails.
    struct RecordingPoster {
        posts: PlMutex<Vec<(String, String)>>,
        fail_with: PlMutex<Option<fn() -> Error>>,
    }

    impl RecordingPoster {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                posts: PlMutex::new(Vec::new()),
                fail_with: PlMutex::new(None),
            })
        }

        fn posted_actions(&self) -> Vec<String> {
            self.posts
                .lock()
                .iter()
                .map(|(_, envelope)| {
                    let doc = reader::parse(envelope).unwrap();
                    crate::soap::parse_headers(&doc, envelope, false)
                        .unwrap()
                        .action
                })
                .collect()
        }

        fn wait_for_posts(&self, n: usize) {
            let deadline = Instant::now() + Duration::from_secs(2);
            while self.posts.lock().len() < n && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    impl SoapPoster for RecordingPoster {
        fn post(&self, endpoint: &str, envelope: &str) -> Result<String> {
            if let Some(make_error) = *self.fail_with.lock() {
                return Err(make_error());
            }
            self.posts
                .lock()
                .push((endpoint.to_string(), envelope.to_string()));
            Ok(String::new())
        }
    }

    fn mdib_headers() -> MdibHeaders {
        MdibHeaders {
            mdib_version: 1,
            sequence_id: Uuid::generate(),
            instance_id: None,
        }
    }

    fn subscribe(manager: &Arc<SubscriptionManager>, filter: &[&str]) -> SubscribeResponse {
        manager
            .subscribe(SubscribeRequest::new("http://sink:9000/notify", filter))
            .unwrap()
    }

    #[test]
    fn test_subscribe_and_filtered_publish() {
        let poster = RecordingPoster::new();
        let manager = SubscriptionManager::new(
            "http://device/subs",
            Arc::clone(&poster) as Arc<dyn SoapPoster>,
            RuntimeConfig::new(),
        );
        subscribe(&manager, &[actions::EPISODIC_METRIC_REPORT]);

        manager.publish(
            actions::EPISODIC_METRIC_REPORT,
            "<msg:EpisodicMetricReport/>",
            mdib_headers(),
        );
        manager.publish(
            actions::EPISODIC_ALERT_REPORT,
            "<msg:EpisodicAlertReport/>",
            mdib_headers(),
        );

        poster.wait_for_posts(1);
        let posted = poster.posted_actions();
        // Only the filtered action is delivered.
        assert_eq!(posted, vec![actions::EPISODIC_METRIC_REPORT.to_string()]);
        manager.shutdown(Duration::from_millis(200));
    }

    #[test]
    fn test_expires_clamped_to_max() {
        let poster = RecordingPoster::new();
        let manager = SubscriptionManager::new(
            "http://device/subs",
            poster as Arc<dyn SoapPoster>,
            RuntimeConfig::new(),
        );
        let mut request =
            SubscribeRequest::new("http://sink/notify", &[actions::EPISODIC_METRIC_REPORT]);
        request.expires = Some(Duration::from_secs(1_000_000));
        let response = manager.subscribe(request).unwrap();
        assert_eq!(
            response.expires,
            manager.config.timing().max_subscription_duration
        );
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_renew_and_status() {
        let poster = RecordingPoster::new();
        let manager = SubscriptionManager::new(
            "http://device/subs",
            poster as Arc<dyn SoapPoster>,
            RuntimeConfig::new(),
        );
        let response = subscribe(&manager, &[actions::EPISODIC_METRIC_REPORT]);
        let id = extract_id(&response);

        let granted = manager.renew(&id, Some(Duration::from_secs(30))).unwrap();
        assert_eq!(granted, Duration::from_secs(30));
        let remaining = manager.get_status(&id).unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(remaining > Duration::from_secs(25));

        // Same renew again returns the same grant.
        let again = manager.renew(&id, Some(Duration::from_secs(30))).unwrap();
        assert_eq!(again, granted);

        manager.unsubscribe(&id).unwrap();
        assert!(matches!(
            manager.renew(&id, None),
            Err(Error::Fault(fault)) if fault.ends_subscription()
        ));
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_delivery_order_per_subscription() {
        let poster = RecordingPoster::new();
        let manager = SubscriptionManager::new(
            "http://device/subs",
            Arc::clone(&poster) as Arc<dyn SoapPoster>,
            RuntimeConfig::new(),
        );
        subscribe(
            &manager,
            &[actions::EPISODIC_METRIC_REPORT, actions::EPISODIC_ALERT_REPORT],
        );

        for i in 0..10u32 {
            let action = if i % 2 == 0 {
                actions::EPISODIC_METRIC_REPORT
            } else {
                actions::EPISODIC_ALERT_REPORT
            };
            manager.publish(action, &format!("<msg:R n=\"{}\"/>", i), mdib_headers());
        }
        poster.wait_for_posts(10);

        let posts = poster.posts.lock();
        assert_eq!(posts.len(), 10);
        for (i, (_, envelope)) in posts.iter().enumerate() {
            assert!(envelope.contains(&format!("n=\"{}\"", i)));
        }
        drop(posts);
        manager.shutdown(Duration::from_millis(200));
    }

    #[test]
    fn test_transient_failure_marks_failed_no_retry() {
        let poster = RecordingPoster::new();
        *poster.fail_with.lock() = Some(|| Error::PostFailed("refused".to_string()));
        let manager = SubscriptionManager::new(
            "http://device/subs",
            Arc::clone(&poster) as Arc<dyn SoapPoster>,
            RuntimeConfig::new(),
        );
        subscribe(&manager, &[actions::EPISODIC_METRIC_REPORT]);
        manager.publish(actions::EPISODIC_METRIC_REPORT, "<msg:R/>", mdib_headers());

        let deadline = Instant::now() + Duration::from_secs(2);
        while manager.active_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(manager.active_count(), 0);
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_shutdown_sends_subscription_end() {
        let poster = RecordingPoster::new();
        let manager = SubscriptionManager::new(
            "http://device/subs",
            Arc::clone(&poster) as Arc<dyn SoapPoster>,
            RuntimeConfig::new(),
        );
        subscribe(&manager, &[actions::EPISODIC_METRIC_REPORT]);
        manager.shutdown(Duration::from_secs(1));

        let actions_posted = poster.posted_actions();
        assert!(actions_posted.contains(&actions::SUBSCRIPTION_END.to_string()));
        // New subscriptions are refused after shutdown.
        assert!(manager
            .subscribe(SubscribeRequest::new(
                "http://sink/notify",
                &[actions::EPISODIC_METRIC_REPORT]
            ))
            .is_err());
    }

    #[test]
    fn test_handler_roundtrip_via_dispatcher() {
        let poster = RecordingPoster::new();
        let manager = SubscriptionManager::new(
            "http://device/subs",
            poster as Arc<dyn SoapPoster>,
            RuntimeConfig::new(),
        );
        let mut dispatcher = SoapDispatcher::new();
        manager.register_handlers(&mut dispatcher);

        let mut subscribe_request =
            SubscribeRequest::new("http://sink/notify", &[actions::EPISODIC_METRIC_REPORT]);
        subscribe_request.expires = Some(Duration::from_secs(90));
        let request = crate::soap::EnvelopeBuilder::new(actions::SUBSCRIBE)
            .body(&subscribe_request.encode())
            .build();
        let response_xml = dispatcher.dispatch(&request);
        let doc = reader::parse(&response_xml).unwrap();
        let body = crate::soap::body_element(&doc).unwrap();
        let response = SubscribeResponse::decode(body, &response_xml).unwrap();
        assert_eq!(response.expires, Duration::from_secs(90));
        assert_eq!(response.subscription_manager.address, "http://device/subs");

        // Renew through the dispatcher, correlating via reference parameter.
        let mut renew = crate::soap::EnvelopeBuilder::new(actions::RENEW)
            .body(&crate::eventing::subscription::encode_renew(Some(
                Duration::from_secs(45),
            )));
        for parameter in &response.subscription_manager.reference_parameters {
            renew = renew.reference_parameter(parameter);
        }
        let renew_response = dispatcher.dispatch(&renew.build());
        let doc = reader::parse(&renew_response).unwrap();
        assert!(Fault::from_body(&doc).unwrap().is_none());
        let body = crate::soap::body_element(&doc).unwrap();
        assert_eq!(
            crate::eventing::subscription::decode_expires(body).unwrap(),
            Some(Duration::from_secs(45))
        );

        // Renew with an unknown identifier faults.
        let bogus = crate::soap::EnvelopeBuilder::new(actions::RENEW)
            .reference_parameter(&identifier_element(&Uuid::generate()))
            .body(&crate::eventing::subscription::encode_renew(None))
            .build();
        let fault_response = dispatcher.dispatch(&bogus);
        let doc = reader::parse(&fault_response).unwrap();
        assert!(Fault::from_body(&doc).unwrap().is_some());
        manager.shutdown(Duration::from_millis(100));
    }

    fn extract_id(response: &SubscribeResponse) -> String {
        let raw = &response.subscription_manager.reference_parameters[0];
        let fragment = reader::fragment_document(raw).unwrap();
        let doc = reader::parse(&fragment).unwrap();
        let identifier = doc
            .descendants()
            .find(|n| n.has_tag_name((ns::WSE, "Identifier")))
            .unwrap();
        Uuid::parse(reader::text(identifier)).unwrap().to_string()
    }
}
