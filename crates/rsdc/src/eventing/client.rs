// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer-side subscription lifecycle.
//!
//! Operates N subscriptions against one or more providers, auto-renews them
//! before expiry (or at a fixed interval), and on an "unknown subscription"
//! fault creates a fresh subscription and reports a gap so the report
//! processor can resynchronize.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::biceps::actions;
use crate::config::RuntimeConfig;
use crate::eventing::subscription::{
    encode_renew, EndpointReference, SubscribeRequest, SubscribeResponse,
};
use crate::ident::Uuid;
use crate::soap::{EnvelopeBuilder, SoapClient};
use crate::{Error, Result};

/// Callback fired when a subscription had to be re-created behind the
/// provider's back; the mirror may have missed reports.
pub type GapListener = Box<dyn Fn(Uuid) + Send + Sync>;

/// One active subscription as seen from the consumer.
pub struct ClientSubscription {
    /// Local key, stable across resubscribes.
    pub key: Uuid,
    event_source: String,
    filter: Vec<String>,
    manager: Mutex<EndpointReference>,
    expires_at: Mutex<Instant>,
    last_renew: Mutex<Instant>,
}

impl ClientSubscription {
    pub fn filter(&self) -> &[String] {
        &self.filter
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at
            .lock()
            .saturating_duration_since(Instant::now())
    }
}

/// Subscribe/renew/unsubscribe engine with a background renew thread.
pub struct SubscriptionClient {
    soap: SoapClient,
    /// Delivery endpoint handed to providers in `wse:NotifyTo`.
    notify_to: String,
    config: RuntimeConfig,
    subscriptions: DashMap<String, Arc<ClientSubscription>>,
    gap_listener: Mutex<Option<GapListener>>,
    shutdown: Arc<AtomicBool>,
    renewer: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionClient {
    pub fn new(soap: SoapClient, notify_to: &str, config: RuntimeConfig) -> Arc<Self> {
        let client = Arc::new(Self {
            soap,
            notify_to: notify_to.to_string(),
            config,
            subscriptions: DashMap::new(),
            gap_listener: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            renewer: Mutex::new(None),
        });
        let worker = Arc::clone(&client);
        let shutdown = Arc::clone(&client.shutdown);
        *client.renewer.lock() = Some(thread::spawn(move || {
            renew_loop(&worker, &shutdown);
        }));
        client
    }

    /// Register the gap callback (single listener).
    pub fn on_gap(&self, listener: GapListener) {
        *self.gap_listener.lock() = Some(listener);
    }

    /// Subscribe at `event_source` for the given actions. Returns the local
    /// subscription key.
    pub fn subscribe(
        &self,
        event_source: &str,
        filter: &[&str],
        expires: Option<Duration>,
    ) -> Result<Uuid> {
        let response = self.send_subscribe(event_source, filter, expires)?;
        let key = Uuid::generate();
        let subscription = Arc::new(ClientSubscription {
            key,
            event_source: event_source.to_string(),
            filter: filter.iter().map(|s| s.to_string()).collect(),
            manager: Mutex::new(response.subscription_manager),
            expires_at: Mutex::new(Instant::now() + response.expires),
            last_renew: Mutex::new(Instant::now()),
        });
        self.subscriptions.insert(key.to_string(), subscription);
        log::debug!(
            "[eventing] subscribed at {} for {} actions, {}s",
            event_source,
            filter.len(),
            response.expires.as_secs()
        );
        Ok(key)
    }

    pub fn subscription(&self, key: Uuid) -> Option<Arc<ClientSubscription>> {
        self.subscriptions
            .get(&key.to_string())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Renew one subscription now. On an authoritative "unknown
    /// subscription" fault, resubscribes and fires the gap listener.
    pub fn renew(&self, key: Uuid, expires: Option<Duration>) -> Result<Duration> {
        let subscription = self
            .subscription(key)
            .ok_or_else(|| Error::UnknownSubscription(key.to_string()))?;
        let manager = subscription.manager.lock().clone();

        let mut envelope =
            EnvelopeBuilder::new(actions::RENEW).body(&encode_renew(expires));
        for parameter in &manager.reference_parameters {
            envelope = envelope.reference_parameter(parameter);
        }

        match self.soap.request(&manager.address, envelope, true) {
            Ok(response) => {
                let granted = response.with_body(|body, _| {
                    crate::eventing::subscription::decode_expires(body)?
                        .ok_or_else(|| Error::InvalidExpiration("missing Expires".to_string()))
                })?;
                *subscription.expires_at.lock() = Instant::now() + granted;
                *subscription.last_renew.lock() = Instant::now();
                Ok(granted)
            }
            Err(Error::Fault(fault)) if fault.ends_subscription() => {
                log::debug!(
                    "[eventing] provider lost subscription {}, resubscribing",
                    key
                );
                self.resubscribe(&subscription)?;
                if let Some(listener) = self.gap_listener.lock().as_ref() {
                    listener(key);
                }
                Ok(subscription.remaining())
            }
            Err(error) => Err(error),
        }
    }

    /// Tear one subscription down at the provider.
    pub fn unsubscribe(&self, key: Uuid) -> Result<()> {
        let (_, subscription) = self
            .subscriptions
            .remove(&key.to_string())
            .ok_or_else(|| Error::UnknownSubscription(key.to_string()))?;
        let manager = subscription.manager.lock().clone();
        let mut envelope = EnvelopeBuilder::new(actions::UNSUBSCRIBE)
            .body("<wse:Unsubscribe/>");
        for parameter in &manager.reference_parameters {
            envelope = envelope.reference_parameter(parameter);
        }
        self.soap.request(&manager.address, envelope, false)?;
        Ok(())
    }

    /// Unsubscribe everything and stop the renew thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.renewer.lock().take() {
            let _ = handle.join();
        }
        let keys: Vec<Uuid> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().key)
            .collect();
        for key in keys {
            if let Err(error) = self.unsubscribe(key) {
                log::debug!("[eventing] unsubscribe {} on shutdown: {}", key, error);
            }
        }
    }

    fn resubscribe(&self, subscription: &Arc<ClientSubscription>) -> Result<()> {
        let filter: Vec<&str> = subscription.filter.iter().map(String::as_str).collect();
        let response = self.send_subscribe(&subscription.event_source, &filter, None)?;
        *subscription.manager.lock() = response.subscription_manager;
        *subscription.expires_at.lock() = Instant::now() + response.expires;
        Ok(())
    }

    fn send_subscribe(
        &self,
        event_source: &str,
        filter: &[&str],
        expires: Option<Duration>,
    ) -> Result<SubscribeResponse> {
        let mut request = SubscribeRequest::new(&self.notify_to, filter);
        request.expires = expires;
        let envelope = EnvelopeBuilder::new(actions::SUBSCRIBE).body(&request.encode());
        let response = self.soap.request(event_source, envelope, false)?;
        response.with_body(|body, input| SubscribeResponse::decode(body, input))
    }

    /// True when `subscription` is due for renewal under the configured
    /// policy: fixed interval (`eventing.renew_interval_ms`) or
    /// deadline-minus-margin.
    fn due_for_renew(&self, subscription: &ClientSubscription) -> bool {
        if let Some(interval) = self
            .config
            .get("eventing.renew_interval_ms")
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_millis)
        {
            return subscription.last_renew.lock().elapsed() >= interval;
        }
        subscription.remaining() <= self.config.timing().renew_safety_margin
    }
}

impl Drop for SubscriptionClient {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.renewer.lock().take() {
            let _ = handle.join();
        }
    }
}

fn renew_loop(client: &Arc<SubscriptionClient>, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        let due: Vec<Uuid> = client
            .subscriptions
            .iter()
            .filter(|entry| client.due_for_renew(entry.value()))
            .map(|entry| entry.value().key)
            .collect();
        for key in due {
            if let Err(error) = client.renew(key, None) {
                log::debug!("[eventing] auto-renew {} failed: {}", key, error);
            }
        }
        thread::sleep(Duration::from_millis(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::eventing::manager::SubscriptionManager;
    use crate::soap::{SoapDispatcher, SoapPoster};
    use std::sync::Arc as StdArc;

    /// Poster that loops requests straight into a provider-side dispatcher.
    struct LoopbackPoster {
        dispatcher: StdArc<SoapDispatcher>,
    }

    impl SoapPoster for LoopbackPoster {
        fn post(&self, _endpoint: &str, envelope: &str) -> Result<String> {
            Ok(self.dispatcher.dispatch(envelope))
        }
    }

    struct NullPoster;
    impl SoapPoster for NullPoster {
        fn post(&self, _: &str, _: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    fn provider_and_client() -> (Arc<SubscriptionManager>, Arc<SubscriptionClient>) {
        let manager = SubscriptionManager::new(
            "http://device/subs",
            Arc::new(NullPoster),
            RuntimeConfig::new(),
        );
        let mut dispatcher = SoapDispatcher::new();
        manager.register_handlers(&mut dispatcher);
        let soap = SoapClient::new(Arc::new(LoopbackPoster {
            dispatcher: StdArc::new(dispatcher),
        }));
        let client = SubscriptionClient::new(soap, "http://consumer/sink", RuntimeConfig::new());
        (manager, client)
    }

    #[test]
    fn test_subscribe_renew_unsubscribe_lifecycle() {
        let (manager, client) = provider_and_client();

        let key = client
            .subscribe(
                "http://device/subs",
                &[actions::EPISODIC_METRIC_REPORT],
                Some(Duration::from_secs(60)),
            )
            .unwrap();
        assert_eq!(manager.active_count(), 1);
        assert!(client.subscription(key).unwrap().remaining() > Duration::from_secs(50));

        let granted = client.renew(key, Some(Duration::from_secs(90))).unwrap();
        assert_eq!(granted, Duration::from_secs(90));

        client.unsubscribe(key).unwrap();
        assert_eq!(manager.active_count(), 0);
        assert_eq!(client.active_count(), 0);
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_unknown_subscription_triggers_resubscribe_and_gap() {
        let (manager, client) = provider_and_client();
        let key = client
            .subscribe(
                "http://device/subs",
                &[actions::EPISODIC_METRIC_REPORT],
                None,
            )
            .unwrap();

        let gaps: Arc<Mutex<Vec<Uuid>>> = Arc::new(Mutex::new(Vec::new()));
        let gaps_clone = Arc::clone(&gaps);
        client.on_gap(Box::new(move |key| gaps_clone.lock().push(key)));

        // Provider forgets the subscription (restart).
        let old_manager_count = manager.active_count();
        assert_eq!(old_manager_count, 1);
        for entry in manager_ids(&manager) {
            manager.unsubscribe(&entry).unwrap();
        }

        client.renew(key, None).unwrap();
        assert_eq!(gaps.lock().as_slice(), &[key]);
        // A fresh provider-side subscription exists again.
        assert_eq!(manager.active_count(), 1);
        manager.shutdown(Duration::from_millis(100));
    }

    fn manager_ids(manager: &Arc<SubscriptionManager>) -> Vec<String> {
        manager.test_ids()
    }

    #[test]
    fn test_auto_renew_keeps_subscription_alive() {
        let (manager, client) = provider_and_client();
        // Tight margin so the renew loop fires quickly.
        let mut timing = crate::config::Timing::default();
        timing.renew_safety_margin = Duration::from_secs(3600);
        client.config.set_timing(timing);

        let key = client
            .subscribe(
                "http://device/subs",
                &[actions::EPISODIC_METRIC_REPORT],
                Some(Duration::from_secs(2)),
            )
            .unwrap();

        // Every loop pass renews (margin exceeds lifetime).
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut renewed = false;
        while Instant::now() < deadline {
            if client.subscription(key).unwrap().remaining() > Duration::from_secs(30) {
                renewed = true;
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert!(renewed, "auto-renew never fired");
        manager.shutdown(Duration::from_millis(100));
    }
}
