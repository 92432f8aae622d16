// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end provider/consumer pipeline over in-memory transport.
//!
//! The consumer's requests loop straight into the provider's dispatcher;
//! the provider's notifications loop into the consumer's notification
//! entry point. Everything else (MDIB mirroring, ordering, subscriptions,
//! operations, gap recovery) is the real stack.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use rsdc::biceps::{
    actions, CodedValue, ContextAssociation, ContextPayload, ContextState, Descriptor,
    DescriptorPayload, InvocationState, MetricAvailability, MetricCategory, MetricValue,
    OperationKind, StatePayload,
};
use rsdc::config::RuntimeConfig;
use rsdc::consumer::SdcConsumer;
use rsdc::mdib::TransactionKind;
use rsdc::provider::{SdcProvider, SetRequest};
use rsdc::soap::SoapPoster;
use rsdc::{Error, Result};

/// Late-bound poster delivering provider notifications to the consumer.
/// Can be told to drop the next N matching envelopes (transport loss).
struct ConsumerSlot {
    consumer: Mutex<Option<Arc<SdcConsumer>>>,
    drop_matching: Mutex<Option<String>>,
    drops_left: AtomicU64,
}

impl ConsumerSlot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            consumer: Mutex::new(None),
            drop_matching: Mutex::new(None),
            drops_left: AtomicU64::new(0),
        })
    }

    fn bind(&self, consumer: Arc<SdcConsumer>) {
        *self.consumer.lock() = Some(consumer);
    }

    fn drop_next(&self, action: &str, count: u64) {
        *self.drop_matching.lock() = Some(action.to_string());
        self.drops_left.store(count, Ordering::Relaxed);
    }
}

impl SoapPoster for ConsumerSlot {
    fn post(&self, _endpoint: &str, envelope: &str) -> Result<String> {
        if let Some(action) = self.drop_matching.lock().as_ref() {
            if envelope.contains(action.as_str())
                && self
                    .drops_left
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
                        left.checked_sub(1)
                    })
                    .is_ok()
            {
                // Swallowed by the network.
                return Ok(String::new());
            }
        }
        let consumer = self.consumer.lock().clone();
        if let Some(consumer) = consumer {
            if let Err(error) = consumer.process_notification(envelope) {
                return Err(Error::PostFailed(error.to_string()));
            }
        }
        Ok(String::new())
    }
}

/// Consumer requests loop into the provider's dispatcher.
struct ProviderPoster {
    provider: Arc<SdcProvider>,
}

impl SoapPoster for ProviderPoster {
    fn post(&self, _endpoint: &str, envelope: &str) -> Result<String> {
        Ok(self.provider.dispatch(envelope))
    }
}

fn populate(provider: &SdcProvider) {
    let mut t = provider.mdib().begin(TransactionKind::Descriptor);
    t.insert(Descriptor::new("mds0", None, DescriptorPayload::Mds), None)
        .unwrap();
    t.insert(Descriptor::new("vmd0", Some("mds0"), DescriptorPayload::Vmd), None)
        .unwrap();
    t.insert(
        Descriptor::new("ch0", Some("vmd0"), DescriptorPayload::Channel),
        None,
    )
    .unwrap();
    t.insert(
        Descriptor::new(
            "hr.num",
            Some("ch0"),
            DescriptorPayload::NumericMetric {
                unit: CodedValue::new("264864"),
                resolution: 1.0,
                category: MetricCategory::Measurement,
                availability: MetricAvailability::Continuous,
            },
        ),
        None,
    )
    .unwrap();
    t.insert(
        Descriptor::new(
            "name.metric",
            Some("ch0"),
            DescriptorPayload::StringMetric {
                unit: CodedValue::new("262656"),
                category: MetricCategory::Setting,
                availability: MetricAvailability::Continuous,
            },
        ),
        None,
    )
    .unwrap();
    t.insert(
        Descriptor::new("pat", Some("mds0"), DescriptorPayload::PatientContext),
        None,
    )
    .unwrap();
    t.insert(Descriptor::new("sco", Some("mds0"), DescriptorPayload::Sco), None)
        .unwrap();
    t.insert(
        Descriptor::new(
            "op.name",
            Some("sco"),
            DescriptorPayload::Operation {
                kind: OperationKind::SetString,
                operation_target: "name.metric".to_string(),
            },
        ),
        None,
    )
    .unwrap();
    t.commit().unwrap();
}

fn pipeline() -> (Arc<SdcProvider>, Arc<SdcConsumer>, Arc<ConsumerSlot>) {
    let slot = ConsumerSlot::new();
    let provider = Arc::new(
        SdcProvider::builder()
            .xaddr("http://10.0.0.5:6464/device")
            .scope("sdc.ctxt.loc:/sdc/bldng/H1/flr/1")
            .with_poster(Arc::clone(&slot) as Arc<dyn SoapPoster>)
            .with_config(RuntimeConfig::new())
            .build()
            .unwrap(),
    );
    populate(&provider);
    provider.sco().register_default_handlers();

    let consumer = SdcConsumer::new(
        Arc::new(ProviderPoster {
            provider: Arc::clone(&provider),
        }),
        "http://consumer:9000/sink",
        RuntimeConfig::new(),
    );
    slot.bind(Arc::clone(&consumer));
    (provider, consumer, slot)
}

fn set_heart_rate(provider: &SdcProvider, value: f64) -> u64 {
    let mut t = provider.mdib().begin(TransactionKind::Metric);
    match &mut t.write_state("hr.num").unwrap().payload {
        StatePayload::NumericMetric { value: slot, .. } => {
            *slot = Some(MetricValue::new(value));
        }
        _ => unreachable!(),
    }
    t.commit().unwrap()
}

fn mirror_heart_rate(consumer: &SdcConsumer) -> Option<f64> {
    match &consumer.mdib().snapshot().get_state("hr.num")?.payload {
        StatePayload::NumericMetric { value, .. } => value.as_ref().and_then(|v| v.value),
        _ => None,
    }
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn test_connect_mirrors_full_mdib() {
    let (provider, consumer, _slot) = pipeline();
    consumer.connect("http://10.0.0.5:6464/device").unwrap();

    let mirror = consumer.mdib().snapshot();
    let source = provider.mdib().snapshot();
    assert_eq!(mirror.mdib_version, source.mdib_version);
    assert_eq!(mirror.sequence_id, source.sequence_id);
    assert_eq!(mirror.descriptor_count(), source.descriptor_count());
    assert!(mirror.validate().is_ok());

    provider.shutdown();
    consumer.shutdown();
}

#[test]
fn test_metric_update_reaches_mirror() {
    let (provider, consumer, _slot) = pipeline();
    consumer.connect("http://10.0.0.5:6464/device").unwrap();
    consumer.subscribe_all_reports().unwrap();

    let version = set_heart_rate(&provider, 72.0);
    assert!(wait_until(Duration::from_secs(2), || {
        mirror_heart_rate(&consumer) == Some(72.0)
    }));
    assert_eq!(consumer.mdib().mdib_version(), version);

    provider.shutdown();
    consumer.shutdown();
}

#[test]
fn test_report_stream_prefix_keeps_mirror_identical() {
    let (provider, consumer, _slot) = pipeline();
    consumer.connect("http://10.0.0.5:6464/device").unwrap();
    consumer.subscribe_all_reports().unwrap();

    for i in 0..20 {
        set_heart_rate(&provider, 60.0 + f64::from(i));
    }
    let final_version = provider.mdib().mdib_version();
    assert!(wait_until(Duration::from_secs(3), || {
        consumer.mdib().mdib_version() == final_version
    }));
    assert_eq!(mirror_heart_rate(&consumer), Some(79.0));
    assert_eq!(consumer.stats().resyncs.load(Ordering::Relaxed), 0);

    provider.shutdown();
    consumer.shutdown();
}

#[test]
fn test_context_association_mirrors() {
    let (provider, consumer, _slot) = pipeline();
    consumer.connect("http://10.0.0.5:6464/device").unwrap();
    consumer.subscribe_all_reports().unwrap();

    let mut t = provider.mdib().begin(TransactionKind::Context);
    let mut patient = ContextState::new("pat.1", "pat", ContextPayload::empty_patient());
    patient.association = ContextAssociation::Associated;
    t.insert_context_state(patient).unwrap();
    let version = t.commit().unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        consumer.mdib().mdib_version() == version
    }));
    let contexts = consumer.mdib().snapshot().context_states_of("pat");
    let associated: Vec<_> = contexts.iter().filter(|c| c.is_associated()).collect();
    assert_eq!(associated.len(), 1);
    assert_eq!(associated[0].handle, "pat.1");
    assert_eq!(associated[0].binding_mdib_version, Some(version));

    provider.shutdown();
    consumer.shutdown();
}

#[test]
fn test_operation_invocation_lifecycle() {
    let (provider, consumer, _slot) = pipeline();
    consumer.connect("http://10.0.0.5:6464/device").unwrap();
    consumer.subscribe_all_reports().unwrap();

    let (transaction_id, immediate) = consumer
        .invoke("op.name", SetRequest::SetString("Dräger".to_string()))
        .unwrap();
    assert_eq!(immediate, InvocationState::Wait);

    let report = consumer
        .wait_for_invocation(transaction_id, Duration::from_secs(2))
        .unwrap();
    assert_eq!(report.transaction_id, transaction_id);
    assert_eq!(report.invocation_state, InvocationState::Finished);
    assert_eq!(report.operation_target.as_deref(), Some("name.metric"));

    // The state change also arrives as an ordinary metric report.
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(
            &consumer
                .mdib()
                .snapshot()
                .get_state("name.metric")
                .map(|s| s.payload.clone()),
            Some(StatePayload::StringMetric { value: Some(v), .. })
                if v.value.as_deref() == Some("Dräger")
        )
    }));

    provider.shutdown();
    consumer.shutdown();
}

#[test]
fn test_gap_recovery_after_dropped_report() {
    let (provider, consumer, slot) = pipeline();
    // Tight reorder window so the gap is declared quickly.
    consumer.connect("http://10.0.0.5:6464/device").unwrap();
    consumer.subscribe_all_reports().unwrap();

    // Lose exactly one metric report in transport.
    slot.drop_next(actions::EPISODIC_METRIC_REPORT, 1);
    set_heart_rate(&provider, 70.0); // dropped
    set_heart_rate(&provider, 71.0); // held, then triggers the gap
    set_heart_rate(&provider, 72.0);

    assert!(wait_until(Duration::from_secs(3), || {
        mirror_heart_rate(&consumer) == Some(72.0)
            && consumer.mdib().mdib_version() == provider.mdib().mdib_version()
    }));
    assert_eq!(consumer.stats().resyncs.load(Ordering::Relaxed), 1);

    // The stream continues normally after recovery.
    let version = set_heart_rate(&provider, 73.0);
    assert!(wait_until(Duration::from_secs(2), || {
        consumer.mdib().mdib_version() == version
    }));

    provider.shutdown();
    consumer.shutdown();
}

#[test]
fn test_shutdown_sends_subscription_end() {
    let (provider, consumer, _slot) = pipeline();
    consumer.connect("http://10.0.0.5:6464/device").unwrap();
    consumer.subscribe_all_reports().unwrap();

    let ends = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ends);
    consumer.on_subscription_end(Box::new(move |reason| {
        sink.lock().push(reason);
    }));

    provider.shutdown();
    assert!(wait_until(Duration::from_secs(2), || !ends.lock().is_empty()));
    assert_eq!(
        ends.lock()[0],
        Some(rsdc::eventing::EndReason::SourceShuttingDown)
    );
    consumer.shutdown();
}

#[test]
fn test_subscription_expires_without_renew() {
    let (provider, consumer, _slot) = pipeline();

    // Subscribe straight at the manager (no auto-renewing client behind
    // it), with a one-second lifetime.
    let mut request = rsdc::eventing::SubscribeRequest::new(
        "http://consumer:9000/sink",
        &[actions::EPISODIC_METRIC_REPORT],
    );
    request.expires = Some(Duration::from_secs(1));
    provider.subscriptions().subscribe(request).unwrap();
    assert_eq!(provider.subscriptions().active_count(), 1);

    // Expiration is honored within about a second of the deadline.
    assert!(wait_until(Duration::from_secs(3), || {
        provider.subscriptions().active_count() == 0
    }));

    provider.shutdown();
    consumer.shutdown();
}

#[test]
fn test_system_error_report_is_filterable() {
    let (provider, consumer, _slot) = pipeline();
    consumer.connect("http://10.0.0.5:6464/device").unwrap();
    consumer
        .subscribe(&[actions::SYSTEM_ERROR_REPORT])
        .unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    consumer.on_system_error(Box::new(move |code, text| {
        sink.lock().push((code.to_string(), text.to_string()));
    }));

    provider.report_system_error("E-7", "self-test failed");
    assert!(wait_until(Duration::from_secs(2), || !errors.lock().is_empty()));
    assert_eq!(
        errors.lock()[0],
        ("E-7".to_string(), "self-test failed".to_string())
    );

    provider.shutdown();
    consumer.shutdown();
}
