// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report processor: applies the provider's report stream to the local
//! MDIB mirror, in version order, with gap detection and repair.
//!
//! Ordering: `expected = last_applied + 1`. A report with the expected
//! version applies immediately; older ones are replay and discarded; newer
//! episodic ones wait in a bounded re-order buffer until the window expires
//! or the buffer overflows, which triggers exactly one `GetMdib` refetch.
//!
//! Waveforms are lossy: a newer waveform applies immediately (late
//! episodic stragglers for the skipped versions are discarded as stale) and
//! a missed one is only counted, never re-requested.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::biceps::{Descriptor, State};
use crate::config::{RuntimeConfig, REORDER_BUFFER_CAPACITY};
use crate::ident::Uuid;
use crate::mdib::{ChangeSet, Mdib, MdibSnapshot, Report, SnapshotBuilder};
use crate::soap::MdibHeaders;

/// Stream statistics, updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub applied: AtomicU64,
    pub discarded_stale: AtomicU64,
    pub buffered: AtomicU64,
    pub waveform_dropouts: AtomicU64,
    pub resyncs: AtomicU64,
}

impl StreamStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.applied.load(Ordering::Relaxed),
            self.discarded_stale.load(Ordering::Relaxed),
            self.buffered.load(Ordering::Relaxed),
            self.waveform_dropouts.load(Ordering::Relaxed),
            self.resyncs.load(Ordering::Relaxed),
        )
    }
}

/// Why the processor wants a resynchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncReason {
    SequenceChanged,
    InstanceChanged,
    ReorderWindowExpired,
    ReorderBufferOverflow,
}

/// Callback asking the owner to refetch the MDIB and call
/// [`ReportProcessor::reset`]. Fired at most once per gap.
pub type ResyncListener = Box<dyn Fn(ResyncReason) + Send + Sync>;

/// Hook invoked with the staged change-set before it is installed into the
/// mirror. Post-commit observation goes through the mirror's ordinary
/// change observers.
pub type PreApplyHook = Box<dyn Fn(&ChangeSet) + Send + Sync>;

struct ProcessorState {
    bootstrapped: bool,
    sequence_id: Uuid,
    instance_id: Option<u64>,
    expected: u64,
    pending: BTreeMap<u64, (Report, Instant)>,
}

/// Consumer-side report pipeline over one MDIB mirror.
pub struct ReportProcessor {
    mdib: Arc<Mdib>,
    config: RuntimeConfig,
    state: Mutex<ProcessorState>,
    stats: StreamStats,
    resync_listener: Mutex<Option<ResyncListener>>,
    pre_apply_hooks: Mutex<Vec<PreApplyHook>>,
}

impl ReportProcessor {
    pub fn new(mdib: Arc<Mdib>, config: RuntimeConfig) -> Self {
        Self {
            mdib,
            config,
            state: Mutex::new(ProcessorState {
                bootstrapped: false,
                sequence_id: Uuid::nil(),
                instance_id: None,
                expected: 0,
                pending: BTreeMap::new(),
            }),
            stats: StreamStats::default(),
            resync_listener: Mutex::new(None),
            pre_apply_hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn on_resync(&self, listener: ResyncListener) {
        *self.resync_listener.lock() = Some(listener);
    }

    /// Register a hook that sees each change-set before it is installed.
    pub fn register_pre_apply_hook(&self, hook: PreApplyHook) {
        self.pre_apply_hooks.lock().push(hook);
    }

    /// Bootstrap (or re-bootstrap after a gap) from a full snapshot.
    pub fn reset(&self, snapshot: MdibSnapshot) {
        let mut state = self.state.lock();
        state.sequence_id = snapshot.sequence_id;
        state.instance_id = snapshot.instance_id;
        state.expected = snapshot.mdib_version + 1;
        state.pending.clear();
        state.bootstrapped = true;
        self.mdib.reset(snapshot);
        log::debug!(
            "[processor] bootstrapped at version {} (sequence {})",
            state.expected - 1,
            state.sequence_id
        );
    }

    /// Feed one notification. Mutation of the mirror happens inside a
    /// single critical section, so observers see whole-report snapshots.
    pub fn on_report(&self, headers: MdibHeaders, report: Report) {
        let mut state = self.state.lock();
        if !state.bootstrapped {
            self.stats.discarded_stale.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if headers.sequence_id != state.sequence_id {
            self.trigger_resync(&mut state, ResyncReason::SequenceChanged);
            return;
        }
        if headers.instance_id != state.instance_id {
            self.trigger_resync(&mut state, ResyncReason::InstanceChanged);
            return;
        }

        let version = headers.mdib_version;
        let lossy = matches!(report, Report::Waveform(_));

        if version < state.expected {
            // Replay or superseded: applying again would be a no-op, skip.
            if lossy {
                self.stats.waveform_dropouts.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.discarded_stale.fetch_add(1, Ordering::Relaxed);
            }
            return;
        }

        if version == state.expected {
            self.apply(&mut state, version, report);
            self.drain_pending(&mut state);
            return;
        }

        // version > expected
        if lossy {
            // Bridge with whatever older episodic reports already wait in
            // the buffer, then jump: waveform loss is not re-requested.
            let bridgeable: Vec<u64> = state
                .pending
                .range(..version)
                .map(|(v, _)| *v)
                .collect();
            for v in bridgeable {
                if let Some((pending, _)) = state.pending.remove(&v) {
                    self.apply(&mut state, v, pending);
                }
            }
            let skipped = version - state.expected;
            if skipped > 0 {
                self.stats
                    .waveform_dropouts
                    .fetch_add(skipped, Ordering::Relaxed);
            }
            self.apply(&mut state, version, report);
            self.drain_pending(&mut state);
            return;
        }

        self.stats.buffered.fetch_add(1, Ordering::Relaxed);
        state.pending.insert(version, (report, Instant::now()));
        if state.pending.len() > REORDER_BUFFER_CAPACITY {
            self.trigger_resync(&mut state, ResyncReason::ReorderBufferOverflow);
        }
    }

    /// Time-based half of the ordering rule: a held report older than the
    /// reorder window means the missing version is gone. Call periodically.
    pub fn tick(&self) {
        let mut state = self.state.lock();
        if !state.bootstrapped {
            return;
        }
        let window = self.config.timing().reorder_window;
        let expired = state
            .pending
            .values()
            .any(|(_, arrived)| arrived.elapsed() > window);
        if expired {
            self.trigger_resync(&mut state, ResyncReason::ReorderWindowExpired);
        }
    }

    fn drain_pending(&self, state: &mut ProcessorState) {
        while let Some((report, _)) = state.pending.remove(&state.expected) {
            let version = state.expected;
            self.apply(state, version, report);
        }
    }

    fn trigger_resync(&self, state: &mut ProcessorState, reason: ResyncReason) {
        // bootstrapped gates the listener: exactly one refetch per gap.
        state.bootstrapped = false;
        state.pending.clear();
        self.stats.resyncs.fetch_add(1, Ordering::Relaxed);
        log::debug!("[processor] resync required: {:?}", reason);
        if let Some(listener) = self.resync_listener.lock().as_ref() {
            listener(reason);
        }
    }

    fn apply(&self, state: &mut ProcessorState, version: u64, report: Report) {
        let guard = self.mdib.lock_commit();
        let current = self.mdib.snapshot();
        let mut builder = SnapshotBuilder::from(&current);
        let mut change = ChangeSet::new(version, state.sequence_id, state.instance_id);

        match report {
            Report::Metric(states) => {
                for s in states {
                    let s = Arc::new(s);
                    builder.put_state(Arc::clone(&s));
                    change.metric_states.push(s);
                }
            }
            Report::Alert(states) => {
                for s in states {
                    let s = Arc::new(s);
                    builder.put_state(Arc::clone(&s));
                    change.alert_states.push(s);
                }
            }
            Report::Component(states) => {
                for s in states {
                    let s = Arc::new(s);
                    builder.put_state(Arc::clone(&s));
                    change.component_states.push(s);
                }
            }
            Report::Operational(states) => {
                for s in states {
                    let s = Arc::new(s);
                    builder.put_state(Arc::clone(&s));
                    change.operational_states.push(s);
                }
            }
            Report::Waveform(states) => {
                for s in states {
                    let s = Arc::new(s);
                    builder.put_state(Arc::clone(&s));
                    change.waveform_states.push(s);
                }
            }
            Report::Context(states) => {
                for s in states {
                    let s = Arc::new(s);
                    builder.put_context_state(Arc::clone(&s));
                    change.context_states.push(s);
                }
            }
            Report::Description {
                created,
                updated,
                deleted,
                states,
            } => {
                apply_description(
                    &mut builder,
                    &mut change,
                    created,
                    updated,
                    deleted,
                    states,
                );
            }
            Report::OperationInvoked(_) | Report::SystemError { .. } => {
                // Not MDIB content; routed by the consumer facade.
                drop(guard);
                state.expected = version + 1;
                return;
            }
        }

        let snapshot = builder.build(version, state.sequence_id, state.instance_id);
        for hook in self.pre_apply_hooks.lock().iter() {
            hook(&change);
        }
        self.mdib.install(&guard, snapshot, Some(&change));
        drop(guard);

        state.expected = version + 1;
        self.stats.applied.fetch_add(1, Ordering::Relaxed);
    }
}

fn apply_description(
    builder: &mut SnapshotBuilder,
    change: &mut ChangeSet,
    created: Vec<Descriptor>,
    updated: Vec<Descriptor>,
    deleted: Vec<crate::biceps::Handle>,
    states: Vec<State>,
) {
    for descriptor in created {
        let descriptor = Arc::new(descriptor);
        builder.put_descriptor(Arc::clone(&descriptor));
        change.descriptors.created.push(descriptor);
    }
    for mut descriptor in updated {
        // The report omits parent linkage on updates when unchanged; keep
        // the mirror's.
        if descriptor.parent.is_none() {
            if let Some(existing) = builder.base().get_descriptor(&descriptor.handle) {
                descriptor.parent = existing.parent.clone();
            }
        }
        let descriptor = Arc::new(descriptor);
        builder.put_descriptor(Arc::clone(&descriptor));
        change.descriptors.updated.push(descriptor);
    }
    for state in states {
        let state = Arc::new(state);
        builder.put_state(Arc::clone(&state));
        change.descriptors.states.push(state);
    }
    for handle in deleted {
        builder.remove_descriptor(&handle);
        change.descriptors.deleted.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::{
        ComponentActivation, DescriptorPayload, MetricValue, StatePayload,
    };
    use crate::config::Timing;
    use crate::mdib::TransactionKind;
    use std::time::Duration;

    fn bootstrap_snapshot() -> MdibSnapshot {
        let provider = Mdib::new();
        let mut t = provider.begin(TransactionKind::Descriptor);
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
                    unit: crate::biceps::CodedValue::new("264864"),
                    resolution: 1.0,
                    category: crate::biceps::MetricCategory::Measurement,
                    availability: crate::biceps::MetricAvailability::Continuous,
                },
            ),
            None,
        )
        .unwrap();
        t.commit().unwrap();
        MdibSnapshot::clone(&provider.snapshot())
    }

    fn processor() -> (Arc<Mdib>, ReportProcessor) {
        let mirror = Arc::new(Mdib::new());
        let processor = ReportProcessor::new(Arc::clone(&mirror), RuntimeConfig::new());
        processor.reset(bootstrap_snapshot());
        (mirror, processor)
    }

    fn metric_report(value: f64, version: u64) -> Report {
        let mut state = State::new(
            "hr.num",
            StatePayload::NumericMetric {
                activation: ComponentActivation::On,
                value: Some(MetricValue::new(value)),
            },
        );
        state.version = version;
        Report::Metric(vec![state])
    }

    fn headers(mirror: &Mdib, version: u64) -> MdibHeaders {
        MdibHeaders {
            mdib_version: version,
            sequence_id: mirror.sequence_id(),
            instance_id: None,
        }
    }

    fn hr_value(mirror: &Mdib) -> Option<f64> {
        match &mirror.snapshot().get_state("hr.num")?.payload {
            StatePayload::NumericMetric { value, .. } => value.as_ref().and_then(|v| v.value),
            _ => None,
        }
    }

    #[test]
    fn test_in_order_apply() {
        let (mirror, processor) = processor();
        let base = mirror.mdib_version();

        let report = metric_report(72.0, base + 1);
        processor.on_report(headers(&mirror, base + 1), report);
        assert_eq!(mirror.mdib_version(), base + 1);
        assert_eq!(hr_value(&mirror), Some(72.0));

        let report = metric_report(73.0, base + 2);
        processor.on_report(headers(&mirror, base + 2), report);
        assert_eq!(mirror.mdib_version(), base + 2);
        assert_eq!(hr_value(&mirror), Some(73.0));
        assert_eq!(processor.stats().applied.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_replay_is_noop() {
        let (mirror, processor) = processor();
        let base = mirror.mdib_version();

        let report = metric_report(72.0, base + 1);
        processor.on_report(headers(&mirror, base + 1), report);
        // Replays (version < expected) are discarded, not re-applied.
        let replay = metric_report(99.0, base + 1);
        processor.on_report(headers(&mirror, base + 1), replay);

        assert_eq!(hr_value(&mirror), Some(72.0));
        assert_eq!(mirror.mdib_version(), base + 1);
        assert_eq!(processor.stats().discarded_stale.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_reorder_buffer_heals_gap() {
        let (mirror, processor) = processor();
        let base = mirror.mdib_version();

        // base+2 arrives before base+1.
        let late = metric_report(73.0, base + 2);
        processor.on_report(headers(&mirror, base + 2), late);
        assert_eq!(mirror.mdib_version(), base); // held

        let first = metric_report(72.0, base + 1);
        processor.on_report(headers(&mirror, base + 1), first);
        // Both applied, in order.
        assert_eq!(mirror.mdib_version(), base + 2);
        assert_eq!(hr_value(&mirror), Some(73.0));
    }

    #[test]
    fn test_reorder_window_expiry_requests_one_resync() {
        let (mirror, processor) = processor();
        let config = RuntimeConfig::new();
        let mut timing = Timing::default();
        timing.reorder_window = Duration::from_millis(1);
        config.set_timing(timing);
        let processor = {
            let p = ReportProcessor::new(Arc::clone(&mirror), config);
            p.reset(bootstrap_snapshot());
            p
        };
        let resyncs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&resyncs);
        processor.on_resync(Box::new(move |reason| sink.lock().push(reason)));

        let base = mirror.mdib_version();
        let late = metric_report(75.0, base + 3);
        processor.on_report(headers(&mirror, base + 3), late);

        std::thread::sleep(Duration::from_millis(5));
        processor.tick();
        processor.tick(); // second tick must not re-fire

        assert_eq!(
            resyncs.lock().as_slice(),
            &[ResyncReason::ReorderWindowExpired]
        );
        assert_eq!(processor.stats().resyncs.load(Ordering::Relaxed), 1);

        // After refetch, processing resumes.
        processor.reset(bootstrap_snapshot());
        let base = mirror.mdib_version();
        let report = metric_report(76.0, base + 1);
        processor.on_report(headers(&mirror, base + 1), report);
        assert_eq!(hr_value(&mirror), Some(76.0));
    }

    #[test]
    fn test_sequence_change_triggers_resync() {
        let (mirror, processor) = processor();
        let resyncs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&resyncs);
        processor.on_resync(Box::new(move |reason| sink.lock().push(reason)));

        let base = mirror.mdib_version();
        let report = metric_report(72.0, base + 1);
        let foreign = MdibHeaders {
            mdib_version: base + 1,
            sequence_id: Uuid::generate(),
            instance_id: None,
        };
        processor.on_report(foreign, report);
        assert_eq!(resyncs.lock().as_slice(), &[ResyncReason::SequenceChanged]);
    }

    #[test]
    fn test_waveform_gap_is_lossy_not_resync() {
        let (mirror, processor) = processor();
        let resyncs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&resyncs);
        processor.on_resync(Box::new(move |reason| sink.lock().push(reason)));

        // Add a waveform descriptor to the mirror snapshot first.
        let provider = Mdib::new();
        let mut t = provider.begin(TransactionKind::Descriptor);
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
                "ecg.rtsa",
                Some("ch0"),
                DescriptorPayload::RealTimeSampleArrayMetric {
                    unit: crate::biceps::CodedValue::new("266418"),
                    resolution: 0.01,
                    category: crate::biceps::MetricCategory::Measurement,
                    availability: crate::biceps::MetricAvailability::Continuous,
                    sample_period: Duration::from_millis(4),
                },
            ),
            None,
        )
        .unwrap();
        t.commit().unwrap();
        processor.reset(MdibSnapshot::clone(&provider.snapshot()));

        let base = mirror.mdib_version();
        let waveform = |version: u64, samples: Vec<f64>| {
            let mut state = State::new(
                "ecg.rtsa",
                StatePayload::RealTimeSampleArrayMetric {
                    activation: ComponentActivation::On,
                    value: Some(crate::biceps::SampleArrayValue {
                        samples,
                        validity: crate::biceps::MeasurementValidity::Valid,
                        determination_time: None,
                    }),
                },
            );
            state.version = version;
            Report::Waveform(vec![state])
        };

        processor.on_report(headers(&mirror, base + 1), waveform(base + 1, vec![1.0]));
        // base+2 lost in transport; base+3 arrives.
        processor.on_report(headers(&mirror, base + 3), waveform(base + 3, vec![3.0]));

        assert!(resyncs.lock().is_empty());
        assert_eq!(mirror.mdib_version(), base + 3);
        assert_eq!(
            processor.stats().waveform_dropouts.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_description_report_applies() {
        let (mirror, processor) = processor();
        let base = mirror.mdib_version();

        let new_channel = Descriptor::new("ch1", Some("vmd0"), DescriptorPayload::Channel);
        let state = State::new(
            "ch1",
            StatePayload::default_for(crate::biceps::DescriptorKind::Channel).unwrap(),
        );
        processor.on_report(
            headers(&mirror, base + 1),
            Report::Description {
                created: vec![new_channel],
                updated: Vec::new(),
                deleted: vec!["hr.num".to_string()],
                states: vec![state],
            },
        );

        let snapshot = mirror.snapshot();
        assert!(snapshot.get_descriptor("ch1").is_some());
        assert!(snapshot.get_descriptor("hr.num").is_none());
        assert!(snapshot.validate().is_ok());
    }
}
