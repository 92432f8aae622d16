// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic reporter: batches the states touched since the last tick into
//! Periodic*Report notifications at a configurable interval.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::biceps::{actions, Handle, StateKind};
use crate::config::RuntimeConfig;
use crate::eventing::SubscriptionManager;
use crate::mdib::{messages, Mdib};
use crate::soap::MdibHeaders;

#[derive(Default)]
struct Touched {
    metric: BTreeSet<Handle>,
    alert: BTreeSet<Handle>,
    component: BTreeSet<Handle>,
    operational: BTreeSet<Handle>,
    context: BTreeSet<Handle>,
}

impl Touched {
    fn is_empty(&self) -> bool {
        self.metric.is_empty()
            && self.alert.is_empty()
            && self.component.is_empty()
            && self.operational.is_empty()
            && self.context.is_empty()
    }
}

/// Accumulates change-set handles and emits periodic reports on a timer.
pub struct PeriodicReporter {
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicReporter {
    /// Wire the reporter: registers an MDIB observer collecting touched
    /// handles and spawns the tick thread publishing through `manager`.
    pub fn spawn(
        mdib: Arc<Mdib>,
        manager: Arc<SubscriptionManager>,
        config: RuntimeConfig,
    ) -> Self {
        let touched = Arc::new(Mutex::new(Touched::default()));

        let collector = Arc::clone(&touched);
        mdib.register_observer(Box::new(move |change| {
            let mut touched = collector.lock();
            for state in &change.metric_states {
                touched.metric.insert(state.descriptor_handle.clone());
            }
            for state in &change.alert_states {
                touched.alert.insert(state.descriptor_handle.clone());
            }
            for state in &change.component_states {
                touched.component.insert(state.descriptor_handle.clone());
            }
            for state in &change.operational_states {
                touched.operational.insert(state.descriptor_handle.clone());
            }
            for state in &change.context_states {
                touched.context.insert(state.handle.clone());
            }
            // Waveforms deliberately excluded: the stream itself is the
            // periodic channel for them.
        }));

        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let worker = thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let interval = config.timing().periodic_report_interval;
                let wake_at = Instant::now() + interval;
                while Instant::now() < wake_at {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(Duration::from_millis(50));
                }

                let batch = std::mem::take(&mut *touched.lock());
                if batch.is_empty() {
                    continue;
                }
                publish_batch(&mdib, &manager, &batch);
            }
        });

        Self {
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn publish_batch(mdib: &Mdib, manager: &SubscriptionManager, batch: &Touched) {
    let snapshot = mdib.snapshot();
    let headers = MdibHeaders {
        mdib_version: snapshot.mdib_version,
        sequence_id: snapshot.sequence_id,
        instance_id: snapshot.instance_id,
    };

    let state_batches = [
        (
            &batch.metric,
            StateKind::Metric,
            actions::PERIODIC_METRIC_REPORT,
            "PeriodicMetricReport",
            "MetricState",
        ),
        (
            &batch.alert,
            StateKind::Alert,
            actions::PERIODIC_ALERT_REPORT,
            "PeriodicAlertReport",
            "AlertState",
        ),
        (
            &batch.component,
            StateKind::Component,
            actions::PERIODIC_COMPONENT_REPORT,
            "PeriodicComponentReport",
            "ComponentState",
        ),
        (
            &batch.operational,
            StateKind::Operational,
            actions::PERIODIC_OPERATIONAL_STATE_REPORT,
            "PeriodicOperationalStateReport",
            "OperationState",
        ),
    ];

    for (handles, expected_kind, action, element, state_element) in state_batches {
        let states: Vec<_> = handles
            .iter()
            .filter_map(|handle| snapshot.get_state(handle).cloned())
            .filter(|state| state.kind() == expected_kind)
            .collect();
        if states.is_empty() {
            continue;
        }
        let body =
            messages::encode_periodic_state_report(element, state_element, &states, &snapshot);
        manager.publish(action, &body, headers);
    }

    let contexts: Vec<_> = batch
        .context
        .iter()
        .filter_map(|handle| snapshot.get_context_state(handle).cloned())
        .collect();
    if !contexts.is_empty() {
        let body = messages::encode_periodic_context_report(&contexts, &snapshot);
        manager.publish(actions::PERIODIC_CONTEXT_REPORT, &body, headers);
    }
}
