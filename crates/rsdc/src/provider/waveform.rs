// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Waveform pump: drains a sample source into waveform transactions at a
//! fixed cadence.
//!
//! Cadence is not part of the protocol; the default is 100 ms, overridable
//! through `waveform.cadence_ms`. Each tick commits one waveform
//! transaction, so consecutive `mdib_version`s and per-handle sample order
//! fall out of the ordinary commit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::biceps::{Handle, SampleArrayValue};
use crate::config::{RuntimeConfig, WAVEFORM_CADENCE};
use crate::mdib::{Mdib, TransactionKind};

/// Source of real-time sample bundles, polled once per cadence tick.
pub trait WaveformSource: Send {
    /// Next batch of `(waveform handle, samples)` pairs. An empty batch
    /// skips the tick without committing.
    fn next_sample_bundle(&mut self) -> Vec<(Handle, SampleArrayValue)>;
}

/// Background thread feeding a [`WaveformSource`] into the MDIB.
pub struct WaveformPump {
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WaveformPump {
    pub fn spawn(
        mdib: Arc<Mdib>,
        mut source: Box<dyn WaveformSource>,
        config: RuntimeConfig,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let worker = thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let cadence = config.get_millis("waveform.cadence_ms", WAVEFORM_CADENCE);
                let tick_started = Instant::now();

                let bundle = source.next_sample_bundle();
                if !bundle.is_empty() {
                    let mut transaction = mdib.begin(TransactionKind::Waveform);
                    let mut staged = 0;
                    for (handle, samples) in bundle {
                        match transaction.set_samples(&handle, samples) {
                            Ok(()) => staged += 1,
                            Err(error) => {
                                log::debug!("[waveform] skipping '{}': {}", handle, error);
                            }
                        }
                    }
                    if staged > 0 {
                        if let Err(error) = transaction.commit() {
                            log::debug!("[waveform] commit failed: {}", error);
                        }
                    }
                }

                let elapsed = tick_started.elapsed();
                let mut remaining = cadence.saturating_sub(elapsed);
                while remaining > Duration::ZERO {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    let nap = remaining.min(Duration::from_millis(20));
                    thread::sleep(nap);
                    remaining = remaining.saturating_sub(nap);
                }
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

impl Drop for WaveformPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}
