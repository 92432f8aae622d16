// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SCO: set-service dispatch and the invocation lifecycle.
//!
//! Every set operation runs through the same pipeline: route by operation
//! handle, allocate a `TransactionId`, answer immediately with `Wait`
//! (or `Fin` on the fast path), execute the registered handler on the SCO
//! worker thread, then publish the final `OperationInvokedReport` carrying
//! the `OperationTargetRef` of the entities actually touched.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use roxmltree::Node;

use crate::biceps::qname::{ns, QName};
use crate::biceps::{
    actions, ContextState, Handle, InvocationError, InvocationState, State, StatePayload,
};
use crate::eventing::SubscriptionManager;
use crate::mdib::messages::{encode_operation_invoked_report, InvocationReportPart};
use crate::mdib::{Mdib, TransactionKind};
use crate::soap::{MdibHeaders, RequestContext, SoapDispatcher, SoapResponse};
use crate::xml::codec::{decode_context_state, decode_state, encode_context_state, encode_state};
use crate::xml::{reader, XmlWriter};
use crate::{Error, Result};

/// Typed payload of a set-service request.
#[derive(Debug, Clone)]
pub enum SetRequest {
    SetValue(f64),
    SetString(String),
    Activate(Vec<String>),
    SetMetricState(Vec<State>),
    SetComponentState(Vec<State>),
    SetAlertState(Vec<State>),
    SetContextState(Vec<ContextState>),
}

impl SetRequest {
    /// Response action of a set-service request action.
    fn response_action(action: &str) -> Option<&'static str> {
        Some(match action {
            actions::SET_VALUE => actions::SET_VALUE_RESPONSE,
            actions::SET_STRING => actions::SET_STRING_RESPONSE,
            actions::ACTIVATE => actions::ACTIVATE_RESPONSE,
            actions::SET_METRIC_STATE => actions::SET_METRIC_STATE_RESPONSE,
            actions::SET_COMPONENT_STATE => actions::SET_COMPONENT_STATE_RESPONSE,
            actions::SET_ALERT_STATE => actions::SET_ALERT_STATE_RESPONSE,
            actions::SET_CONTEXT_STATE => actions::SET_CONTEXT_STATE_RESPONSE,
            _ => return None,
        })
    }

    /// Encode a full request body (consumer side).
    pub fn encode(&self, operation_handle: &str) -> String {
        let element = match self {
            Self::SetValue(_) => "SetValue",
            Self::SetString(_) => "SetString",
            Self::Activate(_) => "Activate",
            Self::SetMetricState(_) => "SetMetricState",
            Self::SetComponentState(_) => "SetComponentState",
            Self::SetAlertState(_) => "SetAlertState",
            Self::SetContextState(_) => "SetContextState",
        };
        let mut w = XmlWriter::new();
        w.open(QName::new(ns::MSG, element));
        w.leaf(QName::new(ns::MSG, "OperationHandleRef"), operation_handle);
        match self {
            Self::SetValue(value) => {
                w.leaf(QName::new(ns::MSG, "RequestedNumericValue"), &value.to_string());
            }
            Self::SetString(value) => {
                w.leaf(QName::new(ns::MSG, "RequestedStringValue"), value);
            }
            Self::Activate(arguments) => {
                for argument in arguments {
                    w.open(QName::new(ns::MSG, "Argument"));
                    w.leaf(QName::new(ns::MSG, "ArgValue"), argument);
                    w.close();
                }
            }
            Self::SetMetricState(states)
            | Self::SetComponentState(states)
            | Self::SetAlertState(states) => {
                for state in states {
                    encode_state(&mut w, QName::new(ns::MSG, "ProposedState"), state);
                }
            }
            Self::SetContextState(states) => {
                for state in states {
                    encode_context_state(&mut w, QName::new(ns::MSG, "ProposedContextState"), state);
                }
            }
        }
        w.close();
        w.finish()
    }

    /// Decode a request body by its action.
    pub fn decode(action: &str, body: Node<'_, '_>, input: &str) -> Result<(Handle, Self)> {
        let operation_handle =
            reader::text(reader::require_child(body, ns::MSG, "OperationHandleRef")?).to_string();
        let request = match action {
            actions::SET_VALUE => {
                let raw = reader::text(reader::require_child(
                    body,
                    ns::MSG,
                    "RequestedNumericValue",
                )?);
                Self::SetValue(raw.parse::<f64>().map_err(|_| {
                    Error::Xml(format!("bad RequestedNumericValue '{}'", raw))
                })?)
            }
            actions::SET_STRING => Self::SetString(
                reader::text(reader::require_child(body, ns::MSG, "RequestedStringValue")?)
                    .to_string(),
            ),
            actions::ACTIVATE => Self::Activate(
                reader::children(body, ns::MSG, "Argument")
                    .into_iter()
                    .filter_map(|argument| reader::child(argument, ns::MSG, "ArgValue"))
                    .map(|value| reader::text(value).to_string())
                    .collect(),
            ),
            actions::SET_METRIC_STATE => Self::SetMetricState(decode_proposed(body, input)?),
            actions::SET_COMPONENT_STATE => Self::SetComponentState(decode_proposed(body, input)?),
            actions::SET_ALERT_STATE => Self::SetAlertState(decode_proposed(body, input)?),
            actions::SET_CONTEXT_STATE => Self::SetContextState(
                reader::children(body, ns::MSG, "ProposedContextState")
                    .into_iter()
                    .map(|node| decode_context_state(node, input, false))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => return Err(Error::UnknownAction(other.to_string())),
        };
        Ok((operation_handle, request))
    }
}

fn decode_proposed(body: Node<'_, '_>, input: &str) -> Result<Vec<State>> {
    reader::children(body, ns::MSG, "ProposedState")
        .into_iter()
        .map(|node| decode_state(node, input, false))
        .collect()
}

/// Final outcome of an operation handler.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub state: InvocationState,
    /// Descriptor/state handles actually affected (`OperationTargetRef`).
    pub targets: Vec<Handle>,
    pub error: Option<(InvocationError, String)>,
}

impl OperationOutcome {
    pub fn finished(target: &str) -> Self {
        Self {
            state: InvocationState::Finished,
            targets: vec![target.to_string()],
            error: None,
        }
    }

    pub fn failed(error: InvocationError, message: &str) -> Self {
        Self {
            state: InvocationState::Failed,
            targets: Vec::new(),
            error: Some((error, message.to_string())),
        }
    }
}

/// Role-provider seam: one handler per operation descriptor handle.
pub trait OperationHandler: Send + Sync {
    fn invoke(&self, mdib: &Arc<Mdib>, target: &Handle, request: SetRequest) -> OperationOutcome;
}

impl<F> OperationHandler for F
where
    F: Fn(&Arc<Mdib>, &Handle, SetRequest) -> OperationOutcome + Send + Sync,
{
    fn invoke(&self, mdib: &Arc<Mdib>, target: &Handle, request: SetRequest) -> OperationOutcome {
        self(mdib, target, request)
    }
}

struct QueuedInvocation {
    operation_handle: Handle,
    target: Handle,
    transaction_id: u64,
    request: SetRequest,
    handler: Arc<dyn OperationHandler>,
}

/// Service controller object: routes set requests, runs handlers, emits
/// invocation reports.
pub struct ScoController {
    mdib: Arc<Mdib>,
    publisher: Arc<SubscriptionManager>,
    handlers: DashMap<Handle, Arc<dyn OperationHandler>>,
    transaction_counter: AtomicU64,
    /// Fast path answers `Fin` synchronously, skipping `Wait`.
    fast_path: bool,
    queue: Sender<QueuedInvocation>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl ScoController {
    pub fn new(mdib: Arc<Mdib>, publisher: Arc<SubscriptionManager>, fast_path: bool) -> Arc<Self> {
        let (queue, jobs) = unbounded::<QueuedInvocation>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let controller = Arc::new(Self {
            mdib,
            publisher,
            handlers: DashMap::new(),
            transaction_counter: AtomicU64::new(0),
            fast_path,
            queue,
            worker: Mutex::new(None),
            shutdown: Arc::clone(&shutdown),
        });

        let worker_ref = Arc::clone(&controller);
        *controller.worker.lock() = Some(thread::spawn(move || {
            while !worker_ref.shutdown.load(Ordering::Relaxed) {
                match jobs.recv_timeout(Duration::from_millis(100)) {
                    Ok(job) => {
                        let _ = worker_ref.execute(job);
                    }
                    Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        }));
        controller
    }

    /// Register the handler executing one operation descriptor.
    pub fn register_handler(&self, operation_handle: &str, handler: Arc<dyn OperationHandler>) {
        self.handlers.insert(operation_handle.to_string(), handler);
    }

    /// Register built-in direct-apply handlers for every operation currently
    /// in the MDIB (role glue for plain value setters).
    pub fn register_default_handlers(&self) {
        let snapshot = self.mdib.snapshot();
        for descriptor in snapshot.descriptors() {
            if descriptor.kind().is_operation()
                && !self.handlers.contains_key(&descriptor.handle)
            {
                self.handlers
                    .insert(descriptor.handle.clone(), Arc::new(DirectApplyHandler));
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Register every set-service action on a dispatcher.
    pub fn register_handlers_on(self: &Arc<Self>, dispatcher: &mut SoapDispatcher) {
        for action in [
            actions::SET_VALUE,
            actions::SET_STRING,
            actions::ACTIVATE,
            actions::SET_METRIC_STATE,
            actions::SET_COMPONENT_STATE,
            actions::SET_ALERT_STATE,
            actions::SET_CONTEXT_STATE,
        ] {
            let controller = Arc::clone(self);
            dispatcher.register(
                action,
                Arc::new(move |ctx: &RequestContext<'_, '_>| controller.handle_request(ctx)),
            );
        }
    }

    fn handle_request(&self, ctx: &RequestContext<'_, '_>) -> Result<SoapResponse> {
        let action = ctx.headers.action.as_str();
        let response_action = SetRequest::response_action(action)
            .ok_or_else(|| Error::UnknownAction(action.to_string()))?;
        let (operation_handle, request) = SetRequest::decode(action, ctx.body, ctx.input)?;

        let transaction_id = self.transaction_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = self.mdib.snapshot();
        let headers = MdibHeaders {
            mdib_version: snapshot.mdib_version,
            sequence_id: snapshot.sequence_id,
            instance_id: snapshot.instance_id,
        };

        // Invalid operation target is a domain fault: immediate Fail.
        let Some(descriptor) = snapshot.get_descriptor(&operation_handle) else {
            log::debug!("[sco] unknown operation handle '{}'", operation_handle);
            return Ok(SoapResponse::new(
                response_action,
                encode_set_response(
                    response_element(response_action),
                    transaction_id,
                    InvocationState::Failed,
                    Some(InvocationError::InvalidValue),
                ),
            )
            .with_mdib(headers));
        };
        let Some(target) = descriptor.operation_target().cloned() else {
            return Ok(SoapResponse::new(
                response_action,
                encode_set_response(
                    response_element(response_action),
                    transaction_id,
                    InvocationState::Failed,
                    Some(InvocationError::InvalidValue),
                ),
            )
            .with_mdib(headers));
        };
        let Some(handler) = self
            .handlers
            .get(&operation_handle)
            .map(|entry| Arc::clone(entry.value()))
        else {
            log::debug!("[sco] no handler for operation '{}'", operation_handle);
            return Ok(SoapResponse::new(
                response_action,
                encode_set_response(
                    response_element(response_action),
                    transaction_id,
                    InvocationState::Failed,
                    Some(InvocationError::Unknown),
                ),
            )
            .with_mdib(headers));
        };

        let job = QueuedInvocation {
            operation_handle,
            target,
            transaction_id,
            request,
            handler,
        };

        let immediate_state = if self.fast_path {
            // Fast path: run synchronously and answer with the final state.
            self.execute(job)
        } else {
            let _ = self.queue.send(job);
            InvocationState::Wait
        };

        Ok(SoapResponse::new(
            response_action,
            encode_set_response(
                response_element(response_action),
                transaction_id,
                immediate_state,
                None,
            ),
        )
        .with_mdib(headers))
    }

    /// Run one queued invocation and publish its final report. Returns the
    /// final invocation state (used by the fast path).
    fn execute(&self, job: QueuedInvocation) -> InvocationState {
        let outcome = job
            .handler
            .invoke(&self.mdib, &job.target, job.request);
        let snapshot = self.mdib.snapshot();
        let part = InvocationReportPart {
            operation_handle: job.operation_handle,
            transaction_id: job.transaction_id,
            invocation_state: outcome.state,
            operation_target: outcome.targets.first().cloned(),
            error: outcome.error,
        };
        let body =
            encode_operation_invoked_report(snapshot.mdib_version, snapshot.sequence_id, &part);
        self.publisher.publish(
            actions::OPERATION_INVOKED_REPORT,
            &body,
            MdibHeaders {
                mdib_version: snapshot.mdib_version,
                sequence_id: snapshot.sequence_id,
                instance_id: snapshot.instance_id,
            },
        );
        outcome.state
    }
}

impl Drop for ScoController {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn response_element(response_action: &str) -> &'static str {
    match response_action {
        actions::SET_VALUE_RESPONSE => "SetValueResponse",
        actions::SET_STRING_RESPONSE => "SetStringResponse",
        actions::ACTIVATE_RESPONSE => "ActivateResponse",
        actions::SET_METRIC_STATE_RESPONSE => "SetMetricStateResponse",
        actions::SET_COMPONENT_STATE_RESPONSE => "SetComponentStateResponse",
        actions::SET_ALERT_STATE_RESPONSE => "SetAlertStateResponse",
        _ => "SetContextStateResponse",
    }
}

/// Encode an `AbstractSetResponse` body.
pub fn encode_set_response(
    element_local: &'static str,
    transaction_id: u64,
    state: InvocationState,
    error: Option<InvocationError>,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, element_local));
    w.open(QName::new(ns::MSG, "InvocationInfo"));
    w.leaf(QName::new(ns::MSG, "TransactionId"), &transaction_id.to_string());
    w.leaf(QName::new(ns::MSG, "InvocationState"), state.as_str());
    if let Some(error) = error {
        w.leaf(QName::new(ns::MSG, "InvocationError"), error.as_str());
    }
    w.close();
    w.close();
    w.finish()
}

/// Decode an `AbstractSetResponse` body (consumer side).
pub fn decode_set_response(body: Node<'_, '_>) -> Result<(u64, InvocationState)> {
    let info = reader::require_child(body, ns::MSG, "InvocationInfo")?;
    let transaction_id = reader::text(reader::require_child(info, ns::MSG, "TransactionId")?)
        .parse::<u64>()
        .map_err(|_| Error::Xml("bad TransactionId".to_string()))?;
    let token = reader::text(reader::require_child(info, ns::MSG, "InvocationState")?);
    let state = InvocationState::parse(token)
        .ok_or_else(|| Error::Xml(format!("bad InvocationState '{}'", token)))?;
    Ok((transaction_id, state))
}

/// Built-in handler applying the request straight to the target state
/// through the matching transaction kind.
pub struct DirectApplyHandler;

impl OperationHandler for DirectApplyHandler {
    fn invoke(&self, mdib: &Arc<Mdib>, target: &Handle, request: SetRequest) -> OperationOutcome {
        match request {
            SetRequest::SetValue(value) => {
                apply_metric(mdib, target, |payload| match payload {
                    StatePayload::NumericMetric { value: slot, .. } => {
                        *slot = Some(crate::biceps::MetricValue::new(value));
                        true
                    }
                    _ => false,
                })
            }
            SetRequest::SetString(value) => apply_metric(mdib, target, |payload| match payload {
                StatePayload::StringMetric { value: slot, .. }
                | StatePayload::EnumStringMetric { value: slot, .. } => {
                    *slot = Some(crate::biceps::StringMetricValue::new(&value));
                    true
                }
                _ => false,
            }),
            SetRequest::SetMetricState(states) => {
                apply_states(mdib, TransactionKind::Metric, states)
            }
            SetRequest::SetComponentState(states) => {
                apply_states(mdib, TransactionKind::Component, states)
            }
            SetRequest::SetAlertState(states) => apply_states(mdib, TransactionKind::Alert, states),
            SetRequest::SetContextState(states) => apply_context_states(mdib, states),
            SetRequest::Activate(_) => {
                // Activate has no generic semantics; role providers register
                // their own handler.
                OperationOutcome::failed(
                    InvocationError::Unspecified,
                    "no activation behavior registered",
                )
            }
        }
    }
}

fn apply_metric(
    mdib: &Arc<Mdib>,
    target: &Handle,
    mutate: impl FnOnce(&mut StatePayload) -> bool,
) -> OperationOutcome {
    let mut transaction = mdib.begin(TransactionKind::Metric);
    let state = match transaction.write_state(target) {
        Ok(state) => state,
        Err(error) => {
            return OperationOutcome::failed(InvocationError::InvalidValue, &error.to_string())
        }
    };
    if !mutate(&mut state.payload) {
        return OperationOutcome::failed(InvocationError::InvalidValue, "target kind mismatch");
    }
    match transaction.commit() {
        Ok(_) => OperationOutcome::finished(target),
        Err(error) => OperationOutcome::failed(InvocationError::Other, &error.to_string()),
    }
}

fn apply_states(mdib: &Arc<Mdib>, kind: TransactionKind, states: Vec<State>) -> OperationOutcome {
    let mut transaction = mdib.begin(kind);
    let mut targets = Vec::new();
    for proposed in states {
        let handle = proposed.descriptor_handle.clone();
        match transaction.write_state(&handle) {
            Ok(state) => {
                state.payload = proposed.payload;
                targets.push(handle);
            }
            Err(error) => {
                return OperationOutcome::failed(InvocationError::InvalidValue, &error.to_string())
            }
        }
    }
    match transaction.commit() {
        Ok(_) => OperationOutcome {
            state: InvocationState::Finished,
            targets,
            error: None,
        },
        Err(error) => OperationOutcome::failed(InvocationError::Other, &error.to_string()),
    }
}

/// SetContextState on an unknown descriptor handle fails the invocation
/// (domain fault), it does not raise a SOAP fault.
fn apply_context_states(mdib: &Arc<Mdib>, states: Vec<ContextState>) -> OperationOutcome {
    let snapshot = mdib.snapshot();
    for state in &states {
        if snapshot.get_descriptor(&state.descriptor_handle).is_none() {
            return OperationOutcome::failed(
                InvocationError::InvalidValue,
                &format!("unknown context descriptor '{}'", state.descriptor_handle),
            );
        }
    }

    let mut transaction = mdib.begin(TransactionKind::Context);
    let mut targets = Vec::new();
    for proposed in states {
        let handle = proposed.handle.clone();
        let exists = snapshot.get_context_state(&handle).is_some();
        let result = if exists {
            transaction.write_context_state(&handle).map(|state| {
                state.association = proposed.association;
                state.payload = proposed.payload.clone();
                state.identifications = proposed.identifications.clone();
            })
        } else {
            transaction.insert_context_state(proposed)
        };
        match result {
            Ok(()) => targets.push(handle),
            Err(error) => {
                return OperationOutcome::failed(InvocationError::InvalidValue, &error.to_string())
            }
        }
    }
    match transaction.commit() {
        Ok(_) => OperationOutcome {
            state: InvocationState::Finished,
            targets,
            error: None,
        },
        Err(error) => OperationOutcome::failed(InvocationError::Other, &error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::{
        CodedValue, ContextAssociation, ContextPayload, Descriptor, DescriptorPayload,
        MetricAvailability, MetricCategory, OperationKind,
    };
    use crate::config::RuntimeConfig;
    use crate::soap::{EnvelopeBuilder, SoapPoster};

    struct NullPoster;
    impl SoapPoster for NullPoster {
        fn post(&self, _: &str, _: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    fn provider_mdib() -> Arc<Mdib> {
        let mdib = Arc::new(Mdib::new());
        let mut t = mdib.begin(TransactionKind::Descriptor);
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
        t.insert(
            Descriptor::new("pat", Some("mds0"), DescriptorPayload::PatientContext),
            None,
        )
        .unwrap();
        t.insert(
            Descriptor::new(
                "op.ctx",
                Some("sco"),
                DescriptorPayload::Operation {
                    kind: OperationKind::SetContextState,
                    operation_target: "pat".to_string(),
                },
            ),
            None,
        )
        .unwrap();
        t.commit().unwrap();
        mdib
    }

    fn setup(fast_path: bool) -> (Arc<Mdib>, Arc<ScoController>, Arc<SubscriptionManager>) {
        let mdib = provider_mdib();
        let manager = SubscriptionManager::new(
            "http://device/subs",
            Arc::new(NullPoster),
            RuntimeConfig::new(),
        );
        let sco = ScoController::new(Arc::clone(&mdib), Arc::clone(&manager), fast_path);
        sco.register_default_handlers();
        (mdib, sco, manager)
    }

    fn dispatch_set(
        sco: &Arc<ScoController>,
        action: &str,
        body: String,
    ) -> (u64, InvocationState) {
        let mut dispatcher = SoapDispatcher::new();
        sco.register_handlers_on(&mut dispatcher);
        let request = EnvelopeBuilder::new(action).body(&body).build();
        let response = dispatcher.dispatch(&request);
        let doc = reader::parse(&response).unwrap();
        let body = crate::soap::body_element(&doc).unwrap();
        decode_set_response(body).unwrap()
    }

    #[test]
    fn test_set_string_fast_path() {
        let (mdib, sco, manager) = setup(true);
        let body = SetRequest::SetString("Dräger".to_string()).encode("op.name");
        let (transaction_id, state) = dispatch_set(&sco, actions::SET_STRING, body);
        assert_eq!(transaction_id, 1);
        assert_eq!(state, InvocationState::Finished);

        match &mdib.snapshot().get_state("name.metric").unwrap().payload {
            StatePayload::StringMetric { value, .. } => {
                assert_eq!(value.as_ref().unwrap().value.as_deref(), Some("Dräger"));
            }
            _ => panic!("wrong payload"),
        }
        sco.shutdown();
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_wait_then_async_execution() {
        let (mdib, sco, manager) = setup(false);
        let body = SetRequest::SetString("updated".to_string()).encode("op.name");
        let (_, state) = dispatch_set(&sco, actions::SET_STRING, body);
        assert_eq!(state, InvocationState::Wait);

        // Worker applies the change shortly after.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut applied = false;
        while std::time::Instant::now() < deadline {
            if let StatePayload::StringMetric { value: Some(v), .. } =
                &mdib.snapshot().get_state("name.metric").unwrap().payload
            {
                if v.value.as_deref() == Some("updated") {
                    applied = true;
                    break;
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(applied, "async invocation never applied");
        sco.shutdown();
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_unknown_operation_fails_invocation() {
        let (_mdib, sco, manager) = setup(true);
        let body = SetRequest::SetValue(1.0).encode("op.nope");
        let (_, state) = dispatch_set(&sco, actions::SET_VALUE, body);
        assert_eq!(state, InvocationState::Failed);
        sco.shutdown();
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_transaction_ids_unique() {
        let (_mdib, sco, manager) = setup(true);
        let (first, _) = dispatch_set(
            &sco,
            actions::SET_STRING,
            SetRequest::SetString("a".to_string()).encode("op.name"),
        );
        let (second, _) = dispatch_set(
            &sco,
            actions::SET_STRING,
            SetRequest::SetString("b".to_string()).encode("op.name"),
        );
        assert!(second > first);
        sco.shutdown();
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_set_context_state_unknown_descriptor_fails() {
        let (mdib, sco, manager) = setup(true);
        let proposed = ContextState::new("ghost.1", "ghost", ContextPayload::empty_patient());
        let body = SetRequest::SetContextState(vec![proposed]).encode("op.ctx");
        let (_, state) = dispatch_set(&sco, actions::SET_CONTEXT_STATE, body);
        assert_eq!(state, InvocationState::Failed);
        assert!(mdib.snapshot().get_context_state("ghost.1").is_none());
        sco.shutdown();
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_set_context_state_applies() {
        let (mdib, sco, manager) = setup(true);
        let mut proposed = ContextState::new("pat.1", "pat", ContextPayload::empty_patient());
        proposed.association = ContextAssociation::Associated;
        let body = SetRequest::SetContextState(vec![proposed]).encode("op.ctx");
        let (_, _) = dispatch_set(&sco, actions::SET_CONTEXT_STATE, body);

        let snapshot = mdib.snapshot();
        let context = snapshot.get_context_state("pat.1").unwrap();
        assert!(context.is_associated());
        assert_eq!(context.binding_mdib_version, Some(snapshot.mdib_version));
        sco.shutdown();
        manager.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_request_roundtrip() {
        let body = SetRequest::SetValue(72.5).encode("op.hr");
        let xml = reader::fragment_document(&body).unwrap();
        let doc = reader::parse(&xml).unwrap();
        let node = doc.root_element().first_element_child().unwrap();
        let (handle, decoded) = SetRequest::decode(actions::SET_VALUE, node, &xml).unwrap();
        assert_eq!(handle, "op.hr");
        assert!(matches!(decoded, SetRequest::SetValue(v) if v == 72.5));
    }
}
