// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared participant-model value types and their lexical forms.
//!
//! Every enum here carries the exact BICEPS token set; `as_str`/`parse` are
//! the only place those tokens appear.

use std::time::Duration;

/// Stable string identifier of a descriptor or state.
pub type Handle = String;

/// A coded concept (IEEE 11073-10101 nomenclature by default).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodedValue {
    pub code: String,
    pub coding_system: Option<String>,
    pub coding_system_version: Option<String>,
}

impl CodedValue {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            coding_system: None,
            coding_system_version: None,
        }
    }

    /// Key used by the MDIB code index. Absent coding system means the
    /// default (IEEE nomenclature) per BICEPS.
    pub fn index_key(&self) -> (String, String) {
        (
            self.coding_system.clone().unwrap_or_default(),
            self.code.clone(),
        )
    }
}

/// An instance identifier (root OID/URN plus extension).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceIdentifier {
    pub root: Option<String>,
    pub extension: Option<String>,
}

/// Milliseconds since the UNIX epoch (BICEPS `Timestamp`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }
}

macro_rules! biceps_tokens {
    ($(#[$doc:meta])* $name:ident { $($variant:ident => $token:literal),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// BICEPS lexical token.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $token,)+
                }
            }

            /// Parse a BICEPS lexical token.
            pub fn parse(token: &str) -> Option<Self> {
                match token {
                    $($token => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

biceps_tokens! {
    /// Validity of a measured value (`pm:MeasurementValidity`).
    MeasurementValidity {
        Valid => "Vld",
        ValidatedData => "Vldated",
        Ongoing => "Ong",
        Questionable => "Qst",
        CalibrationOngoing => "Calib",
        Invalid => "Inv",
        Overflow => "Oflw",
        Underflow => "Uflw",
        NotAvailable => "NA",
    }
}

biceps_tokens! {
    /// Activation of a component or metric (`pm:ComponentActivation`).
    ComponentActivation {
        On => "On",
        NotReady => "NotRdy",
        StandBy => "StndBy",
        Off => "Off",
        Shutdown => "Shtdn",
        Failure => "Fail",
    }
}

biceps_tokens! {
    /// Activation of an alert entity (`pm:AlertActivation`).
    AlertActivation {
        On => "On",
        Off => "Off",
        Paused => "Psd",
    }
}

biceps_tokens! {
    /// Presence of an alert signal (`pm:AlertSignalPresence`).
    AlertSignalPresence {
        On => "On",
        Off => "Off",
        Latched => "Latch",
        Acknowledged => "Ack",
    }
}

biceps_tokens! {
    /// Context association lifecycle (`pm:ContextAssociation`).
    ContextAssociation {
        NotAssociated => "No",
        PreAssociated => "Pre",
        Associated => "Assoc",
        Disassociated => "Dis",
    }
}

biceps_tokens! {
    /// Operating mode of an SCO operation (`pm:OperatingMode`).
    OperatingMode {
        Disabled => "Dis",
        Enabled => "En",
        NotAvailable => "NA",
    }
}

biceps_tokens! {
    /// Invocation lifecycle of a set operation (`msg:InvocationState`).
    InvocationState {
        Wait => "Wait",
        Start => "Start",
        Cancelled => "Cnclld",
        CancelledManually => "CnclldMan",
        Finished => "Fin",
        FinishedWithModification => "FinMod",
        Failed => "Fail",
    }
}

impl InvocationState {
    /// Terminal states close the invocation; no further
    /// OperationInvokedReport follows for the transaction.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::CancelledManually
                | Self::Finished
                | Self::FinishedWithModification
                | Self::Failed
        )
    }
}

biceps_tokens! {
    /// Error class of a failed invocation (`msg:InvocationError`).
    InvocationError {
        Unspecified => "Unspec",
        Unknown => "Unkn",
        InvalidValue => "Inv",
        Other => "Oth",
    }
}

biceps_tokens! {
    /// Safety classification of a descriptor (`pm:SafetyClassification`).
    SafetyClassification {
        Informational => "Inf",
        MedicalClassA => "MedA",
        MedicalClassB => "MedB",
        MedicalClassC => "MedC",
    }
}

biceps_tokens! {
    /// Metric category (`pm:MetricCategory`).
    MetricCategory {
        Unspecified => "Unspec",
        Measurement => "Msrmt",
        Calculation => "Clc",
        Setting => "Set",
        Preset => "Preset",
        Recommendation => "Rcmm",
    }
}

biceps_tokens! {
    /// Metric availability (`pm:MetricAvailability`).
    MetricAvailability {
        Intermittent => "Intr",
        Continuous => "Cont",
    }
}

biceps_tokens! {
    /// Alert condition kind (`pm:AlertConditionKind`).
    AlertConditionKind {
        Physiological => "Phy",
        Technical => "Tec",
        Other => "Oth",
    }
}

biceps_tokens! {
    /// Alert condition priority (`pm:AlertConditionPriority`).
    AlertConditionPriority {
        Low => "Lo",
        Medium => "Me",
        High => "Hi",
        None => "None",
    }
}

biceps_tokens! {
    /// Alert signal manifestation (`pm:AlertSignalManifestation`).
    AlertSignalManifestation {
        Audible => "Aud",
        Visible => "Vis",
        Tangible => "Tan",
        Other => "Oth",
    }
}

biceps_tokens! {
    /// Administrative sex (`pm:Sex`).
    Sex {
        Unspecified => "Unspec",
        Male => "M",
        Female => "F",
        Unknown => "Unkn",
    }
}

/// A numeric measurement with quality and determination time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub value: Option<f64>,
    pub validity: MeasurementValidity,
    pub determination_time: Option<Timestamp>,
}

impl MetricValue {
    pub fn new(value: f64) -> Self {
        Self {
            value: Some(value),
            validity: MeasurementValidity::Valid,
            determination_time: Some(Timestamp::now()),
        }
    }
}

/// A string measurement with quality and determination time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringMetricValue {
    pub value: Option<String>,
    pub validity: MeasurementValidity,
    pub determination_time: Option<Timestamp>,
}

impl StringMetricValue {
    pub fn new(value: &str) -> Self {
        Self {
            value: Some(value.to_string()),
            validity: MeasurementValidity::Valid,
            determination_time: Some(Timestamp::now()),
        }
    }
}

/// A real-time sample array bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleArrayValue {
    pub samples: Vec<f64>,
    pub validity: MeasurementValidity,
    pub determination_time: Option<Timestamp>,
}

// ------------------------------------------------------------------
// xsd:duration lexical form (seconds precision is all the stack needs)
// ------------------------------------------------------------------

/// Format a duration as `xsd:duration` (`PT60S`, `PT0.5S`).
pub fn format_xsd_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("PT{}S", millis / 1000)
    } else {
        format!("PT{}.{:03}S", millis / 1000, millis % 1000)
    }
}

/// Parse a subset of `xsd:duration`: `PnDTnHnMn(.nnn)S` forms, no years or
/// months (calendar-dependent and never produced by peers we talk to).
pub fn parse_xsd_duration(text: &str) -> Option<Duration> {
    let rest = text.trim().strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut total_ms: u128 = 0;
    let mut number = String::new();
    for c in date_part.chars() {
        match c {
            '0'..='9' => number.push(c),
            'D' => {
                let days: u128 = number.parse().ok()?;
                total_ms += days * 86_400_000;
                number.clear();
            }
            _ => return None, // years/months unsupported
        }
    }
    if !number.is_empty() {
        return None;
    }

    for c in time_part.chars() {
        match c {
            '0'..='9' | '.' => number.push(c),
            'H' => {
                let hours: u128 = number.parse().ok()?;
                total_ms += hours * 3_600_000;
                number.clear();
            }
            'M' => {
                let minutes: u128 = number.parse().ok()?;
                total_ms += minutes * 60_000;
                number.clear();
            }
            'S' => {
                let seconds: f64 = number.parse().ok()?;
                if !seconds.is_finite() || seconds < 0.0 {
                    return None;
                }
                total_ms += (seconds * 1000.0).round() as u128;
                number.clear();
            }
            _ => return None,
        }
    }
    if !number.is_empty() {
        return None;
    }

    Some(Duration::from_millis(u64::try_from(total_ms).ok()?))
}
