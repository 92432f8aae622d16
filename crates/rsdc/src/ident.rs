// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UUID implementation for endpoint references, message ids and sequence ids.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-global uniqueness counter mixed into every generated UUID.
static GENERATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 16-byte UUID used throughout the stack.
///
/// Endpoint references are stable UUIDs (`urn:uuid:...`), `wsa:MessageID`
/// values are fresh UUIDs per message, and the MDIB `SequenceId` is a UUID
/// minted at provider startup.
///
/// # Display Format
/// Lowercase hyphenated: "6ba7b810-9dad-41d1-80b4-00c04fd430c8"
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
}

impl Uuid {
    /// Create a UUID from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Raw bytes of this UUID.
    pub fn as_bytes(&self) -> [u8; 16] {
        self.bytes
    }

    /// All-zero UUID (invalid/placeholder).
    pub fn nil() -> Self {
        Self { bytes: [0; 16] }
    }

    /// Check if this is the nil UUID.
    pub fn is_nil(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }

    /// Generate a fresh random-looking v4 UUID.
    ///
    /// Entropy comes from the wall clock nanos, the process id and a
    /// process-global counter, whitened through splitmix64. Uniqueness within
    /// one LAN and one process lifetime is what the protocol needs; this is
    /// not a cryptographic identifier.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let counter = GENERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let seed = nanos ^ (u64::from(std::process::id()) << 32) ^ counter.rotate_left(17);

        let hi = splitmix64(seed);
        let lo = splitmix64(hi ^ seed.rotate_left(31));

        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&hi.to_be_bytes());
        bytes[8..16].copy_from_slice(&lo.to_be_bytes());

        // RFC 4122 version 4 / variant 1 marker bits
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;

        Self { bytes }
    }

    /// Parse from hyphenated form, with or without a `urn:uuid:` prefix.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let hex = trimmed
            .strip_prefix("urn:uuid:")
            .or_else(|| trimmed.strip_prefix("uuid:"))
            .unwrap_or(trimmed);

        let mut bytes = [0u8; 16];
        let mut index = 0;
        let mut chars = hex.chars();
        while index < 16 {
            let hi = loop {
                match chars.next()? {
                    '-' => {}
                    c => break c.to_digit(16)?,
                }
            };
            let lo = chars.next()?.to_digit(16)?;
            bytes[index] = ((hi << 4) | lo) as u8;
            index += 1;
        }
        if chars.next().is_some() {
            return None; // trailing garbage
        }
        Some(Self { bytes })
    }

    /// `urn:uuid:`-prefixed form used for endpoint references and MessageIDs.
    pub fn to_urn(&self) -> String {
        format!("urn:uuid:{}", self)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i == 4 || i == 6 || i == 8 || i == 10 {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid({})", self)
    }
}

/// splitmix64 mixing step (public-domain constant set).
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
