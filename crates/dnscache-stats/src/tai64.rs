// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TAI64N labels as written by daemontools `multilog t` and `tai64n`.
//!
//! A label is `@` followed by 16 hex digits of TAI64 seconds and 8 hex digits
//! of nanoseconds. daemontools stamps `2^62 + 10 + unix_seconds`, so the same
//! offset is removed here and leap seconds are not applied.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::errors::ParseError;

/// TAI64 label of the Unix epoch.
pub const UNIX_EPOCH_LABEL: u64 = (1 << 62) + 10;

const LABEL_LEN: usize = 25;

/// Decodes a TAI64N label into wall-clock time.
pub fn parse(label: &str) -> Result<SystemTime, ParseError> {
    let malformed = || ParseError::Malformed(label.to_string());

    let hex = label.strip_prefix('@').ok_or_else(malformed)?;
    if label.len() != LABEL_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed());
    }

    let secs = u64::from_str_radix(&hex[..16], 16).map_err(|_| malformed())?;
    let nanos = u32::from_str_radix(&hex[16..], 16).map_err(|_| malformed())?;
    if nanos >= 1_000_000_000 {
        return Err(ParseError::Nanos(nanos));
    }
    let unix_secs = secs
        .checked_sub(UNIX_EPOCH_LABEL)
        .ok_or_else(|| ParseError::BeforeEpoch(label.to_string()))?;

    Ok(UNIX_EPOCH + Duration::new(unix_secs, nanos))
}

/// Encodes wall-clock time as a TAI64N label. Times before the epoch encode
/// as the epoch.
#[must_use]
pub fn format(time: SystemTime) -> String {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    format!(
        "@{:016x}{:08x}",
        since_epoch.as_secs() + UNIX_EPOCH_LABEL,
        since_epoch.subsec_nanos()
    )
}
