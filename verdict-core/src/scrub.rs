// Copyright 2025 Verdict Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Secret scrubbing for persisted payloads.
//!
//! Logs, metrics, and results must never contain raw API keys; the storage
//! layer runs every config-derived JSON value through [`scrub_secrets`]
//! before it hits disk.

use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

fn is_secret_key(key: &str) -> bool {
    let k = key.to_lowercase().replace(['_', '-'], "");
    k.contains("apikey") || k.contains("apikeys") || k == "authorization"
}

fn redact(value: &mut Value) {
    match value {
        Value::String(s) => *s = REDACTED.to_string(),
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                redact(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                redact(v);
            }
        }
        _ => {}
    }
}

/// Recursively replace the values of any key that looks like a credential.
pub fn scrub_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_secret_key(key) {
                    redact(v);
                } else {
                    scrub_secrets(v);
                }
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                scrub_secrets(v);
            }
        }
        _ => {}
    }
}
