/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Canonical JSON encoding: sorted keys, no whitespace, numbers in shortest lossless form.
//!
//! `serde_json::Map` is `BTreeMap`-backed as long as the `preserve_order` cargo feature is not
//! enabled (it is not, here — see `Cargo.toml`), so object keys serialize in sorted order and
//! `serde_json::to_string` already produces a whitespace-free, shortest-number encoding. Canonical
//! JSON is therefore this crate's default `serde_json` behavior, not a bespoke serializer.

use serde_json::{Map, Value};

/// Build the canonical JSON encoding of a row's primary-key columns, in schema order.
///
/// `columns` is `(column_name, value)` pairs already ordered the way the local catalog defines
/// the primary key; the resulting object's keys will still sort alphabetically (per canonical
/// JSON rules) — schema order only matters for which columns participate, not for wire layout.
pub fn canonical_row_pks(columns: &[(&str, &Value)]) -> String {
    let mut map = Map::new();
    for (name, value) in columns {
        map.insert((*name).to_string(), (*value).clone());
    }
    canonicalize_value(&Value::Object(map))
}

/// Canonicalize an arbitrary JSON value (sorted object keys, no whitespace).
pub fn canonicalize_value(value: &Value) -> String {
    serde_json::to_string(value).expect("serializing a serde_json::Value cannot fail")
}

/// The plaintext wrapper encrypted by the crypto envelope (see `crypto.rs`): `{"value": <raw>}`.
pub fn wrap_plaintext_value(raw: &Value) -> String {
    let mut map = Map::new();
    map.insert("value".to_string(), raw.clone());
    canonicalize_value(&Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_sort_and_whitespace_is_stripped() {
        let value = json!({"b": 1, "a": 2, "c": {"z": 1, "y": 2}});
        assert_eq!(canonicalize_value(&value), r#"{"a":2,"b":1,"c":{"y":2,"z":1}}"#);
    }

    #[test]
    fn row_pks_are_built_from_named_columns() {
        let id = json!("k1");
        let tenant = json!(7);
        let encoded = canonical_row_pks(&[("id", &id), ("tenant", &tenant)]);
        assert_eq!(encoded, r#"{"id":"k1","tenant":7}"#);
    }

    #[test]
    fn numbers_use_shortest_lossless_form() {
        assert_eq!(canonicalize_value(&json!(1.5)), "1.5");
        assert_eq!(canonicalize_value(&json!(3)), "3");
    }

    #[test]
    fn wrap_plaintext_value_matches_envelope_shape() {
        assert_eq!(wrap_plaintext_value(&json!("hello")), r#"{"value":"hello"}"#);
        assert_eq!(wrap_plaintext_value(&json!(null)), r#"{"value":null}"#);
    }
}
