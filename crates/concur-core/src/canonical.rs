//! Canonicalization of multi-valued attribute encodings.
//!
//! Attribute values arrive in several shapes: plain strings, JSON arrays,
//! strings holding a JSON-encoded array (legacy rows sometimes nest one array
//! inside another), and comma-separated shorthand for the multi-value keys.
//! Every equality or set comparison runs over the canonical form produced
//! here, never over the raw encoding.

use std::{cmp::Ordering, collections::HashSet, iter::Peekable, str::Chars};

use serde_json::Value;

/// Attribute keys that accept comma-separated shorthand.
pub const MULTI_VALUE_KEYS: &[&str] =
  &["qa_status", "page_ids", "reporter_ids", "grouped_urls"];

/// Whether string values for `key` are split on commas.
pub fn allows_csv(key: &str) -> bool { MULTI_VALUE_KEYS.contains(&key) }

// ─── Flattening ──────────────────────────────────────────────────────────────

/// Flatten `raw` into trimmed, non-empty values in input order, keeping the
/// first occurrence of each.
///
/// This is the form persisted by the attribute store.
pub fn flatten_values(key: &str, raw: &Value) -> Vec<String> {
  let mut out = Vec::new();
  walk(raw, allows_csv(key), &mut out);

  let mut seen = HashSet::new();
  out.retain(|v| seen.insert(v.clone()));
  out
}

fn walk(value: &Value, allow_csv: bool, out: &mut Vec<String>) {
  match value {
    Value::Null => {}
    Value::Array(items) => {
      for item in items {
        walk(item, allow_csv, out);
      }
    }
    Value::String(s) => walk_str(s, allow_csv, out),
    Value::Bool(b) => push(out, if *b { "1" } else { "" }),
    Value::Number(n) => push(out, &n.to_string()),
    Value::Object(_) => push(out, &value.to_string()),
  }
}

fn walk_str(raw: &str, allow_csv: bool, out: &mut Vec<String>) {
  let raw = raw.trim();
  if raw.is_empty() {
    return;
  }

  if raw.starts_with('[')
    && let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw)
  {
    for item in &items {
      walk(item, allow_csv, out);
    }
    return;
  }

  if allow_csv && raw.contains(',') {
    for part in raw.split(',') {
      push(out, part);
    }
    return;
  }

  push(out, raw);
}

fn push(out: &mut Vec<String>, value: &str) {
  let value = value.trim();
  if !value.is_empty() {
    out.push(value.to_owned());
  }
}

// ─── Canonical set ───────────────────────────────────────────────────────────

/// A sorted, de-duplicated sequence of attribute values.
///
/// Two canonical sets compare equal exactly when the underlying values form
/// the same set, whatever order or encoding they were stored in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalSet(Vec<String>);

impl CanonicalSet {
  pub fn as_slice(&self) -> &[String] { &self.0 }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// The human-readable form written to the audit trail.
  pub fn joined(&self) -> String { self.0.join(", ") }
}

/// Canonicalize `raw` for comparison under attribute `key`.
pub fn canonicalize(key: &str, raw: &Value) -> CanonicalSet {
  let mut values = flatten_values(key, raw);
  values.sort_by(|a, b| canonical_cmp(a, b));
  CanonicalSet(values)
}

/// Case-insensitive natural ordering with a byte-order tiebreak, so that
/// values differing only in case still sort deterministically.
pub fn canonical_cmp(a: &str, b: &str) -> Ordering {
  natural_cmp(a, b).then_with(|| a.cmp(b))
}

/// Case-insensitive natural comparison: runs of ASCII digits compare by
/// numeric value, everything else by lowercased character.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
  let mut left = a.chars().peekable();
  let mut right = b.chars().peekable();

  loop {
    match (left.peek().copied(), right.peek().copied()) {
      (None, None) => return Ordering::Equal,
      (None, Some(_)) => return Ordering::Less,
      (Some(_), None) => return Ordering::Greater,
      (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
        let lhs = take_digits(&mut left);
        let rhs = take_digits(&mut right);
        let ord = compare_digit_runs(&lhs, &rhs);
        if ord != Ordering::Equal {
          return ord;
        }
      }
      (Some(x), Some(y)) => {
        let ord = x.to_lowercase().cmp(y.to_lowercase());
        if ord != Ordering::Equal {
          return ord;
        }
        left.next();
        right.next();
      }
    }
  }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
  let mut run = String::new();
  while let Some(c) = chars.next_if(char::is_ascii_digit) {
    run.push(c);
  }
  run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
  let a = a.trim_start_matches('0');
  let b = b.trim_start_matches('0');
  a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn canon(key: &str, raw: Value) -> Vec<String> {
    canonicalize(key, &raw).as_slice().to_vec()
  }

  #[test]
  fn array_csv_and_encoded_array_are_the_same_set() {
    let a = canonicalize("page_ids", &json!(["a", "b"]));
    let b = canonicalize("page_ids", &json!("b, a"));
    let c = canonicalize("page_ids", &json!(r#"["b","a"]"#));
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(a.joined(), "a, b");
  }

  #[test]
  fn nested_encoded_arrays_are_unwrapped() {
    let nested = json!([r#"["12", "[\"7\"]"]"#, "3"]);
    assert_eq!(canon("reporter_ids", nested), ["3", "7", "12"]);
  }

  #[test]
  fn commas_are_literal_for_single_value_keys() {
    assert_eq!(canon("severity", json!("major, blocker")), ["major, blocker"]);
    assert_eq!(canon("qa_status", json!("fail, retest")), ["fail", "retest"]);
  }

  #[test]
  fn trims_drops_empties_and_dedupes() {
    let raw = json!(["  x ", "", "x", null, " , ", "y"]);
    assert_eq!(canon("grouped_urls", raw), ["x", "y"]);
  }

  #[test]
  fn natural_case_insensitive_order() {
    let raw = json!(["item10", "Item2", "item1", "beta", "Alpha"]);
    assert_eq!(
      canon("page_ids", raw),
      ["Alpha", "beta", "item1", "Item2", "item10"]
    );
  }

  #[test]
  fn case_variants_sort_deterministically() {
    let one = canonicalize("qa_status", &json!(["a", "A"]));
    let two = canonicalize("qa_status", &json!(["A", "a"]));
    assert_eq!(one, two);
    assert_eq!(one.as_slice().len(), 2);
  }

  #[test]
  fn numbers_and_invalid_json_pass_through() {
    assert_eq!(canon("page_ids", json!([4, "[not json"])), ["4", "[not json"]);
  }

  #[test]
  fn flatten_keeps_input_order() {
    assert_eq!(
      flatten_values("page_ids", &json!("9, 3, 9, 1")),
      ["9", "3", "1"]
    );
  }

  #[test]
  fn digit_runs_ignore_leading_zeros() {
    assert_eq!(natural_cmp("v007", "v7"), Ordering::Equal);
    assert_eq!(natural_cmp("v9", "v10"), Ordering::Less);
  }
}
