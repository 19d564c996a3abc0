use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::model::{FilterOp, FilterTerm, FilterValue, ListOptions, SortTerm};

static IDENT_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

const MAX_IDENT_LEN: usize = 64;
const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

/// Pure functions, no I/O. Every rejection yields `InvalidInput`; there is no
/// partial parsing — a malformed query param fails the whole request.
pub struct Validator;

impl Validator {
  pub fn identifier(name: &str) -> Result<&str> {
    if name.len() > MAX_IDENT_LEN || !IDENT_RE.is_match(name) {
      return Err(GatewayError::InvalidInput(format!(
        "invalid identifier: '{name}'"
      )));
    }
    return Ok(name);
  }

  /// Decimal integer ≥ 1, or canonical 8-4-4-4-12 hex UUID.
  pub fn id(raw: &str) -> Result<RecordId> {
    if let Ok(n) = raw.parse::<i64>() {
      if n >= 1 {
        return Ok(RecordId::Integer(n));
      }
      return Err(GatewayError::InvalidInput("id must be >= 1".to_string()));
    }
    if let Ok(uuid) = uuid::Uuid::parse_str(raw) {
      return Ok(RecordId::Uuid(uuid));
    }
    return Err(GatewayError::InvalidInput(format!("invalid id: '{raw}'")));
  }

  pub fn page(raw: Option<&str>) -> Result<u64> {
    return match raw {
      None => Ok(1),
      Some(s) => {
        let n: u64 = s
          .parse()
          .map_err(|_| GatewayError::InvalidInput(format!("invalid page: '{s}'")))?;
        if n < 1 {
          return Err(GatewayError::InvalidInput("page must be >= 1".to_string()));
        }
        Ok(n)
      }
    };
  }

  pub fn page_size(raw: Option<&str>) -> Result<u64> {
    return match raw {
      None => Ok(DEFAULT_PAGE_SIZE),
      Some(s) => {
        let n: u64 = s
          .parse()
          .map_err(|_| GatewayError::InvalidInput(format!("invalid page_size: '{s}'")))?;
        if !(1..=MAX_PAGE_SIZE).contains(&n) {
          return Err(GatewayError::InvalidInput(format!(
            "page_size must be in [1, {MAX_PAGE_SIZE}]"
          )));
        }
        Ok(n)
      }
    };
  }

  /// Comma-separated column names; each validated independently, duplicates
  /// removed, order preserved.
  pub fn fields(raw: Option<&str>) -> Result<Option<Vec<String>>> {
    let Some(raw) = raw else { return Ok(None) };
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for part in raw.split(',').filter(|p| !p.is_empty()) {
      let name = Self::identifier(part)?.to_string();
      if seen.insert(name.clone()) {
        out.push(name);
      }
    }
    return Ok(Some(out));
  }

  /// Comma-separated column names, each optionally prefixed with `-` for
  /// descending. Duplicate columns are forbidden (not just deduplicated).
  pub fn sort(raw: Option<&str>) -> Result<Vec<SortTerm>> {
    let Some(raw) = raw else { return Ok(vec![]) };
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for part in raw.split(',').filter(|p| !p.is_empty()) {
      let (descending, name) = match part.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, part),
      };
      let name = Self::identifier(name)?.to_string();
      if !seen.insert(name.clone()) {
        return Err(GatewayError::InvalidInput(format!(
          "duplicate sort column: '{name}'"
        )));
      }
      out.push(SortTerm {
        column: name,
        descending,
      });
    }
    return Ok(out);
  }

  /// `col:op:value` terms (comma-separated). Legacy `col:value` is upgraded
  /// to `col:eq:value`, or to `col:like:value` if `value` contains `%`. A
  /// value containing `:` MUST use the explicit three-part form (Design
  /// Notes §9's open question on the ambiguous legacy tokenization).
  pub fn filter(raw: Option<&str>) -> Result<Vec<FilterTerm>> {
    let Some(raw) = raw else { return Ok(vec![]) };
    let mut out = Vec::new();
    for part in split_top_level_commas(raw) {
      if part.is_empty() {
        continue;
      }
      out.push(parse_filter_term(part)?);
    }
    return Ok(out);
  }

  /// Same coercion `id` applies to a path/query string, but for a JSON value
  /// already parsed out of a request body (a primary key echoed back in a
  /// `create`/`bulk_create` payload, or an entry of `bulk_delete`'s `ids`).
  pub fn id_from_json(value: &Value) -> Result<RecordId> {
    return match value {
      Value::Number(n) => n
        .as_i64()
        .map(RecordId::Integer)
        .ok_or_else(|| GatewayError::InvalidInput("id must be an integer or UUID".to_string())),
      Value::String(s) => Self::id(s),
      _ => Err(GatewayError::InvalidInput("id must be an integer or UUID".to_string())),
    };
  }

  pub fn list_options(
    fields: Option<&str>,
    filter: Option<&str>,
    sort: Option<&str>,
    page: Option<&str>,
    page_size: Option<&str>,
  ) -> Result<ListOptions> {
    return Ok(ListOptions {
      fields: Self::fields(fields)?,
      filter: Self::filter(filter)?,
      sort: Self::sort(sort)?,
      page: Self::page(page)?,
      page_size: Self::page_size(page_size)?,
    });
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordId {
  Integer(i64),
  Uuid(uuid::Uuid),
}

impl std::fmt::Display for RecordId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return match self {
      Self::Integer(n) => write!(f, "{n}"),
      Self::Uuid(u) => write!(f, "{u}"),
    };
  }
}

fn split_top_level_commas(raw: &str) -> impl Iterator<Item = &str> {
  return raw.split(',');
}

fn parse_filter_term(part: &str) -> Result<FilterTerm> {
  let segments: Vec<&str> = part.splitn(3, ':').collect();

  let (column, op, value) = match segments.as_slice() {
    [column, op, value] if let Some(op) = FilterOp::from_str(op) => (*column, op, Some(*value)),
    [column, value] => {
      if value.contains('%') {
        (*column, FilterOp::Like, Some(*value))
      } else {
        (*column, FilterOp::Eq, Some(*value))
      }
    }
    [_, op, _] => {
      return Err(GatewayError::InvalidInput(format!(
        "unrecognized filter operator: '{op}'"
      )));
    }
    _ => {
      return Err(GatewayError::InvalidInput(format!(
        "malformed filter term: '{part}'"
      )));
    }
  };

  let column = Validator::identifier(column)?.to_string();

  let value = match op {
    FilterOp::Null | FilterOp::NotNull => FilterValue::Single(String::new()),
    FilterOp::In | FilterOp::NotIn => {
      let value = value.ok_or_else(|| {
        GatewayError::InvalidInput(format!("filter '{column}' requires a value"))
      })?;
      FilterValue::Multi(value.split('|').map(str::to_string).collect())
    }
    _ => {
      let value = value.ok_or_else(|| {
        GatewayError::InvalidInput(format!("filter '{column}' requires a value"))
      })?;
      FilterValue::Single(value.to_string())
    }
  };

  return Ok(FilterTerm { column, op, value });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identifier_accepts_simple_names() {
    assert!(Validator::identifier("users").is_ok());
    assert!(Validator::identifier("_private_1").is_ok());
  }

  #[test]
  fn identifier_rejects_leading_digit_and_punctuation() {
    assert!(Validator::identifier("1table").is_err());
    assert!(Validator::identifier("users; DROP TABLE users;--").is_err());
  }

  #[test]
  fn identifier_rejects_over_length() {
    let name = "a".repeat(65);
    assert!(Validator::identifier(&name).is_err());
  }

  #[test]
  fn page_size_defaults_and_bounds() {
    assert_eq!(Validator::page_size(None).unwrap(), 20);
    assert!(Validator::page_size(Some("0")).is_err());
    assert!(Validator::page_size(Some("101")).is_err());
    assert_eq!(Validator::page_size(Some("100")).unwrap(), 100);
  }

  #[test]
  fn page_defaults_to_one_and_rejects_zero() {
    assert_eq!(Validator::page(None).unwrap(), 1);
    assert!(Validator::page(Some("0")).is_err());
  }

  #[test]
  fn id_accepts_positive_integer_and_uuid() {
    assert_eq!(Validator::id("42").unwrap(), RecordId::Integer(42));
    assert!(Validator::id("0").is_err());
    assert!(Validator::id("-1").is_err());
    assert!(
      Validator::id("550e8400-e29b-41d4-a716-446655440000").is_ok()
    );
  }

  #[test]
  fn filter_legacy_form_upgrades_to_eq_or_like() {
    let terms = Validator::filter(Some("status:active,name:A%")).unwrap();
    assert_eq!(terms[0].op, FilterOp::Eq);
    assert_eq!(terms[1].op, FilterOp::Like);
  }

  #[test]
  fn filter_explicit_three_part_form() {
    let terms = Validator::filter(Some("age:gte:18")).unwrap();
    assert_eq!(terms[0].column, "age");
    assert_eq!(terms[0].op, FilterOp::Gte);
    assert_eq!(terms[0].value, FilterValue::Single("18".to_string()));
  }

  #[test]
  fn filter_injection_attempt_is_a_literal_value() {
    let terms = Validator::filter(Some("name:eq:'; DROP TABLE users;--")).unwrap();
    assert_eq!(terms.len(), 1);
    assert_eq!(
      terms[0].value,
      FilterValue::Single("'; DROP TABLE users;--".to_string())
    );
  }

  #[test]
  fn filter_in_splits_on_pipe() {
    let terms = Validator::filter(Some("status:in:active|pending")).unwrap();
    assert_eq!(
      terms[0].value,
      FilterValue::Multi(vec!["active".to_string(), "pending".to_string()])
    );
  }

  #[test]
  fn filter_three_part_form_with_unrecognized_operator_is_rejected() {
    // "created_at:12:30:00" splits (splitn(3, ':')) into
    // ["created_at", "12", "30:00"] -- "12" isn't a FilterOp, and this must
    // be rejected rather than silently treated as `created_at = "30:00"`.
    assert!(Validator::filter(Some("created_at:12:30:00")).is_err());
  }

  #[test]
  fn sort_rejects_duplicate_columns() {
    assert!(Validator::sort(Some("name,-name")).is_err());
  }

  #[test]
  fn fields_deduplicates_preserving_order() {
    let fields = Validator::fields(Some("id,name,id")).unwrap().unwrap();
    assert_eq!(fields, vec!["id".to_string(), "name".to_string()]);
  }
}
