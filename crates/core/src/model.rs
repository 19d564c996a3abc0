use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a Principal's credentials were resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
  ApiKey,
  Basic,
  Jwt,
  Anonymous,
}

/// The authenticated (or anonymous) subject for a request. Created once by
/// the Authenticator and read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
  pub username: String,
  pub role: String,
  pub auth_method: AuthMethod,
}

impl Principal {
  pub fn anonymous(default_role: impl Into<String>) -> Self {
    return Self {
      username: "anonymous".to_string(),
      role: default_role.into(),
      auth_method: AuthMethod::Anonymous,
    };
  }
}

/// One column of a table as discovered by the SchemaInspector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
  pub name: String,
  pub r#type: String,
  pub nullable: bool,
  pub default: Option<String>,
}

/// A table's shape as discovered at runtime. Cached for process lifetime
/// (or until an explicit refresh) by the SchemaInspector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
  pub name: String,
  pub columns: Vec<ColumnSchema>,
  pub primary_key: Option<String>,
}

impl TableSchema {
  pub fn has_column(&self, name: &str) -> bool {
    return self.columns.iter().any(|c| c.name == name);
  }

  pub fn column_names(&self) -> Vec<&str> {
    return self.columns.iter().map(|c| c.name.as_str()).collect();
  }
}

/// A single comparison term parsed from the `filter` query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterTerm {
  pub column: String,
  pub op: FilterOp,
  pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
  Eq,
  Neq,
  Gt,
  Gte,
  Lt,
  Lte,
  Like,
  In,
  NotIn,
  Null,
  NotNull,
}

impl FilterOp {
  pub fn from_str(s: &str) -> Option<Self> {
    return Some(match s {
      "eq" => Self::Eq,
      "neq" => Self::Neq,
      "gt" => Self::Gt,
      "gte" => Self::Gte,
      "lt" => Self::Lt,
      "lte" => Self::Lte,
      "like" => Self::Like,
      "in" => Self::In,
      "notin" => Self::NotIn,
      "null" => Self::Null,
      "notnull" => Self::NotNull,
      _ => return None,
    });
  }

  pub fn sql_operator(&self) -> &'static str {
    return match self {
      Self::Eq => "=",
      Self::Neq => "!=",
      Self::Gt => ">",
      Self::Gte => ">=",
      Self::Lt => "<",
      Self::Lte => "<=",
      Self::Like => "LIKE",
      Self::In => "IN",
      Self::NotIn => "NOT IN",
      Self::Null => "IS NULL",
      Self::NotNull => "IS NOT NULL",
    };
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
  Single(String),
  Multi(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortTerm {
  pub column: String,
  pub descending: bool,
}

/// Parsed and validated listing parameters shared by `list` and `count`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
  pub fields: Option<Vec<String>>,
  pub filter: Vec<FilterTerm>,
  pub sort: Vec<SortTerm>,
  pub page: u64,
  pub page_size: u64,
}

impl ListOptions {
  pub fn offset(&self) -> u64 {
    return (self.page.saturating_sub(1)) * self.page_size;
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListMeta {
  pub total: u64,
  pub page: u64,
  pub page_size: u64,
  pub pages: u64,
}

impl ListMeta {
  pub fn new(total: u64, page: u64, page_size: u64) -> Self {
    let pages = if page_size == 0 {
      0
    } else {
      total.div_ceil(page_size)
    };
    return Self {
      total,
      page,
      page_size,
      pages,
    };
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
  pub data: Vec<BTreeMap<String, serde_json::Value>>,
  pub meta: ListMeta,
}

pub type Row = BTreeMap<String, serde_json::Value>;
