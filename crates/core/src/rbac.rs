use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// The closed action set RBAC decisions are made over. The router collapses
/// the larger action-string space (`list`, `count`, `read`, `create`,
/// `bulk_create`, `update`, `delete`, `bulk_delete`) onto these five
/// categories per the action-to-category mapping in §4.10 before ever
/// calling `RbacTable::is_allowed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  List,
  Read,
  Create,
  Update,
  Delete,
}

impl Action {
  pub fn as_str(&self) -> &'static str {
    return match self {
      Self::List => "list",
      Self::Read => "read",
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    };
  }
}

pub const WILDCARD_TABLE: &str = "*";

/// Role → table-or-"*" → allowed actions, loaded once from `Config.roles` at
/// startup. A strictly table+action level decision table — unlike the
/// reference's row-level ACL bitflags plus per-row SQL predicates, this
/// answers one closed question (`is_allowed(role, table, action)`), nothing
/// about which rows a query is allowed to touch.
#[derive(Debug, Clone, Default)]
pub struct RbacTable {
  rules: HashMap<String, HashMap<String, HashSet<Action>>>,
}

impl RbacTable {
  pub fn new(rules: HashMap<String, HashMap<String, HashSet<Action>>>) -> Self {
    return Self { rules };
  }

  /// `isAllowed(role, table, action)` from §4.5:
  /// 1. Unknown role → deny.
  /// 2. Explicit entry keyed by `table` → empty set denies (DENY takes
  ///    precedence over wildcard), non-empty set allows iff `action` is in it.
  /// 3. Else `"*"` entry → allow iff `action` is in it.
  /// 4. Else deny.
  pub fn is_allowed(&self, role: &str, table: &str, action: Action) -> bool {
    let Some(role_rules) = self.rules.get(role) else {
      return false;
    };

    if let Some(actions) = role_rules.get(table) {
      return actions.contains(&action);
    }

    if let Some(actions) = role_rules.get(WILDCARD_TABLE) {
      return actions.contains(&action);
    }

    return false;
  }
}
