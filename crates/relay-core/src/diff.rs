//! Keyed snapshot diffing.
//!
//! An entry lands in `removes` when its identity is absent from the
//! desired list or present with different fields; `adds` applies the
//! same test against the current map. A changed entry therefore shows
//! up in both lists: updates are remove-then-add, never in-place
//! mutation. Clients (keyed by email) and routes (keyed by tag) share
//! the one algorithm.

use std::collections::HashMap;

use crate::types::{ClientSpec, RouteRule};

/// Implemented by entities matched across snapshots by a stable
/// identity field.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for ClientSpec {
    fn key(&self) -> &str {
        &self.email
    }
}

impl Keyed for RouteRule {
    fn key(&self) -> &str {
        &self.tag
    }
}

/// Additions and removals needed to converge current onto desired.
/// Transient: recomputed every apply cycle, never persisted.
#[derive(Debug, Clone)]
pub struct Changes<T> {
    pub adds: Vec<T>,
    pub removes: Vec<T>,
}

impl<T> Default for Changes<T> {
    fn default() -> Self {
        Self {
            adds: Vec::new(),
            removes: Vec::new(),
        }
    }
}

impl<T> Changes<T> {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }
}

/// Diff the current keyed map against the desired list.
///
/// `removes` comes back sorted by key so callers issue deterministic
/// call sequences; `adds` preserves the desired-list order.
pub fn diff<T>(current: &HashMap<String, T>, desired: &[T]) -> Changes<T>
where
    T: Keyed + PartialEq + Clone,
{
    let mut desired_by_key: HashMap<&str, &T> = HashMap::with_capacity(desired.len());
    for item in desired {
        desired_by_key.insert(item.key(), item);
    }

    let mut changes = Changes::default();
    for cur in current.values() {
        let keep = desired_by_key
            .get(cur.key())
            .is_some_and(|want| *want == cur);
        if !keep {
            changes.removes.push(cur.clone());
        }
    }
    changes.removes.sort_by(|a, b| a.key().cmp(b.key()));

    for want in desired {
        let unchanged = current.get(want.key()).is_some_and(|cur| cur == want);
        if !unchanged {
            changes.adds.push(want.clone());
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Proto;

    fn client(email: &str, id: &str) -> ClientSpec {
        ClientSpec {
            proto: Proto::Vless,
            id: id.to_string(),
            password: String::new(),
            email: email.to_string(),
        }
    }

    fn as_map(clients: &[ClientSpec]) -> HashMap<String, ClientSpec> {
        clients
            .iter()
            .map(|c| (c.email.clone(), c.clone()))
            .collect()
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let current = as_map(&[client("a@x.io", "id1"), client("b@x.io", "id2")]);
        let desired = vec![client("b@x.io", "id2"), client("a@x.io", "id1")];

        let changes = diff(&current, &desired);
        assert!(changes.is_empty());
    }

    #[test]
    fn absent_identity_is_removed() {
        let current = as_map(&[client("a@x.io", "id1"), client("b@x.io", "id2")]);
        let desired = vec![client("a@x.io", "id1")];

        let changes = diff(&current, &desired);
        assert!(changes.adds.is_empty());
        assert_eq!(changes.removes.len(), 1);
        assert_eq!(changes.removes[0].email, "b@x.io");
    }

    #[test]
    fn new_identity_is_added() {
        let current = as_map(&[client("a@x.io", "id1")]);
        let desired = vec![client("a@x.io", "id1"), client("c@x.io", "id3")];

        let changes = diff(&current, &desired);
        assert!(changes.removes.is_empty());
        assert_eq!(changes.adds.len(), 1);
        assert_eq!(changes.adds[0].email, "c@x.io");
    }

    #[test]
    fn changed_identity_appears_in_both_lists() {
        let current = as_map(&[client("a@x.io", "old-id")]);
        let desired = vec![client("a@x.io", "new-id")];

        let changes = diff(&current, &desired);
        assert_eq!(changes.removes.len(), 1);
        assert_eq!(changes.adds.len(), 1);
        assert_eq!(changes.removes[0].id, "old-id");
        assert_eq!(changes.adds[0].id, "new-id");
    }

    #[test]
    fn replacement_yields_remove_and_add() {
        // current = {A: vless/id1}, desired = {B: vless/id2}
        let current = as_map(&[client("a@x.io", "id1")]);
        let desired = vec![client("b@x.io", "id2")];

        let changes = diff(&current, &desired);
        assert_eq!(changes.removes.len(), 1);
        assert_eq!(changes.removes[0].email, "a@x.io");
        assert_eq!(changes.adds.len(), 1);
        assert_eq!(changes.adds[0].email, "b@x.io");
    }

    #[test]
    fn removes_come_out_sorted_by_key() {
        let current = as_map(&[
            client("c@x.io", "id3"),
            client("a@x.io", "id1"),
            client("b@x.io", "id2"),
        ]);
        let desired: Vec<ClientSpec> = Vec::new();

        let changes = diff(&current, &desired);
        let emails: Vec<&str> = changes.removes.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.io", "b@x.io", "c@x.io"]);
    }

    #[test]
    fn routes_diff_by_tag_with_order_sensitive_lists() {
        let rule = |tag: &str, domains: &[&str]| RouteRule {
            tag: tag.to_string(),
            outbound_tag: "direct".to_string(),
            domain: domains.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        };

        let mut current = HashMap::new();
        current.insert("r1".to_string(), rule("r1", &["a.com", "b.com"]));

        // Same members, different order: treated as a change.
        let desired = vec![rule("r1", &["b.com", "a.com"])];
        let changes = diff(&current, &desired);
        assert_eq!(changes.removes.len(), 1);
        assert_eq!(changes.adds.len(), 1);

        let same = vec![rule("r1", &["a.com", "b.com"])];
        assert!(diff(&current, &same).is_empty());
    }
}
