// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Schema path resolution
//!
//! Validates request paths against the schema and turns operational subtrees
//! into flat `{leaf path -> value}` maps. Leaf paths carry the module prefix
//! of the request on their first element and `[key='value']` predicates on
//! every list entry, e.g.
//!
//! ```text
//! /goldstone-interfaces:interfaces/interface[name='Ethernet1_1']/state/oper-status
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::datastore::{Datastore, SchemaContext, SchemaNode};
use crate::error::{Result, TelemetryError};

/// Leaves of a flattened subtree, ordered by path
pub type Leaves = BTreeMap<String, Value>;

/// One element of a schema path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathElem {
    pub prefix: Option<String>,
    pub name: String,
    /// List key predicates in path order
    pub keys: Vec<(String, String)>,
}

impl PathElem {
    fn parse(raw: &str) -> Result<Self> {
        let invalid = || TelemetryError::ValidationFailed(format!("invalid path element {:?}", raw));
        let (head, mut rest) = match raw.find('[') {
            Some(i) => (&raw[..i], &raw[i..]),
            None => (raw, ""),
        };
        let (prefix, name) = match head.split_once(':') {
            Some((p, n)) => (Some(p.to_string()), n.to_string()),
            None => (None, head.to_string()),
        };
        if name.is_empty() || prefix.as_deref() == Some("") {
            return Err(invalid());
        }

        let mut keys = Vec::new();
        while !rest.is_empty() {
            let body = rest.strip_prefix('[').ok_or_else(invalid)?;
            let (key, after) = body.split_once('=').ok_or_else(invalid)?;
            let quote = after.chars().next().filter(|c| *c == '\'' || *c == '"').ok_or_else(invalid)?;
            let after = &after[1..];
            let end = after.find(quote).ok_or_else(invalid)?;
            let value = &after[..end];
            rest = after[end + 1..].strip_prefix(']').ok_or_else(invalid)?;
            let key = key.trim();
            let key = key.rsplit(':').next().unwrap_or(key);
            if key.is_empty() {
                return Err(invalid());
            }
            keys.push((key.to_string(), value.to_string()));
        }

        Ok(Self { prefix, name, keys })
    }
}

impl fmt::Display for PathElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, "{}:", prefix)?;
        }
        write!(f, "{}", self.name)?;
        for (k, v) in &self.keys {
            let q = quote_char(v).unwrap_or('\'');
            write!(f, "[{}={}{}{}]", k, q, v, q)?;
        }
        Ok(())
    }
}

/// Split an absolute path into elements. `/` inside quoted predicate values
/// does not separate elements.
pub fn parse_path(path: &str) -> Result<Vec<PathElem>> {
    let body = path
        .strip_prefix('/')
        .ok_or_else(|| TelemetryError::ValidationFailed(format!("path {:?} is not absolute", path)))?;

    let mut elems = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if depth > 0 => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => {
                elems.push(PathElem::parse(&body[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth > 0 {
        return Err(TelemetryError::ValidationFailed(format!(
            "unterminated predicate in {:?}",
            path
        )));
    }
    elems.push(PathElem::parse(&body[start..])?);
    Ok(elems)
}

/// Quote for a predicate value: `'` unless the value contains one, then `"`.
/// `None` when the value contains both.
fn quote_char(value: &str) -> Option<char> {
    match (value.contains('\''), value.contains('"')) {
        (false, _) => Some('\''),
        (true, false) => Some('"'),
        (true, true) => None,
    }
}

/// Render a list key the way it appears in a leaf path, e.g. `[name='eth0']`
fn key_predicate(key: &str, value: &Value) -> Result<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let q = quote_char(&text).ok_or_else(|| {
        TelemetryError::Internal(format!("key {} value {:?} cannot be quoted", key, text))
    })?;
    Ok(format!("[{}={}{}{}]", key, q, text, q))
}

fn is_list(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.iter().any(Value::is_object))
}

/// Path validation and subtree flattening (C1)
pub struct PathResolver {
    datastore: Arc<dyn Datastore>,
    schema: Arc<dyn SchemaContext>,
    read_timeout: Duration,
}

impl PathResolver {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        schema: Arc<dyn SchemaContext>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            datastore,
            schema,
            read_timeout,
        }
    }

    fn find_node(&self, elems: &[PathElem]) -> Option<&SchemaNode> {
        let (head, rest) = elems.split_first()?;
        let top = match &head.prefix {
            Some(prefix) => format!("/{}:{}", prefix, head.name),
            None => format!("/{}", head.name),
        };
        let mut node = self.schema.find_node(&top).ok()?;
        for elem in rest {
            node = node.child(&elem.name)?;
        }
        Some(node)
    }

    /// Whether every element of `path` names a schema node. Key predicates are
    /// not checked against the schema.
    pub fn is_valid_path(&self, path: &str) -> bool {
        match parse_path(path) {
            Ok(elems) => self.find_node(&elems).is_some(),
            Err(e) => {
                log::debug!("rejecting path {}: {}", path, e);
                false
            }
        }
    }

    /// Read the operational data under `path` and flatten it into leaves.
    ///
    /// Missing data yields an empty map. Read failures and timeouts are
    /// returned to the caller.
    pub async fn fetch_and_flatten(&self, path: &str) -> Result<Leaves> {
        let data = tokio::time::timeout(self.read_timeout, self.datastore.get_operational(path))
            .await
            .map_err(|_| {
                TelemetryError::Timeout(format!(
                    "operational read of {} exceeded {:?}",
                    path, self.read_timeout
                ))
            })??;
        match data {
            Some(data) => self.flatten(&data, path),
            None => {
                log::debug!("no operational data for {}", path);
                Ok(Leaves::new())
            }
        }
    }

    /// Flatten a tree rooted at unprefixed top-level names, keeping only the
    /// leaves at or below `path`.
    pub fn flatten(&self, data: &Value, path: &str) -> Result<Leaves> {
        let request = parse_path(path)?;
        let prefix = request.first().and_then(|e| e.prefix.as_deref());
        let root = data.as_object().ok_or_else(|| {
            TelemetryError::Datastore(format!("operational data for {} is not an object", path))
        })?;

        let mut leaves = Leaves::new();
        for (name, value) in root {
            let top = match prefix {
                Some(p) => format!("/{}:{}", p, name),
                None => format!("/{}", name),
            };
            let node = self.schema.find_node(&top).ok();
            self.collect(value, top, node, &mut leaves)?;
        }

        leaves.retain(|leaf, _| within(&request, leaf));
        Ok(leaves)
    }

    fn collect(
        &self,
        value: &Value,
        path: String,
        node: Option<&SchemaNode>,
        leaves: &mut Leaves,
    ) -> Result<()> {
        match value {
            Value::Object(members) => {
                for (name, child) in members {
                    let child_node = node.and_then(|n| n.child(name));
                    self.collect(child, format!("{}/{}", path, name), child_node, leaves)?;
                }
            }
            Value::Array(entries) if is_list(value) => {
                let node = node.ok_or_else(|| {
                    TelemetryError::Internal(format!("no schema node for list {}", path))
                })?;
                let keys = self.schema.list_keys_of(node);
                for entry in entries.iter().filter(|e| e.is_object()) {
                    let mut entry_path = path.clone();
                    for key in &keys {
                        let key_value = entry.get(key).ok_or_else(|| {
                            TelemetryError::Internal(format!(
                                "entry of list {} has no key {}",
                                path, key
                            ))
                        })?;
                        entry_path.push_str(&key_predicate(key, key_value)?);
                    }
                    self.collect(entry, entry_path, Some(node), leaves)?;
                }
            }
            _ => {
                leaves.insert(path, value.clone());
            }
        }
        Ok(())
    }
}

/// Whether `leaf` lies at or below the request path. Element names must match;
/// where a request element carries key predicates the leaf must agree on them.
fn within(request: &[PathElem], leaf: &str) -> bool {
    let Ok(elems) = parse_path(leaf) else {
        return false;
    };
    if elems.len() < request.len() {
        return false;
    }
    request.iter().zip(&elems).all(|(want, got)| {
        want.name == got.name
            && want
                .keys
                .iter()
                .all(|(k, v)| got.keys.iter().any(|(gk, gv)| gk == k && gv == v))
    })
}
