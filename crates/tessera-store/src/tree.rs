// tree.rs — Patch application on the in-memory value tree.
//
// The tree is a serde_json::Value whose root is always an Object. Every
// mutating helper here either fails before touching anything or succeeds
// completely, so a failed patch never leaves a half-applied tree behind.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::path::Path;

/// The kind of change a patch makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    /// Insert the value, overwriting anything already there.
    Add,
    /// Overwrite an existing value. Fails with NotFound if nothing is there.
    Replace,
    /// Delete an existing value. Fails with NotFound if nothing is there.
    Remove,
}

/// Look up a value. Array elements are addressed by decimal index.
pub(crate) fn get<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Apply one patch to the tree.
pub(crate) fn apply(
    root: &mut Value,
    op: PatchOp,
    path: &Path,
    value: Value,
) -> Result<(), StoreError> {
    let Some(key) = path.last() else {
        return apply_root(root, op, value);
    };

    let parent = parent_object_mut(root, path)?;
    match op {
        PatchOp::Add => {
            parent.insert(key.to_string(), value);
        }
        PatchOp::Replace => {
            let slot = parent
                .get_mut(key)
                .ok_or_else(|| StoreError::not_found(path))?;
            *slot = value;
        }
        PatchOp::Remove => {
            parent
                .remove(key)
                .ok_or_else(|| StoreError::not_found(path))?;
        }
    }
    Ok(())
}

fn apply_root(root: &mut Value, op: PatchOp, value: Value) -> Result<(), StoreError> {
    let path = Path::root();
    match op {
        PatchOp::Remove => Err(StoreError::conflict(&path, "the root cannot be removed")),
        PatchOp::Add | PatchOp::Replace => {
            if !value.is_object() {
                return Err(StoreError::conflict(&path, "the root must be an object"));
            }
            *root = value;
            Ok(())
        }
    }
}

/// Walk to the Object that holds the last segment of `path`.
fn parent_object_mut<'a>(
    root: &'a mut Value,
    path: &Path,
) -> Result<&'a mut Map<String, Value>, StoreError> {
    let depth = path.len() - 1;
    let mut node = root;
    for (i, segment) in path.segments()[..depth].iter().enumerate() {
        let map = match node {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::conflict(
                    &path.prefix(i),
                    "cannot write through a non-object value",
                ))
            }
        };
        node = map
            .get_mut(segment)
            .ok_or_else(|| StoreError::not_found(&path.prefix(i + 1)))?;
    }
    match node {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::conflict(
            &path.prefix(depth),
            "cannot write through a non-object value",
        )),
    }
}

/// Ensure every prefix of `path` (and `path` itself) is an Object, creating
/// missing ones parents-first. Returns true when anything was created.
///
/// Validation runs before the first insert, so a conflict leaves the tree
/// untouched.
pub(crate) fn make_dir(root: &mut Value, path: &Path) -> Result<bool, StoreError> {
    // Pass 1: find the first missing segment and check that every existing
    // prefix is an Object.
    let mut node = &*root;
    let mut existing = 0;
    for segment in path.segments() {
        let Value::Object(map) = node else {
            return Err(StoreError::conflict(
                &path.prefix(existing),
                "a non-object value occupies this path",
            ));
        };
        match map.get(segment) {
            Some(child) => {
                node = child;
                existing += 1;
            }
            None => break,
        }
    }
    if existing == path.len() {
        return if node.is_object() {
            Ok(false)
        } else {
            Err(StoreError::conflict(path, "a non-object value occupies this path"))
        };
    }

    // Pass 2: create the missing tail.
    let mut node = root;
    for segment in path.segments() {
        let Value::Object(map) = node else {
            return Err(StoreError::conflict(path, "a non-object value occupies this path"));
        };
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(true)
}

/// Insert `value` at `path`, creating intermediate Objects and replacing
/// anything non-Object in the way. When both the existing and the new value
/// are Objects they are merged recursively, the new value winning on
/// conflicting keys. Used to assemble bulk payloads.
pub fn merge_insert(root: &mut Value, path: &Path, value: Value) {
    let mut node = root;
    for segment in path.segments() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    merge_value(node, value);
}

fn merge_value(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}
