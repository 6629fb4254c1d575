//! Partial, all-or-nothing edits to configuration documents.
//!
//! Operations follow JSON Patch (RFC 6902) semantics over RFC 6901 pointers:
//!
//! ```text
//! [{ "op": "replace", "path": "/logLevel", "value": "debug" },
//!  { "op": "add",     "path": "/queries/-", "value": { "id": "q1" } }]
//! ```
//!
//! A patch runs against a copy of the document. If any operation fails, or
//! the result no longer has the document's shape, the whole patch is
//! rejected and the original is untouched.

use crate::error::{ControlPlaneError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One edit in a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    /// Insert a member or array element. `-` as the last array token appends.
    Add {
        /// Target pointer
        path: String,
        /// Value to insert
        value: Value,
    },
    /// Remove an existing member or array element.
    Remove {
        /// Target pointer
        path: String,
    },
    /// Replace an existing value.
    Replace {
        /// Target pointer
        path: String,
        /// New value
        value: Value,
    },
    /// Fail the patch unless the target equals `value`.
    Test {
        /// Target pointer
        path: String,
        /// Expected value
        value: Value,
    },
}

impl PatchOperation {
    /// `add` operation.
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Add {
            path: path.into(),
            value: value.into(),
        }
    }

    /// `remove` operation.
    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    /// `replace` operation.
    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Replace {
            path: path.into(),
            value: value.into(),
        }
    }

    /// `test` operation.
    pub fn test(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Test {
            path: path.into(),
            value: value.into(),
        }
    }

    /// The pointer this operation targets.
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Replace { path, .. }
            | Self::Test { path, .. } => path,
        }
    }
}

/// Apply `operations` to a copy of `target` and convert back.
///
/// # Errors
///
/// Returns `InvalidPatch` if any operation fails or the patched value does
/// not deserialize as `T`.
pub fn apply_to<T>(target: &T, operations: &[PatchOperation]) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let document = serde_json::to_value(target)?;
    let patched = apply(&document, operations)?;
    serde_json::from_value(patched)
        .map_err(|e| ControlPlaneError::InvalidPatch(format!("patched document is invalid: {e}")))
}

/// Apply `operations` to a copy of `document`.
///
/// # Errors
///
/// Returns `InvalidPatch` on the first failing operation.
pub fn apply(document: &Value, operations: &[PatchOperation]) -> Result<Value> {
    let mut working = document.clone();
    for operation in operations {
        apply_one(&mut working, operation)?;
    }
    Ok(working)
}

fn apply_one(doc: &mut Value, operation: &PatchOperation) -> Result<()> {
    match operation {
        PatchOperation::Add { path, value } => add(doc, path, value.clone()),
        PatchOperation::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOperation::Replace { path, value } => replace(doc, path, value.clone()),
        PatchOperation::Test { path, value } => {
            let actual = doc.pointer(path).ok_or_else(|| missing(path))?;
            if actual == value {
                Ok(())
            } else {
                Err(ControlPlaneError::InvalidPatch(format!(
                    "test failed at '{path}'"
                )))
            }
        }
    }
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) = split(path)?;
    match doc.pointer_mut(parent).ok_or_else(|| missing(path))? {
        Value::Object(map) => {
            map.insert(token, value);
            Ok(())
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let index = index(&token, path)?;
            if index > items.len() {
                return Err(out_of_bounds(path));
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(not_container(path)),
    }
}

fn remove(doc: &mut Value, path: &str) -> Result<Value> {
    if path.is_empty() {
        return Err(ControlPlaneError::InvalidPatch(
            "cannot remove the document root".into(),
        ));
    }
    let (parent, token) = split(path)?;
    match doc.pointer_mut(parent).ok_or_else(|| missing(path))? {
        Value::Object(map) => map.remove(&token).ok_or_else(|| missing(path)),
        Value::Array(items) => {
            let index = index(&token, path)?;
            if index >= items.len() {
                return Err(out_of_bounds(path));
            }
            Ok(items.remove(index))
        }
        _ => Err(not_container(path)),
    }
}

fn replace(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let target = doc.pointer_mut(path).ok_or_else(|| missing(path))?;
    *target = value;
    Ok(())
}

/// Split `/a/b/c` into the parent pointer `/a/b` and the unescaped token `c`.
fn split(path: &str) -> Result<(&str, String)> {
    if !path.starts_with('/') {
        return Err(ControlPlaneError::InvalidPatch(format!(
            "path '{path}' must start with '/'"
        )));
    }
    // `rfind` always succeeds after the check above
    let at = path.rfind('/').unwrap_or(0);
    let token = path[at + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&path[..at], token))
}

fn index(token: &str, path: &str) -> Result<usize> {
    if token.len() > 1 && token.starts_with('0') {
        return Err(out_of_bounds(path));
    }
    token.parse().map_err(|_| {
        ControlPlaneError::InvalidPatch(format!("'{token}' is not an array index in '{path}'"))
    })
}

fn missing(path: &str) -> ControlPlaneError {
    ControlPlaneError::InvalidPatch(format!("path '{path}' does not exist"))
}

fn out_of_bounds(path: &str) -> ControlPlaneError {
    ControlPlaneError::InvalidPatch(format!("index out of bounds at '{path}'"))
}

fn not_container(path: &str) -> ControlPlaneError {
    ControlPlaneError::InvalidPatch(format!("parent of '{path}' is not an object or array"))
}
