//! Resolution of `require` paths against a design-document tree.
//!
//! A [`ModuleContext`] points at a node of the tree and remembers the chain
//! of containers it was reached through, which is what `.` and `..` walk.
//! The tree itself is never modified; compiled modules are cached by id in
//! the design-document cache.

use std::collections::VecDeque;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::errors::QueryServerError;

const RESOLVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::resolver");

/// Position reached while walking a design-document tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleContext {
    id: Option<String>,
    location: Option<Vec<String>>,
    parent: Option<Box<ModuleContext>>,
}

impl ModuleContext {
    /// Context for the root of the tree.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            id: None,
            location: Some(Vec::new()),
            parent: None,
        }
    }

    /// Slash-separated id of the current node, `None` at the root.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Keys leading from the root to the current node.
    #[must_use]
    pub fn location(&self) -> Option<&[String]> {
        self.location.as_deref()
    }

    /// Context of the enclosing container.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    /// Looks up the current node in `tree`.
    pub fn current<'t>(&self, tree: &'t Value) -> Option<&'t Value> {
        self.location
            .as_ref()?
            .iter()
            .try_fold(tree, |node, key| node.get(key.as_str()))
    }

    fn child(self, name: &str) -> Self {
        let id = match &self.id {
            Some(id) => format!("{id}/{name}"),
            None => name.to_owned(),
        };
        let location = self.location.clone().map(|mut keys| {
            keys.push(name.to_owned());
            keys
        });
        Self {
            id: Some(id),
            location,
            parent: Some(Box::new(self)),
        }
    }

    fn described(&self) -> DescribedId<'_> {
        DescribedId(self.id.as_deref())
    }
}

struct DescribedId<'a>(Option<&'a str>);

impl fmt::Display for DescribedId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "'{id}'"),
            None => f.write_str("the design document root"),
        }
    }
}

/// Splits a `require` path into segments, keeping empty ones so they can be
/// rejected.
#[must_use]
pub fn split_path(path: &str) -> VecDeque<String> {
    path.split('/').map(str::to_owned).collect()
}

/// Resolves `path` starting from `from`, with `tree` as the root that plain
/// leading segments rebind to.
///
/// # Errors
///
/// Returns [`QueryServerError::Resolution`] for empty segments, `.`/`..`
/// without enough ancestors, missing keys, and leaves that are not source
/// text.
pub fn resolve(
    path: &str,
    from: ModuleContext,
    tree: &Value,
) -> Result<ModuleContext, QueryServerError> {
    let mut names = split_path(path);
    resolve_module(&mut names, from, tree)
}

/// Consumes `names` one segment at a time.
///
/// Only the first segment may rebind to the root; after that, plain segments
/// descend from wherever `.` and `..` left the context.
pub fn resolve_module(
    names: &mut VecDeque<String>,
    from: ModuleContext,
    tree: &Value,
) -> Result<ModuleContext, QueryServerError> {
    let mut module = from;
    let mut at_top = true;

    while let Some(name) = names.pop_front() {
        debug!(target: RESOLVER_TARGET, id = ?module.id, segment = %name, "resolving segment");
        module = match name.as_str() {
            "" => {
                return Err(QueryServerError::resolution(format!(
                    "required path must not start with a slash or contain empty segments \
                     (at {})",
                    module.described()
                )));
            }
            ".." => ascend(module)?,
            "." => {
                if module.parent.is_none() {
                    return Err(QueryServerError::resolution(format!(
                        "object {} has no parent",
                        module.described()
                    )));
                }
                module
            }
            segment => {
                if at_top {
                    module = ModuleContext::root();
                }
                descend(module, segment, tree)?
            }
        };
        at_top = false;
    }

    match module.current(tree) {
        Some(Value::String(_)) => Ok(module),
        other => Err(QueryServerError::resolution(format!(
            "must require source text, not {} (at {})",
            json_type(other),
            module.described()
        ))),
    }
}

fn ascend(module: ModuleContext) -> Result<ModuleContext, QueryServerError> {
    let ModuleContext { id, parent, .. } = module;
    let parent = match parent {
        Some(parent) if parent.parent.is_some() => *parent,
        _ => {
            return Err(QueryServerError::resolution(format!(
                "object {} has no parent",
                DescribedId(id.as_deref())
            )));
        }
    };
    let id = id.and_then(|id| id.rfind('/').map(|cut| id[..cut].to_owned()));
    Ok(ModuleContext {
        id,
        location: parent.location,
        parent: parent.parent,
    })
}

fn descend(
    module: ModuleContext,
    name: &str,
    tree: &Value,
) -> Result<ModuleContext, QueryServerError> {
    let Some(current) = module.current(tree) else {
        return Err(QueryServerError::resolution(format!(
            "required module missing (at {})",
            module.described()
        )));
    };
    if current.get(name).is_none() {
        return Err(QueryServerError::resolution(format!(
            "object {} has no property '{name}'",
            module.described()
        )));
    }
    Ok(module.child(name))
}

fn json_type(value: Option<&Value>) -> &'static str {
    match value {
        None | Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

#[cfg(test)]
mod tests;
