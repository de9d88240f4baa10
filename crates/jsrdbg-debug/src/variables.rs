//! Variable trees and the `variablesReference` handles that address them.
//!
//! A reference is `pair(frame_id, slot)`, where `slot` is handed out per frame
//! by [`ReferenceAllocator`] and memoized by evaluate-name, so re-fetching the
//! same expression in the same frame yields the same reference and distinct
//! expressions never collide. Reference `0` marks a leaf.

use std::collections::HashMap;

use jsrdbg_wire::{Context, ContextId, JsrdbgError, RawVariable};
use serde_json::Value;

use crate::error::{DebugError, DebugResult};
use crate::frame_map::StackFrame;
use crate::pairing::{pair, unpair};

/// The engine's stand-in for JS `undefined`, which JSON cannot carry.
pub const UNDEFINED_SENTINEL: &str = "___jsrdbg_undefined___";
/// Key of the object the engine sends in place of a function.
pub const FUNCTION_DESC_KEY: &str = "___jsrdbg_function_desc___";

/// Allocation key of a frame's local scope. No JS expression is empty.
const SCOPE_KEY: &str = "";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// Expression that re-fetches this value in its frame.
    pub evaluate_name: String,
    pub value: String,
    pub type_name: String,
    pub variables_reference: u64,
    /// Presentation hint, `"method"` for functions.
    pub kind: Option<String>,
}

impl Variable {
    fn leaf(name: &str, evaluate_name: &str, value: impl Into<String>, type_name: &str) -> Self {
        Self {
            name: name.to_owned(),
            evaluate_name: evaluate_name.to_owned(),
            value: value.into(),
            type_name: type_name.to_owned(),
            variables_reference: 0,
            kind: None,
        }
    }
}

/// The frame a container's expressions are evaluated in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameKey {
    pub frame_id: u64,
    pub context_id: ContextId,
    pub depth: u32,
}

impl From<&StackFrame> for FrameKey {
    fn from(frame: &StackFrame) -> Self {
        Self {
            frame_id: frame.id,
            context_id: frame.context_id,
            depth: frame.depth,
        }
    }
}

/// Where a lazily expanded object hangs in its parent container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentLink {
    pub reference: u64,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct VariablesContainer {
    pub frame: FrameKey,
    pub evaluate_name: String,
    pub variables: Vec<Variable>,
    /// Set only for objects whose members are fetched on demand.
    pub parent: Option<ParentLink>,
    expanded: bool,
}

impl VariablesContainer {
    fn new(frame: FrameKey, evaluate_name: &str) -> Self {
        Self {
            frame,
            evaluate_name: evaluate_name.to_owned(),
            variables: Vec::new(),
            parent: None,
            expanded: true,
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.frame.context_id
    }

    /// An object container whose members have not been fetched yet.
    pub fn needs_expansion(&self) -> bool {
        self.parent.is_some() && !self.expanded
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|variable| variable.name == name)
    }

    /// Replace the variable with the same name in place, or append.
    pub fn upsert(&mut self, variable: Variable) {
        match self.variables.iter_mut().find(|v| v.name == variable.name) {
            Some(existing) => *existing = variable,
            None => self.variables.push(variable),
        }
    }
}

#[derive(Debug, Default)]
struct FrameSlots {
    next: u64,
    by_key: HashMap<String, u64>,
}

/// Per-frame slot counter behind `variablesReference` values.
#[derive(Debug, Default)]
pub struct ReferenceAllocator {
    frames: HashMap<u64, FrameSlots>,
}

impl ReferenceAllocator {
    pub fn allocate(&mut self, frame_id: u64, key: &str) -> DebugResult<u64> {
        let slots = self.frames.entry(frame_id).or_default();
        let slot = match slots.by_key.get(key) {
            Some(slot) => *slot,
            None => {
                slots.next += 1;
                slots.by_key.insert(key.to_owned(), slots.next);
                slots.next
            }
        };
        pair(frame_id, slot).ok_or(DebugError::IdSpaceExhausted(frame_id, slot))
    }

    pub fn remove_context(&mut self, context_id: ContextId) {
        self.frames
            .retain(|frame_id, _| unpair(*frame_id).0 != context_id);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[derive(Debug, Default)]
pub struct VariablesMap {
    containers: HashMap<u64, VariablesContainer>,
    allocator: ReferenceAllocator,
}

impl VariablesMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: u64) -> DebugResult<&VariablesContainer> {
        self.containers
            .get(&reference)
            .ok_or(DebugError::UnknownVariablesReference(reference))
    }

    fn get_mut(&mut self, reference: u64) -> DebugResult<&mut VariablesContainer> {
        self.containers
            .get_mut(&reference)
            .ok_or(DebugError::UnknownVariablesReference(reference))
    }

    /// Build the local scope of `frame` from the engine's variables and
    /// return its reference. Rebuilding a scope replaces its contents.
    pub fn create_scope(&mut self, frame: FrameKey, raw: &[RawVariable]) -> DebugResult<u64> {
        let reference = self.allocator.allocate(frame.frame_id, SCOPE_KEY)?;
        self.containers
            .insert(reference, VariablesContainer::new(frame, SCOPE_KEY));

        for variable in raw {
            let variable =
                self.create_variable(frame, &variable.name, &variable.name, &variable.value, reference)?;
            self.get_mut(reference)?.upsert(variable);
        }
        Ok(reference)
    }

    /// Turn a raw engine value into a [`Variable`].
    ///
    /// Arrays are expanded eagerly into a new container. Plain objects get an
    /// empty container linked to `parent`, filled later by
    /// [`VariablesMap::add_object_members`].
    pub fn create_variable(
        &mut self,
        frame: FrameKey,
        name: &str,
        evaluate_name: &str,
        value: &Value,
        parent: u64,
    ) -> DebugResult<Variable> {
        let variable = match value {
            Value::String(text) if text == UNDEFINED_SENTINEL => {
                Variable::leaf(name, evaluate_name, "undefined", "undefined")
            }
            Value::String(text) => Variable::leaf(name, evaluate_name, text.clone(), "string"),
            Value::Number(number) => {
                Variable::leaf(name, evaluate_name, number.to_string(), "number")
            }
            Value::Bool(flag) => Variable::leaf(name, evaluate_name, flag.to_string(), "boolean"),
            Value::Null => Variable::leaf(name, evaluate_name, "null", "object"),
            Value::Object(map) if map.contains_key(FUNCTION_DESC_KEY) => {
                function_variable(name, evaluate_name, &map[FUNCTION_DESC_KEY])
            }
            Value::Array(items) => {
                let elements: Vec<(usize, &Value)> = items.iter().enumerate().collect();
                self.array_variable(frame, name, evaluate_name, items.len(), &elements)?
            }
            Value::Object(map) if map.get("length").is_some_and(Value::is_u64) => {
                let len = map
                    .get("length")
                    .and_then(Value::as_u64)
                    .unwrap_or_default() as usize;
                let mut elements: Vec<(usize, &Value)> = map
                    .iter()
                    .filter_map(|(key, value)| key.parse::<usize>().ok().map(|index| (index, value)))
                    .collect();
                elements.sort_by_key(|(index, _)| *index);
                self.array_variable(frame, name, evaluate_name, len, &elements)?
            }
            Value::Object(_) => {
                let reference = self.allocator.allocate(frame.frame_id, evaluate_name)?;
                let mut container = VariablesContainer::new(frame, evaluate_name);
                container.parent = Some(ParentLink {
                    reference: parent,
                    name: name.to_owned(),
                });
                container.expanded = false;
                self.containers.insert(reference, container);

                Variable {
                    variables_reference: reference,
                    ..Variable::leaf(name, evaluate_name, "Object", "object")
                }
            }
        };
        Ok(variable)
    }

    fn array_variable(
        &mut self,
        frame: FrameKey,
        name: &str,
        evaluate_name: &str,
        len: usize,
        elements: &[(usize, &Value)],
    ) -> DebugResult<Variable> {
        let reference = self.allocator.allocate(frame.frame_id, evaluate_name)?;
        self.containers
            .insert(reference, VariablesContainer::new(frame, evaluate_name));

        for (index, value) in elements {
            let child_name = index.to_string();
            let child_eval = format!("{evaluate_name}[{index}]");
            let child = self.create_variable(frame, &child_name, &child_eval, value, reference)?;
            self.get_mut(reference)?.upsert(child);
        }

        Ok(Variable {
            variables_reference: reference,
            ..Variable::leaf(name, evaluate_name, format!("Array[{len}]"), "array")
        })
    }

    /// Fetch the members of a lazily expanded object from the engine.
    ///
    /// Calling this again refreshes the members in place.
    pub async fn add_object_members(&mut self, context: &Context, reference: u64) -> DebugResult<()> {
        let container = self.get(reference)?;
        if container.parent.is_none() {
            return Err(DebugError::NotExpandable(reference));
        }
        let expression = object_summary_expression(&container.evaluate_name);
        let depth = container.frame.depth;

        tracing::debug!(
            target: "jsrdbg.debug",
            reference,
            evaluate_name = %container.evaluate_name,
            "expanding object"
        );
        let result = context.evaluate(&expression, Some(depth)).await?;
        self.populate_object(reference, &result)
    }

    /// Fill an object container from the JSON produced by
    /// [`object_summary_expression`].
    pub fn populate_object(&mut self, reference: u64, result: &Value) -> DebugResult<()> {
        let container = self.get(reference)?;
        let frame = container.frame;
        let parent_eval = container.evaluate_name.clone();

        let members = match result {
            Value::String(json) => serde_json::from_str(json).map_err(JsrdbgError::from)?,
            other => other.clone(),
        };
        let Value::Object(members) = members else {
            return Err(JsrdbgError::Protocol(format!(
                "object expansion of `{parent_eval}` did not produce an object"
            ))
            .into());
        };

        for (key, value) in &members {
            let child_eval = member_expression(&parent_eval, key);
            let child = self.create_variable(frame, key, &child_eval, value, reference)?;
            self.get_mut(reference)?.upsert(child);
        }
        self.get_mut(reference)?.expanded = true;
        Ok(())
    }

    /// Rebuild variable `name` of container `reference` from a new value.
    pub fn update_variable(&mut self, reference: u64, name: &str, value: &Value) -> DebugResult<Variable> {
        let container = self.get(reference)?;
        let frame = container.frame;
        let evaluate_name = match container.get(name) {
            Some(existing) => existing.evaluate_name.clone(),
            None if container.evaluate_name.is_empty() => name.to_owned(),
            None => member_expression(&container.evaluate_name, name),
        };

        let variable = self.create_variable(frame, name, &evaluate_name, value, reference)?;
        self.get_mut(reference)?.upsert(variable.clone());
        Ok(variable)
    }

    /// Drop every container of a context, e.g. after it resumes.
    pub fn remove_context(&mut self, context_id: ContextId) {
        self.containers
            .retain(|_, container| container.context_id() != context_id);
        self.allocator.remove_context(context_id);
    }

    pub fn clear(&mut self) {
        self.containers.clear();
        self.allocator.clear();
    }
}

fn function_variable(name: &str, evaluate_name: &str, desc: &Value) -> Variable {
    let params: Vec<&str> = desc
        .get("parameterNames")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    Variable {
        kind: Some("method".to_owned()),
        ..Variable::leaf(
            name,
            evaluate_name,
            format!("function ({})", params.join(", ")),
            "function",
        )
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn member_expression(parent: &str, key: &str) -> String {
    if is_identifier(key) {
        format!("{parent}.{key}")
    } else {
        format!("{parent}[{}]", Value::String(key.to_owned()))
    }
}

/// A remote expression that serializes `expression` to JSON, with compact
/// summaries for host wrapper types whose plain dump is useless or huge.
pub fn object_summary_expression(expression: &str) -> String {
    format!(
        "(function(o){{\
var c=o&&o.constructor?o.constructor.name:\"\";\
if(c===\"Date\")return JSON.stringify({{value:o.toISOString()}});\
if(c===\"File\"||c===\"DocFile\")return JSON.stringify({{type:c,name:String(o.name),size:o.size}});\
if(c===\"DBResultSet\")return JSON.stringify({{type:c,size:o.size}});\
return JSON.stringify(o);\
}})({expression})"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn frame() -> FrameKey {
        FrameKey {
            frame_id: pair(1, 0).unwrap(),
            context_id: 1,
            depth: 0,
        }
    }

    fn summary(variable: &Variable) -> (&str, &str, u64) {
        (
            variable.value.as_str(),
            variable.type_name.as_str(),
            variable.variables_reference,
        )
    }

    #[test]
    fn primitive_construction() {
        let mut map = VariablesMap::new();
        let scope = map.create_scope(frame(), &[]).unwrap();
        let cases = [
            (json!("myValue"), ("myValue", "string", 0)),
            (json!(666), ("666", "number", 0)),
            (json!(true), ("true", "boolean", 0)),
            (json!(UNDEFINED_SENTINEL), ("undefined", "undefined", 0)),
        ];
        for (value, expected) in cases {
            let variable = map.create_variable(frame(), "v", "v", &value, scope).unwrap();
            assert_eq!(summary(&variable), expected);
        }
    }

    #[test]
    fn function_descriptor_is_a_method_leaf() {
        let mut map = VariablesMap::new();
        let value = json!({ FUNCTION_DESC_KEY: { "parameterNames": ["a", "b"] } });
        let variable = map.create_variable(frame(), "f", "f", &value, 0).unwrap();
        assert_eq!(summary(&variable), ("function (a, b)", "function", 0));
        assert_eq!(variable.kind.as_deref(), Some("method"));
    }

    #[test]
    fn arrays_are_expanded_eagerly() {
        let mut map = VariablesMap::new();
        let variable = map
            .create_variable(frame(), "xs", "xs", &json!([1, "two", [3]]), 0)
            .unwrap();
        assert_eq!(variable.value, "Array[3]");
        assert_ne!(variable.variables_reference, 0);

        let container = map.get(variable.variables_reference).unwrap();
        let names: Vec<_> = container.variables.iter().map(|v| v.evaluate_name.as_str()).collect();
        assert_eq!(names, vec!["xs[0]", "xs[1]", "xs[2]"]);
        let nested = &container.variables[2];
        assert_eq!(nested.value, "Array[1]");
        assert_eq!(map.get(nested.variables_reference).unwrap().variables[0].value, "3");
    }

    #[test]
    fn objects_with_length_are_arrays() {
        let mut map = VariablesMap::new();
        let value = json!({ "length": 2, "1": "b", "0": "a" });
        let variable = map.create_variable(frame(), "args", "args", &value, 0).unwrap();
        assert_eq!(variable.type_name, "array");
        let values: Vec<_> = map
            .get(variable.variables_reference)
            .unwrap()
            .variables
            .iter()
            .map(|v| v.value.clone())
            .collect();
        assert_eq!(values, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn plain_objects_expand_lazily() {
        let mut map = VariablesMap::new();
        let scope = map
            .create_scope(
                frame(),
                &[RawVariable {
                    name: "obj".to_owned(),
                    value: json!({ "ignored": 1 }),
                }],
            )
            .unwrap();
        let obj = map.get(scope).unwrap().get("obj").cloned().unwrap();
        let container = map.get(obj.variables_reference).unwrap();
        assert!(container.needs_expansion());
        assert!(container.variables.is_empty());
        assert_eq!(
            container.parent,
            Some(ParentLink {
                reference: scope,
                name: "obj".to_owned()
            })
        );

        map.populate_object(
            obj.variables_reference,
            &json!("{\"a\":1,\"needs quote\":null,\"inner\":{}}"),
        )
        .unwrap();
        let container = map.get(obj.variables_reference).unwrap();
        assert!(!container.needs_expansion());
        let evals: Vec<_> = container.variables.iter().map(|v| v.evaluate_name.as_str()).collect();
        assert_eq!(evals, vec!["obj.a", "obj.inner", "obj[\"needs quote\"]"]);
    }

    #[test]
    fn refreshing_members_replaces_by_name() {
        let mut map = VariablesMap::new();
        let obj = map.create_variable(frame(), "o", "o", &json!({}), 0).unwrap();
        let reference = obj.variables_reference;

        map.populate_object(reference, &json!({ "a": 1 })).unwrap();
        map.populate_object(reference, &json!({ "a": 2, "b": 3 })).unwrap();

        let container = map.get(reference).unwrap();
        assert_eq!(container.variables.len(), 2);
        assert_eq!(container.get("a").unwrap().value, "2");
    }

    #[test]
    fn references_are_stable_per_expression_and_distinct_across_frames() {
        let mut allocator = ReferenceAllocator::default();
        let a = allocator.allocate(10, "x").unwrap();
        let b = allocator.allocate(10, "y").unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.allocate(10, "x").unwrap(), a);
        assert_ne!(allocator.allocate(11, "x").unwrap(), a);
        assert_eq!(unpair(a), (10, 1));
    }

    #[test]
    fn update_replaces_in_place() {
        let mut map = VariablesMap::new();
        let scope = map
            .create_scope(
                frame(),
                &[
                    RawVariable {
                        name: "a".to_owned(),
                        value: json!(1),
                    },
                    RawVariable {
                        name: "b".to_owned(),
                        value: json!(2),
                    },
                ],
            )
            .unwrap();

        let updated = map.update_variable(scope, "a", &json!("new")).unwrap();
        assert_eq!(summary(&updated), ("new", "string", 0));
        let names: Vec<_> = map.get(scope).unwrap().variables.iter().map(|v| v.name.clone()).collect();
        assert_eq!(names, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn removing_a_context_drops_its_containers() {
        let mut map = VariablesMap::new();
        let scope = map.create_scope(frame(), &[]).unwrap();
        map.remove_context(1);
        assert!(matches!(
            map.get(scope),
            Err(DebugError::UnknownVariablesReference(r)) if r == scope
        ));
    }

    #[test]
    fn summary_expression_wraps_the_target() {
        let expression = object_summary_expression("a.b");
        assert!(expression.starts_with("(function(o){"));
        assert!(expression.ends_with("})(a.b)"));
        assert!(expression.contains("DBResultSet"));
    }
}
