//! Embedded page state.
//!
//! Episode pages ship their server-rendered data as JSON inside a single
//! `<script id="__NEXT_DATA__">` element. [`StateExtractor`] pulls that element
//! out of the HTML and [`PageState`] wraps the parsed tree with fallible path
//! accessors. No schema is assumed anywhere.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::error::{ResolveError, Result};

static HYDRATION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("script#__NEXT_DATA__").expect("hydration selector should parse")
});

/// Schema-less view over the hydration payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PageState {
    root: Value,
}

impl PageState {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Walk `path` from the root. Numeric segments index into arrays; object
    /// keys are always tried first, so `"1"` resolves a key named `1`.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        value_at(&self.root, path)
    }

    pub fn str_at(&self, path: &[&str]) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn array_at(&self, path: &[&str]) -> Option<&Vec<Value>> {
        self.get(path).and_then(Value::as_array)
    }

    /// Every string in the tree matching `predicate`, depth-first in document order.
    pub fn find_strings<F>(&self, predicate: F) -> Vec<&str>
    where
        F: Fn(&str) -> bool,
    {
        let mut found = Vec::new();
        collect_strings(&self.root, &predicate, &mut found);
        found
    }

    /// Every array in the tree whose elements are all objects satisfying `predicate`.
    pub fn find_arrays<F>(&self, predicate: F) -> Vec<&Vec<Value>>
    where
        F: Fn(&Value) -> bool,
    {
        let mut found = Vec::new();
        collect_arrays(&self.root, &predicate, &mut found);
        found
    }
}

/// Path lookup shared with other modules that walk raw JSON.
pub fn value_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Depth-first string collection.
pub fn collect_strings<'a, F>(node: &'a Value, predicate: &F, out: &mut Vec<&'a str>)
where
    F: Fn(&str) -> bool,
{
    match node {
        Value::String(s) if predicate(s) => out.push(s),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, predicate, out);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                collect_strings(value, predicate, out);
            }
        }
        _ => {}
    }
}

fn collect_arrays<'a, F>(node: &'a Value, predicate: &F, out: &mut Vec<&'a Vec<Value>>)
where
    F: Fn(&Value) -> bool,
{
    match node {
        Value::Array(items) => {
            if !items.is_empty() && items.iter().all(|item| item.is_object() && predicate(item)) {
                out.push(items);
            }
            for item in items {
                collect_arrays(item, predicate, out);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                collect_arrays(value, predicate, out);
            }
        }
        _ => {}
    }
}

/// Locates and parses the hydration payload.
pub struct StateExtractor;

impl StateExtractor {
    /// Parse `html` into a [`PageState`].
    ///
    /// Exactly one hydration element must be present; none, or more than one,
    /// is [`ResolveError::NoEmbeddedState`]. Unparseable content is
    /// [`ResolveError::MalformedState`]. Neither is retryable.
    pub fn extract(html: &str) -> Result<PageState> {
        let document = Html::parse_document(html);
        let mut matches = document.select(&HYDRATION_SELECTOR);

        let element = matches.next().ok_or(ResolveError::NoEmbeddedState)?;
        if matches.next().is_some() {
            debug!("Multiple hydration elements found");
            return Err(ResolveError::NoEmbeddedState);
        }

        let text: String = element.text().collect();
        let root: Value = serde_json::from_str(text.trim())
            .map_err(|e| ResolveError::MalformedState(e.to_string()))?;
        debug!(bytes = text.len(), "Hydration payload parsed");
        Ok(PageState::new(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(payload: &str) -> String {
        format!(
            r#"<html><head><title>t</title></head><body>
            <div id="app"></div>
            <script id="__NEXT_DATA__" type="application/json">{payload}</script>
            </body></html>"#
        )
    }

    #[test]
    fn extracts_hydration_payload() {
        let state = StateExtractor::extract(&page(r#"{"props":{"a":[1,{"b":"c"}]}}"#)).unwrap();
        assert_eq!(state.str_at(&["props", "a", "1", "b"]), Some("c"));
    }

    #[test]
    fn missing_element_is_no_embedded_state() {
        let err = StateExtractor::extract("<html><script>var x = 1;</script></html>").unwrap_err();
        assert_eq!(err, ResolveError::NoEmbeddedState);
    }

    #[test]
    fn duplicate_elements_are_rejected() {
        let html = format!("{}{}", page("{}"), page("{}"));
        assert_eq!(
            StateExtractor::extract(&html).unwrap_err(),
            ResolveError::NoEmbeddedState
        );
    }

    #[test]
    fn invalid_json_is_malformed_state() {
        let err = StateExtractor::extract(&page("{not json")).unwrap_err();
        assert!(matches!(err, ResolveError::MalformedState(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn object_keys_win_over_indices() {
        let state = PageState::new(json!({"list": {"1": ["x", "y"]}}));
        assert_eq!(state.str_at(&["list", "1", "1"]), Some("y"));
        assert!(state.get(&["list", "2"]).is_none());
    }

    #[test]
    fn finds_strings_depth_first() {
        let state = PageState::new(json!({
            "a": ["tvid=1", {"b": "nothing"}],
            "c": {"d": "tvid=2"}
        }));
        assert_eq!(state.find_strings(|s| s.contains("tvid=")), vec!["tvid=1", "tvid=2"]);
    }

    #[test]
    fn finds_arrays_of_matching_objects() {
        let state = PageState::new(json!({
            "x": [{"albumPlayUrl": "/play/a"}, {"albumPlayUrl": "/play/b"}],
            "y": [{"other": 1}],
            "z": {"nested": [{"albumPlayUrl": "/play/c"}]}
        }));
        let arrays = state.find_arrays(|v| v.get("albumPlayUrl").is_some());
        assert_eq!(arrays.len(), 2);
    }
}
