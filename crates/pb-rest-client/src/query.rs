//! Query parameters and URL assembly

use indexmap::IndexMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::{form_urlencoded, Url};

/// Insertion-ordered query parameters.
///
/// A key maps to a list of values because the backend accepts repeated keys.
/// `None` entries are kept until the query string is rendered, where they are
/// dropped together with any key left without values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    params: IndexMap<String, Vec<Option<String>>>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to a single value, keeping its original position
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.params.insert(key.into(), vec![Some(value.to_string())]);
        self
    }

    /// Set `key` to a single optional value
    pub fn insert_opt<V: ToString>(&mut self, key: impl Into<String>, value: Option<V>) -> &mut Self {
        self.params
            .insert(key.into(), vec![value.map(|value| value.to_string())]);
        self
    }

    /// Append a value to `key`, creating it if needed
    pub fn append(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.params
            .entry(key.into())
            .or_default()
            .push(Some(value.to_string()));
        self
    }

    /// Set `key` to a list of optional values
    pub fn insert_all<I, V>(&mut self, key: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = Option<V>>,
        V: ToString,
    {
        let values = values
            .into_iter()
            .map(|value| value.map(|value| value.to_string()))
            .collect();
        self.params.insert(key.into(), values);
        self
    }

    /// Builder form of [`QueryParams::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder form of [`QueryParams::insert_opt`]
    pub fn with_opt<V: ToString>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        self.insert_opt(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&[Option<String>]> {
        self.params.get(key).map(Vec::as_slice)
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<Option<String>>> {
        self.params.shift_remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Non-null values per key, skipping keys that end up empty
    pub fn normalized(&self) -> impl Iterator<Item = (&str, Vec<&str>)> {
        self.params.iter().filter_map(|(key, values)| {
            let values: Vec<&str> = values.iter().flatten().map(String::as_str).collect();
            (!values.is_empty()).then_some((key.as_str(), values))
        })
    }

    /// Render as `k=v&k=v2&...`, form-encoded, in insertion order
    pub fn to_query_string(&self) -> String {
        let mut pairs = Vec::new();
        for (key, values) in self.normalized() {
            let key = encode(key);
            for value in values {
                pairs.push(format!("{key}={}", encode(value)));
            }
        }
        pairs.join("&")
    }
}

impl<K, V> FromIterator<(K, V)> for QueryParams
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.append(key, value);
        }
        params
    }
}

/// Unreserved characters stay literal inside a path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Form encoding for query keys and values (space becomes `+`)
pub(crate) fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Percent encoding for one path segment (space becomes `%20`, `/` is escaped)
pub(crate) fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

/// Join `base` and `path` with exactly one slash and append the query string.
pub(crate) fn join_url(
    base: &str,
    path: &str,
    query: Option<&QueryParams>,
) -> Result<Url, url::ParseError> {
    let mut url = String::with_capacity(base.len() + path.len() + 1);
    url.push_str(base.trim_end_matches('/'));
    url.push('/');
    url.push_str(path.trim_start_matches('/'));

    if let Some(query) = query {
        let query = query.to_query_string();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
    }

    Url::parse(&url)
}
