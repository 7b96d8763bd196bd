//! Header collection abstraction.

use std::collections::{BTreeMap, HashMap};

/// `Content-Length` header name.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// `Transfer-Encoding` header name.
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";

/// `chunked` transfer coding.
pub const CHUNKED: &str = "chunked";

/// A multi-valued header collection as exposed by the host.
///
/// `remove` and `set` match names case-insensitively. `replace` targets a name
/// exactly as returned by [`HeaderCollection::entries`].
pub trait HeaderCollection {
    /// Snapshot of every header name with its values, in collection order.
    fn entries(&self) -> Vec<(String, Vec<String>)>;

    /// Replace the values of `name`.
    fn replace(&mut self, name: &str, values: Vec<String>);

    /// Remove every header called `name`.
    fn remove(&mut self, name: &str);

    /// Set `name` to a single literal value.
    fn set(&mut self, name: &str, value: &str);

    /// First value of `name`.
    fn first(&self, name: &str) -> Option<String> {
        self.entries()
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.into_iter().next())
    }
}

impl HeaderCollection for HashMap<String, Vec<String>> {
    fn entries(&self) -> Vec<(String, Vec<String>)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn replace(&mut self, name: &str, values: Vec<String>) {
        self.insert(name.to_string(), values);
    }

    fn remove(&mut self, name: &str) {
        self.retain(|k, _| !k.eq_ignore_ascii_case(name));
    }

    fn set(&mut self, name: &str, value: &str) {
        HeaderCollection::remove(self, name);
        self.insert(name.to_string(), vec![value.to_string()]);
    }
}

impl HeaderCollection for BTreeMap<String, Vec<String>> {
    fn entries(&self) -> Vec<(String, Vec<String>)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn replace(&mut self, name: &str, values: Vec<String>) {
        self.insert(name.to_string(), values);
    }

    fn remove(&mut self, name: &str) {
        self.retain(|k, _| !k.eq_ignore_ascii_case(name));
    }

    fn set(&mut self, name: &str, value: &str) {
        HeaderCollection::remove(self, name);
        self.insert(name.to_string(), vec![value.to_string()]);
    }
}

/// Drop fixed-length framing and mark the body as chunked.
pub fn mark_chunked<H: HeaderCollection + ?Sized>(headers: &mut H) {
    headers.remove(CONTENT_LENGTH);
    headers.set(TRANSFER_ENCODING, CHUNKED);
}
