//! Content negotiation among response builders.
//!
//! A render function registers builders per representation key
//! (`provides("html", ...)`); the [`MimeProvider`] then picks one using the
//! request's `format` query parameter or `Accept` header and runs it once.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::errors::QueryServerError;

const MIME_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::mime");

/// Representation keys known to every provider, in registration order.
pub const DEFAULT_TYPES: &[(&str, &[&str])] = &[
    ("all", &["*/*"]),
    ("text", &["text/plain; charset=utf-8", "txt"]),
    ("html", &["text/html; charset=utf-8"]),
    ("xhtml", &["application/xhtml+xml", "xhtml"]),
    ("xml", &["application/xml", "text/xml", "application/x-xml"]),
    (
        "js",
        &["text/javascript", "application/javascript", "application/x-javascript"],
    ),
    ("css", &["text/css"]),
    ("ics", &["text/calendar"]),
    ("csv", &["text/csv"]),
    ("rss", &["application/rss+xml"]),
    ("atom", &["application/atom+xml"]),
    ("yaml", &["application/x-yaml", "text/yaml"]),
    ("multipart_form", &["multipart/form-data"]),
    ("url_encoded_form", &["application/x-www-form-urlencoded"]),
    ("json", &["application/json", "text/x-json"]),
];

/// Builder registry plus MIME tables for one render call.
#[derive(Debug)]
pub struct MimeProvider<B> {
    mimes_by_key: Vec<(String, Vec<String>)>,
    keys_by_mime: HashMap<String, String>,
    builders: Vec<(String, B)>,
    provides_used: bool,
}

impl<B> Default for MimeProvider<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> MimeProvider<B> {
    /// A provider seeded with [`DEFAULT_TYPES`] and no builders.
    #[must_use]
    pub fn new() -> Self {
        let mut provider = Self {
            mimes_by_key: Vec::new(),
            keys_by_mime: HashMap::new(),
            builders: Vec::new(),
            provides_used: false,
        };
        for (key, mimes) in DEFAULT_TYPES {
            provider.register_type(key, mimes.iter().map(|mime| (*mime).to_owned()).collect());
        }
        provider
    }

    /// Adds or replaces the MIME types of `key`.
    pub fn register_type(&mut self, key: &str, mimes: Vec<String>) {
        for mime in &mimes {
            self.keys_by_mime.insert(mime.clone(), key.to_owned());
        }
        match self.mimes_by_key.iter_mut().find(|(known, _)| known == key) {
            Some((_, existing)) => *existing = mimes,
            None => self.mimes_by_key.push((key.to_owned(), mimes)),
        }
    }

    /// MIME types registered for `key`.
    #[must_use]
    pub fn mimes_for(&self, key: &str) -> Option<&[String]> {
        self.mimes_by_key
            .iter()
            .find(|(known, _)| known == key)
            .map(|(_, mimes)| mimes.as_slice())
    }

    /// Key a MIME type maps back to.
    #[must_use]
    pub fn key_for(&self, mime: &str) -> Option<&str> {
        self.keys_by_mime.get(mime).map(String::as_str)
    }

    /// Registers a candidate builder; a repeated key keeps its original
    /// position but takes the newer builder.
    pub fn provides(&mut self, key: &str, builder: B) {
        self.provides_used = true;
        match self.builders.iter_mut().find(|(known, _)| known == key) {
            Some((_, existing)) => *existing = builder,
            None => self.builders.push((key.to_owned(), builder)),
        }
    }

    /// Whether any builder was ever registered.
    #[must_use]
    pub const fn is_provides_used(&self) -> bool {
        self.provides_used
    }

    /// Registered builder keys in registration order.
    #[must_use]
    pub fn provided_keys(&self) -> impl Iterator<Item = &str> {
        self.builders.iter().map(|(key, _)| key.as_str())
    }

    /// Selects a builder for `request` and invokes it exactly once.
    ///
    /// `invoke` receives the builder and the content type chosen for the
    /// response, when one is known.
    ///
    /// # Errors
    ///
    /// Returns [`QueryServerError::NotAcceptable`] when no builder matches
    /// and `default_key` has none either; builder failures propagate.
    pub fn negotiate<T, E, F>(
        &mut self,
        request: &Value,
        default_key: Option<&str>,
        invoke: F,
    ) -> Result<T, E>
    where
        E: From<QueryServerError>,
        F: FnOnce(B, Option<String>) -> Result<T, E>,
    {
        let (selected, content_type) = self.select(request);
        debug!(
            target: MIME_TARGET,
            key = selected.as_deref().unwrap_or(""),
            content_type = content_type.as_deref().unwrap_or(""),
            "negotiated representation"
        );

        if let Some(builder) = selected.as_deref().and_then(|key| self.take_builder(key)) {
            return invoke(builder, content_type);
        }
        if let Some(key) = default_key {
            if let Some(builder) = self.take_builder(key) {
                let content_type = self.mimes_for(key).and_then(|mimes| mimes.first()).cloned();
                return invoke(builder, content_type);
            }
        }
        Err(self.not_acceptable(request).into())
    }

    fn select(&self, request: &Value) -> (Option<String>, Option<String>) {
        if let Some(format) = request.pointer("/query/format").and_then(Value::as_str) {
            let content_type = self.mimes_for(format).and_then(|mimes| mimes.first()).cloned();
            return (Some(format.to_owned()), content_type);
        }
        if let Some(accept) = accept_header(request) {
            let supported: Vec<&str> = self
                .builders
                .iter()
                .filter_map(|(key, _)| self.mimes_for(key))
                .flatten()
                .map(String::as_str)
                .collect();
            return match best_match(&supported, accept) {
                Some(mime) => (self.key_for(mime).map(str::to_owned), Some(mime.to_owned())),
                None => (None, None),
            };
        }
        (self.builders.first().map(|(key, _)| key.clone()), None)
    }

    fn take_builder(&mut self, key: &str) -> Option<B> {
        let index = self.builders.iter().position(|(known, _)| known == key)?;
        Some(self.builders.remove(index).1)
    }

    fn not_acceptable(&self, request: &Value) -> QueryServerError {
        let requested = accept_header(request)
            .or_else(|| request.pointer("/query/format").and_then(Value::as_str))
            .unwrap_or("*/*");
        let supported = self
            .mimes_by_key
            .iter()
            .map(|(key, mimes)| {
                if mimes.is_empty() {
                    key.clone()
                } else {
                    mimes.join(", ")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        QueryServerError::not_acceptable(format!(
            "Content-Type {requested} not supported, try one of:\n{supported}"
        ))
    }
}

/// The request's `Accept` header, if any.
#[must_use]
pub fn accept_header(request: &Value) -> Option<&str> {
    request
        .get("headers")
        .and_then(|headers| headers.get("Accept"))
        .and_then(Value::as_str)
        .filter(|accept| !accept.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
struct MediaRange<'a> {
    kind: &'a str,
    subtype: Option<&'a str>,
    params: Vec<(&'a str, &'a str)>,
    quality: f64,
}

impl<'a> MediaRange<'a> {
    /// Parses `type/subtype; key=value`; a bare `*` means `*/*` and an
    /// invalid or out-of-range `q` counts as 1.
    fn parse(text: &'a str) -> Self {
        let mut parts = text.split(';');
        let full = parts.next().unwrap_or_default().trim();
        let full = if full == "*" { "*/*" } else { full };
        let mut halves = full.splitn(3, '/');
        let kind = halves.next().unwrap_or_default().trim();
        let subtype = halves.next().map(str::trim);
        let params: Vec<(&str, &str)> = parts
            .filter_map(|param| param.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect();
        let quality = params
            .iter()
            .find(|(key, _)| *key == "q")
            .and_then(|(_, value)| value.parse::<f64>().ok())
            .filter(|q| (0.0..=1.0).contains(q))
            .unwrap_or(1.0);
        Self {
            kind,
            subtype,
            params,
            quality,
        }
    }

    fn matches(&self, other: &Self) -> bool {
        let kind = self.kind == other.kind || self.kind == "*" || other.kind == "*";
        let subtype = self.subtype == other.subtype
            || self.subtype == Some("*")
            || other.subtype == Some("*");
        kind && subtype
    }
}

/// Fitness and quality of the most specific range in `accepted` that covers
/// `mime`.
fn fitness_and_quality(mime: &MediaRange<'_>, accepted: &[MediaRange<'_>]) -> (usize, f64) {
    let mut best: Option<(usize, f64)> = None;
    for range in accepted.iter().filter(|range| range.matches(mime)) {
        let param_matches = mime
            .params
            .iter()
            .filter(|(key, value)| *key != "q" && range.params.contains(&(*key, *value)))
            .count();
        let fitness = usize::from(range.kind == mime.kind) * 100
            + usize::from(range.subtype == mime.subtype) * 10
            + param_matches;
        if best.is_none_or(|(current, _)| fitness > current) {
            best = Some((fitness, range.quality));
        }
    }
    best.unwrap_or((0, 0.0))
}

/// Picks the entry of `supported` that `accept` prefers.
///
/// Higher fitness wins, then higher quality; among equals the earlier entry
/// in `supported` wins. Returns `None` when the best quality is zero.
pub fn best_match<'s>(supported: &[&'s str], accept: &str) -> Option<&'s str> {
    let accepted: Vec<MediaRange<'_>> = accept.split(',').map(MediaRange::parse).collect();
    let mut winner: Option<(&'s str, usize, f64)> = None;
    for &mime in supported {
        let (fitness, quality) = fitness_and_quality(&MediaRange::parse(mime), &accepted);
        let better = winner.is_none_or(|(_, best_fitness, best_quality)| {
            fitness > best_fitness || (fitness == best_fitness && quality > best_quality)
        });
        if better {
            winner = Some((mime, fitness, quality));
        }
    }
    winner.and_then(|(mime, _, quality)| (quality > 0.0).then_some(mime))
}
