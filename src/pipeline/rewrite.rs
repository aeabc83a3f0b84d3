//! URL rewriting: apply the old → new mapping to stored values.
//!
//! Values come in two shapes: plain text columns and JSON documents. Both end
//! up in [`UrlRewriter::rewrite_str`], which does two passes over a string:
//!
//! 1. inline `data:image/{png,jpg,jpeg};base64,…` payloads are decoded,
//!    converted to WebP and re-embedded. A payload that fails stays exactly as
//!    it was; the rest of the string is still processed.
//! 2. every `/uploads/<path>.<jpg|jpeg|png|gif>` reference found in the
//!    mapping is replaced. References are located by looking the mapping's
//!    own keys up at each `/uploads/` occurrence, so any file name the scan
//!    accepted (spaces, parentheses, `#`, `a.png.png`) is found. The longest
//!    mapped key wins. Unknown references pass through.
//!
//! Every rewrite reports "untouched" distinctly (`Cow::Borrowed` / `None`) so
//! the persistence layer never writes back a row that did not change.

use crate::pipeline::encode;
use crate::store::ColumnValue;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

// ── URL mapping ──────────────────────────────────────────────────────────────

/// Old URL → new URL, built while converting and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlMapping {
    entries: BTreeMap<String, String>,
}

impl UrlMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapping. Returns `false` (and keeps the first entry) if
    /// `old` was already mapped.
    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) -> bool {
        use std::collections::btree_map::Entry;
        match self.entries.entry(old.into()) {
            Entry::Vacant(slot) => {
                slot.insert(new.into());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.entries.get(old).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UrlMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut mapping = UrlMapping::new();
        for (old, new) in iter {
            mapping.insert(old, new);
        }
        mapping
    }
}

// ── Patterns ─────────────────────────────────────────────────────────────────

static RE_DATA_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)data:image/(?:png|jpe?g);base64,([A-Za-z0-9+/]+={0,2})").unwrap()
});

static RE_RASTER_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:jpe?g|png|gif)$").unwrap());

const WEBP_DATA_PREFIX: &str = "data:image/webp;base64,";

/// Every stored reference starts with this.
const UPLOADS_MARKER: &str = "/uploads/";

/// Lower-case raster suffixes a mapped URL can end with.
const RASTER_SUFFIXES: &[&str] = &[".jpg", ".jpeg", ".png", ".gif"];

// ── Rewriter ─────────────────────────────────────────────────────────────────

/// Applies a [`UrlMapping`] and inline-image conversion to stored values.
///
/// Also tallies inline payloads for the run summary.
pub struct UrlRewriter<'m> {
    mapping: &'m UrlMapping,
    max_key_len: usize,
    inline_quality: f32,
    inline_converted: AtomicUsize,
    inline_failed: AtomicUsize,
}

impl<'m> UrlRewriter<'m> {
    pub fn new(mapping: &'m UrlMapping, inline_quality: f32) -> Self {
        Self {
            mapping,
            max_key_len: mapping.iter().map(|(old, _)| old.len()).max().unwrap_or(0),
            inline_quality,
            inline_converted: AtomicUsize::new(0),
            inline_failed: AtomicUsize::new(0),
        }
    }

    /// Inline payloads converted so far.
    pub fn inline_converted(&self) -> usize {
        self.inline_converted.load(Ordering::Relaxed)
    }

    /// Inline payloads that could not be converted and were left as-is.
    pub fn inline_failed(&self) -> usize {
        self.inline_failed.load(Ordering::Relaxed)
    }

    /// Rewrite one string. `Cow::Borrowed` means nothing changed.
    pub fn rewrite_str<'s>(&self, s: &'s str) -> Cow<'s, str> {
        let inlined = self.replace_inline_images(s);

        let replaced = match self.replace_upload_urls(&inlined) {
            Cow::Owned(o) => Some(o),
            Cow::Borrowed(_) => None,
        };
        let out = match replaced {
            Some(o) => Cow::Owned(o),
            None => inlined,
        };

        if out.as_ref() == s {
            Cow::Borrowed(s)
        } else {
            out
        }
    }

    /// Rewrite every string leaf of a JSON value. `None` means untouched.
    pub fn rewrite_value(&self, value: &Value) -> Option<Value> {
        map_strings(value, &mut |s| match self.rewrite_str(s) {
            Cow::Owned(o) => Some(o),
            Cow::Borrowed(_) => None,
        })
    }

    /// Rewrite a fetched column. `None` means untouched (including NULL).
    pub fn rewrite_column(&self, column: &ColumnValue) -> Option<ColumnValue> {
        match column {
            ColumnValue::Text(Some(s)) => match self.rewrite_str(s) {
                Cow::Owned(o) => Some(ColumnValue::Text(Some(o))),
                Cow::Borrowed(_) => None,
            },
            ColumnValue::Json(Some(v)) => self
                .rewrite_value(v)
                .map(|v| ColumnValue::Json(Some(v))),
            ColumnValue::Text(None) | ColumnValue::Json(None) => None,
        }
    }

    /// Whether `s` holds at least one reference present in the mapping.
    pub fn has_mapped_reference(&self, s: &str) -> bool {
        s.match_indices(UPLOADS_MARKER)
            .any(|(start, _)| self.longest_mapped_at(s, start).is_some())
    }

    fn replace_upload_urls<'s>(&self, s: &'s str) -> Cow<'s, str> {
        if self.mapping.is_empty() || !s.contains(UPLOADS_MARKER) {
            return Cow::Borrowed(s);
        }

        let mut out = String::new();
        let mut copied = 0;
        let mut search = 0;
        while let Some(offset) = s[search..].find(UPLOADS_MARKER) {
            let start = search + offset;
            match self.longest_mapped_at(s, start) {
                Some((end, new_url)) => {
                    out.push_str(&s[copied..start]);
                    out.push_str(new_url);
                    copied = end;
                    search = end;
                }
                // `/uploads/` is ASCII, so `start + 1` is a char boundary.
                None => search = start + 1,
            }
        }

        if copied == 0 {
            return Cow::Borrowed(s);
        }
        out.push_str(&s[copied..]);
        Cow::Owned(out)
    }

    /// Longest mapped key starting at byte `start` of `s` that is not glued
    /// to a longer name, as `(end, new_url)`.
    fn longest_mapped_at(&self, s: &str, start: usize) -> Option<(usize, &'m str)> {
        let rest = &s[start..];
        let mapping: &'m UrlMapping = self.mapping;
        rest.char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .take_while(|&end| end <= self.max_key_len)
            .filter(|&end| has_raster_suffix(&rest[..end]))
            .filter(|&end| !continues_name(&rest[end..]))
            .filter_map(|end| mapping.get(&rest[..end]).map(|new_url| (start + end, new_url)))
            .last()
    }

    fn replace_inline_images<'s>(&self, s: &'s str) -> Cow<'s, str> {
        RE_DATA_URL.replace_all(s, |caps: &Captures| match self.convert_inline(&caps[1]) {
            Some(data_url) => data_url,
            None => caps[0].to_string(),
        })
    }

    fn convert_inline(&self, payload: &str) -> Option<String> {
        let bytes = match STANDARD.decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Leaving inline image unchanged: invalid base64 ({})", e);
                self.inline_failed.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match encode::encode_webp(&bytes, self.inline_quality) {
            Ok(webp) => {
                debug!("Converted inline image {} → {} bytes", bytes.len(), webp.len());
                self.inline_converted.fetch_add(1, Ordering::Relaxed);
                Some(format!("{}{}", WEBP_DATA_PREFIX, STANDARD.encode(webp)))
            }
            Err(e) => {
                warn!("Leaving inline image unchanged: {}", e);
                self.inline_failed.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

fn has_raster_suffix(s: &str) -> bool {
    let bytes = s.as_bytes();
    RASTER_SUFFIXES.iter().any(|suffix| {
        bytes.len() >= suffix.len()
            && bytes[bytes.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
    })
}

/// `a.png` followed by `x`, `_` or `.bak` is part of a different name.
fn continues_name(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_alphanumeric() || c == '_' => true,
        Some('.') => chars.next().is_some_and(|c| c.is_alphanumeric()),
        _ => false,
    }
}

/// Structural transform over a JSON value: apply `f` to every string leaf.
///
/// `f` returns `None` for "unchanged". The result is `None` when no leaf
/// changed, otherwise a copy of `value` with the changed leaves substituted.
/// Object keys and non-string leaves are never touched.
pub fn map_strings<F>(value: &Value, f: &mut F) -> Option<Value>
where
    F: FnMut(&str) -> Option<String>,
{
    match value {
        Value::String(s) => f(s).map(Value::String),
        Value::Array(items) => {
            let mapped: Vec<Option<Value>> = items.iter().map(|v| map_strings(v, f)).collect();
            if mapped.iter().all(Option::is_none) {
                return None;
            }
            Some(Value::Array(
                items
                    .iter()
                    .zip(mapped)
                    .map(|(orig, new)| new.unwrap_or_else(|| orig.clone()))
                    .collect(),
            ))
        }
        Value::Object(map) => {
            let mut changed = false;
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                let next = match map_strings(v, f) {
                    Some(new) => {
                        changed = true;
                        new
                    }
                    None => v.clone(),
                };
                out.insert(key.clone(), next);
            }
            changed.then_some(Value::Object(out))
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => None,
    }
}

/// Swap a trailing raster extension for `.webp`; `None` if there is none.
pub fn replace_extension(filename: &str) -> Option<String> {
    if !RE_RASTER_SUFFIX.is_match(filename) {
        return None;
    }
    Some(RE_RASTER_SUFFIX.replace(filename, ".webp").into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::tests::{jpeg_bytes, png_bytes};
    use serde_json::json;

    fn mapping() -> UrlMapping {
        [
            ("/uploads/a.png", "/uploads/a.webp"),
            ("/uploads/equipment/7/Front.JPG", "/uploads/equipment/7/Front.webp"),
            ("/uploads/anim.gif", "/uploads/anim.webp"),
        ]
        .into_iter()
        .collect()
    }

    fn data_url(mime: &str, bytes: &[u8]) -> String {
        format!("data:image/{mime};base64,{}", STANDARD.encode(bytes))
    }

    #[test]
    fn mapping_keeps_first_insert() {
        let mut m = UrlMapping::new();
        assert!(m.insert("/uploads/a.png", "/uploads/a.webp"));
        assert!(!m.insert("/uploads/a.png", "/uploads/other.webp"));
        assert_eq!(m.get("/uploads/a.png"), Some("/uploads/a.webp"));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn rewrites_mapped_urls_only() {
        let m = mapping();
        let r = UrlRewriter::new(&m, 88.0);
        let out = r.rewrite_str("https://cdn.example.com/uploads/a.png and /uploads/b.png");
        assert_eq!(out, "https://cdn.example.com/uploads/a.webp and /uploads/b.png");
        assert!(matches!(out, Cow::Owned(_)));
    }

    #[test]
    fn match_is_case_insensitive_on_extension() {
        let m = mapping();
        let r = UrlRewriter::new(&m, 88.0);
        assert_eq!(
            r.rewrite_str("<img src=\"/uploads/equipment/7/Front.JPG\">"),
            "<img src=\"/uploads/equipment/7/Front.webp\">"
        );
    }

    #[test]
    fn query_strings_survive() {
        let m = mapping();
        let r = UrlRewriter::new(&m, 88.0);
        assert_eq!(r.rewrite_str("/uploads/a.png?v=3"), "/uploads/a.webp?v=3");
    }

    #[test]
    fn unrelated_or_unmapped_strings_are_borrowed() {
        let m = mapping();
        let r = UrlRewriter::new(&m, 88.0);
        for s in ["plain text", "/uploads/unknown.png", "/uploads/a.webp", ""] {
            assert!(matches!(r.rewrite_str(s), Cow::Borrowed(_)), "{s}");
        }
    }

    #[test]
    fn longer_extension_chain_is_not_a_match() {
        let m = mapping();
        let r = UrlRewriter::new(&m, 88.0);
        assert!(matches!(r.rewrite_str("/uploads/a.png.bak"), Cow::Borrowed(_)));
        assert_eq!(r.rewrite_str("see /uploads/a.png."), "see /uploads/a.webp.");
        assert!(matches!(r.rewrite_str("/uploads/a.pngx"), Cow::Borrowed(_)));
    }

    #[test]
    fn names_with_spaces_parens_and_hash_are_found() {
        let m: UrlMapping = [
            ("/uploads/photo 1.png", "/uploads/photo 1.webp"),
            ("/uploads/IMG (2).png", "/uploads/IMG (2).webp"),
            ("/uploads/a#b.png", "/uploads/a#b.webp"),
        ]
        .into_iter()
        .collect();
        let r = UrlRewriter::new(&m, 88.0);

        assert_eq!(r.rewrite_str("/uploads/photo 1.png"), "/uploads/photo 1.webp");
        assert_eq!(
            r.rewrite_str(r#"<img src="/uploads/IMG (2).png"> and /uploads/a#b.png?v=1"#),
            r#"<img src="/uploads/IMG (2).webp"> and /uploads/a#b.webp?v=1"#
        );
        assert!(r.has_mapped_reference("x /uploads/a#b.png"));
        assert!(!r.has_mapped_reference("/uploads/a#c.png"));
    }

    #[test]
    fn longest_key_wins_for_double_extension() {
        let m: UrlMapping = [
            ("/uploads/scan.png", "/uploads/scan.webp"),
            ("/uploads/scan.png.png", "/uploads/scan.png.webp"),
        ]
        .into_iter()
        .collect();
        let r = UrlRewriter::new(&m, 88.0);

        assert_eq!(r.rewrite_str("/uploads/scan.png.png"), "/uploads/scan.png.webp");
        assert_eq!(r.rewrite_str("/uploads/scan.png"), "/uploads/scan.webp");
        assert_eq!(
            r.rewrite_str("/uploads/scan.png,/uploads/scan.png.png"),
            "/uploads/scan.webp,/uploads/scan.png.webp"
        );
    }

    #[test]
    fn non_ascii_names_are_found() {
        let m: UrlMapping = [("/uploads/größe ü.jpg", "/uploads/größe ü.webp")]
            .into_iter()
            .collect();
        let r = UrlRewriter::new(&m, 88.0);
        assert_eq!(r.rewrite_str("«/uploads/größe ü.jpg»"), "«/uploads/größe ü.webp»");
    }

    #[test]
    fn json_values_rewritten_recursively() {
        let m = mapping();
        let r = UrlRewriter::new(&m, 88.0);
        let doc = json!({
            "photos": ["/uploads/a.png", "/uploads/missing.jpg", 3],
            "meta": {"cover": "/uploads/anim.gif", "count": 2, "ok": true, "none": null},
            "/uploads/a.png": "keys are untouched"
        });
        let out = r.rewrite_value(&doc).expect("changed");
        assert_eq!(
            out,
            json!({
                "photos": ["/uploads/a.webp", "/uploads/missing.jpg", 3],
                "meta": {"cover": "/uploads/anim.webp", "count": 2, "ok": true, "none": null},
                "/uploads/a.png": "keys are untouched"
            })
        );
    }

    #[test]
    fn untouched_json_is_none() {
        let m = mapping();
        let r = UrlRewriter::new(&m, 88.0);
        assert_eq!(r.rewrite_value(&json!({"a": ["/uploads/x.png", 1, null]})), None);
        assert_eq!(r.rewrite_value(&json!(42)), None);
    }

    #[test]
    fn inline_jpeg_becomes_webp() {
        let m = UrlMapping::new();
        let r = UrlRewriter::new(&m, 88.0);
        let input = data_url("jpeg", &jpeg_bytes(12, 10, [0, 200, 0]));
        let out = r.rewrite_str(&input);

        assert!(out.starts_with(WEBP_DATA_PREFIX), "got {}", &out[..40]);
        let decoded = STANDARD.decode(&out[WEBP_DATA_PREFIX.len()..]).unwrap();
        let img = image::load_from_memory(&decoded).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (12, 10));
        let px = img.get_pixel(6, 5);
        assert!(px[1] > 150 && px[0] < 80 && px[2] < 80, "got {px:?}");
        assert_eq!(r.inline_converted(), 1);
    }

    #[test]
    fn malformed_payload_left_alone_next_to_valid_one() {
        let m = mapping();
        let r = UrlRewriter::new(&m, 88.0);
        let bad = format!("data:image/png;base64,{}", STANDARD.encode(b"not a png"));
        let good = data_url("png", &png_bytes(4, 4, [9, 9, 9, 255]));
        let input = format!("{bad} | {good} | /uploads/a.png");

        let out = r.rewrite_str(&input).into_owned();
        let parts: Vec<&str> = out.split(" | ").collect();
        assert_eq!(parts[0], bad);
        assert!(parts[1].starts_with(WEBP_DATA_PREFIX));
        assert_eq!(parts[2], "/uploads/a.webp");
        assert_eq!(r.inline_converted(), 1);
        assert_eq!(r.inline_failed(), 1);
    }

    #[test]
    fn existing_webp_data_urls_are_ignored() {
        let m = UrlMapping::new();
        let r = UrlRewriter::new(&m, 88.0);
        let s = "data:image/webp;base64,UklGRg==";
        assert!(matches!(r.rewrite_str(s), Cow::Borrowed(_)));
        assert_eq!(r.inline_failed(), 0);
    }

    #[test]
    fn text_column_null_is_untouched() {
        let m = mapping();
        let r = UrlRewriter::new(&m, 88.0);
        assert_eq!(r.rewrite_column(&ColumnValue::Text(None)), None);
        assert_eq!(
            r.rewrite_column(&ColumnValue::Text(Some("/uploads/a.png".into()))),
            Some(ColumnValue::Text(Some("/uploads/a.webp".into())))
        );
    }

    #[test]
    fn filename_extension_swap() {
        assert_eq!(replace_extension("Scan 01.JPEG").as_deref(), Some("Scan 01.webp"));
        assert_eq!(replace_extension("photo.png").as_deref(), Some("photo.webp"));
        assert_eq!(replace_extension("contract.pdf"), None);
        assert_eq!(replace_extension("already.webp"), None);
    }

    #[test]
    fn map_strings_counts_every_leaf() {
        let mut seen = 0;
        let doc = json!(["a", {"b": "c", "d": ["e"]}, 1]);
        let out = map_strings(&doc, &mut |_| {
            seen += 1;
            None
        });
        assert_eq!(out, None);
        assert_eq!(seen, 4);
    }
}
