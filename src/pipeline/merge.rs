//! Merging: substitute resolved values into the template text.
//!
//! Substitution is a single pass over the placeholder pattern shared with
//! [`super::scan`], so inserted values are never re-scanned and malformed
//! markers are left exactly as written. Every inserted value is HTML-escaped;
//! `$` is escaped too, so generated text can never introduce a new
//! `${...}` marker into the document.

use super::scan::{is_system_variable, RE_PLACEHOLDER};
use crate::config::UnresolvedPolicy;
use crate::output::{AssetReference, FieldValues};
use chrono::{DateTime, Local};
use regex::Captures;
use std::collections::BTreeMap;
use tracing::debug;

/// The resolved values for one company, as unescaped text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeContext {
    values: BTreeMap<String, String>,
}

impl MergeContext {
    /// Build the context for one company using the current local time.
    pub fn for_company(fields: &FieldValues, asset: Option<&AssetReference>) -> Self {
        Self::with_clock(fields, asset, Local::now())
    }

    /// Build the context with an explicit clock reading.
    ///
    /// System variables come first; a generated key that collides with a
    /// system variable is ignored.
    pub fn with_clock(
        fields: &FieldValues,
        asset: Option<&AssetReference>,
        now: DateTime<Local>,
    ) -> Self {
        let mut values = BTreeMap::new();
        values.insert(
            "timestamp".to_string(),
            now.format("%Y-%m-%d %H:%M").to_string(),
        );
        values.insert(
            "case_number".to_string(),
            format!("OP-D-V-{}", now.format("%H%M")),
        );
        if let Some(asset) = asset {
            values.insert("logo_filename".to_string(), asset.file_name.clone());
        }

        for key in fields.keys() {
            if is_system_variable(key) {
                debug!("Ignoring generated value for system variable '{}'", key);
                continue;
            }
            if let Some(text) = fields.text(key) {
                values.insert(key.to_string(), text);
            }
        }

        Self { values }
    }

    /// Context from plain text pairs; no system variables are added.
    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Substitute every `${name}` in `template` from `ctx`.
///
/// Never fails: placeholders without a value follow `policy`.
pub fn merge(template: &str, ctx: &MergeContext, policy: UnresolvedPolicy) -> String {
    RE_PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match ctx.get(&caps[1]) {
            Some(value) => escape_html(value),
            None => match policy {
                UnresolvedPolicy::Empty => String::new(),
                UnresolvedPolicy::Passthrough => caps[0].to_string(),
            },
        })
        .into_owned()
}

/// Escape text for safe insertion into HTML element content or a quoted attribute.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '$' => out.push_str("&#36;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scan::scan_placeholders;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_clock() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 0).unwrap()
    }

    #[test]
    fn basic_scenario() {
        let fields: FieldValues = [("ceo_name", "Jane Doe"), ("company_name", "Acme")]
            .into_iter()
            .collect();
        let ctx = MergeContext::with_clock(&fields, None, fixed_clock());
        let out = merge(
            "<p>${ceo_name} leads ${company_name}.</p>",
            &ctx,
            UnresolvedPolicy::Empty,
        );
        assert_eq!(out, "<p>Jane Doe leads Acme.</p>");
    }

    #[test]
    fn values_are_escaped() {
        let ctx = MergeContext::from_pairs([("motto", "Fast & <b>bold</b> \"always\"")]);
        let out = merge("<p>${motto}</p>", &ctx, UnresolvedPolicy::Empty);
        assert_eq!(
            out,
            "<p>Fast &amp; &lt;b&gt;bold&lt;/b&gt; &quot;always&quot;</p>"
        );
    }

    #[test]
    fn missing_value_becomes_empty() {
        let ctx = MergeContext::from_pairs([("a", "1")]);
        assert_eq!(merge("${a}|${b}|", &ctx, UnresolvedPolicy::Empty), "1||");
    }

    #[test]
    fn missing_value_passthrough() {
        let ctx = MergeContext::from_pairs([("a", "1")]);
        assert_eq!(
            merge("${a}|${b}|", &ctx, UnresolvedPolicy::Passthrough),
            "1|${b}|"
        );
    }

    #[test]
    fn malformed_markers_untouched() {
        let ctx = MergeContext::from_pairs([("x", "X")]);
        let t = "${} ${two words} ${x} $x ${unterminated";
        assert_eq!(
            merge(t, &ctx, UnresolvedPolicy::Empty),
            "${} ${two words} X $x ${unterminated"
        );
    }

    #[test]
    fn no_placeholders_is_identity() {
        let t = "<html><body><h1>Static</h1></body></html>";
        let ctx = MergeContext::with_clock(&FieldValues::new(), None, fixed_clock());
        assert_eq!(merge(t, &ctx, UnresolvedPolicy::Empty), t);
    }

    #[test]
    fn full_coverage_leaves_no_markers() {
        let t = "<h1>${name}</h1><p>${bio}</p><small>${timestamp}</small>";
        let fields: FieldValues = [
            ("name", json!("Kone")),
            // A hostile value trying to smuggle in a marker.
            ("bio", json!("Elevators ${name} and ${other}")),
        ]
        .into_iter()
        .collect();
        let ctx = MergeContext::with_clock(&fields, None, fixed_clock());
        let out = merge(t, &ctx, UnresolvedPolicy::Empty);
        assert!(scan_placeholders(&out).is_empty(), "got: {out}");
        assert!(out.contains("Elevators &#36;{name}"));
    }

    #[test]
    fn system_variables_filled() {
        let asset = AssetReference {
            file_name: "Nokia_logo.png".into(),
            bytes: vec![1, 2, 3],
            content_type: "image/png".into(),
            source_url: None,
        };
        let fields: FieldValues = [("timestamp", "model tried to set this")]
            .into_iter()
            .collect();
        let ctx = MergeContext::with_clock(&fields, Some(&asset), fixed_clock());
        assert_eq!(ctx.get("timestamp"), Some("2025-03-14 09:26"));
        assert_eq!(ctx.get("case_number"), Some("OP-D-V-0926"));
        assert_eq!(ctx.get("logo_filename"), Some("Nokia_logo.png"));
    }

    #[test]
    fn no_asset_means_no_logo_value() {
        let ctx = MergeContext::with_clock(&FieldValues::new(), None, fixed_clock());
        assert_eq!(ctx.get("logo_filename"), None);
        let out = merge(r#"<img src="${logo_filename}">"#, &ctx, UnresolvedPolicy::Empty);
        assert_eq!(out, r#"<img src="">"#);
    }

    #[test]
    fn list_values_flattened() {
        let fields: FieldValues = [("key_technologies", json!(["Radio", "Cloud", "Chips"]))]
            .into_iter()
            .collect();
        let ctx = MergeContext::with_clock(&fields, None, fixed_clock());
        assert_eq!(
            merge("${key_technologies}", &ctx, UnresolvedPolicy::Empty),
            "Radio, Cloud, Chips"
        );
    }
}
