//! Trace-context propagation headers
//!
//! Identifiers cross process boundaries as HTTP headers. Each backend has its
//! own layout, built from the three identifier encodings:
//!
//! | Style      | Header(s)                                   | Trace id          | Span id |
//! |------------|---------------------------------------------|-------------------|---------|
//! | `Datadog`  | `x-datadog-trace-id`, `x-datadog-parent-id` | decimal low word, | decimal |
//! |            | `x-datadog-tags: _dd.p.tid=<hex16>`         | hex16 high word   |         |
//! | `W3c`      | `traceparent: 00-<hex32>-<hex16>-<flags>`   | hex32             | hex16   |
//! | `B3Single` | `b3: <hex32>-<hex16>-<sampled>`             | hex32 (or hex16)  | hex16   |
//!
//! Extraction reads identifiers straight out of the header value by offset and
//! never fails loudly: anything malformed is `None`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identifier::{IdEncoding, Identifier};

/// Header name to value; names are lowercase on injection and matched
/// case-insensitively on extraction
pub type HeaderMap = BTreeMap<String, String>;

pub const DATADOG_TRACE_ID: &str = "x-datadog-trace-id";
pub const DATADOG_PARENT_ID: &str = "x-datadog-parent-id";
pub const DATADOG_SAMPLING_PRIORITY: &str = "x-datadog-sampling-priority";
pub const DATADOG_TAGS: &str = "x-datadog-tags";
pub const W3C_TRACEPARENT: &str = "traceparent";
pub const B3_SINGLE: &str = "b3";

const DATADOG_TID_TAG: &str = "_dd.p.tid=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderStyle {
    Datadog,
    W3c,
    B3Single,
}

impl HeaderStyle {
    pub const ALL: [HeaderStyle; 3] = [
        HeaderStyle::W3c,
        HeaderStyle::B3Single,
        HeaderStyle::Datadog,
    ];
}

/// Identifiers carried across a process boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: Identifier,
    pub span_id: Identifier,
    pub sampled: bool,
}

impl SpanContext {
    pub fn new(trace_id: Identifier, span_id: Identifier) -> Self {
        Self {
            trace_id,
            span_id,
            sampled: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }
}

/// Render `context` as headers of the given style
///
/// An invalid context yields no headers.
pub fn inject(context: &SpanContext, style: HeaderStyle) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !context.is_valid() {
        return headers;
    }

    match style {
        HeaderStyle::Datadog => {
            headers.insert(
                DATADOG_TRACE_ID.to_string(),
                context.trace_id.format(IdEncoding::Decimal),
            );
            headers.insert(
                DATADOG_PARENT_ID.to_string(),
                context.span_id.format(IdEncoding::Decimal),
            );
            headers.insert(
                DATADOG_SAMPLING_PRIORITY.to_string(),
                if context.sampled { "1" } else { "0" }.to_string(),
            );
            if context.trace_id.high() != 0 {
                headers.insert(
                    DATADOG_TAGS.to_string(),
                    format!("{}{:016x}", DATADOG_TID_TAG, context.trace_id.high()),
                );
            }
        }
        HeaderStyle::W3c => {
            headers.insert(
                W3C_TRACEPARENT.to_string(),
                format!(
                    "00-{}-{}-{}",
                    context.trace_id.format(IdEncoding::Hexadecimal32Chars),
                    context.span_id.format(IdEncoding::Hexadecimal16Chars),
                    if context.sampled { "01" } else { "00" }
                ),
            );
        }
        HeaderStyle::B3Single => {
            headers.insert(
                B3_SINGLE.to_string(),
                format!(
                    "{}-{}-{}",
                    context.trace_id.format(IdEncoding::Hexadecimal32Chars),
                    context.span_id.format(IdEncoding::Hexadecimal16Chars),
                    if context.sampled { "1" } else { "0" }
                ),
            );
        }
    }
    headers
}

/// Read a context of the given style from `headers`
pub fn extract(headers: &HeaderMap, style: HeaderStyle) -> Option<SpanContext> {
    match style {
        HeaderStyle::Datadog => extract_datadog(headers),
        HeaderStyle::W3c => extract_w3c(header(headers, W3C_TRACEPARENT)?),
        HeaderStyle::B3Single => extract_b3(header(headers, B3_SINGLE)?),
    }
}

/// Try every style, W3C first
pub fn extract_any(headers: &HeaderMap) -> Option<SpanContext> {
    HeaderStyle::ALL
        .iter()
        .find_map(|style| extract(headers, *style))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
}

fn extract_datadog(headers: &HeaderMap) -> Option<SpanContext> {
    // The low word may be zero when the high word is carried in the tags
    let low = Identifier::parse_raw(header(headers, DATADOG_TRACE_ID)?, IdEncoding::Decimal, 0)?;
    let span_id = Identifier::parse(header(headers, DATADOG_PARENT_ID)?, IdEncoding::Decimal)?;

    let high = header(headers, DATADOG_TAGS)
        .and_then(|tags| {
            let start = tags.find(DATADOG_TID_TAG)? + DATADOG_TID_TAG.len();
            Identifier::parse_at(tags, IdEncoding::Hexadecimal16Chars, start)
        })
        .map(|id| id.low())
        .unwrap_or(0);

    let sampled = header(headers, DATADOG_SAMPLING_PRIORITY)
        .and_then(|p| p.parse::<i32>().ok())
        .map(|p| p > 0)
        .unwrap_or(true);

    let trace_id = Identifier::new(high, low.low());
    if !trace_id.is_valid() {
        return None;
    }
    Some(SpanContext {
        trace_id,
        span_id,
        sampled,
    })
}

fn extract_w3c(value: &str) -> Option<SpanContext> {
    // vv-<32 hex>-<16 hex>-ff
    let bytes = value.as_bytes();
    if bytes.len() < 55 || bytes[2] != b'-' || bytes[35] != b'-' || bytes[52] != b'-' {
        return None;
    }
    if value.get(..2)? == "ff" {
        return None;
    }
    let trace_id = Identifier::parse_at(value, IdEncoding::Hexadecimal32Chars, 3)?;
    let span_id = Identifier::parse_at(value, IdEncoding::Hexadecimal16Chars, 36)?;
    let flags = u8::from_str_radix(value.get(53..55)?, 16).ok()?;

    Some(SpanContext {
        trace_id,
        span_id,
        sampled: flags & 0x01 == 0x01,
    })
}

fn extract_b3(value: &str) -> Option<SpanContext> {
    // <16|32 hex>-<16 hex>[-<sampled>[-<parent>]]
    let trace_width = value.find('-')?;
    let trace_id = match trace_width {
        32 => Identifier::parse_at(value, IdEncoding::Hexadecimal32Chars, 0)?,
        16 => Identifier::parse_at(value, IdEncoding::Hexadecimal16Chars, 0)?,
        _ => return None,
    };
    let span_start = trace_width + 1;
    let span_id = Identifier::parse_at(value, IdEncoding::Hexadecimal16Chars, span_start)?;

    let sampled = match value.get(span_start + 16..) {
        Some("") | None => true,
        Some(rest) => {
            let flag = rest.strip_prefix('-')?.split('-').next()?;
            matches!(flag, "1" | "d")
        }
    };

    Some(SpanContext {
        trace_id,
        span_id,
        sampled,
    })
}
