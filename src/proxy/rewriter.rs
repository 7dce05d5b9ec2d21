//! HTML rewriting for embeddable pages.
//!
//! # Responsibilities
//! - Absolutize root-relative `href`, `src` and `action` values
//! - Insert a `<base>` element when the page has none
//! - Inject the neutralization script into `<head>`
//! - Drop refresh, X-Frame-Options and CSP `<meta http-equiv>` elements
//! - Drop inline scripts carrying a frame-busting signature
//!
//! # Design Decisions
//! - Streaming rewriter (lol_html), so untouched markup is emitted
//!   byte-for-byte
//! - Two passes: the first collects facts the second needs up front (does a
//!   `<base>` exist, which scripts bust frames), since a script's text only
//!   arrives after its start tag has been emitted
//! - Any rewriter failure falls back to the original body

use std::cell::{Cell, RefCell};

use bytes::Bytes;
use lol_html::errors::RewritingError;
use lol_html::html_content::ContentType;
use lol_html::{element, text, AsciiCompatibleEncoding, HtmlRewriter, MemorySettings, Settings};

use crate::observability::metrics;
use crate::proxy::neutralizer::{base_tag, NEUTRALIZER_BODY, NEUTRALIZER_SCRIPT};
use crate::proxy::signatures::is_frame_busting;

/// Attributes holding URLs that get absolutized.
pub const URL_ATTRIBUTES: &[&str] = &["href", "src", "action"];

/// `http-equiv` values whose `<meta>` elements are removed.
pub const BLOCKED_META: &[&str] = &["refresh", "x-frame-options", "content-security-policy"];

/// Marker attribute on the injected script.
const NEUTRALIZER_MARKER: &str = "data-embed-proxy";

/// Default cap on rewriter buffer memory per pass.
pub const DEFAULT_MAX_MEMORY: usize = 64 * 1024 * 1024;

/// Parsing buffer preallocated per pass, before the cap is applied.
const PREALLOCATED_BUFFER: usize = 1024;

/// Errors from the rewriter. Never surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("HTML rewriting failed: {0}")]
    Parse(#[from] RewritingError),
}

/// Per-document rewrite settings.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// `scheme://host[:port]` of the fetched page.
    pub origin: String,
    pub inject_script: bool,
    /// Upper bound on buffered markup. Exceeding it fails the rewrite.
    pub max_memory: usize,
}

impl RewriteContext {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            inject_script: true,
            max_memory: DEFAULT_MAX_MEMORY,
        }
    }

    pub fn with_script(mut self, inject: bool) -> Self {
        self.inject_script = inject;
        self
    }

    pub fn with_memory_limit(mut self, max_memory: usize) -> Self {
        self.max_memory = max_memory;
        self
    }

    fn memory_settings(&self) -> MemorySettings {
        MemorySettings {
            preallocated_parsing_buffer_size: PREALLOCATED_BUFFER.min(self.max_memory / 2),
            max_allowed_memory_usage: self.max_memory,
        }
    }
}

/// What a rewrite changed, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub urls_rewritten: usize,
    pub meta_removed: usize,
    pub scripts_removed: usize,
    pub base_inserted: bool,
    pub script_injected: bool,
}

#[derive(Debug)]
pub struct Rewritten {
    pub body: Vec<u8>,
    pub stats: RewriteStats,
}

#[derive(Debug, Default)]
struct InlineScript {
    marked: bool,
    text: String,
}

impl InlineScript {
    /// The marker alone can be copied by any page; the text must match too.
    fn is_neutralizer(&self) -> bool {
        self.marked && self.text == NEUTRALIZER_BODY
    }
}

#[derive(Debug, Default)]
struct DocumentScan {
    has_html: bool,
    has_head: bool,
    has_base: bool,
    scripts: Vec<InlineScript>,
}

impl DocumentScan {
    fn has_neutralizer(&self) -> bool {
        self.scripts.iter().any(InlineScript::is_neutralizer)
    }

    /// Removal decision per script, in document order.
    fn busting_flags(&self) -> Vec<bool> {
        self.scripts
            .iter()
            .map(|s| !s.is_neutralizer() && is_frame_busting(&s.text))
            .collect()
    }
}

/// True when the content type announces an HTML document.
pub fn is_html(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml+xml")
        })
        .unwrap_or(false)
}

/// Single slash followed by anything but another slash.
pub fn is_root_relative(value: &str) -> bool {
    value.starts_with('/') && !value.starts_with("//")
}

/// Pick the decoder for the `charset` parameter, defaulting to UTF-8.
pub fn encoding_for(content_type: Option<&str>) -> AsciiCompatibleEncoding {
    content_type
        .and_then(|ct| {
            ct.split(';')
                .skip(1)
                .filter_map(|param| param.split_once('='))
                .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
                .map(|(_, value)| value.trim().trim_matches('"').to_string())
        })
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .and_then(AsciiCompatibleEncoding::new)
        .unwrap_or_else(AsciiCompatibleEncoding::utf_8)
}

/// Rewrite an HTML document.
pub fn rewrite_html(
    input: &[u8],
    ctx: &RewriteContext,
    encoding: AsciiCompatibleEncoding,
) -> Result<Rewritten, RewriteError> {
    let scan = scan_document(input, encoding, ctx.memory_settings())?;
    let flags = scan.busting_flags();

    let mut injection = String::new();
    let mut stats = RewriteStats::default();
    if !scan.has_base {
        injection.push_str(&base_tag(&ctx.origin));
        stats.base_inserted = true;
    }
    if ctx.inject_script && !scan.has_neutralizer() {
        injection.push_str(NEUTRALIZER_SCRIPT);
        stats.script_injected = true;
    }

    let stats = RefCell::new(stats);
    let script_index = Cell::new(0usize);
    let injected = Cell::new(injection.is_empty());
    let origin = ctx.origin.as_str();

    let mut handlers = vec![
        element!("*", |el| {
            for attr in URL_ATTRIBUTES {
                if let Some(value) = el.get_attribute(attr) {
                    if is_root_relative(&value) {
                        el.set_attribute(attr, &format!("{}{}", origin, value))?;
                        stats.borrow_mut().urls_rewritten += 1;
                    }
                }
            }
            Ok(())
        }),
        element!("meta[http-equiv]", |el| {
            let blocked = el
                .get_attribute("http-equiv")
                .map(|equiv| BLOCKED_META.iter().any(|b| equiv.trim().eq_ignore_ascii_case(b)))
                .unwrap_or(false);
            if blocked {
                el.remove();
                stats.borrow_mut().meta_removed += 1;
            }
            Ok(())
        }),
        element!("script", |el| {
            let index = script_index.get();
            script_index.set(index + 1);
            if flags.get(index).copied().unwrap_or(false) {
                el.remove();
                stats.borrow_mut().scripts_removed += 1;
            }
            Ok(())
        }),
        element!("head", |el| {
            if !injected.get() {
                el.prepend(&injection, ContentType::Html);
                injected.set(true);
            }
            Ok(())
        }),
    ];
    if !scan.has_head && scan.has_html {
        handlers.push(element!("html", |el| {
            if !injected.get() {
                el.prepend(&format!("<head>{}</head>", injection), ContentType::Html);
                injected.set(true);
            }
            Ok(())
        }));
    }

    let mut output = Vec::with_capacity(input.len() + injection.len());
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: handlers,
            encoding,
            memory_settings: ctx.memory_settings(),
            ..Settings::new()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );
    rewriter.write(input)?;
    rewriter.end()?;

    if !injected.get() {
        // Fragment without <html> or <head>: put the markup up front.
        output = prefix_after_doctype(&output, injection.as_bytes());
    }

    Ok(Rewritten {
        body: output,
        stats: stats.into_inner(),
    })
}

/// Rewrite `body` if it is HTML, otherwise hand it back untouched.
///
/// Rewriter failures are logged and the original body is returned.
pub fn rewrite_or_original(body: Bytes, content_type: Option<&str>, ctx: &RewriteContext) -> Bytes {
    if !is_html(content_type) {
        return body;
    }

    match rewrite_html(&body, ctx, encoding_for(content_type)) {
        Ok(rewritten) => {
            tracing::debug!(
                origin = %ctx.origin,
                urls_rewritten = rewritten.stats.urls_rewritten,
                meta_removed = rewritten.stats.meta_removed,
                scripts_removed = rewritten.stats.scripts_removed,
                base_inserted = rewritten.stats.base_inserted,
                "HTML rewritten"
            );
            metrics::record_rewrite("rewritten");
            Bytes::from(rewritten.body)
        }
        Err(e) => {
            tracing::warn!(origin = %ctx.origin, error = %e, "HTML rewrite failed, serving original body");
            metrics::record_rewrite("fallback");
            body
        }
    }
}

fn scan_document(
    input: &[u8],
    encoding: AsciiCompatibleEncoding,
    memory_settings: MemorySettings,
) -> Result<DocumentScan, RewriteError> {
    let scan = RefCell::new(DocumentScan::default());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("html", |_| {
                    scan.borrow_mut().has_html = true;
                    Ok(())
                }),
                element!("head", |_| {
                    scan.borrow_mut().has_head = true;
                    Ok(())
                }),
                element!("base", |_| {
                    scan.borrow_mut().has_base = true;
                    Ok(())
                }),
                element!("script", |el| {
                    let marked = el.get_attribute(NEUTRALIZER_MARKER).is_some();
                    scan.borrow_mut().scripts.push(InlineScript {
                        marked,
                        text: String::new(),
                    });
                    Ok(())
                }),
                text!("script", |chunk| {
                    if let Some(script) = scan.borrow_mut().scripts.last_mut() {
                        script.text.push_str(chunk.as_str());
                    }
                    Ok(())
                }),
            ],
            encoding,
            memory_settings,
            ..Settings::new()
        },
        |_: &[u8]| {},
    );
    rewriter.write(input)?;
    rewriter.end()?;

    Ok(scan.into_inner())
}

fn prefix_after_doctype(document: &[u8], markup: &[u8]) -> Vec<u8> {
    let start = document
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(document.len());
    let rest = &document[start..];
    let split = if rest.len() >= 9 && rest[..9].eq_ignore_ascii_case(b"<!doctype") {
        rest.iter()
            .position(|&b| b == b'>')
            .map(|end| start + end + 1)
            .unwrap_or(0)
    } else {
        0
    };

    let mut out = Vec::with_capacity(document.len() + markup.len());
    out.extend_from_slice(&document[..split]);
    out.extend_from_slice(markup);
    out.extend_from_slice(&document[split..]);
    out
}
