//! Frame-busting signatures.
//!
//! Substring heuristics, matched case-sensitively against inline script
//! text. Obfuscated frame-busting slips through and benign scripts that
//! merely mention these strings get removed; both are accepted.

/// Ordered signature list. Append new patterns at the end.
pub const FRAME_BUSTING_SIGNATURES: &[&str] = &[
    "top.location",
    "parent.location",
    "window.top",
    "frameElement",
    "framebuster",
    "framebreaker",
    "top!=self",
    "top !== self",
    "top!=window",
    "top !== window",
];

/// First signature found in `script`, if any.
pub fn find_signature(script: &str) -> Option<&'static str> {
    FRAME_BUSTING_SIGNATURES
        .iter()
        .copied()
        .find(|signature| script.contains(signature))
}

pub fn is_frame_busting(script: &str) -> bool {
    find_signature(script).is_some()
}
