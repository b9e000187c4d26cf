//! Heuristic scoring for extracted page content.
//!
//! Raw nodes come out of the page as JSON; classification and ranking are
//! done here so the heuristics are testable without a browser.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use pagepilot_core::{BoundingBox, ContentBlock, InteractiveElement};

/// Raw interactive node as produced by the extraction script.
#[derive(Debug, Clone, Deserialize)]
pub struct RawElement {
    pub selector: String,
    pub tag: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub rect: Option<BoundingBox>,
}

/// Raw content segment as produced by the extraction script.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    pub text: String,
    pub tag: String,
    #[serde(default)]
    pub position: usize,
}

fn tag_confidence(tag: &str) -> f32 {
    match tag {
        "button" => 0.9,
        "a" | "input" => 0.85,
        "select" | "textarea" => 0.8,
        "form" | "label" => 0.6,
        _ => 0.4,
    }
}

fn implied_role(tag: &str) -> &'static str {
    match tag {
        "button" => "button",
        "a" => "link",
        "input" | "textarea" => "textbox",
        "select" => "listbox",
        "form" => "form",
        _ => "generic",
    }
}

/// Classify one raw node into an interactive element with a confidence
/// score combining tag semantics, ARIA attributes and visibility.
pub fn classify_element(raw: &RawElement) -> InteractiveElement {
    let mut confidence = tag_confidence(&raw.tag);
    if raw.role.is_some() || raw.aria_label.is_some() {
        confidence += 0.1;
    }
    if !raw.visible {
        confidence *= 0.3;
    }
    if raw.disabled {
        confidence *= 0.9;
    }

    let role = raw
        .role
        .clone()
        .unwrap_or_else(|| implied_role(&raw.tag).to_string());

    InteractiveElement {
        selector: raw.selector.clone(),
        role,
        confidence: confidence.clamp(0.0, 1.0),
        bounding_box: raw.rect,
        text: raw.text.clone().filter(|text| !text.is_empty()),
    }
}

fn block_tag_weight(tag: &str) -> f32 {
    match tag {
        "h1" => 0.95,
        "h2" => 0.85,
        "h3" | "h4" => 0.75,
        "p" | "article" => 0.65,
        "li" | "td" => 0.5,
        _ => 0.4,
    }
}

/// Rank content blocks by importance: tag weight scaled by text length and
/// attenuated by document position.
pub fn rank_blocks(raws: Vec<RawBlock>, max_blocks: usize) -> Vec<ContentBlock> {
    let mut scored: Vec<ContentBlock> = raws
        .into_iter()
        .filter(|raw| !raw.text.trim().is_empty())
        .map(|raw| {
            let length_factor = (raw.text.len() as f32 / 400.0).min(1.0).max(0.1);
            let position_decay = 1.0 / (1.0 + raw.position as f32 * 0.01);
            ContentBlock {
                importance: (block_tag_weight(&raw.tag) * length_factor * position_decay)
                    .clamp(0.0, 1.0),
                text: raw.text,
                rank: 0,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(max_blocks);
    for (rank, block) in scored.iter_mut().enumerate() {
        block.rank = rank;
    }
    scored
}

/// Aggregate result confidence: mean element confidence, halved for
/// degraded extractions.
pub fn aggregate_confidence(elements: &[InteractiveElement], degraded: bool) -> f32 {
    let base = if elements.is_empty() {
        0.75
    } else {
        elements.iter().map(|e| e.confidence).sum::<f32>() / elements.len() as f32
    };
    let aggregate = if degraded { base * 0.5 } else { base };
    aggregate.clamp(0.0, 1.0)
}

/// SHA-256 hex fingerprint over the normalized DOM text.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
