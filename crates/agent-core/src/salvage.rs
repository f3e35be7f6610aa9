//! Response Salvage
//!
//! Broker tools frequently wrap JSON in prose, markdown fences or trailing
//! commentary. The salvage chain tries progressively looser strategies and
//! returns the first value that parses. It never invents data: when every
//! strategy fails the caller gets `MalformedToolOutput`.

use serde_json::Value;

use crate::error::{AgentError, Result};

/// One way of recovering JSON from free text
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SalvageStrategy {
    /// The whole (trimmed) text is JSON
    WholeText,
    /// Contents of a ``` fenced block, with or without a language tag
    FencedBlock,
    /// Balanced span starting at the first `{` or `[`, when no other
    /// bracket follows it
    BalancedSpan,
    /// Every `{` or `[` start; the longest balanced span that parses wins
    AnyObject,
}

impl SalvageStrategy {
    /// Strategies in the order they are attempted
    pub const ORDER: [Self; 4] = [Self::WholeText, Self::FencedBlock, Self::BalancedSpan, Self::AnyObject];

    /// Run this strategy alone
    pub fn attempt(self, text: &str) -> Option<Value> {
        match self {
            Self::WholeText => parse(text),
            Self::FencedBlock => fenced_blocks(text).find_map(parse),
            Self::BalancedSpan => {
                let start = text.find(['{', '['])?;
                let span = balanced_span(text, start)?;
                // Another structure later on: let the exhaustive scan choose
                if text[start + span.len()..].contains(['{', '[']) {
                    return None;
                }
                parse(span)
            }
            Self::AnyObject => text
                .match_indices(['{', '['])
                .filter_map(|(start, _)| balanced_span(text, start))
                .filter_map(|span| parse(span).map(|value| (span.len(), value)))
                .max_by_key(|(len, _)| *len)
                .map(|(_, value)| value),
        }
    }
}

/// Recover JSON from `text`, reporting which strategy succeeded
pub fn salvage_with_strategy(text: &str) -> Result<(SalvageStrategy, Value)> {
    SalvageStrategy::ORDER
        .into_iter()
        .find_map(|strategy| strategy.attempt(text).map(|value| (strategy, value)))
        .ok_or_else(|| AgentError::MalformedToolOutput(preview(text)))
}

/// Recover JSON from `text`
pub fn salvage_json(text: &str) -> Result<Value> {
    let (strategy, value) = salvage_with_strategy(text)?;
    if strategy != SalvageStrategy::WholeText {
        tracing::debug!(?strategy, "Salvaged JSON from tool output");
    }
    Ok(value)
}

fn parse(candidate: &str) -> Option<Value> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }
    serde_json::from_str(candidate).ok()
}

/// Bodies of all ``` fenced blocks; an unterminated fence runs to the end
fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let open = rest.find("```")?;
        let after = &rest[open + 3..];
        // Skip the language tag line, if any
        let body_start = after.find('\n').map_or(after.len(), |nl| nl + 1);
        let tag = &after[..body_start];
        let (body, remaining) = if tag.trim_start().starts_with(['{', '[']) {
            // Fence immediately followed by JSON on the same line
            split_at_close(after)
        } else {
            split_at_close(&after[body_start..])
        };
        rest = remaining;
        Some(body)
    })
}

fn split_at_close(s: &str) -> (&str, &str) {
    s.find("```")
        .map_or((s, ""), |close| (&s[..close], &s[close + 3..]))
}

/// Slice from `start` (an opening bracket) to its matching close.
///
/// String literals and escapes are honoured so brackets inside quoted text
/// do not affect the depth.
fn balanced_span(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}...")
    }
}
