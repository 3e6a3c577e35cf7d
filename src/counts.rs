//! Engagement numbers scraped out of a post's visible text.
//!
//! The mobile site renders counts as free text ("1.2K reactions", "34 comments",
//! "Love: 12"), so everything here is regex over `raw_text`. A metric we can't find is
//! `None`, never zero.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const NUM: &str = r"(\d[\d.,]*[KkMmBb]?)";

static REACTIONS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(&format!(r"(?i)(?:all\s+)?reactions?\s*:\s*{NUM}")).unwrap(),
        Regex::new(&format!(r"(?i){NUM}\s+reactions?\b")).unwrap(),
    ]
});

static COMMENTS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(&format!(r"(?i){NUM}\s+comments?\b")).unwrap(),
        Regex::new(&format!(r"(?i)comments?\s*:\s*{NUM}")).unwrap(),
    ]
});

static SHARES_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(&format!(r"(?i){NUM}\s+(?:re)?shares?\b")).unwrap(),
        Regex::new(&format!(r"(?i)(?:re)?shares?\s*:\s*{NUM}")).unwrap(),
    ]
});

static REACTION_LABELLED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(like|love|haha|wow|sad|angry|care)s?\s*:\s*{NUM}"
    ))
    .unwrap()
});

static REACTION_TRAILING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i){NUM}\s+(like|love|haha|wow|sad|angry|care)s?\b"
    ))
    .unwrap()
});

static THOUSANDS_GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(?:[.,]\d{3})+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionType {
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
    Care,
}

impl ReactionType {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "like" => Some(ReactionType::Like),
            "love" => Some(ReactionType::Love),
            "haha" => Some(ReactionType::Haha),
            "wow" => Some(ReactionType::Wow),
            "sad" => Some(ReactionType::Sad),
            "angry" => Some(ReactionType::Angry),
            "care" => Some(ReactionType::Care),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounts {
    pub reactions: Option<u64>,
    pub comments: Option<u64>,
    pub shares: Option<u64>,
}

/// Only the reaction types actually found in the text.
pub type ReactionBreakdown = BTreeMap<ReactionType, u64>;

/// The per-type reaction object on an emitted post. Always all seven keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    pub like: u64,
    pub love: u64,
    pub haha: u64,
    pub wow: u64,
    pub sad: u64,
    pub angry: u64,
    pub care: u64,
}

impl Reactions {
    /// Zero-filled, then overlaid with whatever the breakdown detected.
    pub fn from_breakdown(breakdown: &ReactionBreakdown) -> Self {
        let mut out = Reactions::default();
        for (kind, count) in breakdown {
            *out.slot(*kind) = *count;
        }
        out
    }

    fn slot(&mut self, kind: ReactionType) -> &mut u64 {
        match kind {
            ReactionType::Like => &mut self.like,
            ReactionType::Love => &mut self.love,
            ReactionType::Haha => &mut self.haha,
            ReactionType::Wow => &mut self.wow,
            ReactionType::Sad => &mut self.sad,
            ReactionType::Angry => &mut self.angry,
            ReactionType::Care => &mut self.care,
        }
    }
}

/// Reaction/comment/share totals from free text.
pub fn pick_counts(raw: &str) -> EngagementCounts {
    EngagementCounts {
        reactions: first_count(&REACTIONS_PATTERNS, raw),
        comments: first_count(&COMMENTS_PATTERNS, raw),
        shares: first_count(&SHARES_PATTERNS, raw),
    }
}

/// Per-type reaction counts for the types the text mentions. First mention wins.
pub fn parse_reaction_breakdown(raw: &str) -> ReactionBreakdown {
    let mut breakdown = ReactionBreakdown::new();

    for caps in REACTION_LABELLED.captures_iter(raw) {
        if let (Some(kind), Some(count)) = (
            ReactionType::from_label(&caps[1]),
            parse_count(&caps[2]),
        ) {
            breakdown.entry(kind).or_insert(count);
        }
    }
    for caps in REACTION_TRAILING.captures_iter(raw) {
        if let (Some(kind), Some(count)) = (
            ReactionType::from_label(&caps[2]),
            parse_count(&caps[1]),
        ) {
            breakdown.entry(kind).or_insert(count);
        }
    }

    breakdown
}

/// Reaction object for the output record: `None` for empty text, otherwise all seven
/// types with zeros for the undetected ones.
pub fn reactions_for(raw: &str) -> Option<Reactions> {
    if raw.trim().is_empty() {
        return None;
    }
    Some(Reactions::from_breakdown(&parse_reaction_breakdown(raw)))
}

fn first_count(patterns: &[Regex], raw: &str) -> Option<u64> {
    patterns
        .iter()
        .find_map(|re| re.captures(raw).and_then(|caps| parse_count(&caps[1])))
}

/// "1,234" → 1234, "1.2K" → 1200, "3M" → 3000000.
pub fn parse_count(token: &str) -> Option<u64> {
    let token = token.trim().trim_end_matches(['.', ',']);
    let (digits, multiplier) = match token.chars().last()? {
        'k' | 'K' => (&token[..token.len() - 1], 1_000f64),
        'm' | 'M' => (&token[..token.len() - 1], 1_000_000f64),
        'b' | 'B' => (&token[..token.len() - 1], 1_000_000_000f64),
        _ => (token, 1f64),
    };

    let normalized = if THOUSANDS_GROUPED.is_match(digits) {
        digits.replace([',', '.'], "")
    } else {
        digits.replace(',', ".")
    };

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}
