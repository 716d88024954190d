// src/highlight.rs
//! Split a message into plain and keyword-matched spans for presentation.
//!
//! Every keyword gets its own named group (`__kw<N>`) in one regex, so a hit maps
//! straight back to its rule. Symbols are matched bare and come first. Word-like
//! literals and raw patterns carry a trailing Unicode boundary; the leading one is
//! checked against the text before the hit, so a symbol right in front of a word
//! is not eaten as its separator. Literals are ordered longest-first within their
//! branch.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::matcher::{build_regex, Fragment, BOUNDARY_AFTER};

static WORD_CHAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{N}]$").expect("word char class compiles"));

/// True when `at` starts the text or follows a non letter/digit char.
fn at_word_start(text: &str, at: usize) -> bool {
    text[..at].chars().next_back().map_or(true, |c| {
        let mut buf = [0u8; 4];
        !WORD_CHAR.is_match(c.encode_utf8(&mut buf))
    })
}
use crate::rules::{KeywordRule, Polarity};

/// One piece of a message; `rule` is set when the piece is a keyword hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'h, 't> {
    pub text: &'t str,
    pub rule: Option<&'h KeywordRule>,
}

/// Owned span, the shape the HTTP layer returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HighlightSpan {
    pub text: String,
    pub keyword: Option<String>,
    pub polarity: Option<Polarity>,
    pub stat_bucket: Option<String>,
}

impl From<Span<'_, '_>> for HighlightSpan {
    fn from(s: Span<'_, '_>) -> Self {
        Self {
            text: s.text.to_string(),
            keyword: s.rule.map(|r| r.keyword.clone()),
            polarity: s.rule.map(|r| r.polarity),
            stat_bucket: s.rule.and_then(|r| r.stat_bucket.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Highlighter {
    regex: Option<Regex>,
    /// (capture group index, index into `rules`, needs a leading boundary)
    groups: Vec<(usize, usize, bool)>,
    rules: Vec<KeywordRule>,
}

fn group_name(rule_idx: usize) -> String {
    format!("__kw{rule_idx}")
}

fn assemble(bounded: &[(String, usize)], symbols: &[(String, usize)]) -> String {
    let named = |(alt, idx): &(String, usize)| format!("(?P<{}>{alt})", group_name(*idx));
    let mut branches: Vec<String> = symbols.iter().map(named).collect();
    if !bounded.is_empty() {
        let alts: Vec<String> = bounded.iter().map(named).collect();
        branches.push(format!("(?:{}){BOUNDARY_AFTER}", alts.join("|")));
    }
    branches.join("|")
}

impl Highlighter {
    pub fn new(rules: &[KeywordRule]) -> Self {
        let mut patterns = Vec::new();
        let mut words = Vec::new();
        let mut symbols = Vec::new();
        for (idx, rule) in rules.iter().enumerate() {
            match Fragment::of(rule) {
                Ok(Fragment::Pattern(p)) => patterns.push((p, idx)),
                Ok(Fragment::Word(w)) => words.push((w, idx)),
                Ok(Fragment::Symbol(s)) => symbols.push((regex::escape(&s), idx)),
                Err(_) => {}
            }
        }
        order_longest_first(&mut words, rules);
        order_longest_first(&mut symbols, rules);

        let mut bounded: Vec<(String, usize)> = patterns.clone();
        bounded.extend(words.iter().cloned());
        if bounded.is_empty() && symbols.is_empty() {
            return Self {
                rules: rules.to_vec(),
                ..Self::default()
            };
        }

        let regex = match build_regex(&assemble(&bounded, &symbols)) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(target: "rules", error = %e, "highlight regex failed; retrying without raw patterns");
                build_regex(&assemble(&words, &symbols)).ok()
            }
        };

        let is_symbol: Vec<bool> = rules
            .iter()
            .map(|r| matches!(Fragment::of(r), Ok(Fragment::Symbol(_))))
            .collect();
        let groups = regex
            .as_ref()
            .map(|re| {
                re.capture_names()
                    .enumerate()
                    .filter_map(|(gi, name)| {
                        let idx = name?.strip_prefix("__kw")?.parse::<usize>().ok()?;
                        Some((gi, idx, !is_symbol[idx]))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            regex,
            groups,
            rules: rules.to_vec(),
        }
    }

    /// Lazy span iterator over `text`. Each call starts from scratch.
    pub fn spans<'h, 't>(&'h self, text: &'t str) -> Spans<'h, 't> {
        Spans {
            hl: self,
            text,
            pos: 0,
            search: 0,
            pending: None,
        }
    }
}

fn order_longest_first(entries: &mut [(String, usize)], rules: &[KeywordRule]) {
    entries.sort_by(|(_, a), (_, b)| {
        let (ka, kb) = (&rules[*a].keyword, &rules[*b].keyword);
        kb.chars().count().cmp(&ka.chars().count()).then(ka.cmp(kb))
    });
}

/// Builds a one-off highlighter for `rules` and collects owned spans.
pub fn spans(text: &str, rules: &[KeywordRule]) -> Vec<HighlightSpan> {
    let hl = Highlighter::new(rules);
    hl.spans(text).map(HighlightSpan::from).collect()
}

pub struct Spans<'h, 't> {
    hl: &'h Highlighter,
    text: &'t str,
    /// Start of text not yet emitted.
    pos: usize,
    /// Where the next regex search begins.
    search: usize,
    pending: Option<Span<'h, 't>>,
}

impl<'h, 't> Spans<'h, 't> {
    fn rest(&mut self) -> Option<Span<'h, 't>> {
        if self.pos >= self.text.len() {
            return None;
        }
        let s = &self.text[self.pos..];
        self.pos = self.text.len();
        self.search = self.text.len();
        Some(Span { text: s, rule: None })
    }
}

impl<'h, 't> Iterator for Spans<'h, 't> {
    type Item = Span<'h, 't>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(p) = self.pending.take() {
            return Some(p);
        }
        let Some(re) = self.hl.regex.as_ref() else {
            return self.rest();
        };

        while self.search <= self.text.len() {
            let Some(caps) = re.captures_at(self.text, self.search) else {
                return self.rest();
            };
            let Some((m, rule_idx, bounded)) = self
                .hl
                .groups
                .iter()
                .find_map(|&(gi, ri, b)| caps.get(gi).map(|m| (m, ri, b)))
            else {
                return self.rest();
            };

            // Zero-width hit, or a word glued to a letter on its left: step one char.
            if m.is_empty() || (bounded && !at_word_start(self.text, m.start())) {
                let at = m.start().max(self.search);
                let step = self.text[at..].chars().next().map_or(1, char::len_utf8);
                self.search = at + step;
                continue;
            }

            self.search = m.end();
            let gap = &self.text[self.pos..m.start()];
            self.pos = m.end();
            let hit = Span {
                text: m.as_str(),
                rule: Some(&self.hl.rules[rule_idx]),
            };
            if gap.is_empty() {
                return Some(hit);
            }
            self.pending = Some(hit);
            return Some(Span { text: gap, rule: None });
        }
        self.rest()
    }
}
