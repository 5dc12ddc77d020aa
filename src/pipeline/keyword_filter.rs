//! Whole-word keyword matching for extracted items
//!
//! The site's search is substring-based, so "switch" also returns "light
//! switch plate" and "switchblade". Items only count toward a watchlist when
//! one of its keywords appears as a whole token run in the item text.

use crate::types::{AuctionItem, KeywordSet};

#[derive(Debug, Clone)]
pub struct KeywordFilter {
    /// Keyword as stored, with its token run
    phrases: Vec<(String, Vec<String>)>,
}

impl KeywordFilter {
    pub fn new(keywords: &KeywordSet) -> Self {
        let phrases = keywords
            .iter()
            .map(|keyword| (keyword.to_string(), tokenize(keyword)))
            .filter(|(_, tokens)| !tokens.is_empty())
            .collect();
        Self { phrases }
    }

    /// Keywords found in the item's text, in keyword-set order; empty means no match
    pub fn matched(&self, item: &AuctionItem) -> Vec<String> {
        let tokens = tokenize(&item.searchable_text());
        self.phrases
            .iter()
            .filter(|(_, phrase)| tokens.windows(phrase.len()).any(|window| window == phrase.as_slice()))
            .map(|(keyword, _)| keyword.clone())
            .collect()
    }
}

/// Lower-case, whitespace split, ASCII punctuation removed
fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !c.is_ascii_punctuation())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .collect()
}
