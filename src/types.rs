//! Core data model shared by the search, update and notify layers
//!
//! Identity-bearing values (watchlist ids, content fingerprints) are derived
//! from content with SHA-1 and rendered as 40-char lowercase hex.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Stable identity of a watchlist, derived from its normalized keyword set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchlistId(String);

impl WatchlistId {
    /// Wrap an identifier that was already derived (e.g. read back from a store or feed)
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchlistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WatchlistId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Case-insensitive keyword set belonging to one watchlist
///
/// Always held in normalized form: trimmed, lower-cased, sorted, deduplicated.
/// Two sets built from the same terms in any order or case compare equal and
/// share one `WatchlistId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct KeywordSet(Vec<String>);

impl KeywordSet {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: BTreeSet<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self(normalized.into_iter().collect())
    }

    /// Derive the watchlist identity: SHA-1 over the normalized terms, newline separated
    pub fn id(&self) -> WatchlistId {
        let mut hasher = Sha1::new();
        for keyword in &self.0 {
            hasher.update(keyword.as_bytes());
            hasher.update(b"\n");
        }
        WatchlistId(hex::encode(hasher.finalize()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined form used to tag results of the all-keywords legacy search
    pub fn joined(&self, sep: &str) -> String {
        self.0.join(sep)
    }
}

impl From<Vec<String>> for KeywordSet {
    fn from(keywords: Vec<String>) -> Self {
        Self::new(keywords)
    }
}

impl From<KeywordSet> for Vec<String> {
    fn from(set: KeywordSet) -> Self {
        set.0
    }
}

/// One unit of search work: an auction and the keyword(s) to query it with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTask {
    pub auction_id: String,
    pub keywords: Vec<String>,
}

/// Raw, already-cleaned result fragment (one result row) from one search task
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub auction_id: String,
    /// Keyword(s) that produced the fragment, comma-joined for multi-keyword tasks
    pub keyword: String,
    pub content: String,
}

/// Structured auction item extracted from a result fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuctionItem {
    pub id: String,
    pub parent_auction_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extended_description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub total_bids: i64,
    #[serde(default)]
    pub current_bid_amount: i64,
    #[serde(default)]
    pub minimum_next_bid_amount: i64,
    #[serde(default)]
    pub buy_now_price: i64,
    #[serde(default)]
    pub quantity: i64,
}

impl AuctionItem {
    /// Text the keyword filter matches against
    pub fn searchable_text(&self) -> String {
        [
            self.id.as_str(),
            self.name.as_str(),
            self.description.as_str(),
            self.extended_description.as_str(),
            self.original_name.as_str(),
        ]
        .join("\n")
    }
}

/// Content fingerprint: SHA-1 hex over the sorted, deduplicated item ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_items(items: &[AuctionItem]) -> Self {
        let ids: BTreeSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
        let mut hasher = Sha1::new();
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update(b"\n");
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Rehydrate a stored fingerprint
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a watchlist's matching items at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistContent {
    pub watchlist_id: WatchlistId,
    pub timestamp: i64,
    pub items: Vec<AuctionItem>,
    pub fingerprint: Fingerprint,
}

impl WatchlistContent {
    pub fn new(watchlist_id: WatchlistId, items: Vec<AuctionItem>, timestamp: i64) -> Self {
        let fingerprint = Fingerprint::of_items(&items);
        Self {
            watchlist_id,
            timestamp,
            items,
            fingerprint,
        }
    }
}

/// A user and the watchlists they subscribe to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub verified: bool,
    /// Watchlist display name -> comma-joined watchlist ids
    #[serde(default)]
    pub watchlists: HashMap<String, String>,
}

impl User {
    /// Every watchlist id this user subscribes to, with the name it is filed under
    pub fn subscriptions(&self) -> impl Iterator<Item = (&str, WatchlistId)> + '_ {
        self.watchlists.iter().flat_map(|(name, ids)| {
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(move |id| (name.as_str(), WatchlistId::new(id)))
        })
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({}) {}", self.name, self.id, self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, bid: i64) -> AuctionItem {
        AuctionItem {
            id: id.to_string(),
            parent_auction_id: "74691".to_string(),
            name: format!("item {}", id),
            current_bid_amount: bid,
            ..Default::default()
        }
    }

    #[test]
    fn test_keyword_set_identity_ignores_order_and_case() {
        let a = KeywordSet::new(["Nintendo", "sega", "PS4"]);
        let b = KeywordSet::new(["ps4", "SEGA", "nintendo", "sega "]);

        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().as_str().len(), 40);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec!["nintendo", "ps4", "sega"]);
    }

    #[test]
    fn test_keyword_set_normalization_is_idempotent() {
        let once = KeywordSet::new(["Chainsaw", "famicom"]);
        let twice = KeywordSet::new(once.iter());
        assert_eq!(once.id(), twice.id());
    }

    #[test]
    fn test_distinct_keyword_sets_have_distinct_ids() {
        // Without a separator "ab"+"c" and "a"+"bc" would collide
        let a = KeywordSet::new(["ab", "c"]);
        let b = KeywordSet::new(["a", "bc"]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_fingerprint_ignores_order_and_dynamic_fields() {
        let first = vec![item("111", 25), item("222", 10)];
        let second = vec![item("222", 99), item("111", 40)];

        assert_eq!(Fingerprint::of_items(&first), Fingerprint::of_items(&second));
        assert_eq!(Fingerprint::of_items(&first).as_str().len(), 40);
    }

    #[test]
    fn test_fingerprint_changes_when_item_set_changes() {
        let both = vec![item("111", 25), item("222", 10)];
        let one = vec![item("111", 25)];
        assert_ne!(Fingerprint::of_items(&both), Fingerprint::of_items(&one));
        assert_ne!(Fingerprint::of_items(&one), Fingerprint::of_items(&[]));
    }

    #[test]
    fn test_keyword_set_serde_normalizes() {
        let set: KeywordSet = serde_json::from_str(r#"["Sega","nintendo","sega"]"#).unwrap();
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["nintendo","sega"]"#);
    }

    #[test]
    fn test_user_subscriptions_split_comma_joined_ids() {
        let mut user = User {
            id: "u1".to_string(),
            ..Default::default()
        };
        user.watchlists.insert("games".to_string(), "abc, def".to_string());

        let mut subs: Vec<_> = user.subscriptions().map(|(n, id)| (n.to_string(), id)).collect();
        subs.sort();
        assert_eq!(
            subs,
            vec![
                ("games".to_string(), WatchlistId::new("abc")),
                ("games".to_string(), WatchlistId::new("def")),
            ]
        );
    }
}
