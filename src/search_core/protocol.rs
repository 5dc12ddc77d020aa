//! Search protocol variants for the two auction site generations
//!
//! - `Legacy`: one form POST per auction carrying every keyword; results are
//!   rows of the `#DataTable` table.
//! - `Items`: one query-string GET per (auction, keyword); results are
//!   `div.row` blocks inside the main content box.
//!
//! Each variant also knows where its open auctions are listed: the legacy
//! site's sale-events page links every auction with its id as the query key,
//! the items site tags each auction with a `label_<id>` span.
//!
//! Both variants clean the page before fragments leave this module: relative
//! links are made absolute and countdown/bid markup is stripped, since those
//! change on every scrape without the result set changing.

use super::auctions::{parse_auction_labels, parse_sale_events};
use super::SearchError;
use crate::types::{KeywordSet, SearchTask};
use lol_html::{element, rewrite_str, RewriteStrSettings};
use scraper::{Html, Selector};
use std::str::FromStr;
use url::Url;

pub const LEGACY_SITE: &str = "https://auction.ebidlocal.com";
pub const ITEMS_SITE: &str = "https://staples.prod4.maxanet.auction";

const LEGACY_SEARCH_PATH: &str = "/cgi-bin/mmlist.cgi";
const ITEMS_SEARCH_PATH: &str = "/Public/Auction/GetAuctionItems";
const ITEMS_LISTING_PATH: &str = "/Public/Auction/GetAuctions?filter=Current&pageSize=1000";
const LEGACY_LISTING: &str = "https://www.ebidlocal.com/im-bidding/sale-events/";
const LEGACY_LISTING_PATH: &str = "/im-bidding/sale-events/";

const LEGACY_DYNAMIC: &[&str] = &[
    "#DataTable tbody td.highbidder span",
    "#DataTable tbody td.currentamount span",
    "#DataTable tbody td.nextbidrequired span",
    "#DataTable tbody td.nextbidrequired a",
    "#DataTable tbody td.yourbid span",
    "#DataTable tbody td.yourbid input",
    "#DataTable tbody td.yourmaximum span",
    "#DataTable tbody td.yourmaximum input",
    "#DataTable tbody td.yourmaximum br",
];

const ITEMS_DYNAMIC: &[&str] = &[
    ".product-timer.productimer-item.auction-timer",
    "script",
    "style",
    "link",
    "nav",
];

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/93.0.4577.63 Safari/537.36";

/// Protocol generation, chosen by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    Legacy,
    Items,
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v1" | "legacy" => Ok(ProtocolVersion::Legacy),
            "v2" | "items" => Ok(ProtocolVersion::Items),
            other => Err(format!("unknown search protocol '{}' (expected legacy|v1|items|v2)", other)),
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVersion::Legacy => write!(f, "legacy"),
            ProtocolVersion::Items => write!(f, "items"),
        }
    }
}

/// Common surface every protocol variant implements
pub trait SiteProtocol {
    /// Expand a keyword set and auction list into fetchable tasks
    fn tasks(&self, keywords: &KeywordSet, auctions: &[String]) -> Vec<SearchTask>;

    /// Build the HTTP request for one task
    fn request(&self, client: &reqwest::Client, task: &SearchTask) -> Result<reqwest::RequestBuilder, SearchError>;

    /// Clean a fetched page and split it into one fragment per result row
    fn result_fragments(&self, page: &str) -> Result<Vec<String>, SearchError>;
}

#[derive(Debug, Clone)]
pub struct LegacySearch {
    site: Url,
    /// Sale-events page; `None` means under `site`
    listing: Option<Url>,
    rows: Selector,
    table: Selector,
}

#[derive(Debug, Clone)]
pub struct ItemsSearch {
    site: Url,
    rows: Selector,
    wrapper: Selector,
}

/// Tagged protocol variant selected at construction time
#[derive(Debug, Clone)]
pub enum SearchProtocol {
    Legacy(LegacySearch),
    Items(ItemsSearch),
}

impl SearchProtocol {
    /// Protocol against its production site
    pub fn new(version: ProtocolVersion) -> Self {
        let site = match version {
            ProtocolVersion::Legacy => LEGACY_SITE,
            ProtocolVersion::Items => ITEMS_SITE,
        };
        // Constant, known-good URLs
        let mut protocol = Self::with_site(version, Url::parse(site).expect("site url"));
        // Legacy sale events live on the marketing host, not the auction host
        if let SearchProtocol::Legacy(legacy) = &mut protocol {
            legacy.listing = Some(Url::parse(LEGACY_LISTING).expect("legacy listing url"));
        }
        protocol
    }

    /// Protocol against an alternate base URL (mirrors, local fixtures)
    ///
    /// The open-auction listing is expected under the same base.
    pub fn with_site(version: ProtocolVersion, site: Url) -> Self {
        match version {
            ProtocolVersion::Legacy => SearchProtocol::Legacy(LegacySearch {
                site,
                listing: None,
                rows: Selector::parse("#DataTable tbody tr").expect("legacy row selector"),
                table: Selector::parse("#DataTable").expect("legacy table selector"),
            }),
            ProtocolVersion::Items => SearchProtocol::Items(ItemsSearch {
                site,
                rows: Selector::parse("div.wrapper-main div.ibox-content > div.row")
                    .expect("items row selector"),
                wrapper: Selector::parse("div.wrapper-main").expect("items wrapper selector"),
            }),
        }
    }

    /// Page listing every currently open auction
    pub fn open_auctions_url(&self) -> Result<Url, SearchError> {
        match self {
            SearchProtocol::Legacy(p) => match &p.listing {
                Some(listing) => Ok(listing.clone()),
                None => Ok(p.site.join(LEGACY_LISTING_PATH)?),
            },
            SearchProtocol::Items(p) => Ok(p.site.join(ITEMS_LISTING_PATH)?),
        }
    }

    /// Auction ids on a fetched listing page, in page order without repeats
    pub fn parse_open_auctions(&self, page: &str) -> Result<Vec<String>, SearchError> {
        match self {
            SearchProtocol::Legacy(_) => parse_sale_events(page, &self.open_auctions_url()?),
            SearchProtocol::Items(_) => parse_auction_labels(page),
        }
    }

    fn inner(&self) -> &dyn SiteProtocol {
        match self {
            SearchProtocol::Legacy(p) => p,
            SearchProtocol::Items(p) => p,
        }
    }
}

impl SiteProtocol for SearchProtocol {
    fn tasks(&self, keywords: &KeywordSet, auctions: &[String]) -> Vec<SearchTask> {
        self.inner().tasks(keywords, auctions)
    }

    fn request(&self, client: &reqwest::Client, task: &SearchTask) -> Result<reqwest::RequestBuilder, SearchError> {
        self.inner().request(client, task)
    }

    fn result_fragments(&self, page: &str) -> Result<Vec<String>, SearchError> {
        self.inner().result_fragments(page)
    }
}

impl SiteProtocol for LegacySearch {
    fn tasks(&self, keywords: &KeywordSet, auctions: &[String]) -> Vec<SearchTask> {
        if keywords.is_empty() {
            return Vec::new();
        }
        let all: Vec<String> = keywords.iter().map(str::to_string).collect();
        auctions
            .iter()
            .map(|auction| SearchTask {
                auction_id: auction.clone(),
                keywords: all.clone(),
            })
            .collect()
    }

    fn request(&self, client: &reqwest::Client, task: &SearchTask) -> Result<reqwest::RequestBuilder, SearchError> {
        let url = self.site.join(LEGACY_SEARCH_PATH)?;
        let keyword = task.keywords.join(" ");
        let form = [
            ("auction", task.auction_id.as_str()),
            ("keyword", keyword.as_str()),
            ("stype", "ANY"),
            ("search", "Go!"),
        ];
        Ok(client
            .post(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(&form))
    }

    fn result_fragments(&self, page: &str) -> Result<Vec<String>, SearchError> {
        let cleaned = clean_page(page, &self.site, LEGACY_DYNAMIC)?;
        let document = Html::parse_document(&cleaned);

        // The legacy site omits the table entirely when nothing matched
        if document.select(&self.table).next().is_none() {
            return Ok(Vec::new());
        }

        Ok(document
            .select(&self.rows)
            .map(|row| format!("<table><tbody>{}</tbody></table>", row.html()))
            .collect())
    }
}

impl SiteProtocol for ItemsSearch {
    fn tasks(&self, keywords: &KeywordSet, auctions: &[String]) -> Vec<SearchTask> {
        auctions
            .iter()
            .flat_map(|auction| {
                keywords.iter().map(move |keyword| SearchTask {
                    auction_id: auction.clone(),
                    keywords: vec![keyword.to_string()],
                })
            })
            .collect()
    }

    fn request(&self, client: &reqwest::Client, task: &SearchTask) -> Result<reqwest::RequestBuilder, SearchError> {
        let mut url = self.site.join(ITEMS_SEARCH_PATH)?;
        url.query_pairs_mut()
            .append_pair("AuctionId", &task.auction_id)
            .append_pair("SearchFilter", &task.keywords.join(" "))
            .append_pair("viewType", "3")
            .append_pair("pageSize", "10000");
        Ok(client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::PRAGMA, "no-cache"))
    }

    fn result_fragments(&self, page: &str) -> Result<Vec<String>, SearchError> {
        let cleaned = clean_page(page, &self.site, ITEMS_DYNAMIC)?;
        let document = Html::parse_document(&cleaned);

        if document.select(&self.wrapper).next().is_none() {
            return Err(SearchError::Parse("result container div.wrapper-main missing".to_string()));
        }

        Ok(document.select(&self.rows).map(|row| row.html()).collect())
    }
}

/// Absolutise links and strip dynamic markup in one streaming pass
fn clean_page(page: &str, site: &Url, dynamic: &[&str]) -> Result<String, SearchError> {
    let mut handlers = vec![element!("a[href]", |el| {
        if let Some(href) = el.get_attribute("href") {
            if let Ok(absolute) = site.join(&href) {
                el.set_attribute("href", absolute.as_str())?;
            }
        }
        Ok(())
    })];

    for selector in dynamic {
        let selector: &str = selector;
        handlers.push(element!(selector, |el| {
            el.remove();
            Ok(())
        }));
    }

    rewrite_str(
        page,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| SearchError::Parse(format!("html rewrite failed: {}", e)))
}
