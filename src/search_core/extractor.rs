//! Structured item extraction from cleaned result fragments
//!
//! Understands both row shapes the search protocols emit:
//! - items rows: `div.row` blocks carrying hidden `input` fields inside
//!   `div.AuctionItem-listInfo`, a carousel of images and a detail link
//! - legacy rows: `<tr id=...>` table rows, one cell per column

use crate::types::{AuctionItem, SearchResult};
use scraper::{ElementRef, Html, Selector};

/// Turns one search result fragment into zero or more items
pub trait ItemExtractor: Send + Sync {
    fn extract(&self, result: &SearchResult) -> Vec<AuctionItem>;
}

/// `div.AuctionItem-listInfo input[name=...]` for each field an items row carries
#[derive(Debug, Clone)]
struct HiddenFields {
    id: Selector,
    name: Selector,
    description: Selector,
    original_name: Selector,
    total_bids: Selector,
    current_bid_amount: Selector,
    minimum_next_bid_amount: Selector,
    buy_now_price: Selector,
    quantity: Selector,
}

impl HiddenFields {
    fn new() -> Self {
        Self {
            id: hidden_field("AuctionItemId"),
            name: hidden_field("ItemName"),
            description: hidden_field("Description"),
            original_name: hidden_field("OriginalName"),
            total_bids: hidden_field("TotalBids"),
            current_bid_amount: hidden_field("CurrentBidAmount"),
            minimum_next_bid_amount: hidden_field("MinimumNextBidAmount"),
            buy_now_price: hidden_field("BuyNowPrice"),
            quantity: hidden_field("Quantity"),
        }
    }
}

fn hidden_field(name: &str) -> Selector {
    Selector::parse(&format!("div.AuctionItem-listInfo input[name='{}']", name)).expect("hidden field selector")
}

#[derive(Debug, Clone)]
pub struct HtmlItemExtractor {
    hidden: HiddenFields,
    item_rows: Selector,
    legacy_rows: Selector,
    images: Selector,
    item_link: Selector,
    tooltip: Selector,
    cells: Selector,
    links: Selector,
    description_cell: Selector,
}

impl HtmlItemExtractor {
    pub fn new() -> Self {
        Self {
            hidden: HiddenFields::new(),
            item_rows: Selector::parse("div.row").expect("item row selector"),
            legacy_rows: Selector::parse("tr[id]").expect("legacy row selector"),
            images: Selector::parse("div.carousel-inner img").expect("image selector"),
            item_link: Selector::parse("div.carousel-inner a.carousel-item").expect("item link selector"),
            tooltip: Selector::parse("div.tooltip-demos").expect("tooltip selector"),
            cells: Selector::parse("td").expect("cell selector"),
            links: Selector::parse("a[href]").expect("link selector"),
            description_cell: Selector::parse("td.description").expect("description selector"),
        }
    }

    fn extract_item_row(&self, row: ElementRef<'_>, result: &SearchResult) -> AuctionItem {
        let mut item = base_item(result);

        let fields = &self.hidden;
        item.id = hidden_input(row, &fields.id).unwrap_or_default();
        item.name = hidden_input(row, &fields.name).unwrap_or_default();
        item.description = hidden_input(row, &fields.description).unwrap_or_default();
        item.original_name = hidden_input(row, &fields.original_name).unwrap_or_default();
        item.total_bids = hidden_number(row, &fields.total_bids);
        item.current_bid_amount = hidden_number(row, &fields.current_bid_amount);
        item.minimum_next_bid_amount = hidden_number(row, &fields.minimum_next_bid_amount);
        item.buy_now_price = hidden_number(row, &fields.buy_now_price);
        item.quantity = hidden_number(row, &fields.quantity);

        item.image_urls = row
            .select(&self.images)
            .filter_map(|img| img.value().attr("src"))
            .map(strip_image_size)
            .collect();

        item.item_url = row
            .select(&self.item_link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);

        item.extended_description = row
            .select(&self.tooltip)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default();

        item
    }

    fn extract_legacy_row(&self, row: ElementRef<'_>, result: &SearchResult) -> AuctionItem {
        let mut item = base_item(result);

        item.id = row.value().attr("id").unwrap_or_default().to_string();
        item.item_url = row
            .select(&self.links)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);

        let cells: Vec<String> = row
            .select(&self.cells)
            .map(|td| collapse_whitespace(&td.text().collect::<String>()))
            .filter(|text| !text.is_empty())
            .collect();

        item.name = row
            .select(&self.description_cell)
            .next()
            .map(|td| collapse_whitespace(&td.text().collect::<String>()))
            .or_else(|| cells.first().cloned())
            .unwrap_or_default();
        item.description = cells.join(" | ");

        item
    }
}

impl Default for HtmlItemExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemExtractor for HtmlItemExtractor {
    fn extract(&self, result: &SearchResult) -> Vec<AuctionItem> {
        let fragment = Html::parse_fragment(&result.content);

        let legacy: Vec<AuctionItem> = fragment
            .select(&self.legacy_rows)
            .map(|row| self.extract_legacy_row(row, result))
            .collect();

        let items = if !legacy.is_empty() {
            legacy
        } else {
            fragment
                .select(&self.item_rows)
                .map(|row| self.extract_item_row(row, result))
                .collect()
        };

        items
            .into_iter()
            .filter(|item| {
                if item.id.is_empty() {
                    log::debug!("Dropping result row without an item id (auction {})", result.auction_id);
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

fn base_item(result: &SearchResult) -> AuctionItem {
    AuctionItem {
        parent_auction_id: result.auction_id.clone(),
        keywords: result
            .keyword
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        ..Default::default()
    }
}

fn hidden_input(row: ElementRef<'_>, field: &Selector) -> Option<String> {
    row.select(field)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(|v| v.trim().to_string())
}

fn hidden_number(row: ElementRef<'_>, field: &Selector) -> i64 {
    hidden_input(row, field)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Drop a `-<w>x<h>` thumbnail suffix before the extension: `a-150x150.jpg` -> `a.jpg`
fn strip_image_size(src: &str) -> String {
    let Some(dot) = src.rfind('.') else {
        return src.to_string();
    };
    let (stem, ext) = src.split_at(dot);
    let Some(dash) = stem.rfind('-') else {
        return src.to_string();
    };
    let size = &stem[dash + 1..];
    let is_size = size
        .split_once('x')
        .map(|(w, h)| {
            !w.is_empty() && !h.is_empty() && w.bytes().all(|b| b.is_ascii_digit()) && h.bytes().all(|b| b.is_ascii_digit())
        })
        .unwrap_or(false);

    if is_size {
        format!("{}{}", &stem[..dash], ext)
    } else {
        src.to_string()
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
