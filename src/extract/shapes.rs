//! Selector generations for the marketplace search results page.
//!
//! The target site's markup changes over time, so extraction runs against an
//! ordered list of "shapes". Adding a future generation is a pure addition to
//! the list; no existing logic changes.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{ListingSource, RawListing};

struct ListingShape {
    name: &'static str,
    item: Selector,
    link: Selector,
    title: Selector,
    price: Selector,
    shipping: Selector,
    bids: Selector,
    sold_date: Selector,
    image: Selector,
}

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("selector literal is valid")
}

static SHAPES: Lazy<Vec<ListingShape>> = Lazy::new(|| {
    vec![
        // Current results markup.
        ListingShape {
            name: "s-item",
            item: selector("li.s-item"),
            link: selector("a.s-item__link"),
            title: selector(".s-item__title"),
            price: selector(".s-item__price"),
            shipping: selector(".s-item__shipping, .s-item__logisticsCost"),
            bids: selector(".s-item__bids, .s-item__bidCount"),
            sold_date: selector(".s-item__caption .POSITIVE, .s-item__title--tagblock .POSITIVE"),
            image: selector("img.s-item__image-img"),
        },
        // Previous results markup generation, still served to some sessions.
        ListingShape {
            name: "sresult",
            item: selector("li.sresult"),
            link: selector("h3.lvtitle a"),
            title: selector("h3.lvtitle a"),
            price: selector("li.lvprice span.bold"),
            shipping: selector("li.lvshipping"),
            bids: selector("li.lvformat"),
            sold_date: selector("span.tme"),
            image: selector("img.img"),
        },
    ]
});

/// Parse one search results page. Items matched by no shape are skipped; an
/// entirely unmatched page yields an empty vec ("no results" is valid).
#[must_use]
pub fn parse_search_page(html: &str, keyword: &str) -> Vec<RawListing> {
    let document = Html::parse_document(html);
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut listings = Vec::new();

    for shape in SHAPES.iter() {
        let mut matched = 0_usize;
        for element in document.select(&shape.item) {
            let Some(listing) = parse_item(&element, shape, keyword) else {
                continue;
            };
            matched += 1;
            if seen_urls.insert(listing.item_url.clone()) {
                listings.push(listing);
            }
        }
        debug!(shape = shape.name, matched, "applied selector shape");
    }

    listings
}

fn parse_item(element: &ElementRef, shape: &ListingShape, keyword: &str) -> Option<RawListing> {
    let item_url = element
        .select(&shape.link)
        .next()
        .and_then(|link| link.value().attr("href"))
        .map(str::to_string)?;

    let title = text_of(element, &shape.title)?;
    // Upsell placeholder card, not a real listing.
    if title.is_empty() || title.eq_ignore_ascii_case("shop on ebay") {
        return None;
    }

    Some(RawListing {
        keyword: keyword.to_string(),
        item_url,
        title,
        price_text: text_of(element, &shape.price).unwrap_or_default(),
        shipping_text: text_of(element, &shape.shipping).unwrap_or_default(),
        bids_text: text_of(element, &shape.bids).unwrap_or_default(),
        sold_date_text: text_of(element, &shape.sold_date).unwrap_or_default(),
        image_url: element
            .select(&shape.image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string),
        source: ListingSource::Dom,
    })
}

fn text_of(element: &ElementRef, sel: &Selector) -> Option<String> {
    element
        .select(sel)
        .next()
        .map(|node| node.text().collect::<String>().trim().to_string())
}
