use std::sync::{Mutex, MutexGuard};

use chrono::{Datelike, Utc};
use encoding_rs::Encoding;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::models::{ListingRecord, ScrapeRunReport};
use crate::scrapers::export;
use crate::scrapers::traits::ListingScraper;
use crate::scrapers::ScrapeError;
use async_trait::async_trait;

pub const DATA_SOURCE: &str = "fang.com/top";

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
];

/// Administrative bounds the random fallback coordinates are drawn from.
const BEIJING_LON_RANGE: (f64, f64) = (115.40, 117.60);
const BEIJING_LAT_RANGE: (f64, f64) = (39.40, 41.10);

const DECORATION_CHOICES: [&str; 3] = ["精装", "简装", "毛坯"];

struct Selectors {
    node: Selector,
    title: Selector,
    tel_shop: Selector,
    agent: Selector,
    price_total: Selector,
    price_spans: Selector,
    add_shop: Selector,
    tags: Selector,
    cover: Selector,
    anchor: Selector,
    span: Selector,
}

struct Patterns {
    area: Regex,
    total_floor: Regex,
    unit_price: Regex,
    rooms: Regex,
    charset: Regex,
}

/// Scraper for the Fang.com top listings page.
pub struct FangScraper {
    cfg: ScraperConfig,
    client: Client,
    base_url: Url,
    rng: Mutex<StdRng>,
    selectors: Selectors,
    patterns: Patterns,
}

impl FangScraper {
    pub fn new(cfg: ScraperConfig) -> Result<Self, ScrapeError> {
        Self::with_rng(cfg, StdRng::from_entropy())
    }

    /// Create a scraper with a caller-supplied RNG. The user-agent rotation,
    /// coordinates, decoration and build-year draws all come from it.
    pub fn with_rng(cfg: ScraperConfig, rng: StdRng) -> Result<Self, ScrapeError> {
        let base_url = Url::parse(&cfg.source_url)?;

        let client = Client::builder()
            .connect_timeout(cfg.connect_timeout)
            .timeout(cfg.read_timeout)
            .default_headers(base_headers())
            .build()?;

        Ok(Self {
            cfg,
            client,
            base_url,
            rng: Mutex::new(rng),
            selectors: Selectors::compile()?,
            patterns: Patterns::compile()?,
        })
    }

    /// Fetch, parse and export one batch. The scheduler-facing entry point.
    pub async fn run(&self) -> Result<ScrapeRunReport, ScrapeError> {
        let html = self.fetch_html().await?;
        let listings = self.parse_listings(&html);
        let outcome = export::export_csv(&listings, &self.cfg.output_dir)?;

        let (output_path, count) = match outcome {
            Some(outcome) => (outcome.path.display().to_string(), outcome.rows),
            None => (String::new(), 0),
        };
        info!(count, path = %output_path, "scrape run finished");

        Ok(ScrapeRunReport {
            count,
            output_path,
            timestamp: Utc::now(),
        })
    }

    /// Issue one GET against the top page. Any transport failure or non-2xx
    /// status is fatal for the run; there are no partial results.
    pub async fn fetch_html(&self) -> Result<String, ScrapeError> {
        let user_agent = *USER_AGENTS
            .choose(&mut *self.rng())
            .unwrap_or(&USER_AGENTS[0]);

        debug!(url = %self.cfg.source_url, "fetching listing page");
        let response = self
            .client
            .get(&self.cfg.source_url)
            .header(header::USER_AGENT, user_agent)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "source returned error status");
            return Err(ScrapeError::Status(status));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?;

        Ok(self.decode_body(&body, content_type.as_deref()))
    }

    /// Decode using the server-declared charset, then a `<meta charset>`
    /// sniff over the head of the document, then lossy UTF-8.
    fn decode_body(&self, bytes: &[u8], content_type: Option<&str>) -> String {
        if let Some(encoding) = content_type.and_then(|ct| self.charset_of(ct)) {
            return encoding.decode(bytes).0.into_owned();
        }

        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]);
        if let Some(encoding) = self.charset_of(&head) {
            return encoding.decode(bytes).0.into_owned();
        }

        String::from_utf8_lossy(bytes).into_owned()
    }

    fn charset_of(&self, text: &str) -> Option<&'static Encoding> {
        self.patterns
            .charset
            .captures(text)
            .and_then(|caps| Encoding::for_label(caps[1].as_bytes()))
    }

    /// Parse every listing node on the page. A node that cannot produce a
    /// record is logged and skipped; one bad listing never aborts the batch.
    pub fn parse_listings(&self, html: &str) -> Vec<ListingRecord> {
        let document = Html::parse_document(html);
        let mut listings = Vec::new();

        for node in document.select(&self.selectors.node) {
            match self.parse_node(&node) {
                Some(record) => listings.push(record),
                None => warn!("failed to parse listing node, skipping"),
            }
        }

        listings
    }

    fn parse_node(&self, node: &ElementRef) -> Option<ListingRecord> {
        let metadata = self.extract_metadata(node);

        let title_link = node.select(&self.selectors.title).next()?;
        let title = collect_text(&title_link);
        if title.is_empty() {
            return None;
        }
        let house_url = self.normalize_url(title_link.value().attr("href").unwrap_or(""));

        let (layout, area_sqm, floor, total_floors, orientation) = self.extract_house_info(node);
        let (price_total_wan, unit_price) = self.extract_price_info(node);

        let agent_anchor = node.select(&self.selectors.agent).next();
        let agent_name = agent_anchor.map(|a| collect_text(&a)).unwrap_or_default();
        let agent_store_url = agent_anchor
            .and_then(|a| a.value().attr("href"))
            .map(|href| self.normalize_url(href))
            .unwrap_or_default();

        let (community, region) = self.extract_location(node);
        let tags: Vec<String> = node
            .select(&self.selectors.tags)
            .map(|span| collect_text(&span))
            .filter(|tag| !tag.is_empty())
            .collect();
        let cover_image = self.extract_cover(node);

        let (district_name, sub_district) = split_region(&region);
        let address = [community.as_str(), region.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" / ");
        let (longitude, latitude) = self.random_coordinates();

        let source_id = metadata_string(metadata.get("houseid")).unwrap_or_else(|| title.clone());
        let agent_id = metadata_string(metadata.get("agentid"));

        let (decoration, build_year) = {
            let mut rng = self.rng();
            let decoration = DECORATION_CHOICES
                .choose(&mut *rng)
                .unwrap_or(&DECORATION_CHOICES[0])
                .to_string();
            let build_year = rng.gen_range(1995..=Utc::now().year());
            (decoration, build_year)
        };

        Some(ListingRecord {
            source_id,
            title,
            house_url,
            house_type: self.house_type_of(&layout),
            layout,
            area_sqm,
            floor,
            total_floors,
            orientation: normalize_orientation(&orientation),
            price_total_wan,
            unit_price,
            agent_name,
            agent_store_url,
            agent_id,
            community,
            region,
            district_name,
            sub_district,
            address,
            tags: tags.clone(),
            cover_image,
            status: "available".to_string(),
            decoration,
            build_year,
            description: tags.join(" | "),
            longitude,
            latitude,
            city: self.cfg.city.clone(),
            data_source: DATA_SOURCE.to_string(),
            scraped_at: Utc::now(),
        })
    }

    /// Listing nodes carry a JSON blob in their `data-bg` attribute with the
    /// stable `houseid` and the posting `agentid`.
    fn extract_metadata(&self, node: &ElementRef) -> serde_json::Map<String, Value> {
        let Some(raw) = node.value().attr("data-bg") else {
            return serde_json::Map::new();
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                debug!(raw, "failed to decode listing metadata");
                serde_json::Map::new()
            }
        }
    }

    /// The `p.tel_shop` block holds pipe-separated fragments: layout, area,
    /// floor descriptor and orientation, in no fixed order.
    fn extract_house_info(
        &self,
        node: &ElementRef,
    ) -> (String, Option<f64>, String, Option<u32>, String) {
        let Some(tel_shop) = node.select(&self.selectors.tel_shop).next() else {
            return (String::new(), None, String::new(), None, String::new());
        };

        let parts: Vec<String> = tel_shop
            .text()
            .map(str::trim)
            .filter(|part| !part.is_empty() && *part != "|")
            .map(str::to_string)
            .collect();

        let layout = parts.first().cloned().unwrap_or_default();

        let area_sqm = parts
            .iter()
            .find(|part| part.contains('㎡'))
            .and_then(|part| self.patterns.area.captures(part))
            .and_then(|caps| caps[1].parse::<f64>().ok());

        let floor_part = parts
            .iter()
            .find(|part| part.contains('层'))
            .cloned()
            .unwrap_or_default();
        let total_floors = self
            .patterns
            .total_floor
            .captures(&floor_part)
            .and_then(|caps| caps[1].parse::<u32>().ok());
        let floor = floor_part
            .split('（')
            .next()
            .unwrap_or_default()
            .to_string();

        let orientation = parts
            .iter()
            .find(|part| part.ends_with('向'))
            .cloned()
            .unwrap_or_default();

        (layout, area_sqm, floor, total_floors, orientation)
    }

    fn extract_price_info(&self, node: &ElementRef) -> (Option<f64>, Option<f64>) {
        let total_price = node
            .select(&self.selectors.price_total)
            .next()
            .map(|el| collect_text(&el))
            .and_then(|text| text.parse::<f64>().ok());

        let unit_price = node
            .select(&self.selectors.price_spans)
            .nth(1)
            .map(|el| collect_text(&el))
            .and_then(|text| {
                self.patterns
                    .unit_price
                    .captures(&text)
                    .map(|caps| caps[1].replace(',', ""))
            })
            .and_then(|digits| digits.parse::<f64>().ok());

        (total_price, unit_price)
    }

    fn extract_location(&self, node: &ElementRef) -> (String, String) {
        let Some(add_shop) = node.select(&self.selectors.add_shop).next() else {
            return (String::new(), String::new());
        };

        let community = add_shop
            .select(&self.selectors.anchor)
            .next()
            .map(|a| collect_text(&a))
            .unwrap_or_default();
        let region = add_shop
            .select(&self.selectors.span)
            .next()
            .map(|span| collect_text(&span))
            .unwrap_or_default();

        (community, region)
    }

    fn extract_cover(&self, node: &ElementRef) -> String {
        let Some(image) = node.select(&self.selectors.cover).next() else {
            return String::new();
        };
        let raw = image
            .value()
            .attr("data-src")
            .or_else(|| image.value().attr("src"))
            .unwrap_or("");
        self.normalize_url(raw)
    }

    /// Protocol-relative URLs are upgraded to HTTPS, absolute URLs pass
    /// through, relative URLs resolve against the source page.
    fn normalize_url(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        if let Some(rest) = raw.strip_prefix("//") {
            return format!("https://{rest}");
        }
        if raw.starts_with("http") {
            return raw.to_string();
        }
        self.base_url
            .join(raw)
            .map(|url| url.to_string())
            .unwrap_or_default()
    }

    fn house_type_of(&self, layout: &str) -> String {
        let Some(caps) = self.patterns.rooms.captures(layout) else {
            return String::new();
        };
        match caps[1].parse::<u64>() {
            Ok(rooms) if rooms >= 5 => "5室及以上".to_string(),
            Ok(rooms) => format!("{rooms}室"),
            Err(_) => String::new(),
        }
    }

    /// The top page carries no geodata; spread listings across the city's
    /// administrative bounds instead.
    fn random_coordinates(&self) -> (f64, f64) {
        let mut rng = self.rng();
        let lon = rng.gen_range(BEIJING_LON_RANGE.0..=BEIJING_LON_RANGE.1);
        let lat = rng.gen_range(BEIJING_LAT_RANGE.0..=BEIJING_LAT_RANGE.1);
        (round6(lon), round6(lat))
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ListingScraper for FangScraper {
    async fn scrape(&self) -> Result<Vec<ListingRecord>, ScrapeError> {
        let html = self.fetch_html().await?;
        Ok(self.parse_listings(&html))
    }

    fn source_name(&self) -> &'static str {
        DATA_SOURCE
    }
}

impl Selectors {
    fn compile() -> Result<Self, ScrapeError> {
        Ok(Self {
            node: selector("dl[dataflag=\"bg\"]")?,
            title: selector("dd h4 a")?,
            tel_shop: selector("p.tel_shop")?,
            agent: selector("p.tel_shop span.people_name a")?,
            price_total: selector("dd.price_right span.red b")?,
            price_spans: selector("dd.price_right span")?,
            add_shop: selector("p.add_shop")?,
            tags: selector("p.label span")?,
            cover: selector("dt img")?,
            anchor: selector("a")?,
            span: selector("span")?,
        })
    }
}

impl Patterns {
    fn compile() -> Result<Self, ScrapeError> {
        Ok(Self {
            area: pattern(r"([\d.]+)\s*㎡")?,
            total_floor: pattern(r"共(\d+)层")?,
            unit_price: pattern(r"([\d,]+)")?,
            rooms: pattern(r"(\d+)室")?,
            charset: pattern(r#"charset=["']?([a-zA-Z0-9_\-]+)"#)?,
        })
    }
}

fn selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|_| ScrapeError::Selector(css.to_string()))
}

fn pattern(re: &str) -> Result<Regex, ScrapeError> {
    Regex::new(re).map_err(|_| ScrapeError::Pattern(re.to_string()))
}

fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::REFERER,
        HeaderValue::from_static("https://esf.fang.com/"),
    );
    headers
}

fn collect_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn metadata_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn normalize_orientation(value: &str) -> String {
    value.replace('向', "").trim().to_string()
}

fn split_region(region: &str) -> (String, String) {
    match region.split_once('-') {
        Some((district, sub)) => (district.trim().to_string(), sub.trim().to_string()),
        None => (region.to_string(), String::new()),
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
