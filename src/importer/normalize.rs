use rust_decimal::Decimal;

use crate::models::HouseStatus;

pub const HOUSE_TYPE_CHOICES: [&str; 5] = ["1室", "2室", "3室", "4室", "5室及以上"];
pub const DECORATION_CHOICES: [&str; 3] = ["精装", "简装", "毛坯"];

pub const DEFAULT_HOUSE_TYPE: &str = "1室";
pub const DEFAULT_DECORATION: &str = "精装";
pub const DEFAULT_ORIENTATION: &str = "南北";

/// Maximum stored description length, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Quantize to a fixed scale; `""`/`"null"`/absent/unparsable input becomes
/// the zero value at that scale. This is the store-boundary policy; the
/// fetcher keeps such values absent instead.
pub fn to_decimal(value: Option<&str>, decimal_places: u32) -> Decimal {
    let raw = value.map(str::trim).unwrap_or("");
    if raw.is_empty() || raw == "null" {
        return quantize(Decimal::ZERO, decimal_places);
    }
    raw.parse::<Decimal>()
        .map(|parsed| quantize(parsed, decimal_places))
        .unwrap_or_else(|_| quantize(Decimal::ZERO, decimal_places))
}

fn quantize(value: Decimal, decimal_places: u32) -> Decimal {
    let mut rounded = value.round_dp(decimal_places);
    rounded.rescale(decimal_places);
    rounded
}

/// Integer coercion with a caller-chosen default. Fractional input is
/// truncated toward zero.
pub fn to_int(value: Option<&str>, default: Option<i32>) -> Option<i32> {
    let raw = value.map(str::trim).unwrap_or("");
    if raw.is_empty() || raw == "null" {
        return default;
    }
    match raw.parse::<f64>() {
        Ok(parsed) => Some(parsed as i32),
        Err(_) => default,
    }
}

/// Snap a layout/house-type string onto the fixed category set: exact
/// choices pass through, otherwise the first integer in the string decides
/// (anything from five rooms up shares one bucket).
pub fn normalize_house_type(value: Option<&str>) -> String {
    let raw = value.map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return DEFAULT_HOUSE_TYPE.to_string();
    }
    if HOUSE_TYPE_CHOICES.contains(&raw) {
        return raw.to_string();
    }
    match first_int(raw) {
        Some(rooms) if rooms >= 5 => "5室及以上".to_string(),
        Some(rooms) => format!("{rooms}室"),
        None => DEFAULT_HOUSE_TYPE.to_string(),
    }
}

fn first_int(text: &str) -> Option<u64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        // a digit run too long for u64 is certainly >= 5 rooms
        Some(digits.parse::<u64>().unwrap_or(u64::MAX))
    }
}

pub fn normalize_orientation(value: Option<&str>) -> String {
    value
        .map(|v| v.replace('向', "").trim().to_string())
        .unwrap_or_default()
}

pub fn normalize_decoration(value: Option<&str>) -> String {
    let raw = value.map(str::trim).unwrap_or("");
    if DECORATION_CHOICES.contains(&raw) {
        raw.to_string()
    } else {
        DEFAULT_DECORATION.to_string()
    }
}

pub fn normalize_status(value: Option<&str>) -> HouseStatus {
    value
        .map(str::trim)
        .and_then(HouseStatus::parse)
        .unwrap_or(HouseStatus::Available)
}

/// Source description, a provenance note, and the raw tag list, newline
/// joined and capped.
pub fn build_description(
    description: Option<&str>,
    data_source: Option<&str>,
    house_url: Option<&str>,
    source_id: Option<&str>,
    tags: Option<&str>,
) -> String {
    let provenance = format!(
        "来源: {} | 链接: {} | ID: {}",
        data_source.unwrap_or("fang.com/top"),
        house_url.unwrap_or(""),
        source_id.unwrap_or(""),
    );

    let mut parts: Vec<&str> = Vec::new();
    if let Some(text) = description.map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(text);
    }
    parts.push(&provenance);
    if let Some(text) = tags.map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(text);
    }

    truncate_chars(&parts.join("\n"), MAX_DESCRIPTION_CHARS)
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// ASCII-only, lowercased, prefixed, length-capped username stem for
/// synthesized agents.
pub fn sanitize_username(name: &str) -> String {
    let ascii: String = name.chars().filter(char::is_ascii_alphanumeric).collect();
    let base = if ascii.is_empty() {
        "agent".to_string()
    } else {
        ascii.to_lowercase()
    };
    let capped: String = base.chars().take(12).collect();
    format!("bj_{capped}")
}
