//! Unofficial Dominos client: store locator, menu, order placement, and the
//! delivery tracker. US and Canadian storefronts.

mod order;
mod tracker;

pub use order::{
    detect_card_type, Address, Amounts, CardType, Customer, Item, Order, OrderResponse, Payment, PricedOrder, StatusItem,
    Validation,
};
pub use tracker::{parse_tracker, stage_of, OrderStage, TrackedOrder, TrackerReport, STAGES};

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use callie_core::{CallieError, Result};

const SERVICE: &str = "dominos";
const REFERER: &str = "https://order.dominos.com/en/pages/order/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Us,
    Ca,
}

impl Region {
    pub fn order_base(self) -> &'static str {
        match self {
            Self::Us => "https://order.dominos.com",
            Self::Ca => "https://order.dominos.ca",
        }
    }

    pub fn tracker_base(self) -> &'static str {
        "https://tracker.dominos.com"
    }

    fn source_uri(self) -> &'static str {
        match self {
            Self::Us => "order.dominos.com",
            Self::Ca => "order.dominos.ca",
        }
    }
}

impl FromStr for Region {
    type Err = CallieError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "us" => Ok(Self::Us),
            "ca" => Ok(Self::Ca),
            other => Err(CallieError::validation(format!("unknown region {other:?}; use 'us' or 'ca'"))),
        }
    }
}

// ─── Store locator ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Store {
    #[serde(rename = "StoreID")]
    pub store_id: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address_description: Option<String>,
    #[serde(default)]
    pub is_delivery_store: bool,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub is_online_now: bool,
    #[serde(default)]
    pub min_distance: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StoreLocatorResponse {
    #[serde(default)]
    stores: Vec<Store>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoreProfile {
    #[serde(rename = "StoreID")]
    pub store_id: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub street_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub is_online_now: bool,
    #[serde(default)]
    pub estimated_wait_minutes: Option<String>,
}

/// Split `street, city, region` into the locator's street and city parts.
fn split_address(address: &str) -> (String, String) {
    let mut parts = address.split(',').map(str::trim);
    let street = parts.next().unwrap_or_default().to_string();
    let city = parts.collect::<Vec<_>>().join(", ");
    (street, city)
}

// ─── Menu ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Product {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Category {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Menu {
    #[serde(default)]
    pub products: HashMap<String, Product>,
    #[serde(default)]
    pub categorization: Categorization,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Categorization {
    #[serde(default)]
    pub food_categorization: Category,
}

/// Top-level category summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub code: String,
    pub name: String,
    pub count: usize,
}

impl Menu {
    fn top_categories(&self) -> &[Category] {
        &self.categorization.food_categorization.categories
    }

    pub fn category(&self, code: &str) -> Option<&Category> {
        self.top_categories().iter().find(|c| c.code == code)
    }

    pub fn categories(&self) -> Vec<CategorySummary> {
        self.top_categories()
            .iter()
            .map(|c| CategorySummary {
                code: c.code.clone(),
                name: c.name.clone(),
                count: c.products.len(),
            })
            .collect()
    }

    /// Products whose name contains `query`, case-insensitively, sorted by code.
    pub fn search(&self, query: &str) -> Vec<(&str, &Product)> {
        let q = query.to_lowercase();
        let mut hits: Vec<(&str, &Product)> = self
            .products
            .iter()
            .filter(|(_, p)| p.name.to_lowercase().contains(&q))
            .map(|(code, p)| (code.as_str(), p))
            .collect();
        hits.sort_by_key(|(code, _)| *code);
        hits
    }
}

// ─── Client ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Dominos {
    region: Region,
    http: reqwest::Client,
    order_base: String,
    tracker_base: String,
}

impl Dominos {
    pub fn new(region: Region) -> Self {
        Self::with_bases(region, region.order_base(), region.tracker_base())
    }

    /// Client against explicit base URLs.
    pub fn with_bases(region: Region, order_base: &str, tracker_base: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            region,
            http,
            order_base: order_base.trim_end_matches('/').to_string(),
            tracker_base: tracker_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn new_order(&self) -> Order {
        Order::new(self.region.source_uri())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {url}");
        let resp = self
            .http
            .get(url)
            .header("Referer", REFERER)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| CallieError::transport(SERVICE, e))?;
        decode(resp).await
    }

    async fn post_order<T: DeserializeOwned>(&self, path: &str, order: &Order) -> Result<T> {
        let url = format!("{}/power/{path}", self.order_base);
        debug!("POST {url}");
        let resp = self
            .http
            .post(&url)
            .header("Referer", REFERER)
            .header("Accept", "application/json")
            .json(&order.envelope())
            .send()
            .await
            .map_err(|e| CallieError::transport(SERVICE, e))?;
        decode(resp).await
    }

    /// Stores serving `address` (`street, city, region`).
    pub async fn find_stores(&self, address: &str, service: &str) -> Result<Vec<Store>> {
        let (street, city) = split_address(address);
        let url = reqwest::Url::parse_with_params(
            &format!("{}/power/store-locator", self.order_base),
            &[("s", street.as_str()), ("c", city.as_str()), ("type", service)],
        )
        .map_err(|e| CallieError::validation(format!("bad locator url: {e}")))?;
        let resp: StoreLocatorResponse = self.get_json(url.as_str()).await?;
        Ok(resp.stores)
    }

    pub async fn store_profile(&self, store_id: &str) -> Result<StoreProfile> {
        self.get_json(&format!("{}/power/store/{store_id}/profile", self.order_base))
            .await
    }

    pub async fn menu(&self, store_id: &str) -> Result<Menu> {
        self.get_json(&format!(
            "{}/power/store/{store_id}/menu?lang=en&structured=true",
            self.order_base
        ))
        .await
    }

    pub async fn validate(&self, order: &Order) -> Result<Validation> {
        let resp: OrderResponse = self.post_order("validate-order", order).await?;
        Ok(Validation {
            valid: resp.status != -1,
            response: resp,
        })
    }

    pub async fn price(&self, order: &Order) -> Result<OrderResponse> {
        let resp: OrderResponse = self.post_order("price-order", order).await?;
        if resp.status == -1 {
            return Err(CallieError::vendor(
                SERVICE,
                None,
                format!("pricing failed: {}", resp.status_codes().join(", ")),
            ));
        }
        Ok(resp)
    }

    /// Submit the order. Store, items, payment, and address region must be
    /// set; otherwise nothing is sent.
    pub async fn place(&self, order: &Order) -> Result<OrderResponse> {
        order.check_ready()?;
        self.post_order("place-order", order).await
    }

    /// Active orders for a phone number.
    pub async fn track_by_phone(&self, phone: &str) -> Result<TrackerReport> {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(CallieError::validation("phone number has no digits"));
        }
        self.tracker(&format!(
            "{}/orderstorage/GetTrackerData?Phone={digits}",
            self.tracker_base
        ))
        .await
    }

    pub async fn track_by_id(&self, store_id: &str, order_key: &str) -> Result<TrackerReport> {
        self.tracker(&format!(
            "{}/orderstorage/GetTrackerData?StoreID={store_id}&OrderKey={order_key}",
            self.tracker_base
        ))
        .await
    }

    async fn tracker(&self, url: &str) -> Result<TrackerReport> {
        debug!("GET {url}");
        let resp = self
            .http
            .get(url)
            .header("Referer", REFERER)
            .send()
            .await
            .map_err(|e| CallieError::transport("dominos-tracker", e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CallieError::transport("dominos-tracker", e))?;
        if !status.is_success() {
            return Err(CallieError::vendor("dominos-tracker", Some(status.as_u16()), body));
        }
        parse_tracker(&body)
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("error");
        return Err(CallieError::vendor(SERVICE, Some(status.as_u16()), reason));
    }
    resp.json::<T>()
        .await
        .map_err(|e| CallieError::vendor(SERVICE, Some(status.as_u16()), format!("bad response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parsing() {
        assert_eq!("CA".parse::<Region>().unwrap(), Region::Ca);
        assert_eq!("us".parse::<Region>().unwrap(), Region::Us);
        let err = "uk".parse::<Region>().unwrap_err();
        assert_eq!(err.kind(), callie_core::ErrorKind::Validation);
    }

    #[test]
    fn address_split() {
        assert_eq!(
            split_address("20690 40 Ave, Langley, BC"),
            ("20690 40 Ave".to_string(), "Langley, BC".to_string())
        );
        assert_eq!(split_address("Main St"), ("Main St".to_string(), String::new()));
    }

    #[test]
    fn locator_response_decodes() {
        let json = r#"{"Status":0,"Stores":[{"StoreID":"10090","Phone":"604-555-0100","AddressDescription":"20690 40 Ave\nLangley, BC","IsDeliveryStore":true,"IsOpen":true,"IsOnlineNow":true,"MinDistance":1.2}]}"#;
        let r: StoreLocatorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(r.stores.len(), 1);
        assert_eq!(r.stores[0].store_id, "10090");
        assert!(r.stores[0].is_delivery_store);
        assert_eq!(r.stores[0].min_distance, Some(1.2));
    }

    fn sample_menu() -> Menu {
        serde_json::from_str(
            r#"{
            "Products": {
                "S_PIZZA": {"Code":"S_PIZZA","Name":"Hand Tossed Pizza","ProductType":"Pizza","Variants":["14SCREEN","12SCREEN"]},
                "S_PIZZPH": {"Code":"S_PIZZPH","Name":"Philly Cheese Steak Pizza","ProductType":"Pizza"},
                "F_GARLICDIP": {"Code":"F_GARLICDIP","Name":"Garlic Dipping Cup","ProductType":"Sides"}
            },
            "Categorization": {"FoodCategorization": {"Code":"Food","Categories":[
                {"Code":"Pizza","Name":"Pizza","Products":["S_PIZZA","S_PIZZPH"],"Categories":[]},
                {"Code":"Sides","Name":"Extras","Products":["F_GARLICDIP"]}
            ]}}
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn menu_search_is_case_insensitive() {
        let menu = sample_menu();
        let hits: Vec<&str> = menu.search("PIZZA").into_iter().map(|(c, _)| c).collect();
        assert_eq!(hits, vec!["S_PIZZA", "S_PIZZPH"]);
        assert!(menu.search("burrito").is_empty());
    }

    #[test]
    fn menu_categories() {
        let menu = sample_menu();
        assert_eq!(
            menu.categories(),
            vec![
                CategorySummary { code: "Pizza".into(), name: "Pizza".into(), count: 2 },
                CategorySummary { code: "Sides".into(), name: "Extras".into(), count: 1 },
            ]
        );
        assert_eq!(menu.category("Sides").unwrap().products, vec!["F_GARLICDIP"]);
        assert!(menu.category("Drinks").is_none());
    }

    #[test]
    fn new_order_uses_region_source() {
        let order = Dominos::new(Region::Ca).new_order();
        let json = serde_json::to_value(order.envelope()).unwrap();
        assert_eq!(json["Order"]["SourceOrganizationURI"], "order.dominos.ca");
    }

    #[tokio::test]
    async fn place_rejects_incomplete_order_before_sending() {
        // Unroutable base: a request would fail as a transport error, not validation.
        let client = Dominos::with_bases(Region::Ca, "http://127.0.0.1:9", "http://127.0.0.1:9");
        let err = client.place(&client.new_order()).await.unwrap_err();
        assert_eq!(err.kind(), callie_core::ErrorKind::Validation);
    }
}
