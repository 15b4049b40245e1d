use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use callie_core::{CallieError, Result};

static CARD_PATTERNS: LazyLock<Vec<(CardType, Regex)>> = LazyLock::new(|| {
    [
        (CardType::Visa, r"^4[0-9]{12}(?:[0-9]{3})?$"),
        (CardType::Mastercard, r"^5[1-5][0-9]{14}$"),
        (CardType::Amex, r"^3[47][0-9]{13}$"),
        (CardType::Diners, r"^3(?:0[0-5]|[68][0-9])[0-9]{11}$"),
        (CardType::Discover, r"^6(?:011|5[0-9]{2})[0-9]{12}$"),
    ]
    .into_iter()
    .map(|(t, re)| (t, Regex::new(re).unwrap()))
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CardType {
    Visa,
    Mastercard,
    Amex,
    Diners,
    Discover,
}

/// Card network for a number; separators are ignored.
pub fn detect_card_type(number: &str) -> Option<CardType> {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    CARD_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(&digits))
        .map(|(t, _)| *t)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payment {
    #[serde(rename = "Type")]
    kind: &'static str,
    pub amount: f64,
    pub tip_amount: f64,
    number: String,
    pub card_type: CardType,
    expiration: String,
    security_code: String,
    postal_code: String,
}

impl Payment {
    /// Card payment. Unrecognized card numbers are rejected here, before
    /// any order is sent.
    pub fn card(number: &str, expiration: &str, cvv: &str, postal_code: &str) -> Result<Self> {
        let card_type = detect_card_type(number).ok_or_else(|| {
            CallieError::validation("unrecognized card number; supported: VISA, MASTERCARD, AMEX, DINERS, DISCOVER")
        })?;
        Ok(Self {
            kind: "CreditCard",
            amount: 0.0,
            tip_amount: 0.0,
            number: number.chars().filter(char::is_ascii_digit).collect(),
            card_type,
            expiration: expiration.chars().filter(char::is_ascii_digit).collect(),
            security_code: cvv.to_string(),
            postal_code: postal_code.to_string(),
        })
    }

    pub fn with_amount(mut self, amount: f64, tip: f64) -> Self {
        self.amount = amount;
        self.tip_amount = tip;
        self
    }
}

/// One product line. Toppings map code → {portion → amount}, where portion
/// is `1/1` (whole), `1/2` (left) or `2/2` (right) and amount is `0`, `1`,
/// `1.5` or `2`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Qty")]
    pub qty: u32,
    #[serde(rename = "Options")]
    pub options: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(rename = "isNew")]
    is_new: bool,
}

impl Item {
    pub fn new(code: impl Into<String>, qty: u32) -> Self {
        Self {
            code: code.into(),
            qty,
            options: BTreeMap::new(),
            is_new: true,
        }
    }

    pub fn topping(mut self, code: &str, portion: &str, amount: &str) -> Self {
        self.options
            .insert(code.to_string(), BTreeMap::from([(portion.to_string(), amount.to_string())]));
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(rename = "Type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Address {
    pub fn house(street: &str, city: &str, region: &str, postal_code: &str) -> Self {
        Self {
            street: Some(street.into()),
            city: Some(city.into()),
            region: Some(region.into()),
            postal_code: Some(postal_code.into()),
            kind: Some("House".into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Coupon {
    code: String,
    qty: u32,
}

#[derive(Debug, Clone, Serialize)]
struct MetaData {
    #[serde(rename = "calculateNutrition")]
    calculate_nutrition: bool,
}

/// Order under construction, serialized in the storefront's wire shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Order {
    address: Address,
    coupons: Vec<Coupon>,
    #[serde(rename = "CustomerID")]
    customer_id: String,
    extension: String,
    order_channel: &'static str,
    #[serde(rename = "OrderID")]
    order_id: String,
    no_combine: bool,
    order_method: &'static str,
    order_taker: Option<String>,
    products: Vec<Item>,
    payments: Vec<Payment>,
    service_method: String,
    #[serde(rename = "SourceOrganizationURI")]
    source_organization_uri: &'static str,
    version: &'static str,
    language_code: &'static str,
    partners: BTreeMap<String, String>,
    new_user: bool,
    #[serde(rename = "metaData")]
    meta_data: MetaData,
    #[serde(rename = "StoreID", skip_serializing_if = "Option::is_none")]
    store_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    future_order_time: Option<String>,
}

#[derive(Serialize)]
pub(super) struct Envelope<'a> {
    #[serde(rename = "Order")]
    order: &'a Order,
}

impl Order {
    pub(super) fn new(source_organization_uri: &'static str) -> Self {
        Self {
            address: Address::default(),
            coupons: Vec::new(),
            customer_id: String::new(),
            extension: String::new(),
            order_channel: "OLO",
            order_id: String::new(),
            no_combine: true,
            order_method: "Web",
            order_taker: None,
            products: Vec::new(),
            payments: Vec::new(),
            service_method: "Delivery".into(),
            source_organization_uri,
            version: "1.0",
            language_code: "en",
            partners: BTreeMap::new(),
            new_user: true,
            meta_data: MetaData {
                calculate_nutrition: true,
            },
            store_id: None,
            first_name: None,
            last_name: None,
            email: None,
            phone: None,
            future_order_time: None,
        }
    }

    pub(super) fn envelope(&self) -> Envelope<'_> {
        Envelope { order: self }
    }

    pub fn address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    pub fn store(mut self, store_id: impl Into<String>) -> Self {
        self.store_id = Some(store_id.into());
        self
    }

    pub fn customer(mut self, c: Customer) -> Self {
        self.first_name = Some(c.first_name);
        self.last_name = Some(c.last_name);
        self.email = Some(c.email);
        self.phone = Some(c.phone);
        self
    }

    /// `Delivery` (default) or `Carryout`.
    pub fn service_method(mut self, method: impl Into<String>) -> Self {
        self.service_method = method.into();
        self
    }

    pub fn item(mut self, item: Item) -> Self {
        self.products.push(item);
        self
    }

    pub fn coupon(mut self, code: impl Into<String>) -> Self {
        self.coupons.push(Coupon {
            code: code.into(),
            qty: 1,
        });
        self
    }

    /// Replaces any earlier payment.
    pub fn payment(mut self, payment: Payment) -> Self {
        self.payments = vec![payment];
        self
    }

    /// Schedule for `at`, which must be after `now`.
    pub fn order_at(mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self> {
        if at <= now {
            return Err(CallieError::validation("order time must be in the future"));
        }
        self.future_order_time = Some(at.format("%Y-%m-%d %H:%M:%S").to_string());
        Ok(self)
    }

    pub fn order_now(mut self) -> Self {
        self.future_order_time = None;
        self
    }

    pub fn products(&self) -> &[Item] {
        &self.products
    }

    pub fn store_id(&self) -> Option<&str> {
        self.store_id.as_deref()
    }

    pub(super) fn check_ready(&self) -> Result<()> {
        if self.store_id.is_none() {
            return Err(CallieError::validation("store id required before placing order"));
        }
        if self.products.is_empty() {
            return Err(CallieError::validation("order must contain items"));
        }
        if self.payments.is_empty() {
            return Err(CallieError::validation("payment required before placing order"));
        }
        if self.address.region.as_deref().is_none_or(str::is_empty) {
            return Err(CallieError::validation("address region required before placing order"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusItem {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Amounts {
    #[serde(default)]
    pub customer: Option<f64>,
    #[serde(default)]
    pub tax: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PricedOrder {
    #[serde(rename = "OrderID", default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amounts: Option<Amounts>,
    #[serde(default)]
    pub estimated_wait_minutes: Option<String>,
}

/// Response of validate, price and place.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderResponse {
    pub status: i32,
    #[serde(default)]
    pub status_items: Vec<StatusItem>,
    #[serde(default)]
    pub order: Option<PricedOrder>,
}

impl OrderResponse {
    pub fn status_codes(&self) -> Vec<&str> {
        self.status_items.iter().map(|s| s.code.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Validation {
    pub valid: bool,
    pub response: OrderResponse,
}
