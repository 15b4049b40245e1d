use roxmltree::{Document, Node};
use serde::Serialize;

use callie_core::{CallieError, Result};

pub const STAGES: [&str; 6] = ["Order Placed", "Prep", "Bake", "Quality Check", "Out for Delivery", "Delivered"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackedOrder {
    pub store_id: Option<String>,
    pub order_id: Option<String>,
    pub order_status: Option<String>,
    pub order_description: Option<String>,
    pub start_time: Option<String>,
    pub stop_time: Option<String>,
    pub driver_name: Option<String>,
    pub manager_name: Option<String>,
    pub route_module_status: Option<String>,
}

impl TrackedOrder {
    pub fn is_finished(&self) -> bool {
        matches!(self.order_status.as_deref(), Some("Complete" | "Delivered"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerReport {
    pub as_of: Option<String>,
    pub orders: Vec<TrackedOrder>,
}

impl TrackerReport {
    /// True once there is at least one order and every order is done.
    pub fn all_finished(&self) -> bool {
        !self.orders.is_empty() && self.orders.iter().all(TrackedOrder::is_finished)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderStage {
    pub stage: &'static str,
    pub index: usize,
    pub total: usize,
}

/// Stage of an order. Unknown or missing statuses read as just placed.
pub fn stage_of(order: &TrackedOrder) -> OrderStage {
    let status = order
        .route_module_status
        .as_deref()
        .or(order.order_status.as_deref());
    let index = match status {
        Some("MakeLine") => 1,
        Some("Oven") => 2,
        Some("QualCheck") => 3,
        Some("RouteLine") => 4,
        Some("Complete") => 5,
        _ => 0,
    };
    OrderStage {
        stage: STAGES[index],
        index,
        total: STAGES.len(),
    }
}

/// Parse a tracker response. Element names match case-insensitively and
/// ignore namespaces; a missing or empty field is `None`.
pub fn parse_tracker(xml: &str) -> Result<TrackerReport> {
    let doc = Document::parse(xml)
        .map_err(|e| CallieError::vendor("dominos-tracker", None, format!("bad tracker xml: {e}")))?;

    let as_of = doc
        .descendants()
        .find(|n| named(*n, "AsOf"))
        .and_then(own_text);
    let orders = doc
        .descendants()
        .filter(|n| named(*n, "OrderStatus") && n.parent().is_some_and(|p| named(p, "OrderStatuses")))
        .map(|block| TrackedOrder {
            store_id: field(block, "StoreID"),
            order_id: field(block, "OrderID"),
            order_status: field(block, "OrderStatus"),
            order_description: field(block, "OrderDescription"),
            start_time: field(block, "StartTime"),
            stop_time: field(block, "StopTime"),
            driver_name: field(block, "DriverName"),
            manager_name: field(block, "ManagerName"),
            route_module_status: field(block, "RouteModuleStatus"),
        })
        .collect();

    Ok(TrackerReport { as_of, orders })
}

fn named(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(name)
}

/// First element named `name` below `block`, not counting `block` itself.
fn field(block: Node<'_, '_>, name: &str) -> Option<String> {
    block
        .descendants()
        .skip(1)
        .find(|n| named(*n, name))
        .and_then(own_text)
}

/// Text directly inside `node`, ignoring nested elements.
fn own_text(node: Node<'_, '_>) -> Option<String> {
    let text: String = node
        .children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
