//! Batching and formatting: group claimed deliveries by recipient and render
//! a bounded-length message body from the associated notification content.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use herald_common::types::{Delivery, Notification};

/// Maximum rendered message length. The platform's hard limit is 2000
/// characters; 1900 leaves headroom for the mention prefix and joins.
pub const MAX_MESSAGE_LEN: usize = 1900;

/// Group claimed deliveries by recipient username. A `BTreeMap` keeps the
/// recipient enumeration order deterministic across passes.
pub fn group_by_recipient(deliveries: Vec<Delivery>) -> BTreeMap<String, Vec<Delivery>> {
    let mut groups: BTreeMap<String, Vec<Delivery>> = BTreeMap::new();
    for delivery in deliveries {
        groups.entry(delivery.username.clone()).or_default().push(delivery);
    }
    groups
}

/// Render one `• [title] — summary` line per delivery, skipping any delivery
/// whose notification content cannot be resolved.
pub fn render_lines(
    deliveries: &[Delivery],
    notifications: &HashMap<Uuid, Notification>,
) -> Vec<String> {
    deliveries
        .iter()
        .filter_map(|d| notifications.get(&d.notification_id))
        .map(|n| format!("• [{}] — {}", n.title, n.summary))
        .collect()
}

/// Join the mention prefix and lines into a single message body, truncated to
/// [`MAX_MESSAGE_LEN`]. Lines dropped by truncation are accepted content loss:
/// their deliveries are still marked delivered with the batch's message id.
pub fn compose(mention: &str, lines: &[String]) -> String {
    let mut content = format!("{}\n{}", mention, lines.join("\n"));
    if content.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
    }
    content
}
