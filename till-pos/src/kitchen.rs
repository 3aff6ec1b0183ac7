//! Kitchen video dispatch.
//!
//! Kitchen-video terminals subscribe to order-sent events; settle and
//! send-time paths publish every order newly marked sent. Delivery is
//! best-effort: a subscriber that went away is dropped on the next send.

use std::sync::{Arc, Mutex};

use common::serial::SerialNumber;
use tokio::sync::mpsc;
use tracing::debug;

use crate::checks::order::Order;
use crate::printer::PrinterTargetCode;
use crate::settings::Settings;

/// One order-sent notification.
#[derive(Clone, Debug)]
pub struct KitchenEvent {
    pub check_serial: SerialNumber,
    pub check_label: String,
    pub subcheck: u32,
    /// Video target the order resolved to.
    pub target: PrinterTargetCode,
    pub order: Order,
}

struct Subscriber {
    name: String,
    /// Video targets this display wants; empty means everything.
    targets: Vec<PrinterTargetCode>,
    tx: mpsc::UnboundedSender<KitchenEvent>,
}

/// Cloneable publish half; holds the subscriber table.
#[derive(Clone)]
pub struct KitchenBroadcast {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl KitchenBroadcast {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a kitchen display. `targets` filters which video codes
    /// it receives; empty receives all.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        targets: Vec<PrinterTargetCode>,
    ) -> mpsc::UnboundedReceiver<KitchenEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().expect("not poisoned").push(Subscriber {
            name: name.into(),
            targets,
            tx,
        });
        rx
    }

    /// Publishes orders newly marked sent. Each order resolves its video
    /// target through the family table; suppressed targets don't
    /// publish. Dead subscribers are pruned.
    pub fn publish_sent(
        &self,
        check_serial: SerialNumber,
        check_label: &str,
        subcheck: u32,
        orders: &[Order],
        settings: &Settings,
    ) {
        let mut subscribers = self.subscribers.lock().expect("not poisoned");
        for order in orders {
            let target = settings.family_video[order.family.index()];
            if target.is_suppressed() {
                continue;
            }
            let event = KitchenEvent {
                check_serial,
                check_label: check_label.to_owned(),
                subcheck,
                target,
                order: order.clone(),
            };
            subscribers.retain(|sub| {
                let wants = sub.targets.is_empty()
                    || sub.targets.contains(&target);
                if !wants {
                    return true;
                }
                match sub.tx.send(event.clone()) {
                    Ok(()) => true,
                    Err(_) => {
                        debug!(
                            "kitchen display '{}' went away, dropping",
                            sub.name,
                        );
                        false
                    }
                }
            });
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("not poisoned").len()
    }
}

#[cfg(test)]
mod test {
    use common::money::Money;

    use super::*;
    use crate::menu::ItemFamily;

    #[test]
    fn publishes_to_matching_subscribers_only() {
        let mut settings = Settings::default();
        // Entrees to video 1, everything else suppressed.
        settings.family_video[ItemFamily::Entree.index()] =
            PrinterTargetCode(1);

        let broadcast = KitchenBroadcast::new();
        let mut kitchen =
            broadcast.subscribe("kv1", vec![PrinterTargetCode(1)]);
        let mut other =
            broadcast.subscribe("kv2", vec![PrinterTargetCode(2)]);

        let orders = vec![
            Order::new("Steak", ItemFamily::Entree, Money::from_cents(2100)),
            Order::new("Pint", ItemFamily::Beer, Money::from_cents(600)),
        ];
        broadcast.publish_sent(
            SerialNumber::new(9).unwrap(),
            "T7",
            1,
            &orders,
            &settings,
        );

        let event = kitchen.try_recv().unwrap();
        assert_eq!(event.order.item_name, "Steak");
        assert_eq!(event.check_label, "T7");
        // Beer was suppressed, so only one event arrived.
        assert!(kitchen.try_recv().is_err());
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn dead_subscribers_are_pruned() {
        let mut settings = Settings::default();
        settings.family_video[ItemFamily::Entree.index()] =
            PrinterTargetCode(1);

        let broadcast = KitchenBroadcast::new();
        let rx = broadcast.subscribe("kv1", Vec::new());
        drop(rx);
        assert_eq!(broadcast.subscriber_count(), 1);

        let orders = vec![Order::new(
            "Steak",
            ItemFamily::Entree,
            Money::from_cents(2100),
        )];
        broadcast.publish_sent(
            SerialNumber::new(9).unwrap(),
            "T7",
            1,
            &orders,
            &settings,
        );
        assert_eq!(broadcast.subscriber_count(), 0);
    }
}
