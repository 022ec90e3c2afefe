use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the services. Consumers are decoupled from the
/// request path; a send failure is logged and never fails the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PixExpired {
        order_id: Uuid,
    },
    StockDecremented {
        product_id: Uuid,
        quantity: i32,
        order_id: Uuid,
    },
    StockRestored {
        product_id: Uuid,
        quantity: i32,
        order_id: Uuid,
    },
    CheckoutStarted {
        session_id: Uuid,
    },
    CheckoutCompleted {
        session_id: Uuid,
        order_number: String,
    },
    DefaultAddressChanged {
        user_id: Uuid,
        address_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget send used on request paths; failures are logged.
    pub async fn send_logged(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Event delivery failed");
        }
    }
}

/// Consume events from the channel until all senders drop. Today this logs
/// each event; outbound integrations hang off this loop.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "event: order created");
            }
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "event: order cancelled");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "event: order status changed");
            }
            Event::PaymentStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "event: payment status changed");
            }
            Event::PixExpired { order_id } => {
                info!(%order_id, "event: pix qr code expired");
            }
            Event::StockDecremented {
                product_id,
                quantity,
                order_id,
            } => {
                info!(%product_id, quantity, %order_id, "event: stock decremented");
            }
            Event::StockRestored {
                product_id,
                quantity,
                order_id,
            } => {
                info!(%product_id, quantity, %order_id, "event: stock restored");
            }
            Event::CheckoutStarted { session_id } => {
                info!(%session_id, "event: checkout started");
            }
            Event::CheckoutCompleted {
                session_id,
                order_number,
            } => {
                info!(%session_id, %order_number, "event: checkout completed");
            }
            Event::DefaultAddressChanged {
                user_id,
                address_id,
            } => {
                info!(%user_id, %address_id, "event: default address changed");
            }
        }
    }
    info!("Event channel closed; consumer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let order_id = Uuid::new_v4();

        sender.send(Event::OrderCreated(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_logged_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        // Must not panic
        sender.send_logged(Event::OrderCancelled(Uuid::new_v4())).await;
    }
}
