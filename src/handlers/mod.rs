pub mod addresses;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod products;
pub mod shipping;
pub mod stock;

use crate::{
    checkout::CheckoutFlowService,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    psp::PspGateway,
    services::{
        addresses::AddressService, orders::OrderService, payments::PaymentService,
        shipping::ShippingQuoteService, stock::StockValidator,
    },
};
use std::sync::Arc;
use std::time::Duration;

/// Aggregated services used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub addresses: Arc<AddressService>,
    pub shipping: Arc<ShippingQuoteService>,
    pub stock: Arc<StockValidator>,
    pub payments: Arc<PaymentService>,
    pub checkout: Arc<CheckoutFlowService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PspGateway>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        let stock = StockValidator::new(db.clone());
        let shipping = ShippingQuoteService::new(db.clone());
        let payments = PaymentService::new(
            db.clone(),
            gateway,
            event_sender.clone(),
            Duration::from_secs(config.pix_expiration_minutes.max(1) as u64 * 60),
        );
        let addresses = AddressService::new(db.clone(), event_sender.clone());
        let orders = OrderService::new(
            db,
            stock.clone(),
            shipping.clone(),
            payments.clone(),
            event_sender.clone(),
        );
        let checkout = CheckoutFlowService::new(orders.clone(), event_sender);

        Self {
            orders: Arc::new(orders),
            addresses: Arc::new(addresses),
            shipping: Arc::new(shipping),
            stock: Arc::new(stock),
            payments: Arc::new(payments),
            checkout: Arc::new(checkout),
        }
    }
}
