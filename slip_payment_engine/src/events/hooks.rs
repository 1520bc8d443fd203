use std::sync::Arc;

use log::*;

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    HookResult,
    ObligationSatisfiedEvent,
    PaymentRecordedEvent,
    ReviewRequiredEvent,
};

/// The publishing side of every configured hook. Cheap to clone; the API holds one.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_recorded_producer: Vec<EventProducer<PaymentRecordedEvent>>,
    pub obligation_satisfied_producer: Vec<EventProducer<ObligationSatisfiedEvent>>,
    pub review_required_producer: Vec<EventProducer<ReviewRequiredEvent>>,
}

impl EventProducers {
    pub async fn publish_payment_recorded(&self, event: PaymentRecordedEvent) {
        for producer in &self.payment_recorded_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_obligation_satisfied(&self, event: ObligationSatisfiedEvent) {
        debug!("📬️ {} satisfied by payment #{}", event.obligation, event.payment_id);
        for producer in &self.obligation_satisfied_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_review_required(&self, event: ReviewRequiredEvent) {
        debug!("📬️ Payment #{} needs review ({:?})", event.payment_id, event.reason);
        for producer in &self.review_required_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_payment_recorded: Option<EventHandler<PaymentRecordedEvent>>,
    pub on_obligation_satisfied: Option<EventHandler<ObligationSatisfiedEvent>>,
    pub on_review_required: Option<EventHandler<ReviewRequiredEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_payment_recorded =
            hooks.on_payment_recorded.map(|f| EventHandler::new("payment_recorded", buffer_size, f));
        let on_obligation_satisfied =
            hooks.on_obligation_satisfied.map(|f| EventHandler::new("obligation_satisfied", buffer_size, f));
        let on_review_required = hooks.on_review_required.map(|f| EventHandler::new("review_required", buffer_size, f));
        Self { on_payment_recorded, on_obligation_satisfied, on_review_required }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_payment_recorded {
            result.payment_recorded_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_obligation_satisfied {
            result.obligation_satisfied_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_review_required {
            result.review_required_producer.push(handler.subscribe());
        }
        result
    }

    /// Spawns one task per configured handler. Each task ends once every producer subscribed to it is dropped.
    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_payment_recorded {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_obligation_satisfied {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_review_required {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_recorded: Option<Handler<PaymentRecordedEvent>>,
    pub on_obligation_satisfied: Option<Handler<ObligationSatisfiedEvent>>,
    pub on_review_required: Option<Handler<ReviewRequiredEvent>>,
}

impl EventHooks {
    pub fn on_payment_recorded<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentRecordedEvent) -> HookResult) + Send + Sync + 'static {
        self.on_payment_recorded = Some(Arc::new(f));
        self
    }

    pub fn on_obligation_satisfied<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ObligationSatisfiedEvent) -> HookResult) + Send + Sync + 'static {
        self.on_obligation_satisfied = Some(Arc::new(f));
        self
    }

    pub fn on_review_required<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ReviewRequiredEvent) -> HookResult) + Send + Sync + 'static {
        self.on_review_required = Some(Arc::new(f));
        self
    }
}
