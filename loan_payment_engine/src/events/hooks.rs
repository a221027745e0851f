use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, EventType, Handler, OutOfSyncEvent, StaleStepEvent};

/// The publishing side of the hooks. Cheap to clone; hand one to anything that raises events.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub event_producers: Vec<EventProducer<EventType>>,
    pub out_of_sync_producers: Vec<EventProducer<OutOfSyncEvent>>,
    pub stale_step_producers: Vec<EventProducer<StaleStepEvent>>,
}

impl EventProducers {
    pub async fn publish_event(&self, event: EventType) {
        for producer in &self.event_producers {
            producer.publish_event(event).await;
        }
    }

    pub async fn publish_out_of_sync(&self, event: OutOfSyncEvent) {
        for producer in &self.out_of_sync_producers {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_stale_step(&self, event: StaleStepEvent) {
        for producer in &self.stale_step_producers {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_event: Option<EventHandler<EventType>>,
    pub on_out_of_sync: Option<EventHandler<OutOfSyncEvent>>,
    pub on_stale_step: Option<EventHandler<StaleStepEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_event = hooks.on_event.map(|f| EventHandler::new(buffer_size, f));
        let on_out_of_sync = hooks.on_out_of_sync.map(|f| EventHandler::new(buffer_size, f));
        let on_stale_step = hooks.on_stale_step.map(|f| EventHandler::new(buffer_size, f));
        Self { on_event, on_out_of_sync, on_stale_step }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_event {
            result.event_producers.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_out_of_sync {
            result.out_of_sync_producers.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_stale_step {
            result.stale_step_producers.push(handler.subscribe());
        }
        result
    }

    pub fn start_handlers(self) {
        if let Some(handler) = self.on_event {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_out_of_sync {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_stale_step {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_event: Option<Handler<EventType>>,
    pub on_out_of_sync: Option<Handler<OutOfSyncEvent>>,
    pub on_stale_step: Option<Handler<StaleStepEvent>>,
}

impl EventHooks {
    /// Called for every durable event once the orchestrator has handled it.
    pub fn on_event<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(EventType) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_event = Some(Arc::new(f));
        self
    }

    pub fn on_out_of_sync<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OutOfSyncEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_out_of_sync = Some(Arc::new(f));
        self
    }

    pub fn on_stale_step<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(StaleStepEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_stale_step = Some(Arc::new(f));
        self
    }
}
