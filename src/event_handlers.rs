/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Registry of the closures invoked when a chain state [event](crate::events) happens.

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) flush_coins_handlers: Vec<HandlerPtr<FlushCoinsEvent>>,
    pub(crate) update_tip_handlers: Vec<HandlerPtr<UpdateTipEvent>>,
    pub(crate) batch_write_handlers: Vec<HandlerPtr<BatchWriteEvent>>,
    pub(crate) load_block_index_handlers: Vec<HandlerPtr<LoadBlockIndexEvent>>,
    pub(crate) invalidate_block_handlers: Vec<HandlerPtr<InvalidateBlockEvent>>,
}

impl EventHandlers {
    /// Collect the user's handlers, preceded by the default loggers if `log_events` is set.
    pub(crate) fn new(
        log_events: bool,
        flush_coins_handler: Option<HandlerPtr<FlushCoinsEvent>>,
        update_tip_handler: Option<HandlerPtr<UpdateTipEvent>>,
        batch_write_handler: Option<HandlerPtr<BatchWriteEvent>>,
        load_block_index_handler: Option<HandlerPtr<LoadBlockIndexEvent>>,
        invalidate_block_handler: Option<HandlerPtr<InvalidateBlockEvent>>,
    ) -> EventHandlers {
        let mut handlers = EventHandlers::default();

        if log_events {
            handlers.flush_coins_handlers.push(FlushCoinsEvent::get_logger());
            handlers.update_tip_handlers.push(UpdateTipEvent::get_logger());
            handlers.batch_write_handlers.push(BatchWriteEvent::get_logger());
            handlers
                .load_block_index_handlers
                .push(LoadBlockIndexEvent::get_logger());
            handlers
                .invalidate_block_handlers
                .push(InvalidateBlockEvent::get_logger());
        }

        handlers.flush_coins_handlers.extend(flush_coins_handler);
        handlers.update_tip_handlers.extend(update_tip_handler);
        handlers.batch_write_handlers.extend(batch_write_handler);
        handlers
            .load_block_index_handlers
            .extend(load_block_index_handler);
        handlers
            .invalidate_block_handlers
            .extend(invalidate_block_handler);

        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.flush_coins_handlers.is_empty()
            && self.update_tip_handlers.is_empty()
            && self.batch_write_handlers.is_empty()
            && self.load_block_index_handlers.is_empty()
            && self.invalidate_block_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::FlushCoins(flush_coins_event) => self
                .flush_coins_handlers
                .iter()
                .for_each(|handler| handler(&flush_coins_event)),

            Event::UpdateTip(update_tip_event) => self
                .update_tip_handlers
                .iter()
                .for_each(|handler| handler(&update_tip_event)),

            Event::BatchWrite(batch_write_event) => self
                .batch_write_handlers
                .iter()
                .for_each(|handler| handler(&batch_write_event)),

            Event::LoadBlockIndex(load_block_index_event) => self
                .load_block_index_handlers
                .iter()
                .for_each(|handler| handler(&load_block_index_event)),

            Event::InvalidateBlock(invalidate_block_event) => self
                .invalidate_block_handlers
                .iter()
                .for_each(|handler| handler(&invalidate_block_event)),
        }
    }
}
