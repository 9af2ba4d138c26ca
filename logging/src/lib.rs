//! Typed, buffered event logging.
//!
//! A [`Registry`] maps stream names to typed [`Logger`] handles. Each logger
//! buffers `(Duration, T)` pairs, where the duration is measured against an
//! instant common to the whole registry, and flushes full batches to an
//! installed action. Loggers are thread-local by design: every driver thread
//! owns its own registry, so actions see one stream of events with
//! non-decreasing timestamps.

#![forbid(missing_docs)]

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A map from names to typed loggers sharing a common start instant.
pub struct Registry {
    /// An instant common to all logging statements.
    time: Instant,
    /// A map from names to typed loggers, retained for `get`, plus a
    /// type-erased flush handle for `flush`.
    map: HashMap<String, (Box<dyn Any>, Box<dyn Flush>)>,
}

impl Registry {
    /// Creates a new logger registry starting its clock now.
    pub fn new() -> Self {
        Registry {
            time: Instant::now(),
            map: HashMap::new(),
        }
    }

    /// Binds a log name to an action on log event batches.
    ///
    /// The action sees batches of events with non-decreasing timestamps,
    /// together with a timestamp lower-bounding any event yet to come.
    /// Returns any previously installed logger under this name; existing
    /// handles to it keep their old destination.
    pub fn insert<T: 'static, F: Fn(&Duration, &mut Vec<(Duration, T)>) + 'static>(
        &mut self,
        name: &str,
        action: F,
    ) -> Option<Box<dyn Any>> {
        let logger = Logger::<T>::new(self.time, action);
        self.insert_logger(name, logger)
    }

    /// Binds a log name to an already constructed logger.
    pub fn insert_logger<T: 'static>(&mut self, name: &str, logger: Logger<T>) -> Option<Box<dyn Any>> {
        self.map
            .insert(name.to_owned(), (Box::new(logger.clone()), Box::new(logger)))
            .map(|(any, _)| any)
    }

    /// Removes a bound logger, closing its stream once outstanding handles drop.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name).map(|(any, _)| any)
    }

    /// Retrieves a shared logger, if one has been inserted under `name` with
    /// event type `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map
            .get(name)
            .and_then(|(entry, _)| entry.downcast_ref::<Logger<T>>())
            .cloned()
    }

    /// Flushes every registered logger.
    pub fn flush(&mut self) {
        for (_, flush) in self.map.values() {
            flush.flush();
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Types that can flush buffered events.
trait Flush {
    fn flush(&self);
}

/// A buffering logger for events of type `T`.
pub struct Logger<T> {
    inner: Rc<RefCell<LoggerInner<T>>>,
    time: Instant,
}

struct LoggerInner<T> {
    action: Box<dyn Fn(&Duration, &mut Vec<(Duration, T)>)>,
    buffer: Vec<(Duration, T)>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger {
            inner: Rc::clone(&self.inner),
            time: self.time,
        }
    }
}

impl<T> Logger<T> {
    const BUFFER_CAPACITY: usize = 1024;

    /// Allocates a new shareable logger bound to a write destination.
    pub fn new<F: Fn(&Duration, &mut Vec<(Duration, T)>) + 'static>(time: Instant, action: F) -> Self {
        Logger {
            inner: Rc::new(RefCell::new(LoggerInner {
                action: Box::new(action),
                buffer: Vec::with_capacity(Self::BUFFER_CAPACITY),
            })),
            time,
        }
    }

    /// Logs an event.
    ///
    /// The timestamp is taken at the moment of logging; delivery may be
    /// delayed until the buffer fills or [`Logger::flush`] is called.
    pub fn log(&self, event: T) {
        let elapsed = self.time.elapsed();
        let mut inner = self.inner.borrow_mut();
        inner.buffer.push((elapsed, event));
        if inner.buffer.len() == inner.buffer.capacity() {
            let LoggerInner { action, buffer } = &mut *inner;
            (action)(&elapsed, buffer);
            buffer.clear();
        }
    }

    /// Logs several events with a common timestamp.
    pub fn log_many<I: IntoIterator<Item = T>>(&self, events: I) {
        let elapsed = self.time.elapsed();
        let mut inner = self.inner.borrow_mut();
        for event in events {
            inner.buffer.push((elapsed, event));
        }
        if inner.buffer.len() >= inner.buffer.capacity() {
            let LoggerInner { action, buffer } = &mut *inner;
            (action)(&elapsed, buffer);
            buffer.clear();
        }
    }

    /// Flushes buffered events and communicates the new minimal timestamp.
    pub fn flush(&self) {
        let elapsed = self.time.elapsed();
        let mut inner = self.inner.borrow_mut();
        let LoggerInner { action, buffer } = &mut *inner;
        (action)(&elapsed, buffer);
        buffer.clear();
    }
}

impl<T> Flush for Logger<T> {
    fn flush(&self) {
        Logger::flush(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = Registry::new();
        let sink = Rc::clone(&seen);
        registry.insert::<u32, _>("events", move |_, batch| {
            sink.borrow_mut().extend(batch.iter().map(|(_, e)| *e));
        });

        let logger = registry.get::<u32>("events").expect("registered");
        logger.log(1);
        logger.log_many([2, 3]);
        assert!(seen.borrow().is_empty());
        registry.flush();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn typed_lookup_misses() {
        let mut registry = Registry::new();
        registry.insert::<u32, _>("events", |_, _| {});
        assert!(registry.get::<String>("events").is_none());
        assert!(registry.get::<u32>("absent").is_none());
        registry.remove("events");
        assert!(registry.get::<u32>("events").is_none());
    }
}
