//! Named read/write handlers: the uniform control plane.
//!
//! Every element may register handlers, named attributes with a read
//! callback, a write callback, or both, during `add_handlers`. Handlers
//! live in a router-wide pool, append-only while registration runs and
//! read-only afterward, so a handler's index (`hindex`) is stable for the
//! router's life. The router installs a standard set (`name`, `class`,
//! `config`, `ports`, `handlers`) on every element; the master carries
//! process-wide global handlers.
//!
//! Invocation goes through [`Router::call_read`] and
//! [`Router::call_write`], which enter the element and hand the callback a
//! [`HandlerInfo`] naming the router and element.
//!
//! [`Router::call_read`]: crate::router::Router::call_read
//! [`Router::call_write`]: crate::router::Router::call_write

use std::sync::Arc;

use thiserror::Error;

use crate::element::Element;
use crate::report::ErrorHandler;
use crate::router::Router;

/// Handler flag bits.
pub mod flags {
    /// The handler is readable.
    pub const OP_READ: u32 = 1 << 0;
    /// The handler is writable.
    pub const OP_WRITE: u32 = 1 << 1;
    /// Reads accept a parameter string.
    pub const READ_PARAM: u32 = 1 << 2;
    /// Invocation requires exclusive access to the router.
    pub const EXCLUSIVE: u32 = 1 << 3;
    /// Values are raw bytes, not text.
    pub const RAW: u32 = 1 << 4;
    /// Reads are cheap and side-effect free.
    pub const CALM: u32 = 1 << 5;
    /// A write-only trigger; the value is irrelevant.
    pub const BUTTON: u32 = 1 << 6;
    /// The value is boolean.
    pub const CHECKBOX: u32 = 1 << 7;
    /// Front ends should not combine this handler with others.
    pub const UNCOMBINED: u32 = 1 << 8;
}

/// Failure of a handler lookup or call.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// No handler of that name on the element.
    #[error("no handler named {0:?}")]
    NoSuchHandler(String),
    /// The handler has no read callback.
    #[error("handler {0:?} not readable")]
    NotReadable(String),
    /// The handler has no write callback.
    #[error("handler {0:?} not writable")]
    NotWritable(String),
    /// The write callback rejected the value.
    #[error("{0}")]
    Rejected(String),
}

impl HandlerError {
    /// A write rejection with the given message.
    pub fn rejected(msg: impl Into<String>) -> Self {
        HandlerError::Rejected(msg.into())
    }
}

/// Identifies the element a handler call targets.
pub struct HandlerInfo<'a> {
    /// The router owning the element.
    pub router: &'a Router,
    /// The element's index ([`crate::router::ROOT`] for router handlers).
    pub eindex: usize,
}

/// Read callback: element and call info to attribute text.
pub type ReadCallback = Arc<dyn Fn(&mut dyn Element, &HandlerInfo<'_>) -> String + Send + Sync>;
/// Write callback: value, element, call info, and error handler.
pub type WriteCallback = Arc<
    dyn Fn(&str, &mut dyn Element, &HandlerInfo<'_>, &mut dyn ErrorHandler) -> Result<(), HandlerError>
        + Send
        + Sync,
>;

/// A named attribute on an element: flags plus read/write callbacks.
#[derive(Clone)]
pub struct Handler {
    name: String,
    flags: u32,
    read: Option<ReadCallback>,
    write: Option<WriteCallback>,
}

impl Handler {
    /// The handler's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handler's flag bits, including `OP_READ`/`OP_WRITE`.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// True when the handler can be read.
    pub fn readable(&self) -> bool {
        self.read.is_some()
    }

    /// True when the handler can be written.
    pub fn writable(&self) -> bool {
        self.write.is_some()
    }

    pub(crate) fn read_callback(&self) -> Option<ReadCallback> {
        self.read.clone()
    }

    pub(crate) fn write_callback(&self) -> Option<WriteCallback> {
        self.write.clone()
    }
}

/// Registers handlers into the router pool on behalf of one element.
pub struct HandlerBuilder<'a> {
    pool: &'a mut Vec<Handler>,
    list: &'a mut Vec<usize>,
}

impl<'a> HandlerBuilder<'a> {
    pub(crate) fn new(pool: &'a mut Vec<Handler>, list: &'a mut Vec<usize>) -> Self {
        HandlerBuilder { pool, list }
    }

    fn install(&mut self, handler: Handler) {
        // Re-registration under the same name replaces the element's binding;
        // the pool slot is reused so hindexes stay stable.
        if let Some(&h) = self
            .list
            .iter()
            .find(|&&h| self.pool[h].name == handler.name)
        {
            self.pool[h] = handler;
        } else {
            self.list.push(self.pool.len());
            self.pool.push(handler);
        }
    }

    /// Registers a read handler.
    pub fn add_read(
        &mut self,
        name: &str,
        flags: u32,
        read: impl Fn(&mut dyn Element, &HandlerInfo<'_>) -> String + Send + Sync + 'static,
    ) {
        self.install(Handler {
            name: name.to_owned(),
            flags: flags | flags::OP_READ,
            read: Some(Arc::new(read)),
            write: None,
        });
    }

    /// Registers a write handler.
    pub fn add_write(
        &mut self,
        name: &str,
        flags: u32,
        write: impl Fn(&str, &mut dyn Element, &HandlerInfo<'_>, &mut dyn ErrorHandler) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    ) {
        self.install(Handler {
            name: name.to_owned(),
            flags: flags | flags::OP_WRITE,
            read: None,
            write: Some(Arc::new(write)),
        });
    }

    /// Registers a handler with both callbacks.
    pub fn set_handler(
        &mut self,
        name: &str,
        flags: u32,
        read: impl Fn(&mut dyn Element, &HandlerInfo<'_>) -> String + Send + Sync + 'static,
        write: impl Fn(&str, &mut dyn Element, &HandlerInfo<'_>, &mut dyn ErrorHandler) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    ) {
        self.install(Handler {
            name: name.to_owned(),
            flags: flags | flags::OP_READ | flags::OP_WRITE,
            read: Some(Arc::new(read)),
            write: Some(Arc::new(write)),
        });
    }

    /// Registers a read handler that downcasts to the concrete element type.
    pub fn read_with<E: Element>(
        &mut self,
        name: &str,
        flags: u32,
        read: impl Fn(&E) -> String + Send + Sync + 'static,
    ) {
        self.add_read(name, flags, move |el, _| {
            let el = el
                .as_any_mut()
                .downcast_ref::<E>()
                .expect("handler registered on element of another class");
            read(el)
        });
    }

    /// Registers a write handler that downcasts to the concrete element
    /// type.
    pub fn write_with<E: Element>(
        &mut self,
        name: &str,
        flags: u32,
        write: impl Fn(&mut E, &str, &mut dyn ErrorHandler) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) {
        self.add_write(name, flags, move |value, el, _, errh| {
            let el = el
                .as_any_mut()
                .downcast_mut::<E>()
                .expect("handler registered on element of another class");
            write(el, value, errh)
        });
    }
}
