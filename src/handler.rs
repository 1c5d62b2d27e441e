//! MAD attribute handlers and the dispatch table.

use std::fmt;

use crate::device::IbDevice;
use crate::mad::{method, status, Mad};

/// Handler function return type.
///
/// `Err` carries the MAD status code to report in the reply.
pub type HandlerResult = Result<(), u16>;

/// MAD handler function.
///
/// Called with the device the MAD arrived on and the MAD itself, whose method
/// has already been rewritten to the binding's response method. The handler
/// fills in the response attribute in place. Setting the method to
/// [`method::NONE`] suppresses the reply.
pub type MadHandlerFn = Box<dyn Fn(&IbDevice, &mut Mad) -> HandlerResult + 'static>;

/// Composite key a handler is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub mgmt_class: u8,
    pub class_version: u8,
    pub method: u8,
    pub attr_id: u16,
}

impl DispatchKey {
    /// Build a key.
    pub const fn new(mgmt_class: u8, class_version: u8, method: u8, attr_id: u16) -> Self {
        Self {
            mgmt_class,
            class_version,
            method,
            attr_id,
        }
    }

    /// Extract the key of a MAD.
    #[inline]
    pub fn of(mad: &Mad) -> Self {
        Self::new(
            mad.mgmt_class(),
            mad.class_version(),
            mad.method(),
            mad.attr_id(),
        )
    }
}

/// A handler binding.
pub struct MadHandler {
    /// Key this handler answers.
    pub key: DispatchKey,

    /// Method written into the MAD before the handler runs.
    pub resp_method: u8,

    /// Handler body.
    handle: MadHandlerFn,
}

impl fmt::Debug for MadHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MadHandler")
            .field("key", &self.key)
            .field("resp_method", &format_args!("{:#04x}", self.resp_method))
            .finish()
    }
}

/// What dispatching a MAD did to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// A handler ran and succeeded.
    Handled,

    /// A handler ran and reported the given status.
    Failed(u16),

    /// No binding matched; the MAD now carries a trap.
    Unsupported,
}

/// Ordered set of handler bindings.
///
/// Assembled once at startup and never changed afterwards. Lookup scans the
/// bindings in registration order and the first match wins.
#[derive(Debug, Default)]
pub struct DispatchTable {
    handlers: Vec<MadHandler>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a binding.
    pub fn bind<F>(mut self, key: DispatchKey, resp_method: u8, handle: F) -> Self
    where
        F: Fn(&IbDevice, &mut Mad) -> HandlerResult + 'static,
    {
        if self.lookup(&key).is_some() {
            log::warn!(
                "duplicate MAD handler for {:?}, later binding is unreachable",
                key
            );
        }
        self.handlers.push(MadHandler {
            key,
            resp_method,
            handle: Box::new(handle),
        });
        self
    }

    /// Find the first binding for `key`.
    pub fn lookup(&self, key: &DispatchKey) -> Option<&MadHandler> {
        self.handlers.iter().find(|h| h.key == *key)
    }

    /// Return the number of bindings.
    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Return `true` if there is no binding.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch a MAD to its handler, rewriting it into a reply in place.
    pub fn dispatch(&self, device: &IbDevice, mad: &mut Mad) -> Dispatched {
        let Some(handler) = self.lookup(&DispatchKey::of(mad)) else {
            mad.set_method(method::TRAP);
            mad.set_status(status::UNSUPPORTED_METHOD_ATTR);
            return Dispatched::Unsupported;
        };

        mad.set_method(handler.resp_method);
        match (handler.handle)(device, mad) {
            Ok(()) => Dispatched::Handled,
            Err(code) => {
                mad.set_status(code);
                Dispatched::Failed(code)
            }
        }
    }
}
