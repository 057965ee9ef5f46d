//! Call context threaded through build, instantiation and boundary calls.
//!
//! Carries the engine handle and the cancellation flag. There is no global
//! state anywhere in the runtime; everything reaches the engine through a
//! `Context` passed explicitly.

use crate::engine::CoreEngine;
use crate::prelude::*;

struct ContextInner {
    engine: Rc<dyn CoreEngine>,
    cancelled: Cell<bool>,
    next_instance_id: Cell<u64>,
}

/// Shared call context.
///
/// Cheap to clone; clones share the cancellation flag and the instance id
/// counter. A cancellation signal aborts the next descent into the engine;
/// partial side effects are not rolled back.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    /// Create a context around an engine handle
    pub fn new(engine: Rc<dyn CoreEngine>) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                engine,
                cancelled: Cell::new(false),
                next_instance_id: Cell::new(0),
            }),
        }
    }

    /// The engine handle
    pub fn engine(&self) -> &Rc<dyn CoreEngine> {
        &self.inner.engine
    }

    /// Request cancellation of the current call chain
    pub fn cancel(&self) {
        self.inner.cancelled.set(true);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Error out if cancellation has been requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled("call chain cancelled"))
        } else {
            Ok(())
        }
    }

    /// Allocate the next instance id
    pub(crate) fn next_instance_id(&self) -> u64 {
        let id = self.inner.next_instance_id.get();
        self.inner.next_instance_id.set(id + 1);
        id
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
