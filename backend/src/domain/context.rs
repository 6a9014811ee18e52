//! Request and job context.
//!
//! A [`Ctx`] is passed explicitly down the call graph. It carries a
//! cancellation flag shared with its ancestors, whether the work serves an
//! HTTP request, and the ambient transaction, if one is open.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::cancellation::Canceled;
use crate::domain::transaction::TxHandle;

#[derive(Debug, Default)]
struct CancelNode {
    canceled: AtomicBool,
    parent: Option<Arc<CancelNode>>,
}

impl CancelNode {
    fn is_canceled(&self) -> bool {
        let mut node = Some(self);
        while let Some(current) = node {
            if current.canceled.load(Ordering::Acquire) {
                return true;
            }
            node = current.parent.as_deref();
        }
        false
    }
}

/// Explicit context threaded through handlers and data access.
///
/// Cloning shares the cancellation flag and the transaction handle.
///
/// # Examples
/// ```
/// use starter::domain::Ctx;
///
/// let request = Ctx::http();
/// let step = request.child();
/// request.cancel();
/// assert!(step.is_canceled());
/// assert!(step.is_http());
/// ```
#[derive(Clone, Default)]
pub struct Ctx {
    cancel: Arc<CancelNode>,
    http: bool,
    transaction: Option<TxHandle>,
}

impl Ctx {
    /// Context for background work.
    pub fn background() -> Self {
        Self::default()
    }

    /// Context for serving one HTTP request.
    pub fn http() -> Self {
        Self {
            http: true,
            ..Self::default()
        }
    }

    /// Whether this context serves an HTTP request.
    pub fn is_http(&self) -> bool {
        self.http
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.canceled.store(true, Ordering::Release);
    }

    /// Whether this context or any ancestor was canceled.
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Fail with [`Canceled`] once the context is canceled.
    pub fn ensure_active(&self) -> Result<(), Canceled> {
        if self.is_canceled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }

    /// Derive a context that can be canceled on its own. Cancelling the
    /// parent still cancels the child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: Arc::new(CancelNode {
                canceled: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.cancel)),
            }),
            http: self.http,
            transaction: self.transaction.clone(),
        }
    }

    /// Guard that cancels this context when dropped.
    #[must_use = "the context is canceled as soon as the guard is dropped"]
    pub fn cancel_on_drop(&self) -> CancelGuard {
        CancelGuard {
            node: Arc::clone(&self.cancel),
        }
    }

    /// Carry `handle` as the ambient transaction.
    #[must_use]
    pub fn with_transaction(mut self, handle: TxHandle) -> Self {
        self.transaction = Some(handle);
        self
    }

    /// Ambient transaction, if any.
    pub fn transaction(&self) -> Option<&TxHandle> {
        self.transaction.as_ref()
    }
}

impl fmt::Debug for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("http", &self.http)
            .field("canceled", &self.is_canceled())
            .field("transaction", &self.transaction.is_some())
            .finish()
    }
}

/// Cancels the context it came from on drop.
#[derive(Debug)]
pub struct CancelGuard {
    node: Arc<CancelNode>,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.node.canceled.store(true, Ordering::Release);
    }
}
