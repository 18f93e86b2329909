//! Ordered middleware chains.
//!
//! Each facade view ([`App`](crate::App) or [`Group`](crate::Group)) owns
//! one [`Chain`]. Routes registered through a view keep a handle to that
//! view's chain and read it when a request arrives, so middleware added
//! after a route still runs for it. Creating a group forks the chain: the
//! group starts with a copy of the parent's list and the two evolve
//! independently from then on.
//!
//! Reads happen on every request and never block: the list lives behind an
//! [`ArcSwap`] and writers replace it wholesale.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::context::Context;
use crate::handler::{BoxedHandler, ErrorHandler};

#[derive(Clone)]
pub(crate) struct Chain {
    handlers: Arc<ArcSwap<Vec<BoxedHandler>>>,
}

impl Chain {
    pub(crate) fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    fn from_vec(handlers: Vec<BoxedHandler>) -> Self {
        Self { handlers: Arc::new(ArcSwap::from_pointee(handlers)) }
    }

    pub(crate) fn push(&self, handler: BoxedHandler) {
        self.handlers.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&handler));
            next
        });
    }

    pub(crate) fn clear(&self) {
        self.handlers.store(Arc::new(Vec::new()));
    }

    /// An independent chain starting from this one's current list.
    pub(crate) fn fork(&self) -> Self {
        Self::from_vec(self.handlers.load().iter().cloned().collect())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.handlers.load().len()
    }

    /// Runs every middleware in registration order, then `terminal`.
    ///
    /// The first `Err` goes to `on_error` and ends the request: nothing
    /// after the failing handler runs.
    pub(crate) async fn run(
        &self,
        ctx: &mut Context,
        terminal: &BoxedHandler,
        on_error: &dyn ErrorHandler,
    ) {
        let middleware = self.handlers.load_full();
        for handler in middleware.iter().chain(std::iter::once(terminal)) {
            if let Err(err) = handler.call(ctx).await {
                on_error.handle(ctx, err);
                return;
            }
        }
    }
}
