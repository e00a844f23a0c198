//! Scroll coordinator
//!
//! After an expansion that affects the focus, the focused row is scrolled
//! into view once rendering has had time to settle. Requests are debounced:
//! a newer request within the delay replaces the older one.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::debounce::Debouncer;

/// Rendering surface the tree is drawn on
pub trait Viewport: Send + Sync {
    /// Top edge of a rendered row relative to the viewport, if rendered
    fn element_top(&self, node_id: &str) -> Option<f64>;

    fn viewport_height(&self) -> f64;

    fn scroll_into_view(&self, node_id: &str);
}

/// What a scroll request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    Scrolled,
    AlreadyVisible,
    /// Target row was not rendered when the delay elapsed
    NotRendered,
    /// A newer request replaced this one
    Superseded,
}

pub struct ScrollCoordinator {
    viewport: Arc<dyn Viewport>,
    debouncer: Debouncer,
}

impl ScrollCoordinator {
    pub fn new(viewport: Arc<dyn Viewport>, delay: Duration) -> Self {
        Self {
            viewport,
            debouncer: Debouncer::new(delay),
        }
    }

    /// Scroll `target` into view after the delay unless superseded
    pub async fn request_scroll(&self, target: &str) -> ScrollOutcome {
        if !self.debouncer.settle().await {
            return ScrollOutcome::Superseded;
        }

        let Some(top) = self.viewport.element_top(target) else {
            debug!(node_id = %target, "Scroll target not rendered");
            return ScrollOutcome::NotRendered;
        };

        if top < 0.0 || top > self.viewport.viewport_height() {
            debug!(node_id = %target, top = top, "Scrolling row into view");
            self.viewport.scroll_into_view(target);
            ScrollOutcome::Scrolled
        } else {
            ScrollOutcome::AlreadyVisible
        }
    }

    /// Fire-and-forget variant used by tree controllers
    pub fn schedule(self: &Arc<Self>, target: impl Into<String>) -> JoinHandle<ScrollOutcome> {
        let coordinator = Arc::clone(self);
        let target = target.into();
        tokio::spawn(async move { coordinator.request_scroll(&target).await })
    }
}
