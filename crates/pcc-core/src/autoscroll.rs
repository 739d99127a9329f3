//! Tail-follow policy for log viewports.
//!
//! A viewport that sits at (or within `slack` units of) the bottom before new
//! content lands is pinned to the new bottom afterwards. A viewport the
//! operator has scrolled up is left where it is.

pub const DEFAULT_SLACK: i64 = 50;

/// Slack for viewports measured in terminal rows. 50 display pixels is two to
/// three rows of log text.
pub const DEFAULT_ROW_SLACK: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportGeometry {
    pub scroll_top: i64,
    pub client_height: i64,
    pub scroll_height: i64,
}

impl ViewportGeometry {
    /// Distance between the bottom edge of the visible area and the end of
    /// content. Negative when the content is shorter than the viewport.
    pub fn distance_to_bottom(&self) -> i64 {
        self.scroll_height - self.client_height - self.scroll_top
    }

    pub fn max_scroll_top(&self) -> i64 {
        (self.scroll_height - self.client_height).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDecision {
    PinToBottom,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoscrollPolicy {
    pub slack: i64,
}

impl Default for AutoscrollPolicy {
    fn default() -> Self {
        Self {
            slack: DEFAULT_SLACK,
        }
    }
}

impl AutoscrollPolicy {
    pub fn new(slack: i64) -> Self {
        Self { slack }
    }

    pub fn decide(&self, before: ViewportGeometry) -> ScrollDecision {
        if before.distance_to_bottom() <= self.slack {
            ScrollDecision::PinToBottom
        } else {
            ScrollDecision::Keep
        }
    }
}

/// Scroll state for one log pane, measured in display rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    geometry: ViewportGeometry,
}

impl Viewport {
    pub fn new(client_height: i64) -> Self {
        Self {
            geometry: ViewportGeometry {
                scroll_top: 0,
                client_height,
                scroll_height: 0,
            },
        }
    }

    pub fn geometry(&self) -> ViewportGeometry {
        self.geometry
    }

    pub fn scroll_top(&self) -> i64 {
        self.geometry.scroll_top
    }

    /// Runs the policy against the geometry as it stood before the mutation,
    /// then lays out the new content height and applies the decision.
    pub fn after_mutation(
        &mut self,
        policy: &AutoscrollPolicy,
        new_scroll_height: i64,
    ) -> ScrollDecision {
        let decision = policy.decide(self.geometry);
        self.geometry.scroll_height = new_scroll_height.max(0);
        match decision {
            ScrollDecision::PinToBottom => {
                self.geometry.scroll_top = self.geometry.max_scroll_top();
            }
            ScrollDecision::Keep => {
                self.geometry.scroll_top = self.geometry.scroll_top.min(self.geometry.max_scroll_top());
            }
        }
        decision
    }

    /// A resize keeps a tailing viewport tailing.
    pub fn resize(&mut self, policy: &AutoscrollPolicy, client_height: i64) {
        let decision = policy.decide(self.geometry);
        self.geometry.client_height = client_height.max(0);
        if decision == ScrollDecision::PinToBottom {
            self.geometry.scroll_top = self.geometry.max_scroll_top();
        } else {
            self.geometry.scroll_top = self.geometry.scroll_top.min(self.geometry.max_scroll_top());
        }
    }

    pub fn scroll_by(&mut self, delta: i64) {
        let next = self.geometry.scroll_top.saturating_add(delta);
        self.geometry.scroll_top = next.clamp(0, self.geometry.max_scroll_top());
    }

    pub fn scroll_to_top(&mut self) {
        self.geometry.scroll_top = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.geometry.scroll_top = self.geometry.max_scroll_top();
    }
}
