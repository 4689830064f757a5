use std::collections::{BTreeSet, HashMap};

use tracing::trace;

pub const DEFAULT_INDICATOR_ID: &str = "region-scroll-indicator";
pub const HIDDEN_CLASS: &str = "hidden";

/// Anything that can report its content width against its visible width.
pub trait Overflow {
    fn scroll_width(&self) -> u32;
    fn client_width(&self) -> u32;

    fn has_overflow(&self) -> bool {
        self.scroll_width() > self.client_width()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementMetrics {
    pub scroll_width: u32,
    pub client_width: u32,
}

impl Overflow for ElementMetrics {
    fn scroll_width(&self) -> u32 {
        self.scroll_width
    }

    fn client_width(&self) -> u32 {
        self.client_width
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorElement {
    classes: BTreeSet<String>,
}

impl IndicatorElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.insert(class.to_string());
        self
    }

    /// Adds `class` when `force` is true and removes it otherwise.
    pub fn toggle_class(&mut self, class: &str, force: bool) {
        if force {
            self.classes.insert(class.to_string());
        } else {
            self.classes.remove(class);
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    pub fn is_hidden(&self) -> bool {
        self.has_class(HIDDEN_CLASS)
    }
}

/// Looks up indicator elements by identifier.
pub trait IndicatorHost {
    fn indicator_mut(&mut self, id: &str) -> Option<&mut IndicatorElement>;
}

/// In-memory element registry keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Document {
    elements: HashMap<String, IndicatorElement>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, element: IndicatorElement) {
        self.elements.insert(id.into(), element);
    }

    pub fn get(&self, id: &str) -> Option<&IndicatorElement> {
        self.elements.get(id)
    }
}

impl IndicatorHost for Document {
    fn indicator_mut(&mut self, id: &str) -> Option<&mut IndicatorElement> {
        self.elements.get_mut(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportEvent {
    Scroll,
    Resize,
}

/// Shows the indicator only while the observed element overflows.
#[derive(Debug, Clone)]
pub struct ScrollAffordance {
    indicator_id: String,
}

impl Default for ScrollAffordance {
    fn default() -> Self {
        Self::new(DEFAULT_INDICATOR_ID)
    }
}

impl ScrollAffordance {
    pub fn new(indicator_id: impl Into<String>) -> Self {
        Self {
            indicator_id: indicator_id.into(),
        }
    }

    pub fn indicator_id(&self) -> &str {
        &self.indicator_id
    }

    pub fn mounted<E, H>(&self, element: &E, host: &mut H) -> Option<bool>
    where
        E: Overflow + ?Sized,
        H: IndicatorHost + ?Sized,
    {
        self.update(element, host)
    }

    pub fn handle<E, H>(&self, event: ViewportEvent, element: &E, host: &mut H) -> Option<bool>
    where
        E: Overflow + ?Sized,
        H: IndicatorHost + ?Sized,
    {
        trace!(?event, "recomputing scroll indicator");
        self.update(element, host)
    }

    /// Returns the applied hidden state, or `None` when the indicator is
    /// not in the host.
    pub fn update<E, H>(&self, element: &E, host: &mut H) -> Option<bool>
    where
        E: Overflow + ?Sized,
        H: IndicatorHost + ?Sized,
    {
        let indicator = host.indicator_mut(&self.indicator_id)?;
        let hidden = !element.has_overflow();
        indicator.toggle_class(HIDDEN_CLASS, hidden);
        Some(hidden)
    }
}
