//! crates/asset_history_core/src/selection.rs
//!
//! Ephemeral selection of generated assets to use as visual context for the next
//! script generation. Unlike an item's `selected_points`, this selection is never
//! persisted: it belongs to whichever item is active and is cleared when that changes.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionState {
    active_item: Option<String>,
    assets: Vec<String>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_item(&self) -> Option<&str> {
        self.active_item.as_deref()
    }

    /// Switches the active item. Switching to a different item clears the selection.
    pub fn set_active(&mut self, item_id: Option<&str>) {
        if self.active_item.as_deref() != item_id {
            self.active_item = item_id.map(str::to_owned);
            self.assets.clear();
        }
    }

    /// Adds or removes an asset URL. Returns whether it is now selected.
    /// Does nothing while no item is active.
    pub fn toggle(&mut self, url: &str) -> bool {
        if self.active_item.is_none() {
            return false;
        }
        if let Some(pos) = self.assets.iter().position(|a| a == url) {
            self.assets.remove(pos);
            false
        } else {
            self.assets.push(url.to_string());
            true
        }
    }

    /// Selected assets, in selection order.
    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// The selection, but only if it belongs to `item_id`.
    pub fn assets_for(&self, item_id: &str) -> &[String] {
        if self.active_item.as_deref() == Some(item_id) {
            &self.assets
        } else {
            &[]
        }
    }
}
