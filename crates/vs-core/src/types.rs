//! Core type definitions for VideoSpeed
//!
//! These types are shared by every execution context and most of them are
//! persisted as JSON in one of the two storage tiers.

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Browser tab identifier. Opaque to us; owned by the browser.
pub type TabId = i32;

/// Frame identifier within a tab.
pub type FrameId = i32;

/// Frame id the browser assigns to a tab's top-level document.
pub const MAIN_FRAME_ID: FrameId = 0;

// =============================================================================
// Playback Rates
// =============================================================================

/// Lowest rate the extension offers.
pub const MIN_RATE: f64 = 0.25;

/// Highest rate the extension offers.
pub const MAX_RATE: f64 = 4.0;

/// Rate the browser uses for a fresh media element.
pub const DEFAULT_RATE: f64 = 1.0;

/// Rates offered by the context menu, ascending.
pub const MENU_RATES: [f64; 12] = [
    0.25, 0.5, 1.0, 1.25, 1.5, 2.0, 2.25, 2.5, 3.0, 3.25, 3.5, 4.0,
];

/// Badge background color used whenever a rate is shown.
pub const BADGE_COLOR: &str = "#4a90e2";

/// Error for a rate coming from user input.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum RateError {
    #[error("Rate is not a number")]
    NotANumber,
    #[error("Rate {0} is outside 0.25..=4")]
    OutOfRange(f64),
}

/// Check that a user-supplied rate is usable.
pub fn validate_rate(rate: f64) -> Result<f64, RateError> {
    if !rate.is_finite() {
        return Err(RateError::NotANumber);
    }
    if !(MIN_RATE..=MAX_RATE).contains(&rate) {
        return Err(RateError::OutOfRange(rate));
    }
    Ok(rate)
}

/// Parse a rate typed or dragged in a UI control.
pub fn parse_rate(input: &str) -> Result<f64, RateError> {
    let rate: f64 = input.trim().parse().map_err(|_| RateError::NotANumber)?;
    validate_rate(rate)
}

/// Render a rate the way it appears on the badge.
///
/// Uses the number's natural decimal form: `1` for 1.0, `1.5` for 1.5.
pub fn format_rate(rate: f64) -> String {
    format!("{}", rate)
}

// =============================================================================
// Context Menu
// =============================================================================

/// One radio entry of the context menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct MenuOption {
    pub id: String,
    pub title: String,
    pub rate: f64,
    /// Entry checked when the menu is first created
    #[serde(default)]
    pub default: bool,
}

impl MenuOption {
    fn for_rate(rate: f64) -> Self {
        Self {
            id: format!("rate-{}", format_rate(rate)),
            title: format!("{}x", format_rate(rate)),
            rate,
            default: rate == DEFAULT_RATE,
        }
    }
}

/// The static 12-entry menu definition, in ascending rate order.
pub fn menu_options() -> Vec<MenuOption> {
    MENU_RATES.iter().copied().map(MenuOption::for_rate).collect()
}

// =============================================================================
// Preferences
// =============================================================================

fn default_rate() -> f64 {
    DEFAULT_RATE
}

/// Default rate applied to every new page when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rate")]
    pub playback_rate: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            enabled: false,
            playback_rate: DEFAULT_RATE,
        }
    }
}

/// UI theme identifier. Any string is accepted; the UI decides what it means.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Theme(pub String);

impl Theme {
    pub const SYSTEM: &'static str = "system";
    pub const LIGHT: &'static str = "light";
    pub const DARK: &'static str = "dark";

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self(Self::SYSTEM.to_string())
    }
}

impl From<&str> for Theme {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Tabs and Scripts
// =============================================================================

/// Tab metadata as reported by the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// Where a directly executed script runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptTarget {
    pub tab_id: TabId,
    pub frame_id: FrameId,
}

/// Rate-setting script executed in a page on a context-menu click.
///
/// Targets the first video whose source equals `src_match`, or the first
/// video of the frame when there is no match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRateScript {
    pub rate: f64,
    #[serde(default)]
    pub src_match: Option<String>,
}
