//! Scripted runs against the simulated browser.
//!
//! A scenario is a JSON document with a list of steps. Tabs are opened under
//! a name and referenced by it afterwards; `expect*` steps turn a run into a
//! check.

use std::collections::BTreeMap;
use std::fs;

use serde::{Deserialize, Serialize};

use vs_core::sim::{PopupHost, SimBrowser, SimSnapshot};
use vs_core::types::{validate_rate, RateError, TabId};
use vs_core::{OptionsError, PopupController, PopupView};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Step {step}: unknown tab '{name}'")]
    UnknownTab { step: usize, name: String },
    #[error("Step {step}: tab name '{name}' is already taken")]
    DuplicateTab { step: usize, name: String },
    #[error("Step {step}: tab '{tab}' has no video {index}")]
    NoVideo { step: usize, tab: String, index: usize },
    #[error("Step {step}: the popup is not open")]
    PopupNotOpen { step: usize },
    #[error("Step {step}: {source}")]
    Rate { step: usize, source: RateError },
    #[error("Step {step}: {source}")]
    Options { step: usize, source: OptionsError },
    #[error("Step {step}: expected {expected}, found {found}")]
    Expectation {
        step: usize,
        expected: String,
        found: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &str) -> Result<Self, ScenarioError> {
        let text = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&text)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Step {
    /// Install the extension
    Install,
    /// A tab that was open before install; no navigation events fire
    ExistingTab {
        name: String,
        url: String,
        #[serde(default)]
        videos: Vec<String>,
    },
    OpenTab {
        name: String,
        url: String,
        #[serde(default)]
        videos: Vec<String>,
    },
    AddVideo { tab: String, src: String },
    Activate { tab: String },
    PopupOpen,
    PopupInput { rate: f64 },
    ContextMenuClick {
        tab: String,
        item: String,
        #[serde(default)]
        src_url: Option<String>,
    },
    RightClick { tab: String, video: usize },
    NativeRateChange { tab: String, video: usize, rate: f64 },
    ChangeSource { tab: String, video: usize, src: String },
    SetDefaults { enabled: bool, rate: f64 },
    SetBadgeEnabled { enabled: bool },
    Navigate {
        tab: String,
        url: String,
        #[serde(default)]
        videos: Vec<String>,
    },
    NavigateSubframe { tab: String, frame_id: i32 },
    Reinject { tab: String },
    CloseTab { tab: String },
    ExpectRate { tab: String, video: usize, rate: f64 },
    ExpectBadge { tab: String, text: String },
    ExpectCheckedItem { item: Option<String> },
    ExpectStoredRate { tab: String, rate: Option<f64> },
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub name: Option<String>,
    pub steps: usize,
    pub tabs: BTreeMap<String, TabId>,
    pub popup: Option<PopupView>,
    pub browser: SimSnapshot,
}

pub struct ScenarioRunner {
    browser: SimBrowser,
    tabs: BTreeMap<String, TabId>,
    popup: Option<PopupController<PopupHost>>,
    popup_view: Option<PopupView>,
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self {
            browser: SimBrowser::new(),
            tabs: BTreeMap::new(),
            popup: None,
            popup_view: None,
        }
    }

    pub async fn run(mut self, scenario: &Scenario) -> Result<Report, ScenarioError> {
        for (index, step) in scenario.steps.iter().enumerate() {
            log::debug!("Step {}: {:?}", index + 1, step);
            self.step(index + 1, step).await?;
        }

        Ok(Report {
            name: scenario.name.clone(),
            steps: scenario.steps.len(),
            browser: self.browser.snapshot(),
            tabs: self.tabs,
            popup: self.popup_view,
        })
    }

    async fn step(&mut self, step: usize, action: &Step) -> Result<(), ScenarioError> {
        match action {
            Step::Install => self.browser.install().await,
            Step::ExistingTab { name, url, videos } => {
                self.check_name(step, name)?;
                let tab_id = self.browser.add_existing_tab(url, &srcs(videos));
                self.tabs.insert(name.clone(), tab_id);
            }
            Step::OpenTab { name, url, videos } => {
                self.check_name(step, name)?;
                let tab_id = self.browser.open_tab(url, &srcs(videos)).await;
                self.tabs.insert(name.clone(), tab_id);
            }
            Step::AddVideo { tab, src } => {
                let tab_id = self.tab(step, tab)?;
                self.browser.add_video(tab_id, src).await;
            }
            Step::Activate { tab } => {
                let tab_id = self.tab(step, tab)?;
                self.browser.activate(tab_id);
            }
            Step::PopupOpen => {
                let popup = self.browser.popup();
                self.popup_view = Some(popup.open().await);
                self.popup = Some(popup);
            }
            Step::PopupInput { rate } => {
                let popup = self.popup.as_ref().ok_or(ScenarioError::PopupNotOpen { step })?;
                popup
                    .on_input(*rate)
                    .await
                    .map_err(|source| ScenarioError::Rate { step, source })?;
                self.browser.run_until_idle().await;
            }
            Step::ContextMenuClick { tab, item, src_url } => {
                let tab_id = self.tab(step, tab)?;
                self.browser.click_menu_item(tab_id, item, src_url.as_deref()).await;
            }
            Step::RightClick { tab, video } => {
                let tab_id = self.tab(step, tab)?;
                self.video(step, tab, tab_id, *video)?;
                self.browser.right_click_video(tab_id, *video).await;
            }
            Step::NativeRateChange { tab, video, rate } => {
                let tab_id = self.tab(step, tab)?;
                self.video(step, tab, tab_id, *video)?;
                self.browser.set_native_rate(tab_id, *video, *rate).await;
            }
            Step::ChangeSource { tab, video, src } => {
                let tab_id = self.tab(step, tab)?;
                self.video(step, tab, tab_id, *video)?;
                self.browser.change_source(tab_id, *video, src).await;
            }
            Step::SetDefaults { enabled, rate } => {
                self.browser
                    .set_defaults(*enabled, *rate)
                    .await
                    .map_err(|source| ScenarioError::Options { step, source })?;
            }
            Step::SetBadgeEnabled { enabled } => {
                self.browser
                    .set_badge_enabled(*enabled)
                    .await
                    .map_err(|source| ScenarioError::Options { step, source })?;
            }
            Step::Navigate { tab, url, videos } => {
                let tab_id = self.tab(step, tab)?;
                self.browser.navigate(tab_id, url, &srcs(videos)).await;
            }
            Step::NavigateSubframe { tab, frame_id } => {
                let tab_id = self.tab(step, tab)?;
                self.browser.navigate_subframe(tab_id, *frame_id).await;
            }
            Step::Reinject { tab } => {
                let tab_id = self.tab(step, tab)?;
                self.browser.reinject(tab_id).await;
            }
            Step::CloseTab { tab } => {
                let tab_id = self.tab(step, tab)?;
                self.browser.close_tab(tab_id).await;
                self.tabs.remove(tab);
            }
            Step::ExpectRate { tab, video, rate } => {
                let tab_id = self.tab(step, tab)?;
                let found = self.video(step, tab, tab_id, *video)?;
                expect(step, rate, &found)?;
            }
            Step::ExpectBadge { tab, text } => {
                let tab_id = self.tab(step, tab)?;
                expect(step, text, &self.browser.badge_text(tab_id))?;
            }
            Step::ExpectCheckedItem { item } => {
                expect(step, item, &self.browser.checked_menu_item())?;
            }
            Step::ExpectStoredRate { tab, rate } => {
                let tab_id = self.tab(step, tab)?;
                expect(step, rate, &self.browser.stored_tab_rate(tab_id))?;
            }
        }
        Ok(())
    }

    fn check_name(&self, step: usize, name: &str) -> Result<(), ScenarioError> {
        if self.tabs.contains_key(name) {
            return Err(ScenarioError::DuplicateTab {
                step,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn tab(&self, step: usize, name: &str) -> Result<TabId, ScenarioError> {
        self.tabs.get(name).copied().ok_or_else(|| ScenarioError::UnknownTab {
            step,
            name: name.to_string(),
        })
    }

    /// Current rate of a video, failing the step when it does not exist.
    fn video(&self, step: usize, tab: &str, tab_id: TabId, index: usize) -> Result<f64, ScenarioError> {
        self.browser
            .video_rate(tab_id, index)
            .ok_or_else(|| ScenarioError::NoVideo {
                step,
                tab: tab.to_string(),
                index,
            })
    }
}

fn srcs(videos: &[String]) -> Vec<&str> {
    videos.iter().map(String::as_str).collect()
}

fn expect<T: PartialEq + std::fmt::Debug>(step: usize, expected: &T, found: &T) -> Result<(), ScenarioError> {
    if expected == found {
        return Ok(());
    }
    Err(ScenarioError::Expectation {
        step,
        expected: format!("{:?}", expected),
        found: format!("{:?}", found),
    })
}

/// Validate every rate a scenario feeds in before running anything.
pub fn check_rates(scenario: &Scenario) -> Result<(), ScenarioError> {
    for (index, step) in scenario.steps.iter().enumerate() {
        let rate = match step {
            Step::SetDefaults { rate, .. } | Step::PopupInput { rate } => *rate,
            _ => continue,
        };
        validate_rate(rate).map_err(|source| ScenarioError::Rate {
            step: index + 1,
            source,
        })?;
    }
    Ok(())
}
