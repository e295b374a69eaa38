//! Wire messages exchanged between the content script, the coordinator and
//! the popup.
//!
//! Messages travel as JSON objects tagged by their `action` field:
//!
//! | Action | Direction | Payload | Reply |
//! |---|---|---|---|
//! | `SET` | popup/coordinator -> content | `{ rate }` | none |
//! | `SETSPECIFIC` | coordinator -> content | `{ rate, srcMatch }` | none |
//! | `RETRIEVE` | popup -> content | `{}` | [`RetrieveReply`] |
//! | `UPDATE_UI` | content/popup -> coordinator | `{ rate, tabId? }` | none |
//! | `UPDATE_CONTEXT_MENU` | content -> coordinator | `{ rate }` | none |
//! | `GET_TAB_ID` | content -> coordinator | `{}` | [`TabIdReply`] |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TabId;

/// A protocol message. Unknown actions decode to [`Message::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(ts_rs::TS), ts(export))]
#[serde(tag = "action")]
pub enum Message {
    /// Set every video in the frame to `rate`
    #[serde(rename = "SET")]
    Set { rate: f64 },
    /// Set the first video whose source equals `src_match`
    #[serde(rename = "SETSPECIFIC", rename_all = "camelCase")]
    SetSpecific { rate: f64, src_match: String },
    /// Ask the frame for its current rate and video count
    #[serde(rename = "RETRIEVE")]
    Retrieve,
    /// Report a rate for the badge; `tab_id` overrides the sender's tab
    #[serde(rename = "UPDATE_UI", rename_all = "camelCase")]
    UpdateUi {
        rate: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[cfg_attr(feature = "bindings", ts(optional))]
        tab_id: Option<TabId>,
    },
    /// Report a rate so the context menu can highlight it
    #[serde(rename = "UPDATE_CONTEXT_MENU")]
    UpdateContextMenu { rate: f64 },
    /// Ask the coordinator which tab the sender lives in
    #[serde(rename = "GET_TAB_ID")]
    GetTabId,
    #[serde(other)]
    #[cfg_attr(feature = "bindings", ts(skip))]
    Unknown,
}

impl Message {
    /// Decode a message from its JSON form.
    ///
    /// Anything that is not a well-formed protocol message becomes
    /// [`Message::Unknown`], which every receiver treats as a no-op.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or(Self::Unknown)
    }

    /// Decode a message from a JSON string.
    pub fn from_json(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or(Self::Unknown)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Action tag, for logging.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Set { .. } => "SET",
            Self::SetSpecific { .. } => "SETSPECIFIC",
            Self::Retrieve => "RETRIEVE",
            Self::UpdateUi { .. } => "UPDATE_UI",
            Self::UpdateContextMenu { .. } => "UPDATE_CONTEXT_MENU",
            Self::GetTabId => "GET_TAB_ID",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Reply to [`Message::Retrieve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct RetrieveReply {
    /// Rate of the first video, or 1 when there is none
    pub playback_rate: f64,
    pub video_count: u32,
}

/// Reply to [`Message::GetTabId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct TabIdReply {
    pub tab_id: TabId,
}
