//! End-to-end behavior of the three contexts wired together in the
//! simulated browser.

use serde_json::json;
use vs_core::message::{Message, RetrieveReply};
use vs_core::platform::{KeyValueStore, VideoHandle};
use vs_core::sim::SimBrowser;
use vs_core::storage::tab_rate_key;
use vs_core::types::{format_rate, menu_options, RateError, Theme, MENU_RATES};
use vs_core::{find_closest_option, RuntimeState};

const PAGE: &str = "https://videos.example.com/watch";

async fn installed() -> SimBrowser {
    let browser = SimBrowser::new();
    browser.install().await;
    browser
}

fn retrieve_reply(value: Option<serde_json::Value>) -> RetrieveReply {
    serde_json::from_value(value.expect("RETRIEVE must reply")).unwrap()
}

// =============================================================================
// Content Script Messages
// =============================================================================

#[tokio::test]
async fn test_set_applies_every_quarter_step() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    let popup = browser.popup();
    assert!(popup.open().await.control.is_some());

    let mut rate = 0.25;
    while rate <= 4.0 {
        popup.on_input(rate).await.unwrap();
        browser.run_until_idle().await;

        assert_eq!(browser.video_rate(tab, 0), Some(rate));
        assert_eq!(browser.badge_text(tab), format_rate(rate));
        assert_eq!(browser.stored_tab_rate(tab), Some(rate));
        rate += 0.25;
    }
}

#[tokio::test]
async fn test_set_on_page_without_videos_is_a_no_op() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &[]).await;

    let reply = browser.send_to_tab(tab, &Message::Set { rate: 2.0 }).await.unwrap();
    assert!(reply.is_none());
    assert_eq!(browser.stored_tab_rate(tab), None);
    assert_eq!(browser.coordinator_received("UPDATE_UI"), 0);
}

#[tokio::test]
async fn test_set_specific_without_match_changes_nothing() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4", "b.mp4"]).await;

    let message = Message::SetSpecific {
        rate: 2.0,
        src_match: "missing.mp4".to_string(),
    };
    let reply = browser.send_to_tab(tab, &message).await.unwrap();

    assert!(reply.is_none());
    assert_eq!(browser.video_rate(tab, 0), Some(1.0));
    assert_eq!(browser.video_rate(tab, 1), Some(1.0));
}

#[tokio::test]
async fn test_set_specific_changes_only_the_match() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4", "b.mp4"]).await;

    let message = Message::SetSpecific {
        rate: 2.5,
        src_match: "b.mp4".to_string(),
    };
    browser.send_to_tab(tab, &message).await.unwrap();

    assert_eq!(browser.video_rate(tab, 0), Some(1.0));
    assert_eq!(browser.video_rate(tab, 1), Some(2.5));
    assert_eq!(browser.badge_text(tab), "2.5");
}

#[tokio::test]
async fn test_set_specific_matches_resolved_source() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["", "b.mp4"]).await;
    browser
        .video(tab, 0)
        .unwrap()
        .set_current_src("https://cdn.example.com/stream \"hd\".mp4");

    let message = Message::SetSpecific {
        rate: 3.0,
        src_match: "https://cdn.example.com/stream \"hd\".mp4".to_string(),
    };
    browser.send_to_tab(tab, &message).await.unwrap();

    assert_eq!(browser.video_rate(tab, 0), Some(3.0));
    assert_eq!(browser.video_rate(tab, 1), Some(1.0));
}

#[tokio::test]
async fn test_retrieve_without_videos() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &[]).await;

    let reply = retrieve_reply(browser.send_to_tab(tab, &Message::Retrieve).await.unwrap());
    assert_eq!(reply.playback_rate, 1.0);
    assert_eq!(reply.video_count, 0);
}

#[tokio::test]
async fn test_retrieve_reports_first_video() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4", "b.mp4", "c.mp4"]).await;
    browser.set_native_rate(tab, 0, 1.5).await;
    browser.set_native_rate(tab, 2, 3.0).await;

    let raw = browser.send_to_tab(tab, &Message::Retrieve).await.unwrap();
    assert_eq!(raw, Some(json!({"playbackRate": 1.5, "videoCount": 3})));

    let reply = retrieve_reply(raw);
    assert_eq!(reply.playback_rate, 1.5);
    assert_eq!(reply.video_count, 3);
}

#[tokio::test]
async fn test_unknown_action_is_ignored() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;

    let message = Message::from_value(json!({"action": "PAUSE"}));
    assert_eq!(message, Message::Unknown);
    assert!(browser.send_to_tab(tab, &message).await.unwrap().is_none());
    assert_eq!(browser.video_rate(tab, 0), Some(1.0));
}

// =============================================================================
// Closest Option
// =============================================================================

#[test]
fn test_closest_option_breaks_ties_low() {
    let options: Vec<_> = menu_options()
        .into_iter()
        .filter(|option| option.rate != 1.25)
        .collect();
    assert_eq!(find_closest_option(1.25, &options).unwrap().id, "rate-1");
}

#[test]
fn test_closest_option_clamps_above_range() {
    let options = menu_options();
    let max = MENU_RATES[MENU_RATES.len() - 1];
    assert_eq!(find_closest_option(10.0, &options).unwrap().rate, max);
}

// =============================================================================
// Coordinator
// =============================================================================

#[tokio::test]
async fn test_install_builds_menu_and_reaches_open_tabs() {
    let browser = SimBrowser::new();
    let web = browser.add_existing_tab(PAGE, &["a.mp4"]);
    let plain = browser.add_existing_tab("http://intranet.local/", &[]);
    let settings = browser.add_existing_tab("chrome://settings", &[]);
    let local_file = browser.add_existing_tab("file:///home/me/clip.html", &["clip.mp4"]);

    browser.install().await;

    let menu = browser.menu();
    assert_eq!(menu.len(), 12);
    assert_eq!(browser.checked_menu_item().as_deref(), Some("rate-1"));
    assert_eq!(menu.iter().filter(|entry| entry.checked).count(), 1);
    assert!(browser.local_store().peek("contextMenuOptions").is_some());

    assert_eq!(browser.runtime_state(web), Some(RuntimeState::Active));
    assert_eq!(browser.runtime_state(plain), Some(RuntimeState::Active));
    assert_eq!(browser.runtime_state(settings), None);
    assert_eq!(browser.runtime_state(local_file), None);
    assert_eq!(browser.injection_count(), 2);

    assert_eq!(browser.sync_store().peek("badgeEnabled"), Some(json!(true)));
    assert_eq!(
        browser.sync_store().peek("defaults"),
        Some(json!({"enabled": false, "playbackRate": 1.0}))
    );
}

#[tokio::test]
async fn test_reinstall_keeps_user_preferences() {
    let browser = installed().await;
    browser.set_defaults(true, 2.25).await.unwrap();
    browser.set_badge_enabled(false).await.unwrap();

    browser.install().await;

    assert_eq!(browser.menu().len(), 12);
    assert_eq!(browser.sync_store().peek("badgeEnabled"), Some(json!(false)));
    assert_eq!(
        browser.sync_store().peek("defaults"),
        Some(json!({"enabled": true, "playbackRate": 2.25}))
    );
}

#[tokio::test]
async fn test_rate_report_updates_badge_and_menu() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;

    browser.set_native_rate(tab, 0, 2.25).await;

    let badge = browser.badge(tab).unwrap();
    assert_eq!(badge.text, "2.25");
    assert_eq!(badge.color.as_deref(), Some("#4a90e2"));
    assert_eq!(browser.checked_menu_item().as_deref(), Some("rate-2.25"));
    assert_eq!(browser.stored_tab_rate(tab), Some(2.25));

    // 1.75 sits halfway between 1.5 and 2
    browser.set_native_rate(tab, 0, 1.75).await;
    assert_eq!(browser.badge_text(tab), "1.75");
    assert_eq!(browser.checked_menu_item().as_deref(), Some("rate-1.5"));
}

#[tokio::test]
async fn test_tab_close_drops_stored_rate() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    let other = browser.open_tab(PAGE, &["b.mp4"]).await;
    browser.set_native_rate(tab, 0, 2.0).await;
    browser.set_native_rate(other, 0, 3.0).await;
    assert_eq!(browser.stored_tab_rate(tab), Some(2.0));

    assert!(browser.close_tab(tab).await);

    assert_eq!(browser.stored_tab_rate(tab), None);
    assert!(!browser.local_store().keys().contains(&tab_rate_key(tab)));
    assert_eq!(browser.stored_tab_rate(other), Some(3.0));
    assert!(!browser.close_tab(tab).await);
}

#[tokio::test]
async fn test_disabling_badge_clears_every_tab() {
    let browser = installed().await;
    let first = browser.open_tab(PAGE, &["a.mp4"]).await;
    let second = browser.open_tab(PAGE, &["b.mp4"]).await;
    browser.set_native_rate(first, 0, 2.0).await;
    browser.set_native_rate(second, 0, 0.5).await;
    assert_eq!(browser.badge_text(first), "2");
    assert_eq!(browser.badge_text(second), "0.5");

    browser.set_badge_enabled(false).await.unwrap();
    assert_eq!(browser.badge_text(first), "");
    assert_eq!(browser.badge_text(second), "");

    // Rates are still persisted while badges are hidden
    browser.set_native_rate(first, 0, 2.5).await;
    assert_eq!(browser.badge_text(first), "");
    assert_eq!(browser.stored_tab_rate(first), Some(2.5));

    browser.set_badge_enabled(true).await.unwrap();
    assert_eq!(browser.badge_text(first), "");
    assert_eq!(browser.badge_text(second), "");

    browser.set_native_rate(first, 0, 3.0).await;
    assert_eq!(browser.badge_text(first), "3");
    assert_eq!(browser.badge_text(second), "");
}

#[tokio::test]
async fn test_context_menu_click_sets_clicked_video() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4", "b.mp4"]).await;

    browser.click_menu_item(tab, "rate-2", Some("b.mp4")).await;

    assert_eq!(browser.video_rate(tab, 0), Some(1.0));
    assert_eq!(browser.video_rate(tab, 1), Some(2.0));
    assert_eq!(browser.badge_text(tab), "2");
    assert_eq!(browser.stored_tab_rate(tab), Some(2.0));
    assert_eq!(browser.checked_menu_item().as_deref(), Some("rate-2"));
}

#[tokio::test]
async fn test_context_menu_click_falls_back_to_first_video() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4", "b.mp4"]).await;

    browser.click_menu_item(tab, "rate-0.5", Some("blob:gone")).await;
    assert_eq!(browser.video_rate(tab, 0), Some(0.5));
    assert_eq!(browser.video_rate(tab, 1), Some(1.0));

    browser.click_menu_item(tab, "rate-3", None).await;
    assert_eq!(browser.video_rate(tab, 0), Some(3.0));
}

#[tokio::test]
async fn test_context_menu_click_on_unknown_item_is_ignored() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;

    browser.click_menu_item(tab, "rate-9", None).await;

    assert_eq!(browser.video_rate(tab, 0), Some(1.0));
    assert_eq!(browser.badge_text(tab), "");
    assert_eq!(browser.stored_tab_rate(tab), None);
}

#[tokio::test]
async fn test_right_click_highlights_video_rate() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4", "b.mp4"]).await;
    browser.set_native_rate(tab, 0, 3.0).await;
    browser.set_native_rate(tab, 1, 0.5).await;
    assert_eq!(browser.checked_menu_item().as_deref(), Some("rate-0.5"));

    assert!(browser.right_click_video(tab, 0).await);

    assert_eq!(browser.checked_menu_item().as_deref(), Some("rate-3"));
    assert_eq!(browser.coordinator_received("UPDATE_CONTEXT_MENU"), 1);
    // Highlighting alone does not touch the badge
    assert_eq!(browser.badge_text(tab), "0.5");
}

#[tokio::test]
async fn test_navigation_clears_badge_for_main_frame_only() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    browser.set_native_rate(tab, 0, 2.0).await;

    browser.navigate_subframe(tab, 7).await;
    assert_eq!(browser.badge_text(tab), "2");

    assert!(browser.navigate(tab, "https://other.example.com/", &["b.mp4"]).await);
    assert_eq!(browser.badge_text(tab), "");
    assert_eq!(browser.runtime_state(tab), Some(RuntimeState::Active));
    assert_eq!(browser.video_rate(tab, 0), Some(1.0));
}

#[tokio::test]
async fn test_navigation_repaints_badge_from_defaults() {
    let browser = installed().await;
    browser.set_defaults(true, 1.5).await.unwrap();
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    browser.set_native_rate(tab, 0, 3.0).await;

    browser.navigate(tab, "https://other.example.com/", &["b.mp4"]).await;

    assert_eq!(browser.video_rate(tab, 0), Some(1.5));
    assert_eq!(browser.badge_text(tab), "1.5");
}

// =============================================================================
// Re-injection and Defaults
// =============================================================================

async fn one_rate_change(reinjections: usize) -> (usize, usize) {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    for _ in 0..reinjections {
        browser.reinject(tab).await;
    }

    let key = tab_rate_key(tab);
    let writes = browser.local_store().write_count(&key);
    let reports = browser.coordinator_received("UPDATE_UI");
    browser.set_native_rate(tab, 0, 2.0).await;

    (
        browser.local_store().write_count(&key) - writes,
        browser.coordinator_received("UPDATE_UI") - reports,
    )
}

#[tokio::test]
async fn test_reinjection_does_not_double_fire() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    browser.reinject(tab).await;
    browser.reinject(tab).await;

    assert_eq!(browser.injection_count(), 3);
    assert_eq!(browser.video(tab, 0).unwrap().listener_count(), 1);
    assert_eq!(browser.page(tab).unwrap().active_observers(), 1);

    let (single_writes, single_reports) = one_rate_change(0).await;
    let (double_writes, double_reports) = one_rate_change(2).await;
    assert_eq!(single_reports, 1);
    assert_eq!(double_reports, 1);
    // One write from the content script's ratechange handler, one from the
    // coordinator persisting the reported rate.
    assert_eq!(single_writes, 2);
    assert_eq!(double_writes, 2);
}

#[tokio::test]
async fn test_videos_added_later_get_listeners_once() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &[]).await;

    let index = browser.add_video(tab, "late.mp4").await.unwrap();
    browser.reinject(tab).await;
    assert_eq!(browser.video(tab, index).unwrap().listener_count(), 1);

    browser.set_native_rate(tab, index, 1.25).await;
    assert_eq!(browser.badge_text(tab), "1.25");
    assert_eq!(browser.coordinator_received("UPDATE_UI"), 1);
}

#[tokio::test]
async fn test_defaults_apply_to_fresh_page() {
    let browser = installed().await;
    browser.set_defaults(true, 1.75).await.unwrap();

    let tab = browser.open_tab(PAGE, &["a.mp4", "b.mp4"]).await;

    assert_eq!(browser.video_rate(tab, 0), Some(1.75));
    assert_eq!(browser.video_rate(tab, 1), Some(1.75));
    assert_eq!(browser.badge_text(tab), "1.75");
    assert_eq!(browser.stored_tab_rate(tab), Some(1.75));
}

#[tokio::test]
async fn test_disabled_defaults_leave_page_alone() {
    let browser = installed().await;
    browser.set_defaults(false, 3.0).await.unwrap();

    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;

    assert_eq!(browser.video_rate(tab, 0), Some(1.0));
    assert_eq!(browser.badge_text(tab), "");
    assert_eq!(browser.coordinator_received("UPDATE_UI"), 0);
}

#[tokio::test]
async fn test_defaults_apply_to_videos_added_later() {
    let browser = installed().await;
    browser.set_defaults(true, 2.0).await.unwrap();
    let tab = browser.open_tab(PAGE, &[]).await;

    let index = browser.add_video(tab, "late.mp4").await.unwrap();

    assert_eq!(browser.video_rate(tab, index), Some(2.0));
}

#[tokio::test]
async fn test_loadstart_restores_default() {
    let browser = installed().await;
    browser.set_defaults(true, 2.0).await.unwrap();
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    assert_eq!(browser.video_rate(tab, 0), Some(2.0));

    assert!(browser.change_source(tab, 0, "next-episode.mp4").await);

    assert_eq!(browser.video_rate(tab, 0), Some(2.0));
    assert_eq!(browser.badge_text(tab), "2");
    assert_eq!(browser.stored_tab_rate(tab), Some(2.0));
}

#[tokio::test]
async fn test_loadstart_without_defaults_keeps_browser_reset() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    browser.set_native_rate(tab, 0, 2.0).await;

    browser.change_source(tab, 0, "next-episode.mp4").await;

    assert_eq!(browser.video_rate(tab, 0), Some(1.0));
    assert_eq!(browser.badge_text(tab), "1");
}

#[tokio::test]
async fn test_out_of_range_stored_default_is_ignored() {
    for stored in [50.0, -2.0, 0.1] {
        let browser = installed().await;
        browser
            .sync_store()
            .set("defaults", json!({"enabled": true, "playbackRate": stored}))
            .await
            .unwrap();

        let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
        assert_eq!(browser.video_rate(tab, 0), Some(1.0));
        assert_eq!(browser.badge_text(tab), "");
        assert_eq!(browser.stored_tab_rate(tab), None);
        assert_eq!(browser.coordinator_received("UPDATE_UI"), 0);

        browser.change_source(tab, 0, "next-episode.mp4").await;
        assert_eq!(browser.video_rate(tab, 0), Some(1.0));
        assert_eq!(browser.runtime_state(tab), Some(RuntimeState::Active));
    }
}

// =============================================================================
// Popup and Options
// =============================================================================

#[tokio::test]
async fn test_popup_shows_current_rate() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4", "b.mp4"]).await;
    browser.set_native_rate(tab, 0, 1.25).await;
    browser.options().set_theme(&Theme::from(Theme::DARK)).await.unwrap();

    let popup = browser.popup();
    let view = popup.open().await;

    assert_eq!(popup.tab_id(), Some(tab));
    assert_eq!(view.theme.as_str(), "dark");
    let control = view.control.unwrap();
    assert_eq!(control.rate, 1.25);
    assert_eq!(control.video_count, 2);
}

#[tokio::test]
async fn test_popup_binds_to_active_tab() {
    let browser = installed().await;
    let first = browser.open_tab(PAGE, &["a.mp4"]).await;
    let second = browser.open_tab(PAGE, &["b.mp4"]).await;
    assert!(browser.activate(first));

    let popup = browser.popup();
    popup.open().await;
    popup.on_input(3.5).await.unwrap();
    browser.run_until_idle().await;

    assert_eq!(popup.tab_id(), Some(first));
    assert_eq!(browser.video_rate(first, 0), Some(3.5));
    assert_eq!(browser.video_rate(second, 0), Some(1.0));
}

#[tokio::test]
async fn test_popup_empty_state_on_restricted_page() {
    let browser = installed().await;
    let tab = browser.open_tab("chrome://extensions", &[]).await;
    assert_eq!(browser.runtime_state(tab), None);

    let popup = browser.popup();
    let view = popup.open().await;

    assert!(view.control.is_none());
    assert_eq!(view.theme.as_str(), "system");
    // Input into a tab without a content script is swallowed
    assert_eq!(popup.on_input(2.0).await, Ok(()));
}

#[tokio::test]
async fn test_popup_rejects_invalid_input() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    let popup = browser.popup();
    popup.open().await;

    assert_eq!(popup.on_input(4.5).await, Err(RateError::OutOfRange(4.5)));
    assert_eq!(popup.on_input(f64::NAN).await, Err(RateError::NotANumber));
    browser.run_until_idle().await;
    assert_eq!(browser.video_rate(tab, 0), Some(1.0));
}

#[tokio::test]
async fn test_snapshot_reflects_state() {
    let browser = installed().await;
    let tab = browser.open_tab(PAGE, &["a.mp4"]).await;
    browser.set_native_rate(tab, 0, 2.0).await;

    let snapshot = serde_json::to_value(browser.snapshot()).unwrap();

    assert_eq!(snapshot["checkedMenuItem"], json!("rate-2"));
    assert_eq!(snapshot["tabs"][0]["badge"]["text"], json!("2"));
    assert_eq!(snapshot["tabs"][0]["videos"][0]["playbackRate"], json!(2.0));
    assert_eq!(snapshot["localStorage"][tab_rate_key(tab)], json!(2.0));
}
