//! Which phone application is on screen, and how we get there.
//!
//! `Home -> Loading(app) -> Active(app)`, with a frame stack for back
//! navigation. Every user-initiated action bumps a monotonic intent token;
//! an asynchronous load captures the token at launch and its result is
//! dropped if the token moved on while it was in flight. In-flight loads are
//! never cancelled, only ignored. A `PendingLoad` dropped without being
//! completed (say, a cancelled `open_app` future) puts the controller back
//! in its settled state.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::{within_window, Clock};
use crate::events::{Broadcaster, NavigationChanged};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavState {
    Home,
    Loading(String),
    Active(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationFrame {
    pub app_id: String,
    pub view_state: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntentToken(u64);

/// Produces the view snapshot for an app.
#[async_trait]
pub trait AppLoader: Send + Sync {
    async fn load(&self, app_id: &str) -> Result<Value>;
}

/// A load that has been launched and not yet resolved.
pub struct PendingLoad<'a> {
    pub token: IntentToken,
    pub app_id: String,
    controller: &'a NavigationController,
    resolved: bool,
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.controller.abandon(self.token, &self.app_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Activated,
    /// A newer navigation superseded this load; its result was dropped.
    Stale,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Duplicate of the previous action inside the debounce window, or the
    /// app is already loading.
    Ignored,
    Loaded(LoadOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NavAction {
    Open(String),
    Back,
    Home,
}

struct NavInner {
    state: NavState,
    stack: Vec<NavigationFrame>,
    intent: u64,
    last_action: Option<(NavAction, DateTime<Utc>)>,
}

impl NavInner {
    fn settled_state(&self) -> NavState {
        match self.stack.last() {
            Some(frame) => NavState::Active(frame.app_id.clone()),
            None => NavState::Home,
        }
    }

    fn change(&self) -> NavigationChanged {
        NavigationChanged {
            state: self.state.clone(),
            depth: self.stack.len(),
        }
    }
}

pub struct NavigationController {
    inner: Mutex<NavInner>,
    loader: Arc<dyn AppLoader>,
    clock: Arc<dyn Clock>,
    debounce: ChronoDuration,
    changes: Broadcaster<NavigationChanged>,
}

impl NavigationController {
    pub fn new(loader: Arc<dyn AppLoader>, clock: Arc<dyn Clock>, debounce: ChronoDuration) -> Self {
        Self {
            inner: Mutex::new(NavInner {
                state: NavState::Home,
                stack: Vec::new(),
                intent: 0,
                last_action: None,
            }),
            loader,
            clock,
            debounce,
            changes: Broadcaster::new(),
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<NavigationChanged> {
        self.changes.subscribe()
    }

    fn lock_inner(&self) -> MutexGuard<'_, NavInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        }
    }

    pub fn state(&self) -> NavState {
        self.lock_inner().state.clone()
    }

    pub fn depth(&self) -> usize {
        self.lock_inner().stack.len()
    }

    pub fn top_frame(&self) -> Option<NavigationFrame> {
        self.lock_inner().stack.last().cloned()
    }

    pub fn current_intent(&self) -> IntentToken {
        IntentToken(self.lock_inner().intent)
    }

    /// Returns false (and records nothing) if `action` repeats the previous
    /// accepted action inside the debounce window.
    fn accept(&self, inner: &mut NavInner, action: NavAction) -> bool {
        let now = self.clock.now();
        if let Some((last, at)) = &inner.last_action {
            if *last == action && within_window(Some(*at), now, self.debounce) {
                tracing::debug!("Debounced duplicate navigation {:?}", action);
                return false;
            }
        }
        inner.last_action = Some((action, now));
        true
    }

    /// First half of `open_app`: debounce, issue a new intent and enter
    /// `Loading`. `None` means the request was ignored.
    pub fn begin_open(&self, app_id: &str) -> Option<PendingLoad<'_>> {
        let (pending, change) = {
            let mut inner = self.lock_inner();
            if inner.state == NavState::Loading(app_id.to_string()) {
                tracing::debug!("App '{}' is already loading", app_id);
                return None;
            }
            if !self.accept(&mut inner, NavAction::Open(app_id.to_string())) {
                return None;
            }

            inner.intent += 1;
            inner.state = NavState::Loading(app_id.to_string());
            let pending = PendingLoad {
                token: IntentToken(inner.intent),
                app_id: app_id.to_string(),
                controller: self,
                resolved: false,
            };
            (pending, inner.change())
        };

        tracing::info!("Opening app '{}' (intent {})", app_id, pending.token.0);
        self.changes.publish(&change);
        Some(pending)
    }

    /// Second half of `open_app`: apply the load result if its intent is
    /// still live.
    pub fn complete_load(&self, mut pending: PendingLoad<'_>, result: Result<Value>) -> LoadOutcome {
        pending.resolved = true;
        let (outcome, change) = {
            let mut inner = self.lock_inner();
            if inner.intent != pending.token.0 {
                tracing::debug!(
                    "Dropping stale load of '{}' (intent {}, live {})",
                    pending.app_id,
                    pending.token.0,
                    inner.intent
                );
                return LoadOutcome::Stale;
            }

            match result {
                Ok(view_state) => {
                    inner.stack.push(NavigationFrame {
                        app_id: pending.app_id.clone(),
                        view_state,
                    });
                    inner.state = NavState::Active(pending.app_id.clone());
                    (LoadOutcome::Activated, inner.change())
                }
                Err(e) => {
                    tracing::error!("Failed to load app '{}': {:#}", pending.app_id, e);
                    inner.state = inner.settled_state();
                    (LoadOutcome::Failed, inner.change())
                }
            }
        };

        self.changes.publish(&change);
        outcome
    }

    /// Undo `Loading` for a load nobody will complete, if it is still the
    /// live one.
    fn abandon(&self, token: IntentToken, app_id: &str) {
        let change = {
            let mut inner = self.lock_inner();
            if inner.intent != token.0 || inner.state != NavState::Loading(app_id.to_string()) {
                return;
            }
            inner.state = inner.settled_state();
            inner.change()
        };

        tracing::debug!("Load of '{}' was abandoned (intent {})", app_id, token.0);
        self.changes.publish(&change);
    }

    pub async fn open_app(&self, app_id: &str) -> OpenOutcome {
        let Some(pending) = self.begin_open(app_id) else {
            return OpenOutcome::Ignored;
        };
        let result = self.loader.load(&pending.app_id).await;
        OpenOutcome::Loaded(self.complete_load(pending, result))
    }

    /// Pop the top frame and show the one beneath it without reloading.
    /// While a load is in flight this abandons the load instead.
    pub fn go_back(&self) -> bool {
        let change = {
            let mut inner = self.lock_inner();
            if !self.accept(&mut inner, NavAction::Back) {
                return false;
            }

            inner.intent += 1;
            if matches!(inner.state, NavState::Loading(_)) {
                tracing::debug!("Back pressed while loading; abandoning load");
            } else if let Some(frame) = inner.stack.pop() {
                tracing::debug!("Left app '{}'", frame.app_id);
            }
            inner.state = inner.settled_state();
            inner.change()
        };

        self.changes.publish(&change);
        true
    }

    /// Clear the stack and invalidate any in-flight load.
    pub fn go_home(&self) -> bool {
        let change = {
            let mut inner = self.lock_inner();
            if !self.accept(&mut inner, NavAction::Home) {
                return false;
            }

            inner.intent += 1;
            inner.stack.clear();
            inner.state = NavState::Home;
            inner.change()
        };

        tracing::info!("Returned to home screen");
        self.changes.publish(&change);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub id: &'static str,
    pub title: &'static str,
}

pub fn builtin_apps() -> Vec<AppInfo> {
    [
        ("messages", "信息"),
        ("gallery", "相册"),
        ("settings", "设置"),
        ("forum", "论坛"),
        ("weibo", "微博"),
        ("api", "API设置"),
        ("diary", "日记"),
        ("mail", "邮件"),
        ("shop", "购物"),
        ("backpack", "背包"),
        ("task", "任务"),
        ("live", "直播"),
        ("watch-live", "观看直播"),
        ("parallel-events", "平行事件"),
        ("profile", "档案"),
    ]
    .into_iter()
    .map(|(id, title)| AppInfo { id, title })
    .collect()
}

/// Resolves app ids against a fixed registry.
pub struct RegistryAppLoader {
    apps: Vec<AppInfo>,
}

impl RegistryAppLoader {
    pub fn new(apps: Vec<AppInfo>) -> Self {
        Self { apps }
    }
}

impl Default for RegistryAppLoader {
    fn default() -> Self {
        Self::new(builtin_apps())
    }
}

#[async_trait]
impl AppLoader for RegistryAppLoader {
    async fn load(&self, app_id: &str) -> Result<Value> {
        let app = self
            .apps
            .iter()
            .find(|app| app.id == app_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown app '{}'", app_id))?;

        Ok(serde_json::json!({
            "app_id": app.id,
            "title": app.title,
        }))
    }
}
