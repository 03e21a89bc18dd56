use std::sync::Arc;
use std::time::Instant;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::prelude::Rect;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::config::AppConfig;
use crate::counters::{CounterField, CounterStore, CounterTracker, ParticipantCounters};
use crate::events::{AppEvent, PickTarget};
use crate::form::{BackgroundLevel, FormData, FormField, FormState};
use crate::orchestrator::{
    run_generation, GenerationOrigin, GenerationStage, GENERATION_FAILED,
};
use crate::plan::{explain, parse_plan, PlanDocument, PlanEffect, PlanRow, PlanTree, Resource};
use crate::resources::{self, SearchResult};

pub const GREETING: &str = "Hello!";
pub const CHAT_FAILED: &str = "Error fetching response.";
const INVALID_PARTICIPANT: &str = "Please enter a valid Participant ID";
const INFO_FAILED: &str = "Error fetching background information";
const SEARCH_FAILED: &str = "Error fetching additional resources";
const UNSUPPORTED_RESOURCE: &str = "Resource type is not supported for API requests";
const MISSING_DAY_TOPIC: &str = "Please provide a topic";
const SEARCHABLE_KIND: &str = "YouTube";

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    /// A message that carried a plan. Only the one whose `load_id` matches the
    /// live tree is interactive.
    Plan { load_id: u64, raw: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub body: MessageBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Gate,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Form,
    Input,
    Plan,
}

#[derive(Debug, Clone)]
pub struct InfoModal {
    pub loading: bool,
    pub html: String,
    pub scroll: usize,
}

#[derive(Debug, Clone)]
pub struct ResourcePicker {
    pub target: Option<PickTarget>,
    pub loading: bool,
    pub results: Vec<SearchResult>,
    pub selected: usize,
}

#[derive(Debug, Clone)]
pub struct InlineEdit {
    pub selected: usize,
    pub editing: bool,
    pub input: String,
    pub error: Option<String>,
}

impl InlineEdit {
    pub fn field(&self) -> FormField {
        FormField::ALL[self.selected.min(FormField::ALL.len() - 1)]
    }
}

#[derive(Debug, Clone)]
pub enum Modal {
    Info(InfoModal),
    Resources(ResourcePicker),
    Edit(InlineEdit),
    /// Blocking prompt; any key dismisses it.
    Notice(String),
}

pub struct App {
    pub screen: Screen,
    pub gate_input: String,
    participant: Option<String>,
    pub counters: ParticipantCounters,
    tracker: Option<CounterTracker>,
    store: Arc<dyn CounterStore>,
    backend: Arc<dyn Backend>,
    event_tx: mpsc::UnboundedSender<AppEvent>,
    pub config: AppConfig,

    messages: Vec<Message>,
    pub messages_scroll: usize,
    pub messages_auto_scroll: bool,
    pub chat_area: Rect,

    pub form: FormState,
    pub form_visible: bool,
    submitted_form: Option<FormData>,
    pub input: String,
    pub cursor_pos: usize,
    pub focus: Focus,

    pub plan: PlanTree,
    pub plan_cursor: usize,
    /// Set when the cursor moved; the next draw scrolls it into view.
    pub reveal_plan_cursor: bool,

    pub stage: GenerationStage,
    generation_id: u64,
    generation_task: Option<JoinHandle<()>>,
    resource_task: Option<JoinHandle<()>>,
    pub chat_pending: bool,
    pub processing_start: Option<Instant>,
    pub spinner_frame: usize,

    pub modal: Option<Modal>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        event_tx: mpsc::UnboundedSender<AppEvent>,
        backend: Arc<dyn Backend>,
        store: Arc<dyn CounterStore>,
        config: AppConfig,
    ) -> Self {
        let gate_input = config.participant_id().unwrap_or_default();
        Self {
            screen: Screen::Gate,
            gate_input,
            participant: None,
            counters: ParticipantCounters::default(),
            tracker: None,
            store,
            backend,
            event_tx,
            config,
            messages: vec![Message {
                role: Role::Bot,
                body: MessageBody::Text(GREETING.to_string()),
            }],
            messages_scroll: 0,
            messages_auto_scroll: true,
            chat_area: Rect::default(),
            form: FormState::default(),
            form_visible: true,
            submitted_form: None,
            input: String::new(),
            cursor_pos: 0,
            focus: Focus::Form,
            plan: PlanTree::new(),
            plan_cursor: 0,
            reveal_plan_cursor: false,
            stage: GenerationStage::Idle,
            generation_id: 0,
            generation_task: None,
            resource_task: None,
            chat_pending: false,
            processing_start: None,
            spinner_frame: 0,
            modal: None,
            should_quit: false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn participant(&self) -> Option<&str> {
        self.participant.as_deref()
    }

    pub fn counter_tracker(&self) -> Option<&CounterTracker> {
        self.tracker.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.stage.is_awaiting() || self.chat_pending
    }

    pub fn tick(&mut self) {
        if self.is_busy() {
            self.spinner_frame = self.spinner_frame.wrapping_add(1);
        }
    }

    fn notice(&mut self, text: impl Into<String>) {
        self.modal = Some(Modal::Notice(text.into()));
    }

    fn push_message(&mut self, role: Role, body: MessageBody) {
        self.messages.push(Message { role, body });
        self.scroll_messages_to_bottom();
    }

    fn scroll_messages_to_bottom(&mut self) {
        self.messages_auto_scroll = true;
    }

    /// Leaves the gate for the chat. Counters are read (or created) in the
    /// background.
    pub fn enter_participant(&mut self, id: &str) {
        let id = id.trim();
        if id.is_empty() {
            self.notice(INVALID_PARTICIPANT);
            return;
        }
        tracing::info!(participant = %id, "participant entered");
        let tracker = CounterTracker::new(self.store.clone(), id);
        self.participant = Some(id.to_string());
        self.screen = Screen::Chat;
        self.focus = Focus::Form;

        let tx = self.event_tx.clone();
        let loader = tracker.clone();
        tokio::spawn(async move {
            let counters = loader.load().await;
            let _ = tx.send(AppEvent::CountersLoaded(counters));
        });
        self.tracker = Some(tracker);
    }

    /// Bumps the local mirror right away and queues the store increment.
    fn count(&mut self, field: CounterField) {
        self.counters.bump(field);
        if let Some(tracker) = self.tracker.clone() {
            tokio::spawn(async move {
                tracker.record(field).await;
            });
        }
    }

    /// Form values as currently shown, including the field being typed in.
    fn current_form(&self) -> FormData {
        if self.form_visible {
            let mut form = self.form.clone();
            let _ = form.commit();
            form.data
        } else {
            self.submitted_form
                .clone()
                .unwrap_or_else(|| self.form.data.clone())
        }
    }

    fn submit_form(&mut self) {
        let data = match self.form.submit() {
            Ok(data) => data,
            Err(e) => {
                self.notice(e.to_string());
                return;
            }
        };
        let message = data.request_message();
        self.push_message(Role::User, MessageBody::Text(message.clone()));
        self.submitted_form = Some(data);
        self.start_generation(GenerationOrigin::Form, message);
    }

    /// Starts a generation run. A run already in flight is aborted and any
    /// late events from it are ignored.
    fn start_generation(&mut self, origin: GenerationOrigin, message: String) {
        let Some(participant) = self.participant.clone() else {
            return;
        };
        if let Some(task) = self.generation_task.take() {
            tracing::info!(superseded = self.generation_id, "cancelling in-flight generation");
            task.abort();
        }
        self.generation_id += 1;
        let id = self.generation_id;
        self.stage = GenerationStage::AwaitingInitial;
        self.processing_start = Some(Instant::now());
        self.scroll_messages_to_bottom();

        let backend = self.backend.clone();
        let tx = self.event_tx.clone();
        self.generation_task = Some(tokio::spawn(async move {
            let stage_tx = tx.clone();
            let result = run_generation(backend.as_ref(), &participant, &message, move |stage| {
                let _ = stage_tx.send(AppEvent::GenerationStage { id, stage });
            })
            .await;
            let _ = tx.send(AppEvent::GenerationFinished {
                id,
                origin,
                result: result.map_err(|e| e.to_string()),
            });
        }));
    }

    fn send_chat(&mut self) {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return;
        }
        let Some(participant) = self.participant.clone() else {
            return;
        };
        self.input.clear();
        self.cursor_pos = 0;
        self.push_message(Role::User, MessageBody::Text(text.clone()));
        self.chat_pending = true;
        self.processing_start = Some(Instant::now());

        let backend = self.backend.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = backend.respond(&participant, &text).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "follow-up message failed");
            }
            let _ = tx.send(AppEvent::ChatReply(result.map_err(|e| e.to_string())));
        });
    }

    /// Appends a bot reply. A reply carrying a plan becomes the live plan.
    fn push_bot_text(&mut self, text: String) {
        match parse_plan(&text) {
            Some(doc) => {
                let load_id = self.load_plan(doc);
                self.push_message(Role::Bot, MessageBody::Plan { load_id, raw: text });
            }
            None => self.push_message(Role::Bot, MessageBody::Text(text)),
        }
    }

    fn load_plan(&mut self, doc: PlanDocument) -> u64 {
        let load_id = self.plan.load(doc);
        self.plan_cursor = 0;
        self.start_resource_loading();
        load_id
    }

    /// Replaces the live plan in place, keeping its message in the
    /// conversation.
    fn replace_live_plan(&mut self, doc: PlanDocument, raw: String) {
        let old = self.plan.load_id();
        let load_id = self.load_plan(doc);
        let slot = self.messages.iter_mut().rev().find(
            |m| matches!(&m.body, MessageBody::Plan { load_id, .. } if *load_id == old),
        );
        match slot {
            Some(m) => m.body = MessageBody::Plan { load_id, raw },
            None => self.push_message(Role::Bot, MessageBody::Plan { load_id, raw }),
        }
    }

    /// Fetches stats and availability for every resource link not looked up
    /// yet in the live plan.
    fn start_resource_loading(&mut self) {
        let Some(participant) = self.participant.clone() else {
            return;
        };
        let form = self.current_form();
        let jobs = self.plan.resource_jobs(|topic| form.research_query(topic));
        if jobs.is_empty() {
            return;
        }
        if let Some(task) = self.resource_task.take() {
            task.abort();
        }
        let load_id = self.plan.load_id();
        let backend = self.backend.clone();
        let limit = self.config.max_concurrency();
        let tx = self.event_tx.clone();
        self.resource_task = Some(tokio::spawn(async move {
            resources::load_plan_resources(backend, &participant, jobs, limit, move |update| {
                let _ = tx.send(AppEvent::ResourceUpdated { load_id, update });
            })
            .await;
        }));
    }

    fn run_effects(&mut self, effects: Vec<PlanEffect>) {
        for effect in effects {
            match effect {
                PlanEffect::Count(field) => self.count(field),
                PlanEffect::FetchExplanation { week, day, topic } => {
                    let Some(participant) = self.participant.clone() else {
                        continue;
                    };
                    let load_id = self.plan.load_id();
                    let backend = self.backend.clone();
                    let tx = self.event_tx.clone();
                    tokio::spawn(async move {
                        let text = explain::day_explanation(backend.as_ref(), &participant, &topic).await;
                        let _ = tx.send(AppEvent::ExplanationLoaded {
                            load_id,
                            week,
                            day,
                            text,
                        });
                    });
                }
                PlanEffect::FetchWeekReasoning => {
                    let Some(participant) = self.participant.clone() else {
                        continue;
                    };
                    let load_id = self.plan.load_id();
                    let backend = self.backend.clone();
                    let tx = self.event_tx.clone();
                    tokio::spawn(async move {
                        let reasoning = explain::week_reasoning(backend.as_ref(), &participant).await;
                        let _ = tx.send(AppEvent::WeekReasoningLoaded { load_id, reasoning });
                    });
                }
            }
        }
    }

    fn open_info(&mut self) {
        let form = self.current_form();
        let topic = match form.require_topic() {
            Ok(t) => t.to_string(),
            Err(e) => {
                self.notice(e.to_string());
                return;
            }
        };
        self.modal = Some(Modal::Info(InfoModal {
            loading: true,
            html: String::new(),
            scroll: 0,
        }));
        let backend = self.backend.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let message = format!(
                "Can you explain more about the background knowledge levels for the topic: {}?",
                topic
            );
            let result = backend.info(&message).await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::InfoLoaded(result));
        });
    }

    /// Opens the picker with a search for `query`. With a target, picking a
    /// result replaces that day's resource.
    fn open_search(&mut self, query: String, target: Option<PickTarget>) {
        let participant = self.participant.clone();
        self.modal = Some(Modal::Resources(ResourcePicker {
            target: target.clone(),
            loading: true,
            results: Vec::new(),
            selected: 0,
        }));
        let backend = self.backend.clone();
        let limit = self.config.max_concurrency();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            // Day searches go out without a participant id; topic searches
            // carry it.
            let participant = if target.is_none() {
                participant
            } else {
                None
            };
            let result = resources::search_videos(backend, &query, participant.as_deref(), limit)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::SearchLoaded { target, result });
        });
    }

    fn open_topic_search(&mut self) {
        let form = self.current_form();
        match form.require_topic() {
            Ok(topic) => self.open_search(topic.to_string(), None),
            Err(e) => self.notice(e.to_string()),
        }
    }

    fn open_day_search(&mut self, week: &str, day_index: usize, kind: &str) {
        if kind != SEARCHABLE_KIND {
            self.notice(UNSUPPORTED_RESOURCE);
            return;
        }
        let Some(topic) = self
            .plan
            .plan()
            .and_then(|p| p.day(week, day_index))
            .map(|d| d.topic.clone())
        else {
            return;
        };
        if topic.trim().is_empty() {
            self.notice(MISSING_DAY_TOPIC);
            return;
        }
        let query = self.current_form().research_query(&topic);
        self.open_search(
            query,
            Some(PickTarget {
                week: week.to_string(),
                day_index,
                kind: kind.to_string(),
            }),
        );
    }

    fn pick_result(&mut self) {
        let picker = match self.modal.take() {
            Some(Modal::Resources(picker)) => picker,
            other => {
                self.modal = other;
                return;
            }
        };
        let chosen = picker
            .target
            .clone()
            .zip(picker.results.get(picker.selected).cloned());
        let Some((target, result)) = chosen else {
            // Topic searches are browse-only.
            self.modal = Some(Modal::Resources(picker));
            return;
        };
        let resource = Resource {
            link: result.link,
            title: result.title,
            thumbnail: Some(result.thumbnail),
            views: result.views,
            likes: result.likes,
        };
        if self
            .plan
            .replace_resource(&target.week, target.day_index, &target.kind, resource)
        {
            self.count(CounterField::Select);
            self.sync_plan_message();
            self.start_resource_loading();
        }
    }

    /// Rewrites the live plan's message from the tree after a local edit.
    fn sync_plan_message(&mut self) {
        let Some(doc) = self.plan.document() else {
            return;
        };
        let raw = format!("```json\n{}\n```", doc.to_pretty_json());
        let live = self.plan.load_id();
        if let Some(m) = self.messages.iter_mut().rev().find(
            |m| matches!(&m.body, MessageBody::Plan { load_id, .. } if *load_id == live),
        ) {
            m.body = MessageBody::Plan { load_id: live, raw };
        }
    }

    fn open_inline_edit(&mut self) {
        if self.submitted_form.is_none() {
            return;
        }
        self.modal = Some(Modal::Edit(InlineEdit {
            selected: 0,
            editing: false,
            input: String::new(),
            error: None,
        }));
    }

    /// The form values an inline edit starts from.
    pub fn editable_form(&self) -> Option<&FormData> {
        self.submitted_form.as_ref()
    }

    fn apply_inline_edit(&mut self, edit: &mut InlineEdit) -> bool {
        let Some(current) = self.submitted_form.clone() else {
            return true;
        };
        let next = match current.with_edit(edit.field(), &edit.input) {
            Ok(next) => next,
            Err(e) => {
                edit.error = Some(e.to_string());
                return false;
            }
        };
        if next == current {
            return true;
        }
        let message = next.request_message();
        self.submitted_form = Some(next);
        self.count(CounterField::Inline);
        self.start_generation(GenerationOrigin::InlineEdit, message);
        true
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Input(key) => self.handle_key(key),
            AppEvent::Mouse(mouse) => self.handle_mouse(mouse),
            AppEvent::CountersLoaded(stored) => {
                // Increments made before the read landed are already in the
                // store, so take the larger of each pair.
                let mut merged = stored;
                for field in CounterField::ALL {
                    while merged.get(field) < self.counters.get(field) {
                        merged.bump(field);
                    }
                }
                self.counters = merged;
            }
            AppEvent::GenerationStage { id, stage } => {
                if id == self.generation_id {
                    self.stage = stage;
                }
            }
            AppEvent::GenerationFinished { id, origin, result } => {
                if id != self.generation_id {
                    tracing::debug!(id, current = self.generation_id, "dropping stale generation result");
                    return;
                }
                self.generation_task = None;
                self.processing_start = None;
                match result {
                    Ok(outcome) => {
                        self.stage = GenerationStage::Done;
                        let text = outcome.plan_text(origin).to_string();
                        match origin {
                            GenerationOrigin::Form => {
                                self.count(CounterField::Submit);
                                self.push_bot_text(text);
                                self.form_visible = false;
                                self.focus = if self.plan.is_loaded() {
                                    Focus::Plan
                                } else {
                                    Focus::Input
                                };
                            }
                            GenerationOrigin::InlineEdit => match parse_plan(&text) {
                                Some(doc) => self.replace_live_plan(doc, text),
                                None => self.push_bot_text(text),
                            },
                        }
                    }
                    Err(_) => {
                        self.stage = GenerationStage::Error;
                        self.push_message(
                            Role::Bot,
                            MessageBody::Text(GENERATION_FAILED.to_string()),
                        );
                    }
                }
            }
            AppEvent::ChatReply(result) => {
                self.chat_pending = false;
                self.processing_start = None;
                match result {
                    Ok(text) => {
                        self.count(CounterField::Send);
                        self.push_bot_text(text);
                    }
                    Err(_) => {
                        self.push_message(Role::Bot, MessageBody::Text(CHAT_FAILED.to_string()))
                    }
                }
            }
            AppEvent::InfoLoaded(result) => {
                let Some(Modal::Info(info)) = self.modal.as_mut() else {
                    return;
                };
                match result {
                    Ok(html) => {
                        info.loading = false;
                        info.html = html;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "info request failed");
                        self.notice(INFO_FAILED);
                    }
                }
            }
            AppEvent::SearchLoaded { target, result } => {
                let Some(Modal::Resources(picker)) = self.modal.as_mut() else {
                    return;
                };
                if picker.target != target || !picker.loading {
                    return;
                }
                match result {
                    Ok(results) => {
                        picker.loading = false;
                        picker.results = results;
                        picker.selected = 0;
                        if target.is_some() {
                            self.count(CounterField::AdditionalResources);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "resource search failed");
                        self.notice(SEARCH_FAILED);
                    }
                }
            }
            AppEvent::ExplanationLoaded {
                load_id,
                week,
                day,
                text,
            } => {
                if load_id == self.plan.load_id() {
                    self.plan.set_explanation(&week, &day, text);
                }
            }
            AppEvent::WeekReasoningLoaded { load_id, reasoning } => {
                if load_id == self.plan.load_id() {
                    self.plan.set_week_reasoning(reasoning);
                }
            }
            AppEvent::ResourceUpdated { load_id, update } => {
                if load_id == self.plan.load_id() {
                    self.plan.apply_resource_update(update);
                }
            }
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        let area = self.chat_area;
        let inside = mouse.column >= area.x
            && mouse.column < area.right()
            && mouse.row >= area.y
            && mouse.row < area.bottom();
        if !inside {
            return;
        }
        match mouse.kind {
            MouseEventKind::ScrollUp => {
                self.messages_auto_scroll = false;
                self.messages_scroll = self.messages_scroll.saturating_sub(3);
            }
            MouseEventKind::ScrollDown => {
                self.messages_scroll = self.messages_scroll.saturating_add(3);
            }
            _ => {}
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        if self.modal.is_some() {
            self.handle_modal_key(key);
            return;
        }
        match self.screen {
            Screen::Gate => self.handle_gate_key(key),
            Screen::Chat => self.handle_chat_key(key),
        }
    }

    fn handle_gate_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Enter => {
                let id = self.gate_input.clone();
                self.enter_participant(&id);
            }
            KeyCode::Backspace => {
                self.gate_input.pop();
            }
            KeyCode::Char(c) => self.gate_input.push(c),
            _ => {}
        }
    }

    fn handle_chat_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.should_quit = true;
                return;
            }
            KeyCode::F(2) => {
                self.open_info();
                return;
            }
            KeyCode::F(3) => {
                self.open_topic_search();
                return;
            }
            KeyCode::PageUp => {
                self.messages_auto_scroll = false;
                self.messages_scroll = self.messages_scroll.saturating_sub(10);
                return;
            }
            KeyCode::PageDown => {
                self.messages_scroll = self.messages_scroll.saturating_add(10);
                return;
            }
            KeyCode::Tab | KeyCode::BackTab => {
                self.cycle_focus();
                return;
            }
            _ => {}
        }
        match self.focus {
            Focus::Form => self.handle_form_key(key),
            Focus::Input => self.handle_input_key(key),
            Focus::Plan => self.handle_plan_key(key),
        }
    }

    fn cycle_focus(&mut self) {
        let text_focus = if self.form_visible {
            Focus::Form
        } else {
            Focus::Input
        };
        self.focus = match self.focus {
            Focus::Plan => text_focus,
            _ if self.plan.is_loaded() => Focus::Plan,
            _ => text_focus,
        };
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('s') {
            self.submit_form();
            return;
        }
        match key.code {
            KeyCode::Enter => {
                if self.form.is_last() {
                    self.submit_form();
                } else {
                    self.form.advance();
                }
            }
            KeyCode::Down => {
                self.form.advance();
            }
            KeyCode::Up => self.form.retreat(),
            KeyCode::Left => self.form.cycle_background(false),
            KeyCode::Right => self.form.cycle_background(true),
            KeyCode::Backspace => self.form.backspace(),
            KeyCode::Char(c) => self.form.push_char(c),
            _ => {}
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                if !self.chat_pending {
                    self.send_chat();
                }
            }
            KeyCode::Backspace => {
                if self.cursor_pos > 0 {
                    let prev = self.input[..self.cursor_pos]
                        .char_indices()
                        .next_back()
                        .map(|(i, _)| i)
                        .unwrap_or(0);
                    self.input.replace_range(prev..self.cursor_pos, "");
                    self.cursor_pos = prev;
                }
            }
            KeyCode::Left => {
                self.cursor_pos = self.input[..self.cursor_pos]
                    .char_indices()
                    .next_back()
                    .map(|(i, _)| i)
                    .unwrap_or(0);
            }
            KeyCode::Right => {
                if let Some(c) = self.input[self.cursor_pos..].chars().next() {
                    self.cursor_pos += c.len_utf8();
                }
            }
            KeyCode::Home => self.cursor_pos = 0,
            KeyCode::End => self.cursor_pos = self.input.len(),
            KeyCode::Char(c) => {
                self.input.insert(self.cursor_pos, c);
                self.cursor_pos += c.len_utf8();
            }
            _ => {}
        }
    }

    pub fn selected_row(&self) -> Option<PlanRow> {
        self.plan.visible_rows().get(self.plan_cursor).cloned()
    }

    fn clamp_plan_cursor(&mut self) {
        let len = self.plan.visible_rows().len();
        self.plan_cursor = self.plan_cursor.min(len.saturating_sub(1));
    }

    fn handle_plan_key(&mut self, key: KeyEvent) {
        let rows = self.plan.visible_rows();
        if rows.is_empty() {
            return;
        }
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.plan_cursor = self.plan_cursor.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.plan_cursor = (self.plan_cursor + 1).min(rows.len() - 1);
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                if let Some(row) = rows.get(self.plan_cursor).cloned() {
                    self.activate_row(row);
                }
            }
            KeyCode::Char('x') => {
                if let Some(PlanRow::Day { week, day_index }) = rows.get(self.plan_cursor) {
                    self.plan.toggle_completed(week, *day_index);
                }
            }
            KeyCode::Char('r') => match rows.get(self.plan_cursor).cloned() {
                Some(PlanRow::Resource {
                    week,
                    day_index,
                    kind,
                    ..
                }) => self.open_day_search(&week, day_index, &kind),
                Some(PlanRow::Day { week, day_index }) => {
                    self.open_day_search(&week, day_index, SEARCHABLE_KIND)
                }
                _ => {}
            },
            KeyCode::Char('e') => self.open_inline_edit(),
            _ => {}
        }
        self.scroll_to_plan_cursor();
    }

    fn scroll_to_plan_cursor(&mut self) {
        self.messages_auto_scroll = false;
        self.reveal_plan_cursor = true;
    }

    fn activate_row(&mut self, row: PlanRow) {
        let effects = match row {
            PlanRow::Overview { week } => self.plan.toggle_overview(&week),
            PlanRow::Week { week } => self.plan.toggle_week(&week),
            PlanRow::Day { week, day_index } => self.plan.toggle_day(&week, day_index),
            PlanRow::Resource {
                week,
                day_index,
                kind,
                ..
            } => {
                self.open_day_search(&week, day_index, &kind);
                Vec::new()
            }
        };
        self.run_effects(effects);
        self.clamp_plan_cursor();
    }

    fn handle_modal_key(&mut self, key: KeyEvent) {
        let Some(modal) = self.modal.take() else {
            return;
        };
        match modal {
            Modal::Notice(_) => {}
            Modal::Info(mut info) => match key.code {
                KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') => {}
                KeyCode::Up => {
                    info.scroll = info.scroll.saturating_sub(1);
                    self.modal = Some(Modal::Info(info));
                }
                KeyCode::Down => {
                    info.scroll = info.scroll.saturating_add(1);
                    self.modal = Some(Modal::Info(info));
                }
                _ => self.modal = Some(Modal::Info(info)),
            },
            Modal::Resources(mut picker) => match key.code {
                KeyCode::Esc | KeyCode::Char('q') => {}
                KeyCode::Up => {
                    picker.selected = picker.selected.saturating_sub(1);
                    self.modal = Some(Modal::Resources(picker));
                }
                KeyCode::Down => {
                    if picker.selected + 1 < picker.results.len() {
                        picker.selected += 1;
                    }
                    self.modal = Some(Modal::Resources(picker));
                }
                KeyCode::Enter => {
                    self.modal = Some(Modal::Resources(picker));
                    self.pick_result();
                }
                _ => self.modal = Some(Modal::Resources(picker)),
            },
            Modal::Edit(mut edit) => {
                if self.handle_edit_key(&mut edit, key) {
                    self.modal = Some(Modal::Edit(edit));
                }
            }
        }
    }

    /// Returns whether the edit dialog stays open.
    fn handle_edit_key(&mut self, edit: &mut InlineEdit, key: KeyEvent) -> bool {
        if !edit.editing {
            match key.code {
                KeyCode::Esc => return false,
                KeyCode::Up => edit.selected = edit.selected.saturating_sub(1),
                KeyCode::Down => edit.selected = (edit.selected + 1).min(FormField::ALL.len() - 1),
                KeyCode::Enter => {
                    edit.editing = true;
                    edit.error = None;
                    edit.input = self
                        .submitted_form
                        .as_ref()
                        .map(|f| f.value(edit.field()))
                        .unwrap_or_default();
                }
                _ => {}
            }
            return true;
        }

        let field = edit.field();
        match key.code {
            KeyCode::Esc => {
                edit.editing = false;
                edit.error = None;
            }
            KeyCode::Enter => return !self.apply_inline_edit(edit),
            KeyCode::Left | KeyCode::Right if field == FormField::Background => {
                let level = BackgroundLevel::parse(&edit.input).unwrap_or_default();
                let level = if key.code == KeyCode::Right {
                    level.next()
                } else {
                    level.prev()
                };
                edit.input = level.label().to_string();
            }
            KeyCode::Backspace if field != FormField::Background => {
                edit.input.pop();
            }
            KeyCode::Char(c) if field != FormField::Background => {
                if !field.is_numeric() || c.is_ascii_digit() {
                    edit.input.push(c);
                }
            }
            _ => {}
        }
        true
    }
}
