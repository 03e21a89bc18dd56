use ratatui::{
    layout::Margin,
    prelude::*,
    widgets::{Block, BorderType, Borders, Clear, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
};

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::app::{App, Focus, InlineEdit, Message, MessageBody, Modal, ResourcePicker, Role, Screen};
use crate::form::FormField;
use crate::markdown;
use crate::plan::state::EXPLANATION_LOADING;
use crate::plan::PlanRow;
use crate::resources::{format_count, NO_RESOURCES_FOUND};
use crate::theme::Palette;

const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[derive(Clone, Copy)]
struct Fill {
    style: Style,
}

impl Widget for Fill {
    fn render(self, area: Rect, buf: &mut Buffer) {
        buf.set_style(area, self.style);
    }
}

pub fn ui(frame: &mut Frame, app: &mut App) {
    let pal = Palette::from_config(&app.config);
    frame.render_widget(Fill { style: pal.text() }, frame.area());

    match app.screen {
        Screen::Gate => render_gate(frame, app, &pal),
        Screen::Chat => render_chat(frame, app, &pal),
    }

    if let Some(modal) = app.modal.clone() {
        render_modal(frame, app, &modal, &pal);
    }
}

fn render_gate(frame: &mut Frame, app: &App, pal: &Palette) {
    let area = centered_fixed(52, 7, frame.area());
    frame.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(pal.border_style())
        .title(Span::styled(" planglow ", pal.accent()));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let lines = vec![
        Line::from(Span::styled("Participant ID", pal.meta())),
        Line::from(vec![
            Span::styled("> ", pal.accent()),
            Span::raw(app.gate_input.clone()),
        ]),
        Line::from(""),
        Line::from(Span::styled("ENTER continue │ ESC quit", pal.meta())),
    ];
    frame.render_widget(Paragraph::new(lines), inner.inner(Margin { horizontal: 1, vertical: 0 }));

    if app.modal.is_none() {
        let x = inner.x + 3 + UnicodeWidthStr::width(app.gate_input.as_str()) as u16;
        frame.set_cursor_position((x.min(inner.right().saturating_sub(1)), inner.y + 1));
    }
}

fn render_chat(frame: &mut Frame, app: &mut App, pal: &Palette) {
    let bottom_height = if app.form_visible { 10 } else { 3 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(bottom_height),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_transcript(frame, app, chunks[0], pal);
    if app.form_visible {
        render_form(frame, app, chunks[1], pal);
    } else {
        render_input(frame, app, chunks[1], pal);
    }
    render_status(frame, app, chunks[2], pal);
}

fn render_transcript(frame: &mut Frame, app: &mut App, area: Rect, pal: &Palette) {
    app.chat_area = area;
    let width = area.width.saturating_sub(3) as usize;

    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut cursor_line = None;
    for message in app.messages() {
        lines.push(message_header(message, pal));
        match &message.body {
            MessageBody::Text(text) => match message.role {
                Role::User => lines.extend(markdown::wrap_spans(
                    vec![Span::styled(text.clone(), pal.text())],
                    None,
                    pal.markdown(),
                    width,
                )),
                Role::Bot => lines.extend(markdown::render(text, pal.markdown(), width)),
            },
            MessageBody::Plan { load_id, .. } if *load_id == app.plan.load_id() => {
                let (plan_lines, cursor) = plan_lines(app, pal, width);
                cursor_line = cursor.map(|c| c + lines.len());
                lines.extend(plan_lines);
            }
            MessageBody::Plan { .. } => {
                lines.push(Line::from(Span::styled(
                    "Study plan (replaced by a newer version)",
                    pal.meta().italic(),
                )));
            }
        }
        lines.push(Line::from(""));
    }

    if app.is_busy() {
        let frame_idx = app.spinner_frame % SPINNER_FRAMES.len();
        let label = if app.stage.is_awaiting() {
            app.stage.label()
        } else {
            "thinking"
        };
        let elapsed = app
            .processing_start
            .map(|t| format!(" {}s", t.elapsed().as_secs()))
            .unwrap_or_default();
        lines.push(Line::from(Span::styled(
            format!("{} {}…{}", SPINNER_FRAMES[frame_idx], label, elapsed),
            pal.accent(),
        )));
    }

    let total_lines = lines.len();
    let visible_height = area.height.saturating_sub(2) as usize;
    let max_scroll = total_lines.saturating_sub(visible_height);

    if app.reveal_plan_cursor {
        if let Some(line) = cursor_line {
            if line < app.messages_scroll {
                app.messages_scroll = line;
            } else if line >= app.messages_scroll + visible_height {
                app.messages_scroll = line + 1 - visible_height;
            }
        }
        app.reveal_plan_cursor = false;
    }
    if app.messages_auto_scroll {
        app.messages_scroll = max_scroll;
    } else {
        app.messages_scroll = app.messages_scroll.min(max_scroll);
    }

    let visible: Vec<Line<'static>> = lines
        .into_iter()
        .skip(app.messages_scroll)
        .take(visible_height)
        .collect();

    let title = match app.participant() {
        Some(p) => format!(" planglow · {} ", p),
        None => " planglow ".to_string(),
    };
    let border = if app.focus == Focus::Plan {
        pal.accent()
    } else {
        pal.border_style()
    };
    let widget = Paragraph::new(visible).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .title(title),
    );
    frame.render_widget(widget, area);

    let mut scrollbar_state = ScrollbarState::new(total_lines.max(1)).position(app.messages_scroll);
    let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
        .begin_symbol(None)
        .end_symbol(None)
        .track_symbol(Some("░"))
        .thumb_symbol("█");
    frame.render_stateful_widget(
        scrollbar,
        area.inner(Margin {
            vertical: 1,
            horizontal: 0,
        }),
        &mut scrollbar_state,
    );
}

fn message_header(message: &Message, pal: &Palette) -> Line<'static> {
    let (name, style) = match message.role {
        Role::User => ("You", pal.user),
        Role::Bot => ("Bot", pal.bot),
    };
    Line::from(Span::styled(name, style))
}

/// Lines for the live plan, plus the offset of the cursor row when the plan
/// has focus.
fn plan_lines(app: &App, pal: &Palette, width: usize) -> (Vec<Line<'static>>, Option<usize>) {
    let mut lines = Vec::new();
    let mut cursor = None;
    let Some(doc) = app.plan.document() else {
        return (lines, cursor);
    };
    let md = pal.markdown();
    let focused = app.focus == Focus::Plan && app.modal.is_none();

    lines.push(Line::from(Span::styled("Study plan", pal.accent().bold())));
    for (idx, row) in app.plan.visible_rows().into_iter().enumerate() {
        let selected = focused && idx == app.plan_cursor;
        if selected {
            cursor = Some(lines.len());
        }
        let mut row_lines: Vec<Line<'static>> = Vec::new();
        let mut detail: Vec<Line<'static>> = Vec::new();
        match &row {
            PlanRow::Overview { week } => {
                let open = app.plan.is_overview_open(week);
                let summary = doc
                    .overview
                    .iter()
                    .find(|(w, _)| w == week)
                    .map(|(_, s)| s.clone())
                    .unwrap_or_default();
                row_lines.push(Line::from(vec![
                    Span::styled(if open { "▾ " } else { "▸ " }, pal.accent()),
                    Span::styled(format!("{}: ", week), pal.text().bold()),
                    Span::styled(summary, pal.text()),
                ]));
                if open {
                    match app.plan.week_reasoning(week) {
                        Some(text) => {
                            detail.extend(markdown::render(&text, md, width.saturating_sub(4)))
                        }
                        None if app.plan.is_reasoning_pending() => detail.push(Line::from(
                            Span::styled("Loading reasoning...", pal.meta().italic()),
                        )),
                        None => {}
                    }
                }
            }
            PlanRow::Week { week } => {
                let open = app.plan.is_week_open(week);
                row_lines.push(Line::from(vec![
                    Span::styled(if open { "▾ " } else { "▸ " }, pal.accent()),
                    Span::styled(week.clone(), pal.accent().bold()),
                ]));
            }
            PlanRow::Day { week, day_index } => {
                let Some(day) = app.plan.plan().and_then(|p| p.day(week, *day_index)) else {
                    continue;
                };
                let done = app.plan.is_completed(week, *day_index);
                let open = app.plan.is_day_open(week, &day.day);
                let text_style = if done { pal.done } else { pal.text() };
                row_lines.push(Line::from(vec![
                    Span::raw("  "),
                    Span::styled(if done { "☑ " } else { "☐ " }, pal.accent()),
                    Span::styled(format!("{} · {}", day.day, day.topic), text_style.bold()),
                    Span::styled(format!("  {}", day.time), pal.meta()),
                ]));
                if open {
                    let text = app
                        .plan
                        .explanation(week, &day.day)
                        .unwrap_or(EXPLANATION_LOADING)
                        .to_string();
                    detail.extend(markdown::render(&text, md, width.saturating_sub(6)));
                }
            }
            PlanRow::Resource {
                week,
                day_index,
                kind,
                item,
            } => {
                let Some(resource) = app
                    .plan
                    .plan()
                    .and_then(|p| p.day(week, *day_index))
                    .and_then(|d| d.group(kind))
                    .and_then(|g| g.items.get(*item))
                else {
                    continue;
                };
                let (views, likes) = match app.plan.video_status(&resource.link) {
                    Some(status) => (status.views.clone(), status.likes.clone()),
                    None => (resource.views.clone(), resource.likes.clone()),
                };
                let availability = match app.plan.availability(&resource.link) {
                    None => Span::styled("checking…", pal.meta()),
                    Some(a) if a.exists => Span::styled("✓ available", pal.accent()),
                    Some(a) => Span::styled(
                        format!("✗ {}", a.message.clone().unwrap_or_else(|| "unavailable".into())),
                        pal.warning,
                    ),
                };
                let title = if resource.title.is_empty() {
                    resource.link.clone()
                } else {
                    resource.title.clone()
                };
                row_lines.push(Line::from(vec![
                    Span::raw("      "),
                    Span::styled(format!("[{}] ", kind), pal.meta()),
                    Span::styled(truncate_to_width(&title, width.saturating_sub(16)), pal.text()),
                ]));
                row_lines.push(Line::from(vec![
                    Span::raw("        "),
                    Span::styled(
                        format!("{} views · {} likes · ", format_count(&views), format_count(&likes)),
                        pal.meta(),
                    ),
                    availability,
                ]));
                row_lines.push(Line::from(vec![
                    Span::raw("        "),
                    Span::styled(
                        truncate_to_width(&resource.link, width.saturating_sub(8)),
                        pal.meta().underlined(),
                    ),
                ]));
            }
        }

        if selected {
            for line in &mut row_lines {
                *line = line.clone().patch_style(pal.selection);
            }
        }
        lines.extend(row_lines);
        lines.extend(detail.into_iter().map(|l| indent(l, 6)));
    }
    (lines, cursor)
}

fn indent(line: Line<'static>, n: usize) -> Line<'static> {
    let mut spans = vec![Span::raw(" ".repeat(n))];
    spans.extend(line.spans);
    Line::from(spans)
}

fn render_form(frame: &mut Frame, app: &App, area: Rect, pal: &Palette) {
    let focused = app.focus == Focus::Form && app.modal.is_none();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(if focused { pal.accent() } else { pal.border_style() })
        .title(" Study plan request ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let form = &app.form;
    let mut lines = Vec::new();
    let mut cursor = None;
    for field in FormField::ALL {
        let active = field == form.field;
        let value = if active {
            form.buffer.clone()
        } else {
            form.data.value(field)
        };
        let marker = if active { "› " } else { "  " };
        let mut spans = vec![
            Span::styled(marker, pal.accent()),
            Span::styled(format!("{:<14}", field.label()), pal.meta()),
        ];
        if field == FormField::Background {
            spans.push(Span::styled(format!("◂ {} ▸", value), pal.text()));
        } else {
            if active {
                let x = inner.x + 16 + UnicodeWidthStr::width(value.as_str()) as u16;
                cursor = Some((x, inner.y + lines.len() as u16));
            }
            spans.push(Span::styled(value, pal.text()));
        }
        if active {
            spans.push(Span::styled(format!("   {}", field.prompt()), pal.meta().italic()));
        }
        lines.push(Line::from(spans));
    }
    lines.push(Line::from(vec![
        Span::styled(format!("  {:<14}", "Materials"), pal.meta()),
        Span::styled(
            form.data
                .study_materials
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            pal.text(),
        ),
    ]));
    match &form.error {
        Some(err) => lines.push(Line::from(Span::styled(err.clone(), pal.error))),
        None => lines.push(Line::from(Span::styled(
            "ENTER next │ CTRL+S submit │ F2 levels info │ F3 resources",
            pal.meta(),
        ))),
    }
    frame.render_widget(Paragraph::new(lines), inner);

    if focused && !app.is_busy() {
        if let Some(pos) = cursor {
            frame.set_cursor_position(pos);
        }
    }
}

fn render_input(frame: &mut Frame, app: &App, area: Rect, pal: &Palette) {
    let focused = app.focus == Focus::Input && app.modal.is_none();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(if focused { pal.accent() } else { pal.border_style() })
        .title(" Message ");
    let inner_width = area.width.saturating_sub(2) as usize;

    // Keep the cursor in view on long inputs.
    let before = &app.input[..app.cursor_pos];
    let cursor_col = UnicodeWidthStr::width(before);
    let skip_cols = cursor_col.saturating_sub(inner_width.saturating_sub(1));
    let mut shown = String::new();
    let mut col = 0;
    for ch in app.input.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if col >= skip_cols {
            shown.push(ch);
        }
        col += w;
    }

    let widget = Paragraph::new(shown).style(pal.text()).block(block);
    frame.render_widget(widget, area);

    if focused && !app.chat_pending {
        let x = area.x + 1 + (cursor_col - skip_cols) as u16;
        frame.set_cursor_position((x, area.y + 1));
    }
}

fn render_status(frame: &mut Frame, app: &App, area: Rect, pal: &Palette) {
    let hints = match app.focus {
        Focus::Form => " ESC quit │ TAB plan │ ↑↓ fields │ ←→ level",
        Focus::Input => " ESC quit │ TAB plan │ ENTER send │ PGUP/PGDN scroll",
        Focus::Plan => " ↑↓ move │ ENTER open │ X done │ R find resource │ E edit request │ TAB input",
    };
    let stage = format!(" {} ", app.stage);
    let width = area.width as usize;
    let hints = truncate_to_width(hints, width.saturating_sub(stage.len()));
    let pad = width.saturating_sub(UnicodeWidthStr::width(hints.as_str()) + stage.len());
    let line = Line::from(vec![
        Span::styled(hints, pal.meta()),
        Span::raw(" ".repeat(pad)),
        Span::styled(stage, pal.meta()),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn render_modal(frame: &mut Frame, app: &App, modal: &Modal, pal: &Palette) {
    match modal {
        Modal::Notice(text) => {
            let width = (UnicodeWidthStr::width(text.as_str()) as u16 + 6).clamp(30, 70);
            let area = centered_fixed(width, 5, frame.area());
            let block = popup_block(" Notice ", pal);
            let lines = vec![
                Line::from(Span::styled(text.clone(), pal.warning)),
                Line::from(""),
                Line::from(Span::styled("press any key", pal.meta())),
            ];
            frame.render_widget(Clear, area);
            frame.render_widget(
                Paragraph::new(lines).block(block).wrap(Wrap { trim: true }),
                area,
            );
        }
        Modal::Info(info) => {
            let area = centered_rect(70, 70, frame.area());
            let block = popup_block(" Background levels ", pal);
            let text = if info.loading {
                let frame_idx = app.spinner_frame % SPINNER_FRAMES.len();
                format!("{} Loading...", SPINNER_FRAMES[frame_idx])
            } else {
                markdown::html_to_text(&info.html)
            };
            frame.render_widget(Clear, area);
            frame.render_widget(
                Paragraph::new(text)
                    .style(pal.text())
                    .block(block.title_bottom(Span::styled(" ↑↓ scroll │ ESC close ", pal.meta())))
                    .wrap(Wrap { trim: false })
                    .scroll((info.scroll.min(u16::MAX as usize) as u16, 0)),
                area,
            );
        }
        Modal::Resources(picker) => render_picker(frame, app, picker, pal),
        Modal::Edit(edit) => render_edit(frame, app, edit, pal),
    }
}

fn render_picker(frame: &mut Frame, app: &App, picker: &ResourcePicker, pal: &Palette) {
    let area = centered_rect(80, 80, frame.area());
    let title = match &picker.target {
        Some(t) => format!(" Replace resource · {} day {} ", t.week, t.day_index + 1),
        None => " Resources ".to_string(),
    };
    let footer = if picker.target.is_some() {
        " ↑↓ move │ ENTER select │ ESC close "
    } else {
        " ↑↓ move │ ESC close "
    };
    let block = popup_block(&title, pal).title_bottom(Span::styled(footer, pal.meta()));
    let inner = block.inner(area);
    frame.render_widget(Clear, area);
    frame.render_widget(block, area);

    let width = inner.width.saturating_sub(2) as usize;
    let mut lines = Vec::new();
    let mut selected_line = 0;
    if picker.loading {
        let frame_idx = app.spinner_frame % SPINNER_FRAMES.len();
        lines.push(Line::from(Span::styled(
            format!("{} Searching...", SPINNER_FRAMES[frame_idx]),
            pal.meta(),
        )));
    } else if picker.results.is_empty() {
        lines.push(Line::from(Span::styled(NO_RESOURCES_FOUND, pal.meta())));
    } else {
        for (idx, result) in picker.results.iter().enumerate() {
            let selected = idx == picker.selected;
            if selected {
                selected_line = lines.len();
            }
            let mut entry = vec![
                Line::from(Span::styled(
                    truncate_to_width(&result.title, width),
                    pal.text().bold(),
                )),
                Line::from(Span::styled(
                    format!(
                        "{} views · {} likes",
                        format_count(&result.views),
                        format_count(&result.likes)
                    ),
                    pal.meta(),
                )),
                Line::from(Span::styled(truncate_to_width(&result.link, width), pal.meta().underlined())),
            ];
            if !result.description.is_empty() {
                entry.push(Line::from(Span::styled(
                    truncate_to_width(&result.description, width),
                    pal.meta().italic(),
                )));
            }
            if selected {
                entry = entry.into_iter().map(|l| l.patch_style(pal.selection)).collect();
            }
            lines.extend(entry);
            lines.push(Line::from(""));
        }
    }

    let height = inner.height as usize;
    let scroll = (selected_line + 4).saturating_sub(height);
    frame.render_widget(
        Paragraph::new(lines).scroll((scroll.min(u16::MAX as usize) as u16, 0)),
        inner.inner(Margin { horizontal: 1, vertical: 0 }),
    );
}

fn render_edit(frame: &mut Frame, app: &App, edit: &InlineEdit, pal: &Palette) {
    let area = centered_fixed(64, 12, frame.area());
    let footer = if edit.editing {
        " ENTER apply │ ESC back "
    } else {
        " ↑↓ field │ ENTER edit │ ESC close "
    };
    let block = popup_block(" Edit request ", pal).title_bottom(Span::styled(footer, pal.meta()));
    let inner = block.inner(area);
    frame.render_widget(Clear, area);
    frame.render_widget(block, area);

    let Some(form) = app.editable_form() else {
        return;
    };
    let mut lines = Vec::new();
    let mut cursor = None;
    for (idx, field) in FormField::ALL.into_iter().enumerate() {
        let selected = idx == edit.selected;
        let value = if selected && edit.editing {
            edit.input.clone()
        } else {
            form.value(field)
        };
        let mut line = Line::from(vec![
            Span::styled(if selected { "› " } else { "  " }, pal.accent()),
            Span::styled(format!("{:<14}", field.label()), pal.meta()),
            Span::styled(
                if selected && edit.editing && field == FormField::Background {
                    format!("◂ {} ▸", value)
                } else {
                    value.clone()
                },
                pal.text(),
            ),
        ]);
        if selected && edit.editing && field != FormField::Background {
            let x = inner.x + 17 + UnicodeWidthStr::width(value.as_str()) as u16;
            cursor = Some((x, inner.y + 1 + idx as u16));
        }
        if selected {
            line = line.patch_style(pal.selection);
        }
        lines.push(line);
    }
    lines.insert(0, Line::from(""));
    if let Some(err) = &edit.error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(err.clone(), pal.error)));
    }
    frame.render_widget(
        Paragraph::new(lines),
        inner.inner(Margin { horizontal: 1, vertical: 0 }),
    );
    if let Some(pos) = cursor {
        frame.set_cursor_position(pos);
    }
}

fn popup_block<'a>(title: &str, pal: &Palette) -> Block<'a> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(pal.accent())
        .title(Span::styled(title.to_string(), pal.accent().bold()))
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1]);

    horizontal[1]
}

fn centered_fixed(width: u16, height: u16, r: Rect) -> Rect {
    let width = width.min(r.width);
    let height = height.min(r.height);
    Rect {
        x: r.x + (r.width - width) / 2,
        y: r.y + (r.height - height) / 2,
        width,
        height,
    }
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }

    if width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used = used.saturating_add(w);
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_by_display_width() {
        assert_eq!(truncate_to_width("short", 10), "short");
        assert_eq!(truncate_to_width("a long title", 6), "a lon…");
        assert_eq!(truncate_to_width("日本語テキスト", 5), "日本…");
        assert_eq!(truncate_to_width("anything", 1), "…");
    }

    #[test]
    fn fixed_popup_fits_small_terminals() {
        let area = Rect::new(0, 0, 40, 10);
        let popup = centered_fixed(64, 12, area);
        assert_eq!(popup, Rect::new(0, 0, 40, 10));
        let popup = centered_fixed(20, 4, area);
        assert_eq!(popup, Rect::new(10, 3, 20, 4));
    }
}
