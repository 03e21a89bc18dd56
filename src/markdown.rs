use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::prelude::*;
use regex::Regex;
use std::sync::OnceLock;

use crate::theme::MarkdownTheme;

#[derive(Default, Clone, Copy)]
struct StyleState {
    bold: bool,
    italic: bool,
    strikethrough: bool,
    link: bool,
}

fn style_for_state(theme: MarkdownTheme, state: StyleState) -> Style {
    let mut style = Style::default().fg(theme.text);

    if state.link {
        style = style.fg(theme.link).underlined();
    }
    if state.bold {
        style = style.fg(theme.bold).bold();
    }
    if state.italic {
        style = style.fg(theme.italic).italic();
    }
    if state.strikethrough {
        style = style
            .fg(theme.strikethrough)
            .add_modifier(Modifier::CROSSED_OUT);
    }

    style
}

/// Renders markdown into wrapped lines. Single newlines inside a paragraph are
/// kept as line breaks; bot replies use them for layout.
pub fn render(text: &str, theme: MarkdownTheme, width: usize) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(text, options);

    let mut style_state = StyleState::default();
    let mut heading_level: Option<HeadingLevel> = None;
    let mut in_blockquote = false;

    let mut list_stack: Vec<(bool, usize)> = Vec::new(); // (ordered, counter)
    let mut in_list_item = false;
    let mut segments: Vec<Vec<Span<'static>>> = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut in_paragraph = false;

    let mut in_code_block = false;
    let mut code_lines: Vec<String> = Vec::new();

    let mut table_rows: Vec<Vec<String>> = Vec::new();
    let mut in_table = false;

    for event in parser {
        match event {
            Event::Start(tag) => match tag {
                Tag::Paragraph => {
                    // Paragraphs inside list items stay part of the item.
                    if !in_list_item {
                        in_paragraph = true;
                        segments.clear();
                        current.clear();
                    }
                }
                Tag::Heading { level, .. } => {
                    heading_level = Some(level);
                    in_paragraph = true;
                    segments.clear();
                    current.clear();
                }
                Tag::BlockQuote(_) => in_blockquote = true,
                Tag::List(start) => {
                    // A nested list flushes the parent item's text first.
                    if in_list_item {
                        if !current.is_empty() {
                            segments.push(std::mem::take(&mut current));
                        }
                        flush_list_item(&mut segments, &mut lines, &list_stack, theme, width, in_blockquote);
                    }
                    list_stack.push((start.is_some(), start.unwrap_or(1) as usize));
                }
                Tag::Item => {
                    in_list_item = true;
                    segments.clear();
                    current.clear();
                }
                Tag::Emphasis => style_state.italic = true,
                Tag::Strong => style_state.bold = true,
                Tag::Strikethrough => style_state.strikethrough = true,
                Tag::Link { .. } => style_state.link = true,
                Tag::CodeBlock(_) => {
                    in_code_block = true;
                    code_lines.clear();
                }
                Tag::Table(_) => {
                    in_table = true;
                    table_rows.clear();
                }
                Tag::TableHead | Tag::TableRow => table_rows.push(Vec::new()),
                Tag::TableCell => {
                    if let Some(row) = table_rows.last_mut() {
                        row.push(String::new());
                    }
                }
                _ => {}
            },
            Event::End(tag_end) => match tag_end {
                TagEnd::Paragraph if in_list_item => {
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                }
                TagEnd::Paragraph | TagEnd::Heading(_) => {
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                    flush_paragraph(
                        &mut segments,
                        &mut lines,
                        heading_level.take(),
                        theme,
                        width,
                        in_blockquote,
                    );
                    in_paragraph = false;
                }
                TagEnd::BlockQuote(_) => in_blockquote = false,
                TagEnd::List(_) => {
                    list_stack.pop();
                    if list_stack.is_empty() {
                        lines.push(Line::from(""));
                    }
                }
                TagEnd::Item => {
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                    flush_list_item(&mut segments, &mut lines, &list_stack, theme, width, in_blockquote);
                    if let Some((true, counter)) = list_stack.last_mut() {
                        *counter += 1;
                    }
                    in_list_item = false;
                }
                TagEnd::Emphasis => style_state.italic = false,
                TagEnd::Strong => style_state.bold = false,
                TagEnd::Strikethrough => style_state.strikethrough = false,
                TagEnd::Link => style_state.link = false,
                TagEnd::CodeBlock => {
                    let style = Style::default().fg(theme.code).bg(theme.code_bg);
                    for code_line in code_lines.drain(..) {
                        lines.push(Line::from(Span::styled(format!("  {}", code_line), style)));
                    }
                    in_code_block = false;
                    lines.push(Line::from(""));
                }
                TagEnd::Table => {
                    render_table(&table_rows, theme, width, &mut lines);
                    table_rows.clear();
                    in_table = false;
                    lines.push(Line::from(""));
                }
                _ => {}
            },
            Event::Text(text) => {
                if in_code_block {
                    code_lines.extend(text.lines().map(|l| l.to_string()));
                } else if in_table {
                    if let Some(cell) = table_rows.last_mut().and_then(|r| r.last_mut()) {
                        cell.push_str(&text);
                    }
                } else if in_list_item || in_paragraph {
                    current.push(Span::styled(text.to_string(), style_for_state(theme, style_state)));
                } else {
                    lines.push(Line::from(Span::styled(
                        text.to_string(),
                        style_for_state(theme, style_state),
                    )));
                }
            }
            Event::Code(code) => {
                let style = Style::default().fg(theme.code).bg(theme.code_bg);
                if in_table {
                    if let Some(cell) = table_rows.last_mut().and_then(|r| r.last_mut()) {
                        cell.push_str(&code);
                    }
                } else {
                    current.push(Span::styled(code.to_string(), style));
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                segments.push(std::mem::take(&mut current));
            }
            Event::Rule => {
                lines.push(Line::from(Span::styled(
                    "─".repeat(width.saturating_sub(4)),
                    Style::default().fg(theme.hr),
                )));
                lines.push(Line::from(""));
            }
            _ => {}
        }
    }

    while lines.last().is_some_and(|l| l.width() == 0) {
        lines.pop();
    }
    if lines.is_empty() && !text.trim().is_empty() {
        lines.push(Line::from(Span::styled(
            text.to_string(),
            Style::default().fg(theme.text),
        )));
    }

    lines
}

fn flush_paragraph(
    segments: &mut Vec<Vec<Span<'static>>>,
    out: &mut Vec<Line<'static>>,
    heading: Option<HeadingLevel>,
    theme: MarkdownTheme,
    width: usize,
    in_blockquote: bool,
) {
    for seg in segments.drain(..) {
        if seg.is_empty() {
            continue;
        }
        for line in wrap_spans(seg, None, theme, width) {
            if let Some(level) = heading {
                out.push(style_heading_line(line, level, theme));
            } else if in_blockquote {
                out.push(style_blockquote_line(line, theme));
            } else {
                out.push(line);
            }
        }
    }
    out.push(Line::from(""));
}

fn flush_list_item(
    segments: &mut Vec<Vec<Span<'static>>>,
    out: &mut Vec<Line<'static>>,
    list_stack: &[(bool, usize)],
    theme: MarkdownTheme,
    width: usize,
    in_blockquote: bool,
) {
    let Some(&(ordered, counter)) = list_stack.last() else {
        segments.clear();
        return;
    };
    let indent = " ".repeat(list_stack.len().saturating_sub(1) * 2);
    let marker = if ordered {
        format!("{}{}. ", indent, counter)
    } else {
        format!("{}• ", indent)
    };
    let continuation = " ".repeat(marker.chars().count());

    let mut first = true;
    for seg in segments.drain(..) {
        if seg.is_empty() {
            continue;
        }
        let prefix = if first { &marker } else { &continuation };
        first = false;
        for line in wrap_spans(seg, Some(prefix), theme, width) {
            if in_blockquote {
                out.push(style_blockquote_line(line, theme));
            } else {
                out.push(line);
            }
        }
    }
}

fn style_heading_line(line: Line<'static>, level: HeadingLevel, theme: MarkdownTheme) -> Line<'static> {
    let style = match level {
        HeadingLevel::H1 | HeadingLevel::H2 => Style::default().fg(theme.heading).bold().underlined(),
        HeadingLevel::H3 | HeadingLevel::H4 => Style::default().fg(theme.heading2).bold(),
        _ => Style::default().fg(theme.heading3),
    };

    Line::from(
        line.spans
            .into_iter()
            .map(|s| Span::styled(s.content.to_string(), style))
            .collect::<Vec<_>>(),
    )
}

fn style_blockquote_line(mut line: Line<'static>, theme: MarkdownTheme) -> Line<'static> {
    let mut spans = vec![Span::styled("┃ ", Style::default().fg(theme.blockquote_bar))];
    spans.extend(line.spans.into_iter().map(|s| {
        let style = s.style.fg(theme.blockquote).italic();
        Span::styled(s.content.to_string(), style)
    }));
    line.spans = spans;
    line
}

fn render_table(rows: &[Vec<String>], theme: MarkdownTheme, width: usize, lines: &mut Vec<Line<'static>>) {
    let num_cols = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if num_cols == 0 {
        return;
    }

    let mut col_widths: Vec<usize> = vec![0; num_cols];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            col_widths[i] = col_widths[i].max(cell.chars().count());
        }
    }

    let total_width: usize = col_widths.iter().sum::<usize>() + num_cols * 3 + 1;
    if total_width > width.saturating_sub(4) {
        let scale = width.saturating_sub(4) as f64 / total_width as f64;
        for w in &mut col_widths {
            *w = ((*w as f64) * scale).max(3.0) as usize;
        }
    }

    let border = Style::default().fg(theme.table_border);
    let rule = |left: char, mid: char, right: char| {
        let mut s = String::from(left);
        for (i, w) in col_widths.iter().enumerate() {
            s.push_str(&"─".repeat(*w + 2));
            s.push(if i + 1 < num_cols { mid } else { right });
        }
        Line::from(Span::styled(s, border))
    };

    lines.push(rule('┌', '┬', '┐'));
    for (row_idx, row) in rows.iter().enumerate() {
        let mut spans = vec![Span::styled("│", border)];
        for (i, w) in col_widths.iter().enumerate() {
            let cell: String = row.get(i).map(|s| s.as_str()).unwrap_or("").chars().take(*w).collect();
            let padding = w.saturating_sub(cell.chars().count());
            let style = if row_idx == 0 {
                Style::default().fg(theme.table_header).bold()
            } else {
                Style::default().fg(theme.text)
            };
            spans.push(Span::raw(" "));
            spans.push(Span::styled(cell, style));
            spans.push(Span::raw(" ".repeat(padding + 1)));
            spans.push(Span::styled("│", border));
        }
        lines.push(Line::from(spans));
        if row_idx == 0 && rows.len() > 1 {
            lines.push(rule('├', '┼', '┤'));
        }
    }
    lines.push(rule('└', '┴', '┘'));
}

/// Word-wraps spans to `width`. `prefix` goes on the first line; later lines
/// are indented to match.
pub fn wrap_spans(
    spans: Vec<Span<'static>>,
    prefix: Option<&str>,
    theme: MarkdownTheme,
    width: usize,
) -> Vec<Line<'static>> {
    if width == 0 {
        return vec![Line::from(spans)];
    }

    let mut lines = Vec::new();
    let mut current_line: Vec<Span<'static>> = Vec::new();
    let prefix_width = prefix.map(|p| p.chars().count()).unwrap_or(0);
    let mut current_width = prefix_width;
    let effective_width = width.saturating_sub(2).max(prefix_width + 1);

    if let Some(p) = prefix {
        current_line.push(Span::styled(p.to_string(), Style::default().fg(theme.list_marker)));
    }

    for span in spans {
        let style = span.style;
        for word in span.content.split_inclusive(' ') {
            let word_width = unicode_width::UnicodeWidthStr::width(word);

            if current_width + word_width > effective_width && current_width > prefix_width {
                lines.push(Line::from(std::mem::take(&mut current_line)));
                current_line.push(Span::raw(" ".repeat(prefix_width)));
                current_width = prefix_width;
            }

            current_line.push(Span::styled(word.to_string(), style));
            current_width += word_width;
        }
    }

    if !current_line.is_empty() {
        lines.push(Line::from(current_line));
    }
    if lines.is_empty() {
        lines.push(Line::from(""));
    }

    lines
}

fn html_patterns() -> &'static (Regex, Regex, Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex, Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("static regex"),
            Regex::new(r"(?i)<li[^>]*>").expect("static regex"),
            Regex::new(r"(?i)<br\s*/?>|</(p|div|li|h[1-6]|tr|ul|ol)>").expect("static regex"),
            Regex::new(r"<[^>]+>").expect("static regex"),
        )
    })
}

/// Plain text for an HTML fragment: block ends become line breaks, list
/// items get bullets and the common entities are decoded.
pub fn html_to_text(html: &str) -> String {
    let (blocks, items, breaks, tags) = html_patterns();
    let text = blocks.replace_all(html, "");
    let text = items.replace_all(&text, "• ");
    let text = breaks.replace_all(&text, "\n");
    let text = tags.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let mut out = String::new();
    let mut blank = true;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !blank {
                out.push('\n');
            }
            blank = true;
            continue;
        }
        out.push_str(line);
        out.push('\n');
        blank = false;
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::Palette;

    fn flat(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect::<String>())
            .collect()
    }

    #[test]
    fn heading_uses_theme_color() {
        let theme = Palette::default().markdown();
        let lines = render("### Reason for studying 'Loops':\nThey repeat work.", theme, 80);
        let first = lines.first().expect("rendered");
        assert!(first.spans.iter().all(|s| s.style.fg == Some(theme.heading2)));
        assert_eq!(flat(&lines)[2], "They repeat work.");
    }

    #[test]
    fn soft_breaks_become_line_breaks() {
        let theme = Palette::default().markdown();
        let lines = render("Week 1\n- Content selection: basics", theme, 80);
        let text = flat(&lines);
        assert_eq!(text[0].trim_end(), "Week 1");
    }

    #[test]
    fn list_items_get_markers_and_wrap() {
        let theme = Palette::default().markdown();
        let lines = render("1. first item with several words\n2. second", theme, 16);
        let text = flat(&lines);
        assert!(text[0].starts_with("1. first"));
        assert!(text.iter().any(|l| l.starts_with("   ")));
        assert!(text.iter().any(|l| l.starts_with("2. second")));
    }

    #[test]
    fn html_is_flattened() {
        let html = "<h2>Levels</h2><ul><li>Novice &amp; new</li><li>Expert</li></ul><p>Pick one.<br>Then submit.</p><script>x()</script>";
        assert_eq!(
            html_to_text(html),
            "Levels\n• Novice & new\n• Expert\n\nPick one.\nThen submit."
        );
    }
}
