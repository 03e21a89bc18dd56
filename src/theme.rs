use ratatui::style::{Color, Modifier, Style};

use crate::config::AppConfig;

/// Colors used across the chat screen.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub fg: Color,
    pub muted: Color,
    pub border: Color,
    pub accent: Color,
    pub user: Style,
    pub bot: Style,
    pub selection: Style,
    pub done: Style,
    pub warning: Style,
    pub error: Style,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            fg: Color::Reset,
            muted: Color::DarkGray,
            border: Color::Rgb(90, 90, 110),
            accent: Color::Rgb(125, 211, 252),
            user: Style::default()
                .fg(Color::Rgb(190, 242, 100))
                .add_modifier(Modifier::BOLD),
            bot: Style::default()
                .fg(Color::Rgb(125, 211, 252))
                .add_modifier(Modifier::BOLD),
            selection: Style::default().bg(Color::Rgb(50, 55, 75)),
            done: Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::CROSSED_OUT),
            warning: Style::default().fg(Color::Yellow),
            error: Style::default().fg(Color::LightRed),
        }
    }
}

impl Palette {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut pal = Self::default();
        let Some(colors) = config.theme.as_ref().and_then(|t| t.colors.as_ref()) else {
            return pal;
        };
        for (key, spec) in colors {
            let Some(style) = parse_style_spec(spec) else {
                tracing::warn!(key = %key, spec = %spec, "ignoring bad theme color");
                continue;
            };
            let fg = style.fg.unwrap_or(Color::Reset);
            match key.as_str() {
                "fg" | "text" => pal.fg = fg,
                "muted" => pal.muted = fg,
                "border" => pal.border = fg,
                "accent" => pal.accent = fg,
                "user" => pal.user = style,
                "bot" => pal.bot = style,
                "selection" => pal.selection = Style::default().bg(fg),
                "done" => pal.done = style.add_modifier(Modifier::CROSSED_OUT),
                "warning" => pal.warning = style,
                "error" => pal.error = style,
                other => tracing::warn!(key = other, "unknown theme key"),
            }
        }
        pal
    }

    pub fn border_style(&self) -> Style {
        Style::default().fg(self.border)
    }

    pub fn meta(&self) -> Style {
        Style::default().fg(self.muted)
    }

    pub fn text(&self) -> Style {
        Style::default().fg(self.fg)
    }

    pub fn accent(&self) -> Style {
        Style::default().fg(self.accent)
    }

    pub fn markdown(&self) -> MarkdownTheme {
        MarkdownTheme {
            text: self.fg,
            bold: self.fg,
            italic: self.fg,
            code: Color::Rgb(253, 186, 116),
            code_bg: Color::Reset,
            heading: self.accent,
            heading2: self.accent,
            heading3: self.muted,
            list_marker: self.accent,
            link: Color::LightBlue,
            blockquote: self.muted,
            blockquote_bar: self.border,
            hr: self.border,
            table_border: self.border,
            table_header: self.accent,
            strikethrough: self.muted,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarkdownTheme {
    pub text: Color,
    pub bold: Color,
    pub italic: Color,
    pub code: Color,
    pub code_bg: Color,
    pub heading: Color,
    pub heading2: Color,
    pub heading3: Color,
    pub list_marker: Color,
    pub link: Color,
    pub blockquote: Color,
    pub blockquote_bar: Color,
    pub hr: Color,
    pub table_border: Color,
    pub table_header: Color,
    pub strikethrough: Color,
}

fn parse_style_spec(spec: &str) -> Option<Style> {
    let mut parts = spec.split_whitespace();
    let color = parse_color(parts.next()?)?;
    let mut style = Style::default().fg(color);

    for token in parts {
        style = match token {
            "bold" => style.add_modifier(Modifier::BOLD),
            "italic" => style.add_modifier(Modifier::ITALIC),
            "dim" => style.add_modifier(Modifier::DIM),
            "underline" => style.add_modifier(Modifier::UNDERLINED),
            _ => style,
        };
    }

    Some(style)
}

fn parse_color(token: &str) -> Option<Color> {
    let lower = token.to_lowercase();
    if lower.starts_with('#') && lower.len() == 7 {
        let r = u8::from_str_radix(&lower[1..3], 16).ok()?;
        let g = u8::from_str_radix(&lower[3..5], 16).ok()?;
        let b = u8::from_str_radix(&lower[5..7], 16).ok()?;
        return Some(Color::Rgb(r, g, b));
    }
    if let Some((r, g, b)) = parse_rgb_triplet(&lower) {
        return Some(Color::Rgb(r, g, b));
    }

    match lower.as_str() {
        "reset" | "default" => Some(Color::Reset),
        "black" => Some(Color::Black),
        "red" => Some(Color::Red),
        "green" => Some(Color::Green),
        "yellow" => Some(Color::Yellow),
        "blue" => Some(Color::Blue),
        "magenta" => Some(Color::Magenta),
        "cyan" => Some(Color::Cyan),
        "gray" | "grey" => Some(Color::Gray),
        "darkgray" | "darkgrey" => Some(Color::DarkGray),
        "lightred" => Some(Color::LightRed),
        "lightgreen" => Some(Color::LightGreen),
        "lightyellow" => Some(Color::LightYellow),
        "lightblue" => Some(Color::LightBlue),
        "lightmagenta" => Some(Color::LightMagenta),
        "lightcyan" => Some(Color::LightCyan),
        "white" => Some(Color::White),
        _ => None,
    }
}

fn parse_rgb_triplet(token: &str) -> Option<(u8, u8, u8)> {
    let mut parts = token.split(',');
    let r = parts.next()?.trim().parse::<u8>().ok()?;
    let g = parts.next()?.trim().parse::<u8>().ok()?;
    let b = parts.next()?.trim().parse::<u8>().ok()?;
    Some((r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThemeConfig;
    use std::collections::HashMap;

    #[test]
    fn parses_specs() {
        assert_eq!(parse_color("#ff0080"), Some(Color::Rgb(255, 0, 128)));
        assert_eq!(parse_color("10, 20,30"), Some(Color::Rgb(10, 20, 30)));
        assert_eq!(parse_color("DarkGrey"), Some(Color::DarkGray));
        assert_eq!(parse_color("#ff00"), None);

        let style = parse_style_spec("yellow bold italic").unwrap();
        assert_eq!(style.fg, Some(Color::Yellow));
        assert!(style.add_modifier.contains(Modifier::BOLD | Modifier::ITALIC));
    }

    #[test]
    fn config_overrides_palette() {
        let cfg = AppConfig {
            theme: Some(ThemeConfig {
                colors: Some(HashMap::from([
                    ("accent".to_string(), "red".to_string()),
                    ("user".to_string(), "#00ff00 underline".to_string()),
                    ("bot".to_string(), "not-a-color".to_string()),
                ])),
            }),
            ..AppConfig::default()
        };
        let pal = Palette::from_config(&cfg);
        assert_eq!(pal.accent, Color::Red);
        assert_eq!(pal.user.fg, Some(Color::Rgb(0, 255, 0)));
        assert_eq!(pal.bot, Palette::default().bot);
        assert_eq!(pal.markdown().heading, Color::Red);
    }
}
