use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use parley_core::settings::mask_secret;
use parley_core::{ScrollAnchor, SettingsField, TranscriptEntry};

use crate::app::{App, BannerKind, FocusPane, InputMode};

const SPEAKER_COLORS: [Color; 8] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::LightBlue,
    Color::LightRed,
    Color::LightGreen,
    Color::LightMagenta,
];

/// Stable color for a speaker slug, so each agent keeps its color for the whole run.
fn speaker_color(slug: &str) -> Color {
    let sum = slug.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    SPEAKER_COLORS[sum % SPEAKER_COLORS.len()]
}

/// Wrap text to fit within a given width, returning multiple lines
/// Uses word boundaries for wrapping (doesn't break mid-word)
fn wrap_text_to_width(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if current_len == 0 {
            current_line = word.to_string();
            current_len = word_len;
        } else if current_len + 1 + word_len <= width {
            current_line.push(' ');
            current_line.push_str(word);
            current_len += 1 + word_len;
        } else {
            lines.push(current_line);
            current_line = word.to_string();
            current_len = word_len;
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

fn centered_popup(area: Rect, width: u16, height: u16) -> Rect {
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_height = height.min(area.height.saturating_sub(2));
    let popup_x = area.x + (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = area.y + (area.height.saturating_sub(popup_height)) / 2;
    Rect::new(popup_x, popup_y, popup_width, popup_height)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, banner, footer
    let banner_height = if app.banner.is_some() { 1 } else { 0 };
    let [header_area, body_area, banner_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(banner_height),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let [side_area, main_area] = Layout::horizontal([
        Constraint::Length(32),
        Constraint::Min(0),
    ])
    .areas(body_area);

    let [roster_area, controls_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(5),
    ])
    .areas(side_area);

    let [prompt_area, transcript_area] = Layout::vertical([
        Constraint::Length(5),
        Constraint::Min(0),
    ])
    .areas(main_area);

    render_roster(app, frame, roster_area);
    render_controls(app, frame, controls_area);
    render_prompt(app, frame, prompt_area);
    render_transcript(app, frame, transcript_area);

    if banner_height > 0 {
        render_banner(app, frame, banner_area);
    }
    render_footer(app, frame, footer_area);

    // Render popups (in order of priority)
    if app.show_settings {
        render_settings(app, frame, area);
        if app.show_reset_confirm {
            render_reset_confirm(frame, area);
        }
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" Parley ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.backend_url.clone(), Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_roster(app: &mut App, frame: &mut Frame, area: Rect) {
    app.roster_area = Some(area);

    let focused = app.focus == FocusPane::Agents;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };
    let selected = app.registry.selected().len();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" Agents ({}/{}) ", selected, app.registry.len()));

    if app.registry.is_empty() {
        let message = if app.agents_loading {
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            format!("Loading agents{}", dots)
        } else {
            "No agents. Press r to reload.".to_string()
        };
        let empty = Paragraph::new(Span::styled(message, Style::default().fg(Color::DarkGray)))
            .block(block)
            .wrap(Wrap { trim: true });
        frame.render_widget(empty, area);
        return;
    }

    let items: Vec<ListItem> = app
        .registry
        .entries()
        .iter()
        .map(|entry| {
            let check = if entry.checked { "[x] " } else { "[ ] " };
            let slug = parley_core::transcript::speaker_slug(&entry.agent.name);
            let name_style = if entry.checked {
                Style::default().fg(speaker_color(&slug)).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            let mut lines = vec![Line::from(vec![
                Span::raw(check),
                Span::styled(entry.agent.name.clone(), name_style),
            ])];
            if let Some(persona) = &entry.agent.persona {
                lines.push(Line::from(Span::styled(
                    format!("    {}", persona),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            }
            ListItem::new(lines)
        })
        .collect();

    let mut list = List::new(items).block(block);
    if focused {
        list = list
            .highlight_style(
                Style::default()
                    .bg(Color::Blue)
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");
    }

    frame.render_stateful_widget(list, area, &mut app.roster_state);
}

fn render_controls(app: &App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Run ");

    let credential = match app.api.credential_source(&app.settings) {
        Some("env") => "(env var)",
        Some("settings") => "(configured)",
        Some("local") => "(local)",
        _ => "(needs key)",
    };
    let credential_style = if app.api.credential_source(&app.settings).is_some() {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Red)
    };

    let lines = vec![
        Line::from(vec![
            Span::styled("Turns: ", Style::default().fg(Color::Gray)),
            Span::styled(app.turns.to_string(), Style::default().fg(Color::Yellow).bold()),
        ]),
        Line::from(vec![
            Span::styled("API:   ", Style::default().fg(Color::Gray)),
            Span::styled(app.api.display_name(), Style::default().fg(Color::Green).bold()),
        ]),
        Line::from(Span::styled(format!("       {}", credential), credential_style)),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_prompt(app: &mut App, frame: &mut Frame, area: Rect) {
    app.prompt_area = Some(area);

    let focused = app.focus == FocusPane::Prompt;
    let border_color = if app.input_mode == InputMode::Editing {
        Color::Yellow
    } else if focused {
        Color::Cyan
    } else {
        Color::DarkGray
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Conversation prompt ");

    let inner_width = area.width.saturating_sub(2) as usize;

    let text = if app.prompt_input.is_empty() && app.input_mode == InputMode::Normal {
        Text::from(Span::styled(
            "Describe a scene for the agents to play out...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(app.prompt_input.clone()).style(Style::default().fg(Color::Cyan))
    };

    let prompt = Paragraph::new(text).block(block).wrap(Wrap { trim: false });
    frame.render_widget(prompt, area);

    // Show cursor when editing (character wrap is close enough for cursor placement)
    if app.input_mode == InputMode::Editing && inner_width > 0 {
        let (col, row) = prompt_cursor_cell(&app.prompt_input, app.prompt_cursor, inner_width);
        let max_row = area.height.saturating_sub(3) as usize;
        frame.set_cursor_position((area.x + 1 + col as u16, area.y + 1 + row.min(max_row) as u16));
    }
}

/// Column and row of the cursor in a prompt broken on newlines and wrapped at `width`.
fn prompt_cursor_cell(input: &str, cursor: usize, width: usize) -> (usize, usize) {
    let mut row = 0;
    let mut col = 0;
    for c in input.chars().take(cursor) {
        if c == '\n' {
            row += 1;
            col = 0;
        } else {
            col += 1;
            if col == width {
                row += 1;
                col = 0;
            }
        }
    }
    (col, row)
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    app.transcript_area = Some(area);

    // Store dimensions for scroll calculations (inner size minus borders)
    app.transcript_height = area.height.saturating_sub(2);
    app.transcript_width = area.width.saturating_sub(2);
    let wrap_width = app.transcript_width.max(1) as usize;

    let focused = app.focus == FocusPane::Transcript;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let title = if app.is_running() {
        format!(" Conversation {} ", ".".repeat((app.animation_frame as usize) + 1))
    } else {
        " Conversation ".to_string()
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let mut lines: Vec<Line> = Vec::new();

    if app.transcript.is_empty() {
        lines.push(Line::from(Span::styled(
            "Select agents, enter a prompt, and press s to start.",
            Style::default().fg(Color::DarkGray),
        )));
    }

    for entry in app.transcript.entries() {
        match entry {
            TranscriptEntry::Status(message) => {
                lines.push(Line::from(Span::styled(
                    message.clone(),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            }
            TranscriptEntry::Turn { turn, slug } => {
                let (speaker_style, body_style) = if turn.is_system() {
                    (
                        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                        Style::default().fg(Color::Red),
                    )
                } else {
                    (
                        Style::default().fg(speaker_color(slug)).add_modifier(Modifier::BOLD),
                        Style::default(),
                    )
                };
                lines.push(Line::from(Span::styled(format!("{}:", turn.speaker), speaker_style)));
                for paragraph in turn.content.lines() {
                    for wrapped in wrap_text_to_width(paragraph, wrap_width) {
                        lines.push(Line::from(Span::styled(wrapped, body_style)));
                    }
                }
                lines.push(Line::default());
            }
        }
    }

    if app.is_running() {
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Waiting for the next reply{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    app.transcript_lines = lines.len().min(u16::MAX as usize) as u16;
    app.transcript_scroll = match app.transcript.anchor() {
        ScrollAnchor::Bottom => app.max_transcript_scroll(),
        ScrollAnchor::Top => app.transcript_scroll.min(app.max_transcript_scroll()),
    };

    let transcript = Paragraph::new(Text::from(lines))
        .block(block)
        .scroll((app.transcript_scroll, 0));

    frame.render_widget(transcript, area);
}

fn render_banner(app: &App, frame: &mut Frame, area: Rect) {
    let Some(banner) = &app.banner else {
        return;
    };
    let style = match banner.kind {
        BannerKind::Error => Style::default().bg(Color::Red).fg(Color::White),
        BannerKind::Success => Style::default().bg(Color::Green).fg(Color::Black),
    };
    let banner = Paragraph::new(format!(" {} ", banner.message)).style(style);
    frame.render_widget(banner, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = if app.show_settings {
        " SETTINGS "
    } else {
        match app.input_mode {
            InputMode::Normal => " NORMAL ",
            InputMode::Editing => " EDIT ",
        }
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut spans = vec![Span::styled(mode_text, mode_style)];

    let hints: &[(&str, &str)] = if app.show_settings {
        if app.settings_form.editing {
            &[("Enter", "keep"), ("Esc", "discard")]
        } else {
            &[
                ("j/k", "field"),
                ("Enter", "edit"),
                ("w", "save"),
                ("t", "test"),
                ("R", "reset"),
                ("Esc", "close"),
            ]
        }
    } else {
        match (app.input_mode, app.focus) {
            (InputMode::Editing, _) => &[("^Enter/F5", "start"), ("Enter", "newline"), ("Esc", "done")],
            (InputMode::Normal, FocusPane::Agents) => &[
                ("j/k", "nav"),
                ("Space", "toggle"),
                ("J/K", "reorder"),
                ("s", "start"),
                ("m", "clear memory"),
                ("a", "api"),
                ("+/-", "turns"),
                ("S", "settings"),
                ("q", "quit"),
            ],
            (InputMode::Normal, FocusPane::Prompt) => &[
                ("Enter", "edit"),
                ("s", "start"),
                ("m", "clear memory"),
                ("a", "api"),
                ("+/-", "turns"),
                ("Tab", "focus"),
                ("S", "settings"),
                ("q", "quit"),
            ],
            (InputMode::Normal, FocusPane::Transcript) => &[
                ("j/k", "scroll"),
                ("^d/^u", "page"),
                ("s", "start"),
                ("m", "clear memory"),
                ("Tab", "focus"),
                ("q", "quit"),
            ],
        }
    };

    for (key, label) in hints {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
    }

    let status = if app.memory_clearing {
        Some("Clearing memory")
    } else if app.is_running() {
        Some("Running")
    } else if app.testing_provider.is_some() {
        Some("Testing")
    } else {
        None
    };
    if let Some(status) = status {
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        spans.push(Span::styled(
            format!(" {}{} ", status, dots),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_settings(app: &mut App, frame: &mut Frame, area: Rect) {
    let fields = SettingsField::all();
    let popup_area = centered_popup(area, 70, fields.len() as u16 + 6);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Provider settings ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let [list_area, _, status_area] = Layout::vertical([
        Constraint::Length(fields.len() as u16),
        Constraint::Length(1),
        Constraint::Min(1),
    ])
    .areas(inner);

    let form = &app.settings_form;
    let selected = form.selected_field();
    let label_width = fields.iter().map(|f| f.label().len()).max().unwrap_or(0);

    let items: Vec<ListItem> = fields
        .iter()
        .map(|field| {
            let editing = form.editing && *field == selected;
            let value = if editing {
                if field.is_secret() {
                    mask_secret(&form.input)
                } else {
                    form.input.clone()
                }
            } else {
                field.display_value(&form.draft)
            };
            let value_style = if editing {
                Style::default().fg(Color::Yellow)
            } else if value.is_empty() {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default().fg(Color::Cyan)
            };
            let value = if value.is_empty() && !editing {
                "(not set)".to_string()
            } else {
                value
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:width$}  ", field.label(), width = label_width),
                    Style::default().fg(Color::Gray),
                ),
                Span::styled(value, value_style),
            ]))
        })
        .collect();

    let list = List::new(items)
        .highlight_style(Style::default().add_modifier(Modifier::BOLD).bg(Color::DarkGray))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, list_area, &mut app.settings_form.field_state);

    // Show cursor on the field being edited
    if app.settings_form.editing {
        if let Some(row) = app.settings_form.field_state.selected() {
            let cursor_x = list_area.x + 2 + label_width as u16 + 2 + app.settings_form.cursor as u16;
            let cursor_x = cursor_x.min(list_area.x + list_area.width.saturating_sub(1));
            frame.set_cursor_position((cursor_x, list_area.y + row as u16));
        }
    }

    let status = match app.testing_provider {
        Some(provider) => Line::from(Span::styled(
            format!("Testing {}...", provider.display_name()),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
        )),
        None => Line::from(Span::styled(
            format!(
                "t tests {} with these values. Changes apply after w.",
                selected.provider().display_name()
            ),
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(Paragraph::new(status).wrap(Wrap { trim: true }), status_area);
}

fn render_reset_confirm(frame: &mut Frame, area: Rect) {
    let popup_area = centered_popup(area, 46, 5);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Reset settings ");

    let text = vec![
        Line::from("Reset all settings to defaults?"),
        Line::from(vec![
            Span::styled(" y ", Style::default().bg(Color::DarkGray).fg(Color::White)),
            Span::raw(" yes   "),
            Span::styled(" n ", Style::default().bg(Color::DarkGray).fg(Color::White)),
            Span::raw(" no"),
        ]),
    ];

    frame.render_widget(Paragraph::new(text).block(block), popup_area);
}
