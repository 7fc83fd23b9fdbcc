use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

const KEYBINDINGS: &[(&str, &str)] = &[
    ("↑/↓", "Move within the focused step"),
    ("Enter", "Confirm the highlighted entry / advance"),
    ("Esc / ←", "Back to the previous step (resets later steps)"),
    ("s", "Start the export job"),
    ("x", "Cancel the running job"),
    ("p", "Pause/resume polling"),
    ("r", "Reload the database list"),
    ("c", "Copy the download URL to the clipboard"),
    ("e", "Export the last outcome as JSON"),
    ("?", "Toggle this help"),
    ("q", "Quit"),
];

pub fn draw_help(f: &mut Frame, area: Rect) {
    let width = 56.min(area.width);
    let height = (KEYBINDINGS.len() as u16 + 4).min(area.height);
    let popup = Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    };

    let mut lines: Vec<Line> = Vec::with_capacity(KEYBINDINGS.len() + 1);
    for (key, action) in KEYBINDINGS {
        lines.push(Line::from(vec![
            Span::styled(format!("{key:>8}  "), Style::default().fg(Color::Yellow)),
            Span::raw(*action),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Press ? to close",
        Style::default().fg(Color::Gray),
    )));

    f.render_widget(Clear, popup);
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Help ")),
        popup,
    );
}
