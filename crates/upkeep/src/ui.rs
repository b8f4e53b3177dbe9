//! Crossterm rendering for the tabbed run view.

use std::io::Write;

use crossterm::style::{
    Attribute, Color as CtColor, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor,
};
use crossterm::{cursor, queue, terminal};
use upkeep_tui::{Cell, Style, TabStatus};

use crate::app::App;

/// Draw the whole UI: tab bar, the focused tab's screen, and the status
/// line. Only dirty tabs force a redraw; the caller decides when to call.
pub fn render(app: &App, out: &mut impl Write) -> std::io::Result<()> {
    let (term_cols, term_rows) = terminal::size().unwrap_or((80, 24));
    queue!(out, cursor::Hide, cursor::MoveTo(0, 0))?;

    render_tab_bar(app, out, term_cols)?;

    if app.show_help {
        render_help(out, term_rows)?;
    } else {
        render_focused_screen(app, out, term_rows)?;
    }

    render_status_line(app, out, term_cols, term_rows)?;
    out.flush()
}

fn render_tab_bar(app: &App, out: &mut impl Write, term_cols: u16) -> std::io::Result<()> {
    let mut bar = String::new();
    for (index, name) in app.order.iter().enumerate() {
        let marker = app
            .tabs
            .with_tab(name, |tab| match &tab.status {
                TabStatus::Succeeded => '+',
                TabStatus::Failed(_) => '!',
                TabStatus::Running(_) => '>',
                _ => ' ',
            })
            .unwrap_or(' ');
        if index == app.focused {
            bar.push_str(&format!("[{marker}{name}] "));
        } else {
            bar.push_str(&format!(" {marker}{name}  "));
        }
    }
    let bar = clip(&bar, term_cols as usize);
    queue!(
        out,
        terminal::Clear(terminal::ClearType::CurrentLine),
        SetAttribute(Attribute::Reverse)
    )?;
    write!(out, "{bar:<width$}", width = term_cols as usize)?;
    queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;
    Ok(())
}

fn render_focused_screen(app: &App, out: &mut impl Write, term_rows: u16) -> std::io::Result<()> {
    let Some(plugin) = app.focused_plugin() else {
        return Ok(());
    };
    let plugin = plugin.to_string();
    let body_rows = term_rows.saturating_sub(2);

    let lines: Vec<Vec<Cell>> = app
        .tabs
        .with_tab(&plugin, |tab| {
            (0..body_rows as usize)
                .map(|row| tab.screen.styled_line(row))
                .collect()
        })
        .unwrap_or_default();

    for (row, cells) in lines.iter().enumerate() {
        queue!(
            out,
            cursor::MoveTo(0, row as u16 + 1),
            terminal::Clear(terminal::ClearType::CurrentLine)
        )?;
        render_cells(out, cells)?;
    }
    Ok(())
}

fn render_cells(out: &mut impl Write, cells: &[Cell]) -> std::io::Result<()> {
    let mut current: Option<Style> = None;
    for cell in cells {
        if cell.is_continuation() {
            continue;
        }
        if current != Some(cell.style) {
            apply_style(out, &cell.style)?;
            current = Some(cell.style);
        }
        write!(out, "{}", cell.grapheme)?;
    }
    queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;
    Ok(())
}

fn apply_style(out: &mut impl Write, style: &Style) -> std::io::Result<()> {
    queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;
    let fg: CtColor = style.fg.into();
    let bg: CtColor = style.bg.into();
    if fg != CtColor::Reset {
        queue!(out, SetForegroundColor(fg))?;
    }
    if bg != CtColor::Reset {
        queue!(out, SetBackgroundColor(bg))?;
    }
    if style.bold {
        queue!(out, SetAttribute(Attribute::Bold))?;
    }
    if style.italic {
        queue!(out, SetAttribute(Attribute::Italic))?;
    }
    if style.underline {
        queue!(out, SetAttribute(Attribute::Underlined))?;
    }
    if style.blink {
        queue!(out, SetAttribute(Attribute::SlowBlink))?;
    }
    if style.reverse {
        queue!(out, SetAttribute(Attribute::Reverse))?;
    }
    if style.strikethrough {
        queue!(out, SetAttribute(Attribute::CrossedOut))?;
    }
    Ok(())
}

fn render_help(out: &mut impl Write, term_rows: u16) -> std::io::Result<()> {
    let mut bindings: Vec<String> = vec!["Key bindings".to_string(), String::new()];
    for (action, key) in default_binding_rows() {
        bindings.push(format!("  {key:<22} {action}"));
    }
    for row in 1..term_rows.saturating_sub(1) {
        queue!(
            out,
            cursor::MoveTo(0, row),
            terminal::Clear(terminal::ClearType::CurrentLine)
        )?;
        if let Some(line) = bindings.get(row as usize - 1) {
            write!(out, "{line}")?;
        }
    }
    Ok(())
}

fn default_binding_rows() -> Vec<(&'static str, &'static str)> {
    vec![
        ("next tab", "ctrl+tab"),
        ("previous tab", "ctrl+shift+tab"),
        ("tab 1-9", "alt+1 .. alt+9"),
        ("scroll up / down", "shift+pageup/pagedown"),
        ("scroll top / bottom", "shift+home/end"),
        ("pause / resume", "ctrl+p or f8"),
        ("retry failed phase", "ctrl+r or f9"),
        ("save tab logs", "ctrl+s or f10"),
        ("help", "f1 or ctrl+h"),
        ("quit", "ctrl+q"),
    ]
}

fn render_status_line(
    app: &App,
    out: &mut impl Write,
    term_cols: u16,
    term_rows: u16,
) -> std::io::Result<()> {
    let Some(plugin) = app.focused_plugin() else {
        return Ok(());
    };
    let plugin = plugin.to_string();
    let line = app
        .tabs
        .with_tab(&plugin, |tab| {
            let accumulated = tab.metrics().accumulated();
            format!(
                "{} | {} | cpu {:.1}s data {} packages {}",
                plugin,
                tab.status_line(),
                accumulated.cpu_time.as_secs_f64(),
                format_bytes(accumulated.data_bytes),
                accumulated.packages,
            )
        })
        .unwrap_or_default();
    let line = clip(&line, term_cols as usize);

    queue!(
        out,
        cursor::MoveTo(0, term_rows.saturating_sub(1)),
        terminal::Clear(terminal::ClearType::CurrentLine),
        SetAttribute(Attribute::Reverse)
    )?;
    write!(out, "{line:<width$}", width = term_cols as usize)?;
    queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;
    Ok(())
}

/// Clip a string to at most `max` characters, respecting char
/// boundaries.
fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Human-readable byte count for the status line.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
