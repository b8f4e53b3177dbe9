//! upkeep: the update orchestrator application.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossterm::event::{Event as CtEvent, EventStream};
use crossterm::{execute, terminal};
use futures::StreamExt;
use tracing::warn;

use upkeep_core::{Config, EventReceiver, RunOptions, StreamEvent, event_channel};
use upkeep_runner::{Orchestrator, RunSummary, RunnerError};
use upkeep_tui::{
    BatchedEventHandler, HandlerConfig, InputRouter, KeyBindings, TabRegistry, TabState,
};

use upkeep::app::{App, AppFlow};
use upkeep::cli::Cli;
use upkeep::summary::{EXIT_CONFIG, exit_code, format_summary};
use upkeep::ui;

/// Default locations under ~/.config/upkeep/.
fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("upkeep")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_dir().join("config.toml"));
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    if cli.list {
        for (name, plugin) in &config.plugins {
            let state = if plugin.enabled { "enabled" } else { "disabled" };
            println!("{name}\t{state}");
        }
        return Ok(());
    }

    let specs = match config.selected_specs(&cli.only, &cli.skip) {
        Ok(specs) => specs,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };
    if specs.is_empty() {
        println!("no plugins enabled; edit {}", config_path.display());
        return Ok(());
    }

    let options = RunOptions {
        max_concurrent: cli.max_concurrent,
        continue_on_error: cli.continue_on_error || config.run.continue_on_error,
        dry_run: cli.dry_run || config.run.dry_run,
        pause_between_phases: cli.pause_between_phases || config.run.pause_between_phases,
    };

    let order: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
    let orchestrator = Arc::new(Orchestrator::new(specs, options));
    let (events_tx, events_rx) = event_channel(1024);

    let run_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(events_tx).await })
    };

    let outcome = if cli.headless {
        run_headless(events_rx, run_handle, Arc::clone(&orchestrator)).await
    } else {
        run_tui(&cli, events_rx, run_handle, Arc::clone(&orchestrator), order).await
    };

    match outcome {
        Ok((summary, interrupted)) => {
            print!("{}", format_summary(&summary));
            std::process::exit(exit_code(&summary, interrupted));
        }
        Err(e) => {
            let code = e
                .downcast_ref::<RunnerError>()
                .filter(|e| e.is_config_error())
                .map(|_| EXIT_CONFIG)
                .unwrap_or(1);
            eprintln!("error: {e}");
            std::process::exit(code);
        }
    }
}

/// Plain-output mode: stream lines to stdout and wait for the run.
async fn run_headless(
    mut events: EventReceiver,
    mut run_handle: tokio::task::JoinHandle<Result<RunSummary, RunnerError>>,
    orchestrator: Arc<Orchestrator>,
) -> anyhow::Result<(RunSummary, bool)> {
    let cancel = orchestrator.cancel_token();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Output { plugin, line, .. } => println!("[{plugin}] {line}"),
                StreamEvent::PhaseStart { plugin, phase, .. } => {
                    println!("[{plugin}] --- {} started", phase.display_name());
                }
                StreamEvent::PhaseEnd {
                    plugin,
                    phase,
                    success,
                    ..
                } => {
                    let verdict = if success { "ok" } else { "failed" };
                    println!("[{plugin}] --- {} {verdict}", phase.display_name());
                }
                _ => {}
            }
        }
    });

    let mut interrupted = false;
    let summary = tokio::select! {
        result = &mut run_handle => result.context("orchestrator task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            interrupted = true;
            cancel.cancel();
            // Runners terminate their children and report back; wait for
            // the real summary so cancelled jobs are accounted for.
            run_handle.await.context("orchestrator task panicked")??
        }
    };
    let _ = printer.await;
    Ok((summary, interrupted))
}

/// Interactive mode: tabs, key routing, and live rendering.
async fn run_tui(
    cli: &Cli,
    mut events: EventReceiver,
    mut run_handle: tokio::task::JoinHandle<Result<RunSummary, RunnerError>>,
    orchestrator: Arc<Orchestrator>,
    order: Vec<String>,
) -> anyhow::Result<(RunSummary, bool)> {
    let bindings_path = cli
        .key_bindings
        .clone()
        .unwrap_or_else(|| config_dir().join("keybindings.toml"));
    let bindings = match KeyBindings::load(&bindings_path) {
        Ok(bindings) => bindings,
        Err(e) => {
            warn!(error = %e, "falling back to default key bindings");
            KeyBindings::default()
        }
    };

    let (term_cols, term_rows) = terminal::size().unwrap_or((80, 24));
    let screen_rows = usize::from(term_rows.saturating_sub(2)).max(1);

    let tabs = TabRegistry::new();
    for name in &order {
        tabs.insert(TabState::new(name, usize::from(term_cols), screen_rows));
    }
    orchestrator.resize_all(term_cols, screen_rows as u16);

    let handler = Arc::new(BatchedEventHandler::new(HandlerConfig::default()));
    handler.start(tabs.clone());
    let bridge = {
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handler.handle_event(event);
            }
        })
    };

    let mut router = InputRouter::new(bindings);
    router.set_bracketed_paste(true);
    let mut app = App::new(
        tabs.clone(),
        order,
        router,
        Arc::clone(&orchestrator),
        config_dir().join("logs"),
    );

    terminal::enable_raw_mode().context("failed to enter raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(
        stdout,
        terminal::EnterAlternateScreen,
        crossterm::event::EnableBracketedPaste
    )?;

    let mut input = EventStream::new();
    let mut render_tick = tokio::time::interval(Duration::from_millis(33));
    let mut interrupted = false;

    let summary = loop {
        tokio::select! {
            maybe_event = input.next() => {
                let Some(Ok(event)) = maybe_event else { continue };
                match event {
                    CtEvent::Key(key) => {
                        let key = upkeep_tui::KeyEvent::from(key);
                        match app.handle_key(&key) {
                            AppFlow::Quit => interrupted = true,
                            AppFlow::Redraw => {
                                let _ = ui::render(&app, &mut stdout);
                            }
                            AppFlow::None => {}
                        }
                    }
                    CtEvent::Paste(text) => {
                        let _ = app.handle_paste(&text);
                    }
                    CtEvent::Resize(cols, rows) => {
                        let body = usize::from(rows.saturating_sub(2)).max(1);
                        app.tabs.for_each(|tab| tab.screen.resize(usize::from(cols), body));
                        orchestrator.resize_all(cols, body as u16);
                        let _ = ui::render(&app, &mut stdout);
                    }
                    _ => {}
                }
            }
            _ = render_tick.tick() => {
                let mut any_dirty = false;
                app.tabs.for_each(|tab| {
                    tab.bind_pid(orchestrator.pty_pid(&tab.plugin));
                    tab.sample_metrics();
                    if tab.dirty {
                        any_dirty = true;
                        tab.dirty = false;
                    }
                });
                if any_dirty {
                    let _ = ui::render(&app, &mut stdout);
                }
            }
            result = &mut run_handle => {
                match result.context("orchestrator task panicked")? {
                    Ok(summary) => break summary,
                    Err(e) => {
                        restore_terminal(&mut stdout);
                        handler.stop().await;
                        return Err(e.into());
                    }
                }
            }
        }
    };

    // Drain whatever the runners emitted last, then restore the screen.
    let _ = bridge.await;
    handler.stop().await;
    restore_terminal(&mut stdout);
    Ok((summary, interrupted))
}

fn restore_terminal(stdout: &mut std::io::Stdout) {
    let _ = execute!(
        stdout,
        crossterm::event::DisableBracketedPaste,
        terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    );
    let _ = terminal::disable_raw_mode();
}
