//! Background keyboard reader for the watch loop's interactive overrides.
//! Translates single keystrokes into actions.
//!
//! Runs on its own OS thread, started only when `overrides::should_read_keyboard`
//! is true, matching the rest of this crate's "plain threads + channels"
//! scheduling model rather than an async event loop.

use std::io::Write;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;

use crate::overrides::{decode_key, Menu, MenuOrAction, OverrideAction};

/// Spawn the keyboard reader thread. Sends each resolved [`MenuOrAction::Action`]
/// over `tx`; a menu keystroke (`p`/`t`/`c`) blocks the thread long enough to
/// read one follow-up line (with raw mode suspended so the terminal echoes
/// normally) before sending the corresponding `FilterBy*` action.
pub fn spawn(tx: Sender<OverrideAction>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        if terminal::enable_raw_mode().is_err() {
            return;
        }
        let result = read_loop(&tx);
        let _ = terminal::disable_raw_mode();
        let _ = result;
    })
}

fn read_loop(tx: &Sender<OverrideAction>) -> std::io::Result<()> {
    loop {
        if !event::poll(std::time::Duration::from_millis(200))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        let KeyCode::Char(c) = key.code else {
            continue;
        };
        match decode_key(c) {
            Some(MenuOrAction::Action(action)) => {
                let quit = action == OverrideAction::Quit;
                if tx.send(action).is_err() {
                    return Ok(());
                }
                if quit {
                    return Ok(());
                }
            }
            Some(MenuOrAction::OpenMenu(menu)) => {
                if let Some(action) = prompt_for_filter(menu)? {
                    if tx.send(action).is_err() {
                        return Ok(());
                    }
                }
            }
            None => {}
        }
    }
}

/// Suspend raw mode, prompt on stdout, read one cooked line from stdin,
/// restore raw mode. Returns `None` on an empty line (the user backed out).
fn prompt_for_filter(menu: Menu) -> std::io::Result<Option<OverrideAction>> {
    terminal::disable_raw_mode()?;
    let prompt = match menu {
        Menu::Project => "project name contains> ",
        Menu::TestName => "test name contains> ",
        Menu::Trait => "trait expression (Category=X)> ",
    };
    print!("\n{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    terminal::enable_raw_mode()?;

    let value = line.trim().to_string();
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(match menu {
        Menu::Project => OverrideAction::FilterByProject(value),
        Menu::TestName => OverrideAction::FilterByTestName(value),
        Menu::Trait => OverrideAction::FilterByTrait(value),
    }))
}
