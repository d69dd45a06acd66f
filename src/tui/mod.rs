//! Terminal answers for the host dialogs, read key by key in raw mode.

use app_lifecycle::orchestrator::host::{Dialogs, SaveChoice, SavePrompt};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use parking_lot::Mutex;
use std::io::{self, Write};

struct RawMode;

impl RawMode {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn save_choice_for(code: KeyCode, modifiers: KeyModifiers) -> Option<SaveChoice> {
    match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
            Some(SaveChoice::Cancel)
        }
        KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => Some(SaveChoice::Yes),
        KeyCode::Char('n') | KeyCode::Char('N') => Some(SaveChoice::No),
        KeyCode::Char('c') | KeyCode::Char('C') | KeyCode::Esc => Some(SaveChoice::Cancel),
        _ => None,
    }
}

/// Asks on stderr and answers from the keyboard.
///
/// Dialogs are raised from the controller's blocking worker, so reading keys
/// blocks only that thread. The mutex keeps two prompts from interleaving.
#[derive(Default)]
pub struct TerminalDialogs {
    lock: Mutex<()>,
}

impl TerminalDialogs {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_key<T>(
        &self,
        question: &str,
        map: impl Fn(KeyCode, KeyModifiers) -> Option<T>,
    ) -> io::Result<T> {
        let _guard = self.lock.lock();
        let mut err = io::stderr();
        write!(err, "{question} ")?;
        err.flush()?;

        let answer = {
            let _raw = RawMode::enter()?;
            loop {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if let Some(answer) = map(key.code, key.modifiers) {
                        break answer;
                    }
                }
            }
        };
        writeln!(err)?;
        Ok(answer)
    }
}

impl Dialogs for TerminalDialogs {
    fn ask_save(&self, prompt: &SavePrompt) -> SaveChoice {
        let question = format!(
            "{}\n{} [y]es / [n]o / [c]ancel",
            prompt.title(),
            prompt.message()
        );
        self.read_key(&question, save_choice_for).unwrap_or_else(|e| {
            tracing::warn!("terminal dialog failed, cancelling: {e}");
            SaveChoice::Cancel
        })
    }

    fn confirm(&self, title: &str, message: &str) -> bool {
        let question = format!("{title}\n{message} [y/n]");
        self.read_key(&question, |code, modifiers| {
            save_choice_for(code, modifiers).map(|c| c == SaveChoice::Yes)
        })
        .unwrap_or_else(|e| {
            tracing::warn!("terminal dialog failed, declining: {e}");
            false
        })
    }

    fn warn(&self, title: &str, message: &str) {
        let _guard = self.lock.lock();
        eprintln!("{title}: {message}");
    }
}
