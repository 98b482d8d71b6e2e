use std::io::{BufRead, Write};

use crate::catalog::Catalog;
use crate::command;
use crate::config::PatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Menu,
    Applying,
    Restoring,
    Info,
    Exiting,
}

/// Interactive loop behind the numbered menu. Reads choices from `input` and
/// writes everything the user sees to `output`.
pub struct Menu<'a, R, W> {
    config: &'a PatchConfig,
    catalog: &'a Catalog,
    input: R,
    output: W,
}

impl<'a, R: BufRead, W: Write> Menu<'a, R, W> {
    pub fn new(config: &'a PatchConfig, catalog: &'a Catalog, input: R, output: W) -> Self {
        Menu { config, catalog, input, output }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        let mut state = MenuState::Menu;
        while state != MenuState::Exiting {
            state = self.step(state)?;
        }
        writeln!(self.output, "Exiting.")?;
        Ok(())
    }

    fn step(&mut self, state: MenuState) -> anyhow::Result<MenuState> {
        let next = match state {
            MenuState::Menu => return self.choose(),
            MenuState::Applying => self.apply()?,
            MenuState::Restoring => {
                writeln!(self.output, "\nRestoring backups...")?;
                let result = command::restore::restore(self.config, &mut self.output);
                self.report(result)?;
                true
            }
            MenuState::Info => {
                writeln!(self.output)?;
                if let Err(e) = command::info::info(self.config, Some(self.catalog), &mut self.output) {
                    writeln!(self.output, "[Error] {:#}", e)?;
                }
                true
            }
            MenuState::Exiting => return Ok(MenuState::Exiting),
        };

        if next && !self.wait_for_enter()? {
            return Ok(MenuState::Exiting);
        }
        Ok(MenuState::Menu)
    }

    fn choose(&mut self) -> anyhow::Result<MenuState> {
        writeln!(self.output, "{}", "=".repeat(60))?;
        writeln!(self.output, "{}", command::info::BANNER)?;
        writeln!(self.output, "{}", "=".repeat(60))?;
        writeln!(self.output, "Platform: {}", self.config.asset_root.platform)?;
        writeln!(self.output, "Game directory: {}", self.config.asset_root.game_root.display())?;
        writeln!(self.output, "\n  1. Apply Traditional Chinese patch")?;
        writeln!(self.output, "  2. Restore backup")?;
        writeln!(self.output, "  3. Info")?;
        writeln!(self.output, "  4. Exit\n")?;

        let Some(choice) = self.prompt("Choose an option [1-4]: ")? else {
            return Ok(MenuState::Exiting);
        };
        Ok(match choice.as_str() {
            "1" => MenuState::Applying,
            "2" => MenuState::Restoring,
            "3" => MenuState::Info,
            "4" => MenuState::Exiting,
            _ => {
                writeln!(self.output, "\nInvalid option, try again.")?;
                MenuState::Menu
            }
        })
    }

    /// Returns whether the menu should wait for Enter afterwards.
    fn apply(&mut self) -> anyhow::Result<bool> {
        writeln!(self.output, "\n[Warning] This will modify the game files. A backup is made first.")?;
        let Some(answer) = self.prompt("Continue? (enter 'y' to confirm): ")? else {
            return Ok(false);
        };
        if !answer.eq_ignore_ascii_case("y") {
            writeln!(self.output, "Cancelled.")?;
            return Ok(true);
        }
        let result = command::patch::apply(self.config, self.catalog, &mut self.output);
        self.report(result)?;
        Ok(true)
    }

    fn report(&mut self, result: anyhow::Result<command::patch::RunSummary>) -> anyhow::Result<()> {
        match result {
            Ok(summary) => {
                for warning in &summary.warnings {
                    writeln!(self.output, "[Warning] {}", warning)?;
                }
                writeln!(self.output, "\n{}", summary)?;
            }
            Err(e) => writeln!(self.output, "[Error] {:#}", e)?,
        }
        Ok(())
    }

    fn wait_for_enter(&mut self) -> anyhow::Result<bool> {
        Ok(self.prompt("\nPress Enter to return to the menu...")?.is_some())
    }

    /// `None` on end of input.
    fn prompt(&mut self, text: &str) -> anyhow::Result<Option<String>> {
        write!(self.output, "{}", text)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}
