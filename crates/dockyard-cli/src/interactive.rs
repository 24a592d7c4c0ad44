//! Interactive flow for the install command.
//!
//! Prompts for whatever the command line left out. Uses dialoguer for
//! terminal UI prompts.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use console::style;
use dialoguer::{Confirm, Input, Password, theme::ColorfulTheme};

use dockyard_core::request::{Credential, ProvisionRequest};

pub const DEFAULT_INSTALL_DIR: &str = "~/immich";
pub const DEFAULT_PHOTOS_DIR: &str = "/mnt/photos";
pub const DEFAULT_EXTERNAL_DIR: &str = "/mnt/external-hdd";

/// Pre-filled values from CLI args that skip prompts.
#[derive(Debug, Clone, Default)]
pub struct PrefilledOptions {
    pub install_path: Option<PathBuf>,
    pub photos_path: Option<PathBuf>,
    pub external_path: Option<PathBuf>,
    /// Credential read ahead of time (`--password-stdin`)
    pub credential: Option<Credential>,
    /// `--keep-existing` - if Some, skip the conflict question
    pub keep_existing: Option<bool>,
    /// Ask about everything and confirm a summary
    pub interactive: bool,
    /// Skip all confirmations
    pub yes: bool,
}

/// Result of interactive flow.
#[derive(Debug, Clone)]
pub struct InteractiveResult {
    pub request: ProvisionRequest,
    /// Whether user confirmed the install
    pub confirmed: bool,
}

pub struct InteractiveFlow<W: Write = io::Stdout> {
    prefilled: PrefilledOptions,
    /// Output writer (for testing)
    writer: W,
    theme: ColorfulTheme,
}

impl InteractiveFlow<io::Stdout> {
    pub fn new(prefilled: PrefilledOptions) -> Self {
        Self {
            prefilled,
            writer: io::stdout(),
            theme: ColorfulTheme::default(),
        }
    }
}

impl<W: Write> InteractiveFlow<W> {
    /// Create a new interactive flow with custom writer (for testing).
    #[cfg(test)]
    pub fn with_writer(prefilled: PrefilledOptions, writer: W) -> Self {
        Self {
            prefilled,
            writer,
            theme: ColorfulTheme::default(),
        }
    }

    /// Collect the request.
    ///
    /// Flow:
    /// 1. Installation directory
    /// 2. Photos location
    /// 3. External library location
    /// 4. Whether to stop existing instances (interactive mode only)
    /// 5. Sudo password
    /// 6. Summary and confirm (interactive mode only)
    pub fn collect(&mut self) -> Result<InteractiveResult> {
        if self.prefilled.interactive {
            self.print_header()?;
        }

        let install_path = self.prompt_path(
            self.prefilled.install_path.clone(),
            "Installation directory",
            DEFAULT_INSTALL_DIR,
        )?;
        let photos_path = self.prompt_path(
            self.prefilled.photos_path.clone(),
            "Photos location",
            DEFAULT_PHOTOS_DIR,
        )?;
        let external_path = self.prompt_path(
            self.prefilled.external_path.clone(),
            "External library path",
            DEFAULT_EXTERNAL_DIR,
        )?;
        let keep_existing = self.prompt_keep_existing()?;
        let credential = self.prompt_credential()?;

        let request = ProvisionRequest::new(credential, install_path, photos_path, external_path)
            .with_resolve_conflicts(!keep_existing);

        let confirmed = if self.prefilled.interactive {
            self.show_summary_and_confirm(&request)?
        } else {
            true
        };

        Ok(InteractiveResult { request, confirmed })
    }

    fn print_header(&mut self) -> Result<()> {
        writeln!(self.writer)?;
        writeln!(
            self.writer,
            "{}",
            style("  Immich Installer").bold().cyan()
        )?;
        writeln!(self.writer)?;
        Ok(())
    }

    fn prompt_path(
        &self,
        prefilled: Option<PathBuf>,
        prompt: &str,
        default: &str,
    ) -> Result<PathBuf> {
        if let Some(path) = prefilled {
            return Ok(expand_home(&path));
        }

        let value: String = Input::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default.to_string())
            .interact_text()?;

        Ok(expand_home(Path::new(value.trim())))
    }

    fn prompt_keep_existing(&self) -> Result<bool> {
        if let Some(keep) = self.prefilled.keep_existing {
            return Ok(keep);
        }
        if !self.prefilled.interactive {
            return Ok(false);
        }

        let stop = Confirm::with_theme(&self.theme)
            .with_prompt("Stop existing Immich containers before installing?")
            .default(true)
            .interact()?;

        Ok(!stop)
    }

    fn prompt_credential(&self) -> Result<Credential> {
        if let Some(credential) = &self.prefilled.credential {
            return Ok(credential.clone());
        }

        let password = Password::with_theme(&self.theme)
            .with_prompt("Sudo password")
            .allow_empty_password(true)
            .interact()?;

        Ok(Credential::new(password))
    }

    fn show_summary_and_confirm(&mut self, request: &ProvisionRequest) -> Result<bool> {
        writeln!(self.writer)?;
        writeln!(self.writer, "{}", style("  Summary").bold())?;
        writeln!(self.writer, "  ───────────────────────────")?;
        writeln!(
            self.writer,
            "  Install:   {}",
            style(request.install_path.display()).green()
        )?;
        writeln!(
            self.writer,
            "  Photos:    {}",
            style(request.primary_storage_path.display()).green()
        )?;
        writeln!(
            self.writer,
            "  External:  {}",
            style(request.external_storage_path.display()).green()
        )?;
        let existing = if request.resolve_conflicts {
            "Stop"
        } else {
            "Keep"
        };
        writeln!(self.writer, "  Existing:  {}", style(existing).green())?;
        writeln!(self.writer)?;

        if self.prefilled.yes {
            return Ok(true);
        }

        let confirmed = Confirm::with_theme(&self.theme)
            .with_prompt("Proceed with installation?")
            .default(true)
            .interact()?;

        Ok(confirmed)
    }
}

/// Read the credential from the first line of `reader`.
pub fn read_credential<R: BufRead>(mut reader: R) -> Result<Credential> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(Credential::new(line.trim_end_matches(['\r', '\n'])))
}

/// Replace a leading `~` with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
