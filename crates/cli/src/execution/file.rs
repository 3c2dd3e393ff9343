use super::Execution;
use crate::error::Error;
use ipc::command::{self, StartMonitor};
use ipc::event;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single start command read from a file, events appended to another
/// file as one JSON object per line.
#[derive(Debug)]
pub struct FileExecution {
    command: Option<StartMonitor>,
    events: Option<File>,
    event_path: PathBuf,
}

impl FileExecution {
    /// Read the start command from the first line of `command_file` and
    /// open `event_file` for appending, creating it and its parents.
    pub fn open(command_file: &Path, event_file: &Path) -> Result<Self, Error> {
        let command = read_command_file(command_file)?;
        if let Some(parent) = event_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(event_file)?;
        Ok(Self {
            command: Some(command),
            events: Some(events),
            event_path: event_file.to_path_buf(),
        })
    }
}

#[async_trait::async_trait]
impl Execution for FileExecution {
    /// Yields the start command once. Nothing else ever arrives through a
    /// command file, so later calls never resolve.
    async fn next_command(&mut self) -> Option<command::Message> {
        match self.command.take() {
            Some(command) => Some(command::Message::StartMonitor(command)),
            None => std::future::pending().await,
        }
    }

    async fn publish(&mut self, event: &event::Message) -> Result<(), Error> {
        let Some(events) = self.events.as_mut() else {
            debug!(name = event.name(), "event log closed, dropping event");
            return Ok(());
        };
        let mut line = event.encode()?.get().to_owned();
        line.push('\n');
        events.write_all(line.as_bytes())?;
        events.sync_data()?;
        Ok(())
    }

    fn close(&mut self) {
        debug!(path = ?self.event_path, "closing event log");
        self.events = None;
    }
}

fn read_command_file(path: &Path) -> Result<StartMonitor, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::CommandFile {
        path: path.to_path_buf(),
        source,
    })?;
    let first = text.lines().next().unwrap_or_default();
    Ok(serde_json::from_str(first)?)
}
