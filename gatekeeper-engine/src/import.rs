// SPDX-License-Identifier: MIT OR Apache-2.0

//! Replays export files against an engine.
use std::collections::{BTreeSet, HashMap};
use std::io::BufRead;

use gatekeeper_core::{HolderId, Node, normalize_name};
use gatekeeper_messenger::Transport;
use gatekeeper_store::Storage;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::{self, CommandError};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::export::COMMAND_PREFIX;

const USER_HEADER: &str = "# Export user: ";

/// Outcome of an import.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Number of commands which were applied.
    pub executed: usize,

    /// Line number (starting at 1) and reason of every command which failed.
    pub failed: Vec<(usize, String)>,
}

/// Applies the commands of an export file, see [`Exporter`](crate::export::Exporter).
///
/// Commands are executed in order. A failing command is recorded in the summary and the import
/// continues with the next line. Every touched holder is saved once at the end.
pub struct Importer<'a, S, T> {
    engine: &'a Engine<S, T>,
}

impl<'a, S, T> Importer<'a, S, T>
where
    S: Storage,
    T: Transport,
{
    pub fn new(engine: &'a Engine<S, T>) -> Self {
        Self { engine }
    }

    pub async fn import(&self, reader: impl BufRead) -> Result<ImportSummary, ImportError> {
        let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
        let mut state = ImportState::default();
        let mut summary = ImportSummary::default();

        info!(lines = lines.len(), "start import");
        for (index, line) in lines.iter().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix(USER_HEADER) {
                state.remember_username(header);
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            match self.execute(line, &mut state).await {
                Ok(()) => summary.executed += 1,
                Err(err) => {
                    warn!(line = index + 1, %err, "failed import command");
                    summary.failed.push((index + 1, err.to_string()));
                }
            }
        }

        for target in &state.touched {
            self.engine.save(target).await?;
        }

        info!(
            executed = summary.executed,
            failed = summary.failed.len(),
            saved = state.touched.len(),
            "finished import"
        );
        Ok(summary)
    }

    async fn execute(&self, line: &str, state: &mut ImportState) -> Result<(), LineError> {
        let input = line
            .strip_prefix(COMMAND_PREFIX)
            .ok_or_else(|| LineError::NotACommand(line.to_string()))?;
        let args = command::tokenize(input)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["creategroup", name] => {
                if !self.engine.groups().contains(name) {
                    self.engine.create_group(name).await?;
                }
            }
            ["createtrack", name] => {
                if !self.engine.tracks().contains(name) {
                    self.engine.create_track(name).await?;
                }
            }
            ["track", name, "append", group] => {
                self.engine.track_append(name, group)?;
                state.touched.insert(HolderId::Track(normalize_name(name)?));
            }
            ["group", name, ..] => {
                let node = command::parse(&owned(&args[2..]))?;
                let target = HolderId::Group(normalize_name(name)?);
                self.engine.set_node(&target, node)?;
                state.touched.insert(target);
            }
            ["user", uuid, rest @ ..] => {
                let uuid = Uuid::parse_str(uuid)
                    .map_err(|_| LineError::InvalidUuid(uuid.to_string()))?;
                let target = HolderId::User(uuid);
                self.engine
                    .load_user(uuid, state.usernames.get(&uuid).map(String::as_str))
                    .await?;

                match rest {
                    ["switchprimarygroup", group] => {
                        self.engine.set_primary_group(uuid, group)?;
                    }
                    ["parent", "remove", group] => {
                        let edge = Node::inheritance(group).build().map_err(EngineError::from)?;
                        self.engine.unset_node(&target, &edge)?;
                    }
                    _ => {
                        let node = command::parse(&owned(rest))?;
                        self.engine.set_node(&target, node)?;
                    }
                }
                state.touched.insert(target);
            }
            _ => return Err(LineError::NotACommand(line.to_string())),
        }

        Ok(())
    }
}

#[derive(Default)]
struct ImportState {
    usernames: HashMap<Uuid, String>,
    touched: BTreeSet<HolderId>,
}

impl ImportState {
    /// Picks the name out of a `<uuid> - <name>` user header.
    fn remember_username(&mut self, header: &str) {
        let Some((uuid, name)) = header.split_once(" - ") else {
            return;
        };
        let Ok(uuid) = Uuid::parse_str(uuid.trim()) else {
            return;
        };
        let name = name.trim();
        if name != "null" && !name.is_empty() {
            debug!(%uuid, name, "import username");
            self.usernames.insert(uuid, name.to_string());
        }
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

#[derive(Debug, Error)]
enum LineError {
    #[error("not an importable command: {0}")]
    NotACommand(String),

    #[error("'{0}' is not a valid uuid")]
    InvalidUuid(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<gatekeeper_core::HolderError> for LineError {
    fn from(err: gatekeeper_core::HolderError) -> Self {
        LineError::Engine(err.into())
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
