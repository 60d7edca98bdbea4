// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line-oriented dump of all groups, tracks and users.
//!
//! The file consists of comments and commands which, replayed in order against an empty engine
//! with the [`Importer`](crate::import::Importer), reproduce the exported state:
//!
//! ```text
//! # LuckPerms Export File
//! # Generated by <name> at <yyyy-MM-dd HH:mm:ss> UTC
//!
//! # Create groups
//! /luckperms creategroup admin
//! ...
//! # Export group: admin
//! /luckperms group admin permission set essentials.fly true
//! ...
//! # Export users
//! # Export user: <uuid> - <name>
//! /luckperms user <uuid> parent add mod
//! /luckperms user <uuid> switchprimarygroup mod
//! ```
//!
//! Users are read from storage in concurrently running shards. Lines of one user are always
//! written together, users of different shards may interleave.
use std::io::Write;

use futures_util::future::try_join_all;
use gatekeeper_core::{DEFAULT_GROUP, Holder, Node, User};
use gatekeeper_messenger::Transport;
use gatekeeper_store::Storage;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command;
use crate::engine::Engine;
use crate::error::EngineError;

/// Longest line written to an export file, in bytes.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Command prefix of every exported command.
pub const COMMAND_PREFIX: &str = "/luckperms";

const HEADER: &str = "# LuckPerms Export File";

/// Statistics of a finished export.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub groups: usize,
    pub tracks: usize,
    pub users: usize,

    /// Users which could not be read from storage.
    pub failed_users: usize,

    /// Lines dropped for exceeding [`MAX_LINE_LENGTH`].
    pub skipped_lines: usize,

    /// Number of user shards exported concurrently.
    pub shards: usize,
}

/// Writes the state of an engine to an export file.
pub struct Exporter<'a, S, T> {
    engine: &'a Engine<S, T>,
    generated_by: String,
}

impl<'a, S, T> Exporter<'a, S, T>
where
    S: Storage,
    T: Transport,
{
    pub fn new(engine: &'a Engine<S, T>) -> Self {
        Self {
            engine,
            generated_by: engine.config().server_name.clone(),
        }
    }

    /// Name put into the file header, defaults to the server name.
    pub fn generated_by(mut self, name: impl Into<String>) -> Self {
        self.generated_by = name.into();
        self
    }

    pub async fn export<W: Write>(&self, writer: W) -> Result<ExportSummary, ExportError> {
        let mut out = Output::new(writer);
        let mut summary = ExportSummary::default();

        info!(generated_by = %self.generated_by, "start export");
        let generated_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        out.line(HEADER)?;
        out.line(&format!("# Generated by {} at {}", self.generated_by, generated_at))?;
        out.line("")?;

        let groups = self.engine.groups().all();
        out.line("# Create groups")?;
        for cell in &groups {
            out.line(&format!("{COMMAND_PREFIX} creategroup {}", cell.read().name()))?;
        }
        out.line("")?;

        for cell in &groups {
            let lines = {
                let group = cell.read();
                let target = format!("{COMMAND_PREFIX} group {}", group.name());
                let mut lines = vec![format!("# Export group: {}", group.name())];
                lines.extend(
                    group
                        .permissions()
                        .nodes()
                        .map(|node| format!("{target} {}", command::render(node))),
                );
                lines
            };
            out.block(lines)?;
            out.line("")?;
            summary.groups += 1;
        }
        debug!(count = summary.groups, "exported groups");
        out.line("")?;
        out.line("")?;

        let tracks = self.engine.tracks().all();
        if !tracks.is_empty() {
            out.line("# Create tracks")?;
            for track in &tracks {
                out.line(&format!("{COMMAND_PREFIX} createtrack {}", track.name()))?;
            }
            out.line("")?;

            for track in &tracks {
                let mut lines = vec![format!("# Export track: {}", track.name())];
                lines.extend(track.groups().iter().map(|group| {
                    format!("{COMMAND_PREFIX} track {} append {group}", track.name())
                }));
                out.block(lines)?;
                out.line("")?;
                summary.tracks += 1;
            }
            out.line("")?;
            out.line("")?;
        }
        debug!(count = summary.tracks, "exported tracks");

        let uuids: Vec<Uuid> = self
            .engine
            .storage()
            .unique_users()
            .await
            .map_err(EngineError::from)?
            .into_iter()
            .collect();
        out.line("# Export users")?;

        let config = self.engine.config();
        let shards = (uuids.len() / config.export_shard_size.max(1))
            .clamp(1, config.export_max_shards.max(1));
        let chunks: Vec<&[Uuid]> = uuids.chunks(uuids.len().div_ceil(shards).max(1)).collect();
        summary.shards = chunks.len().max(1);
        debug!(users = uuids.len(), shards = summary.shards, "export users");

        let out = Mutex::new(out);
        let results = try_join_all(chunks.into_iter().map(|chunk| self.export_users(chunk, &out)))
            .await?;
        for shard in results {
            summary.users += shard.users;
            summary.failed_users += shard.failed_users;
        }

        let mut out = out.into_inner();
        out.flush()?;
        summary.skipped_lines = out.skipped;

        info!(
            groups = summary.groups,
            tracks = summary.tracks,
            users = summary.users,
            failed_users = summary.failed_users,
            skipped_lines = summary.skipped_lines,
            "finished export"
        );
        Ok(summary)
    }

    async fn export_users<W: Write>(
        &self,
        uuids: &[Uuid],
        out: &Mutex<Output<W>>,
    ) -> Result<ShardSummary, ExportError> {
        let mut summary = ShardSummary::default();
        for uuid in uuids {
            let user = match self.engine.storage().load_user(*uuid, None).await {
                Ok(Some(data)) => data.into_user(),
                Ok(None) => continue,
                Err(err) => {
                    warn!(%uuid, %err, "failed reading user for export");
                    summary.failed_users += 1;
                    continue;
                }
            };

            out.lock().block(user_lines(&user))?;
            summary.users += 1;
        }
        Ok(summary)
    }
}

#[derive(Default)]
struct ShardSummary {
    users: usize,
    failed_users: usize,
}

fn user_lines(user: &User) -> Vec<String> {
    let uuid = user.uuid();
    let target = format!("{COMMAND_PREFIX} user {uuid}");
    let mut lines = vec![format!(
        "# Export user: {uuid} - {}",
        user.username().unwrap_or("null")
    )];

    // Leaving the default group comes first, so replaying it never removes a negated or
    // temporary default edge written below.
    if !user.permissions().nodes().any(is_default_edge) {
        lines.push(format!("{target} parent remove {DEFAULT_GROUP}"));
    }
    lines.extend(
        user.permissions()
            .nodes()
            .filter(|node| !is_default_edge(node))
            .map(|node| format!("{target} {}", command::render(node))),
    );

    if user.primary_group() != DEFAULT_GROUP {
        lines.push(format!(
            "{target} switchprimarygroup {}",
            user.primary_group()
        ));
    }
    lines
}

/// The permanent, global edge every new user gets.
fn is_default_edge(node: &Node) -> bool {
    node.value()
        && node.is_permanent()
        && node.context().is_empty()
        && node.as_inheritance() == Some(DEFAULT_GROUP)
}

struct Output<W> {
    writer: W,
    skipped: usize,
}

impl<W: Write> Output<W> {
    fn new(writer: W) -> Self {
        Self { writer, skipped: 0 }
    }

    fn line(&mut self, line: &str) -> Result<(), ExportError> {
        if line.len() > MAX_LINE_LENGTH {
            warn!(length = line.len(), "skip overlong export line");
            self.skipped += 1;
            return Ok(());
        }
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn block(&mut self, lines: Vec<String>) -> Result<(), ExportError> {
        for line in lines {
            self.line(&line)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        Ok(self.writer.flush()?)
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use gatekeeper_core::{Holder, Node, User};
    use uuid::Uuid;

    use super::user_lines;

    #[test]
    fn user_block() {
        let uuid = Uuid::nil();
        let mut user = User::new(uuid, Some("alice".into()));
        user.permissions_mut()
            .set_node(Node::inheritance("mod").build().unwrap());
        user.set_primary_group("mod").unwrap();

        assert_eq!(
            user_lines(&user),
            vec![
                format!("# Export user: {uuid} - alice"),
                format!("/luckperms user {uuid} parent add mod"),
                format!("/luckperms user {uuid} switchprimarygroup mod"),
            ]
        );

        let user = User::new(uuid, None);
        let mut stripped = user.clone();
        stripped.permissions_mut().clear_nodes(|_| true);
        assert_eq!(user_lines(&user), vec![format!("# Export user: {uuid} - null")]);
        assert_eq!(
            user_lines(&stripped),
            vec![
                format!("# Export user: {uuid} - null"),
                format!("/luckperms user {uuid} parent remove default"),
            ]
        );
    }
}
