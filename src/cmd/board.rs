//! `taskboard board`: print the board once and exit.

use std::path::Path;

use anyhow::Result;
use taskboard::board::Board;
use taskboard::errors::SyncError;
use taskboard::report;
use taskboard::snapshot::{Snapshot, load_snapshot};

pub fn cmd_board(tasks_path: &Path, json: bool) -> Result<()> {
    let snapshot = match load_snapshot(tasks_path) {
        Ok(snapshot) => snapshot,
        Err(SyncError::SnapshotMissing { path }) => {
            eprintln!("No tasks file at {}", path.display());
            Snapshot::empty()
        }
        Err(e) => return Err(e.into()),
    };

    let board = Board::from_snapshot(&snapshot);
    if json {
        println!("{}", serde_json::to_string_pretty(&board)?);
    } else {
        print!("{}", report::render_board(&board));
    }
    Ok(())
}
