//! `taskboard tail`: terminal viewer that follows a running server.

use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use console::Term;
use taskboard::board::Board;
use taskboard::report;
use taskboard::snapshot::Snapshot;
use taskboard::viewer::{ViewerClient, ViewerEvent};

pub async fn cmd_tail(url: &str, reconnect_delay: Duration) -> Result<()> {
    let client = ViewerClient::new(url, reconnect_delay)?;

    let stop = client.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    let term = Term::stdout();
    eprintln!("Following {} (fetching {})", client.ws_url(), client.tasks_url());

    client
        .run(|event| match event {
            ViewerEvent::Initial(snapshot) => redraw(&term, "loaded", &snapshot),
            ViewerEvent::Update(snapshot) => redraw(&term, "updated", &snapshot),
            ViewerEvent::FetchFailed(failure) => {
                eprintln!("{}", report::render_fetch_failure(&failure));
            }
            ViewerEvent::StateChanged(state) => {
                eprintln!("{}", report::stamp(&report::render_state(state), Local::now()));
            }
        })
        .await;

    Ok(())
}

fn redraw(term: &Term, label: &str, snapshot: &Snapshot) {
    if term.is_term() {
        let _ = term.clear_screen();
    }
    let board = Board::from_snapshot(snapshot);
    println!("{}", report::stamp(label, Local::now()));
    print!("{}", report::render_board(&board));
}
