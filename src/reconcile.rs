//! # Reconciliation Import
//!
//! Second phase of "never lose a play": walks the ledger's pending plays page by page,
//! asks the operator to confirm each page, submits it as one batch and marks the page
//! fulfilled only when last.fm accepted every entry. Anything else stays pending for a
//! later run. Pages are walked by id, so a declined or partially accepted page is not
//! offered twice in one run.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::credentials::{default_credentials_path, load_credentials};
use crate::db::{PlayLedger, PlayRecord};
use crate::scrobbler::{LastFmClient, Scrobble, Scrobbler, MAX_SCROBBLES_PER_REQUEST};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub pages: usize,
    pub submitted: usize,
    pub fulfilled: usize,
    pub declined: usize,
    /// Plays in pages where the accepted count did not match the page size.
    pub mismatched: usize,
}

pub struct Reconciler<'a, B> {
    ledger: &'a mut PlayLedger,
    scrobbler: B,
    page_size: usize,
}

impl<'a, B: Scrobbler> Reconciler<'a, B> {
    /// `page_size` is clamped to `1..=50`, last.fm's batch limit.
    pub fn new(ledger: &'a mut PlayLedger, scrobbler: B, page_size: usize) -> Self {
        Self {
            ledger,
            scrobbler,
            page_size: page_size.clamp(1, MAX_SCROBBLES_PER_REQUEST),
        }
    }

    /// Processes every pending page once. `confirm` sees each page before it is sent
    /// and returns whether to send it.
    ///
    /// A transport or API failure aborts the run; pages already marked stay marked.
    pub fn run<F>(&mut self, mut confirm: F) -> Result<ReconcileReport>
    where
        F: FnMut(&[PlayRecord]) -> Result<bool>,
    {
        let mut report = ReconcileReport::default();
        let mut cursor = None;

        loop {
            let page = self.ledger.list_pending_after(cursor, self.page_size)?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);
            report.pages += 1;

            if !confirm(&page)? {
                info!("skipping {} plays", page.len());
                report.declined += page.len();
                continue;
            }

            let scrobbles: Vec<Scrobble> = page.iter().map(PlayRecord::to_scrobble).collect();
            let outcome = self
                .scrobbler
                .submit(&scrobbles)
                .with_context(|| format!("Failed to submit {} plays", scrobbles.len()))?;
            report.submitted += page.len();

            for message in &outcome.ignored_messages {
                warn!("last.fm ignored a scrobble: {message}");
            }

            if outcome.accepted as usize == page.len() {
                let ids: Vec<i64> = page.iter().map(|record| record.id).collect();
                self.ledger.mark_fulfilled(&ids)?;
                report.fulfilled += page.len();
                info!("last.fm accepted all {} plays", page.len());
            } else {
                warn!(
                    "last.fm accepted {} of {} plays ({} ignored), leaving them pending",
                    outcome.accepted,
                    page.len(),
                    outcome.ignored
                );
                report.mismatched += page.len();
            }
        }

        Ok(report)
    }
}

/// Pending plays split into pages, without submitting anything.
pub fn preview_pending(ledger: &PlayLedger, page_size: usize) -> Result<Vec<Vec<PlayRecord>>> {
    let page_size = page_size.clamp(1, MAX_SCROBBLES_PER_REQUEST);
    let mut pages = Vec::new();
    let mut cursor = None;
    loop {
        let page = ledger.list_pending_after(cursor, page_size)?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.id);
        pages.push(page);
    }
    Ok(pages)
}

fn write_page(page: &[PlayRecord], output: &mut impl Write) -> io::Result<()> {
    writeln!(output, "The following songs will be scrobbled ({}):", page.len())?;
    for (index, record) in page.iter().enumerate() {
        writeln!(
            output,
            "{:>3}. {} - {} ({})",
            index + 1,
            record.artist,
            record.title,
            record.started_at.format("%Y/%m/%d %H:%M:%S")
        )?;
    }
    Ok(())
}

/// Lists the page and asks `Do you want to continue? (y/n)` until it gets an answer.
/// End of input counts as no.
pub fn confirm_page<R: BufRead, W: Write>(
    page: &[PlayRecord],
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    write_page(page, output)?;
    loop {
        write!(output, "Do you want to continue? (y/n): ")?;
        output.flush()?;
        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            writeln!(output)?;
            return Ok(false);
        }
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => continue,
        }
    }
}

pub fn prompt_confirmation(page: &[PlayRecord]) -> Result<bool> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    confirm_page(page, &mut stdin.lock(), &mut stdout)
}

/// `music import`.
pub fn run_import(db_path: &Path, page_size: usize, dry_run: bool) -> Result<()> {
    let page_size = page_size.clamp(1, MAX_SCROBBLES_PER_REQUEST);
    let mut ledger = PlayLedger::open(db_path)?;
    let pending = ledger.count_pending()?;
    if pending == 0 {
        println!("Nothing to import, every scrobbable play is fulfilled.");
        return Ok(());
    }
    if pending as usize > page_size {
        println!("There are {pending} plays to scrobble, they will be sent {page_size} at a time.");
    }

    if dry_run {
        let mut stdout = io::stdout();
        for page in preview_pending(&ledger, page_size)? {
            write_page(&page, &mut stdout)?;
        }
        return Ok(());
    }

    let credentials = load_credentials(&default_credentials_path()?)?;
    let client = LastFmClient::new(&credentials)?;
    let report = Reconciler::new(&mut ledger, client, page_size).run(prompt_confirmation)?;
    println!(
        "Imported {} of {} submitted plays ({} declined, {} left pending after partial acceptance).",
        report.fulfilled, report.submitted, report.declined, report.mismatched
    );
    Ok(())
}
