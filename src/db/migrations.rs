use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, Transaction};

pub const CURRENT_SCHEMA_VERSION: i64 = 4;

/// Brings the ledger up to [`CURRENT_SCHEMA_VERSION`].
///
/// Every applied version is recorded in `schema_migrations`. All pending versions run
/// in one transaction, so a failure leaves the previous version intact.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("create table if not exists schema_migrations (version integer primary key);")
        .context("failed to create schema_migrations table")?;

    let version = current_version(conn)?;
    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for next_version in (version + 1)..=CURRENT_SCHEMA_VERSION {
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        tx.execute(
            "insert into schema_migrations (version) values (?1)",
            [next_version],
        )
        .with_context(|| format!("failed to record schema version {next_version}"))?;
    }
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "select coalesce(max(version), 0) from schema_migrations",
        [],
        |row| row.get(0),
    )
    .context("failed to read schema version")
}

fn apply_migration(tx: &Transaction<'_>, version: i64) -> Result<()> {
    let sql = match version {
        1 => include_str!("schemas/schema_v1.sql"),
        2 => include_str!("schemas/schema_v2.sql"),
        3 => include_str!("schemas/schema_v3.sql"),
        4 => {
            normalize_legacy_times(tx)?;
            include_str!("schemas/schema_v4.sql")
        }
        _ => bail!("unknown migration target version: {version}"),
    };
    tx.execute_batch(sql)
        .with_context(|| format!("failed to execute schema_v{version}.sql"))
}

/// Rewrites the v3 `time` column as plain UTC `YYYY-MM-DD HH:MM:SS`, so the v4
/// rebuild can convert it with `strftime` without losing the stored offset.
fn normalize_legacy_times(tx: &Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare("select id, cast(time as text) from plays")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (id, time) in rows {
        let Some(utc) = time.as_deref().and_then(legacy_time_to_utc) else {
            debug!("leaving unrecognized time {time:?} of play {id} as is");
            continue;
        };
        tx.execute(
            "update plays set time = ?1 where id = ?2",
            params![utc.format("%Y-%m-%d %H:%M:%S").to_string(), id],
        )?;
    }
    Ok(())
}

/// Parses the ways older versions stored a play's start time:
/// `2024-11-24 16:45:00.123 +0100 CET` (with an optional `m=+0.01` suffix),
/// `2024-11-24 16:45:00+01:00`, RFC 3339, or a naive time taken as UTC.
fn legacy_time_to_utc(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Some(time.with_timezone(&Utc));
    }
    if let Ok(time) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(time.with_timezone(&Utc));
    }
    let fields: Vec<&str> = raw.split_whitespace().take(3).collect();
    if let [date, clock, offset] = fields[..] {
        let joined = format!("{date} {clock} {offset}");
        if let Ok(time) = DateTime::<FixedOffset>::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S%.f %z") {
            return Some(time.with_timezone(&Utc));
        }
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Applies migrations up to and including `target` only. Lets tests build old ledgers.
#[cfg(test)]
pub(crate) fn migrate_to(conn: &mut Connection, target: i64) -> Result<()> {
    conn.execute_batch("create table if not exists schema_migrations (version integer primary key);")?;
    let tx = conn.transaction()?;
    for version in 1..=target {
        apply_migration(&tx, version)?;
        tx.execute("insert into schema_migrations (version) values (?1)", [version])?;
    }
    tx.commit()?;
    Ok(())
}
