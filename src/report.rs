// 📤 Report Writer - channel reports → CSV files
// Nothing is written until every report renders; the files replace their predecessors together or not at all

use crate::payment::Channel;
use crate::reconciliation::ChannelReport;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub fn report_file_name(channel: Channel) -> &'static str {
    match channel {
        Channel::Card => "Stripe.csv",
        Channel::Wallet => "Paypal.csv",
    }
}

/// Render header + rows as CSV bytes
pub fn render_csv(report: &ChannelReport) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record(&report.header)
        .context("Failed to write report header")?;
    for row in &report.rows {
        writer.write_record(row).context("Failed to write report row")?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush {} report: {}", report.channel.name(), e.error()))
}

/// A rendered report sitting next to its target, not yet moved into place
struct StagedReport {
    temp: PathBuf,
    target: PathBuf,
}

/// Write every report into `output_dir`, returning the written paths.
/// Either every target is replaced or every previous file is left as it was.
pub fn write_reports(output_dir: &Path, reports: &[ChannelReport]) -> Result<Vec<PathBuf>> {
    let rendered = reports
        .iter()
        .map(|report| render_csv(report).map(|bytes| (report.channel, bytes)))
        .collect::<Result<Vec<_>>>()?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let mut staged = Vec::with_capacity(rendered.len());
    for (channel, bytes) in rendered {
        let target = output_dir.join(report_file_name(channel));
        let temp = target.with_extension("csv.tmp");
        staged.push(StagedReport {
            temp: temp.clone(),
            target,
        });
        if let Err(e) = fs::write(&temp, bytes) {
            discard(&staged);
            return Err(e).with_context(|| format!("Failed to write report: {}", temp.display()));
        }
    }

    let written = commit(&staged)?;
    for path in &written {
        tracing::info!(path = %path.display(), "wrote report");
    }
    Ok(written)
}

/// Move staged reports into place. Previous files are parked as `.csv.bak`
/// and put back if any rename fails.
fn commit(staged: &[StagedReport]) -> Result<Vec<PathBuf>> {
    let mut backups: Vec<(PathBuf, PathBuf)> = Vec::new();
    for report in staged {
        if !report.target.is_file() {
            continue;
        }
        let backup = report.target.with_extension("csv.bak");
        if let Err(e) = fs::rename(&report.target, &backup) {
            roll_back(&[], &backups);
            discard(staged);
            return Err(e).with_context(|| format!("Failed to back up report: {}", report.target.display()));
        }
        backups.push((backup, report.target.clone()));
    }

    let mut committed = Vec::with_capacity(staged.len());
    for report in staged {
        if let Err(e) = fs::rename(&report.temp, &report.target) {
            roll_back(&committed, &backups);
            discard(staged);
            return Err(e)
                .with_context(|| format!("Failed to move report into place: {}", report.target.display()));
        }
        committed.push(report.target.clone());
    }

    for (backup, _) in &backups {
        let _ = fs::remove_file(backup);
    }
    Ok(committed)
}

fn roll_back(committed: &[PathBuf], backups: &[(PathBuf, PathBuf)]) {
    for target in committed {
        let _ = fs::remove_file(target);
    }
    for (backup, target) in backups {
        if let Err(e) = fs::rename(backup, target) {
            tracing::error!(backup = %backup.display(), error = %e, "could not restore previous report");
        }
    }
}

fn discard(staged: &[StagedReport]) {
    for report in staged {
        let _ = fs::remove_file(&report.temp);
    }
}
