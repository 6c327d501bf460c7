//! Rendering of jobs, run reports, and cache listings.

use crate::config::OutputFormat;
use console::style;
use serde::Serialize;
use trellis_cache::CacheEntry;
use trellis_core::{JobDescriptor, JobReport, JobStatus, RunReport, StepResult};

type BoxResult<T> = Result<T, Box<dyn std::error::Error>>;

fn structured<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> BoxResult<Option<String>> {
    Ok(match format {
        OutputFormat::Table => None,
        OutputFormat::Json => Some(serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => Some(serde_yaml::to_string(value)?),
    })
}

/// Flags that are on, space separated.
fn enabled_flags(job: &JobDescriptor) -> String {
    job.flags
        .iter()
        .filter(|(_, on)| **on)
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn jobs_table(jobs: &[JobDescriptor]) -> String {
    let mut out = String::new();
    for job in jobs {
        let flags = enabled_flags(job);
        out.push_str(&format!("{:>3}  {}", job.index, job.display_name));
        if !flags.is_empty() {
            out.push_str(&format!("  [{}]", flags));
        }
        if job.continue_on_error {
            out.push_str("  (continue on error)");
        }
        out.push('\n');
    }
    out
}

pub fn print_jobs(jobs: &[JobDescriptor], format: OutputFormat) -> BoxResult<()> {
    match structured(jobs, format)? {
        Some(text) => println!("{}", text),
        None => {
            println!("{} {} job(s)", style("▶").cyan(), jobs.len());
            print!("{}", jobs_table(jobs));
        }
    }
    Ok(())
}

fn status_icon(status: JobStatus) -> String {
    match status {
        JobStatus::Success => style("✓").green().to_string(),
        JobStatus::Failure => style("✗").red().to_string(),
        JobStatus::Cancelled => style("⊘").yellow().to_string(),
    }
}

fn step_icon(result: StepResult) -> String {
    match result {
        StepResult::Succeeded => style("✓").green().to_string(),
        StepResult::Failed => style("✗").red().to_string(),
        StepResult::Skipped => style("-").dim().to_string(),
    }
}

fn print_job(job: &JobReport) {
    let marker = if job.continue_on_error && job.status == JobStatus::Failure {
        format!(" {}", style("(allowed to fail)").dim())
    } else {
        String::new()
    };
    println!("{} {}{}", status_icon(job.status), style(&job.display_name).bold(), marker);
    for step in &job.steps {
        println!(
            "    {} {:<14} {}",
            step_icon(step.result),
            step.kind.as_str(),
            style(format!("{}ms", step.duration_ms)).dim()
        );
    }
}

pub fn print_report(report: &RunReport, format: OutputFormat) -> BoxResult<()> {
    if let Some(text) = structured(report, format)? {
        println!("{}", text);
        return Ok(());
    }

    println!();
    for job in &report.jobs {
        print_job(job);
    }
    println!();

    let summary = format!(
        "{} succeeded, {} failed, {} cancelled in {}ms",
        report.count(JobStatus::Success),
        report.count(JobStatus::Failure),
        report.count(JobStatus::Cancelled),
        report.duration_ms
    );
    if report.success {
        println!("{} Run {} passed: {}", style("✓").green(), report.run_id, summary);
    } else {
        println!("{} Run {} failed: {}", style("✗").red(), report.run_id, summary);
    }
    Ok(())
}

pub fn print_cache_entries(entries: &[CacheEntry], format: OutputFormat) -> BoxResult<()> {
    if let Some(text) = structured(entries, format)? {
        println!("{}", text);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{} No cache entries", style("i").blue());
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:<40} {:>10} B  {}  {}",
            entry.key,
            entry.size_bytes,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            style(&entry.checksum[..entry.checksum.len().min(12)]).dim()
        );
    }
    Ok(())
}
