//! Terminal rendering for one-shot rollups.

use comfy_table::{
    presets,
    Attribute,
    Cell,
    Color,
    ContentArrangement,
    Table,
};
use edupulse_aggregator::MetricSnapshot;
use edupulse_scheduler::{
    JobStatus,
    RollupJob,
};

pub fn format_job(job: &RollupJob) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("ROLLUP JOB")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan)]);

    let status_color = match job.status {
        JobStatus::Completed => Color::Green,
        JobStatus::Failed => Color::Red,
        _ => Color::Yellow,
    };

    table.add_row(vec![
        Cell::new("Job").add_attribute(Attribute::Bold),
        Cell::new(job.id.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Type").add_attribute(Attribute::Bold),
        Cell::new(job.job_type.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new(job.status.to_string()).fg(status_color),
    ]);
    table.add_row(vec![
        Cell::new("Window").add_attribute(Attribute::Bold),
        Cell::new(job.window().to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Sources processed").add_attribute(Attribute::Bold),
        Cell::new(job.processed_sources.to_string()),
    ]);
    if let Some(error) = &job.error {
        table.add_row(vec![
            Cell::new("Error").add_attribute(Attribute::Bold),
            Cell::new(format!("{}: {}", error.kind, error.message)).fg(Color::Red),
        ]);
    }

    table.to_string()
}

pub fn format_snapshot(snapshot: &MetricSnapshot) -> String {
    let mut output = String::new();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new(format!("{} METRICS", snapshot.metric_family.to_string().to_uppercase()))
                .add_attribute(Attribute::Bold)
                .fg(Color::Cyan),
            Cell::new(snapshot.window().to_string()),
        ]);

    for (name, value) in &snapshot.totals {
        table.add_row(vec![
            Cell::new(name).add_attribute(Attribute::Bold),
            Cell::new(format!("{value:.0}")),
        ]);
    }
    for (name, value) in &snapshot.derived {
        table.add_row(vec![
            Cell::new(name).add_attribute(Attribute::Bold),
            Cell::new(format!("{value:.2}")),
        ]);
    }
    output.push_str(&table.to_string());
    output.push('\n');

    for (category, counts) in &snapshot.breakdowns {
        if counts.is_empty() {
            continue;
        }
        let mut breakdown = Table::new();
        breakdown
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![Cell::new(category.as_str())
                .add_attribute(Attribute::Bold)
                .fg(Color::Magenta)]);
        for (key, count) in counts {
            breakdown.add_row(vec![Cell::new(key), Cell::new(count.to_string())]);
        }
        output.push_str(&breakdown.to_string());
        output.push('\n');
    }

    if !snapshot.scoped_children.is_empty() {
        output.push_str(&format!(
            "({} tenant snapshots included)\n",
            snapshot.scoped_children.len()
        ));
    }

    output
}
