use crate::error::Result;
use crate::storage::{LeafEntry, get_meta, query_summary, query_top_leaves};
use comfy_table::{Cell, CellAlignment, Table, presets};
use rusqlite::Connection;
use std::path::Path;

pub fn run(file: &Path, limit: usize, threshold: f64, csv: bool) -> Result<()> {
    let conn = Connection::open(file)?;
    let entries = query_top_leaves(&conn, limit, threshold)?;

    if csv {
        print_csv(&entries);
        return Ok(());
    }

    let summary = query_summary(&conn)?;
    let workload = get_meta(&conn, "workload")?.unwrap_or_else(|| "unknown".to_string());

    println!("# {}", file.display());
    println!(
        "# Workload: {} | Profiles: {} | Samples: {} | Sampled for {}",
        workload,
        summary.profiles,
        summary.samples,
        humantime::format_duration(truncate_to_millis(summary.duration))
    );
    println!();

    if entries.is_empty() {
        println!("No samples recorded.");
        return Ok(());
    }

    println!("{}", render_table(&entries));
    Ok(())
}

fn render_table(entries: &[LeafEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_HORIZONTAL_ONLY)
        .set_header(vec!["SELF%", "SAMPLES", "MODULE", "OFFSET"]);

    for entry in entries {
        table.add_row(vec![
            Cell::new(format!("{:.1}%", entry.percent)).set_alignment(CellAlignment::Right),
            Cell::new(entry.samples).set_alignment(CellAlignment::Right),
            Cell::new(module_name(entry.module.as_deref())),
            Cell::new(format!("{:#x}", entry.offset)),
        ]);
    }
    table
}

fn print_csv(entries: &[LeafEntry]) {
    println!("self_pct,samples,module,offset");
    for entry in entries {
        println!(
            "{:.1},{},\"{}\",{:#x}",
            entry.percent,
            entry.samples,
            entry.module.as_deref().unwrap_or("").replace('"', "\"\""),
            entry.offset
        );
    }
}

/// File name of a module path, `[unknown]` for unresolved frames
fn module_name(path: Option<&str>) -> &str {
    match path {
        Some(path) => path.rsplit('/').next().unwrap_or(path),
        None => "[unknown]",
    }
}

fn truncate_to_millis(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(d.as_millis() as u64)
}
