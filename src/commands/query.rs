use crate::error::Result;
use comfy_table::{Table, presets};
use rusqlite::Connection;
use rusqlite::types::Value;
use std::path::Path;

pub fn run(file: &Path, sql: &str, tsv: bool) -> Result<()> {
    let conn = Connection::open(file)?;
    let (columns, rows) = execute(&conn, sql)?;

    if tsv {
        println!("{}", columns.join("\t"));
        for row in rows {
            println!("{}", row.join("\t"));
        }
    } else {
        let mut table = Table::new();
        table.load_preset(presets::ASCII_MARKDOWN).set_header(columns);
        for row in rows {
            table.add_row(row);
        }
        println!("{table}");
    }

    Ok(())
}

/// Run `sql` and render every value as text
fn execute(conn: &Connection, sql: &str) -> rusqlite::Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(format_value(&row.get::<_, Value>(i)?));
        }
        out.push(values);
    }
    Ok((columns, out))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => format!("{:.6}", f),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}
