use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use crate::cli::{open_tablespace, wprintln, OpenOptions};
use crate::innodb::schema::SchemaProvider;
use crate::innodb::sdi::{read_sdi_records, schema_from_sdi_json, SdiRecordType};
use crate::IdbError;

/// Options for the schema subcommand.
pub struct SchemaOptions {
    pub file: String,
    pub raw: bool,
    pub json: bool,
    pub open: OpenOptions,
}

#[derive(Serialize)]
struct RawRecord {
    #[serde(rename = "type")]
    sdi_type: &'static str,
    id: u64,
    page_no: u64,
    object: serde_json::Value,
}

/// Print the table definition recovered from the tablespace's SDI.
///
/// By default a column summary is printed. `--json` prints the schema in the
/// format `scan --schema` accepts, so it can be edited and fed back; `--raw`
/// prints every SDI record as parsed JSON.
pub fn execute(opts: &SchemaOptions, writer: &mut dyn Write) -> Result<(), IdbError> {
    let mut ts = open_tablespace(&opts.file, &opts.open)?;
    let records = read_sdi_records(&mut ts)?;
    if records.is_empty() {
        return Err(IdbError::NotFound(format!(
            "{} has no SDI (tablespaces written before MySQL 8.0 carry none)",
            opts.file
        )));
    }

    if opts.raw {
        let raw = records
            .iter()
            .map(|r| {
                Ok(RawRecord {
                    sdi_type: r.sdi_type.name(),
                    id: r.id,
                    page_no: r.page_no,
                    object: serde_json::from_str(&r.json)
                        .map_err(|e| IdbError::Parse(format!("SDI record {}: {}", r.id, e)))?,
                })
            })
            .collect::<Result<Vec<_>, IdbError>>()?;
        let json = serde_json::to_string_pretty(&raw)
            .map_err(|e| IdbError::Parse(format!("JSON serialization error: {}", e)))?;
        return wprintln!(writer, "{}", json);
    }

    let table = records
        .iter()
        .find(|r| r.sdi_type == SdiRecordType::Table)
        .ok_or_else(|| IdbError::NotFound("no table definition in SDI".to_string()))?;
    let schema = schema_from_sdi_json(&table.json)?;
    if opts.json {
        return wprintln!(writer, "{}", schema.to_json_pretty()?);
    }

    wprintln!(
        writer,
        "{} {}",
        "Table".bold(),
        schema.name().unwrap_or("(unnamed)")
    )?;
    let keys = schema.key_columns();
    for (i, col) in schema.columns().iter().enumerate() {
        let key = if keys.contains(&i) { " PK".cyan().to_string() } else { String::new() };
        let null = if col.nullable { "NULL" } else { "NOT NULL" };
        wprintln!(writer, "  {:24} {:28} {}{}", col.name, col.column_type.to_string(), null, key)?;
    }
    if keys.is_empty() {
        wprintln!(writer, "  (clustered on hidden DB_ROW_ID)")?;
    }
    Ok(())
}
