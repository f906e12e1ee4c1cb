//! Catalog commands.

use super::{format_timestamp, record_id, CliError, Context};
use posy_core::{CatalogRecord, Collection, CoreError, Record, Version};
use serde_json::Value;

/// Parses `key=value`. The value is read as JSON when it parses, else as a
/// plain string.
pub fn parse_attribute(arg: &str) -> Result<(String, Value), CliError> {
    let (key, value) = arg
        .split_once('=')
        .filter(|(k, _)| !k.trim().is_empty())
        .ok_or_else(|| CliError::InvalidAttribute(arg.to_string()))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

/// Creates a record or updates the attributes of an existing one.
pub fn put(
    ctx: &Context,
    collection: Collection,
    id: &str,
    attrs: &[String],
    unset: &[String],
    expected: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = record_id(id)?;
    let store = ctx.local.store();

    let current = match store.get(collection, &id) {
        Ok(record) => Some(record),
        Err(CoreError::NotFound { .. }) => None,
        Err(e) => return Err(e.into()),
    };
    let mut record = match &current {
        Some(Record::Catalog(existing)) => existing.clone(),
        _ => CatalogRecord::new(id.clone()),
    };
    for arg in attrs {
        let (key, value) = parse_attribute(arg)?;
        record.attributes.insert(key, value);
    }
    for key in unset {
        record.attributes.remove(key);
    }

    let expected = expected
        .map(Version::new)
        .or_else(|| current.as_ref().map(Record::version));
    let version = store.put(collection, Record::Catalog(record), expected)?;
    let verb = if current.is_some() { "Updated" } else { "Created" };
    println!("✓ {verb} {collection}/{id} ({version})");
    Ok(())
}

/// Prints one record as JSON.
pub fn get(ctx: &Context, collection: Collection, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let record = ctx.local.store().get(collection, &record_id(id)?)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Lists a collection.
pub fn list(
    ctx: &Context,
    collection: Collection,
    deleted: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cursor = ctx.local.store().list(collection);
    if deleted {
        cursor = cursor.with_deleted();
    }
    let records: Vec<Record> = cursor.collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            println!("{collection} ({} records)", records.len());
            for record in &records {
                let attributes = match record {
                    Record::Catalog(c) => serde_json::to_string(&c.attributes)?,
                    Record::Order(o) => format!("{} lines", o.line_items.len()),
                };
                println!(
                    "  {:<24} {:>5}  {}  {}{}",
                    record.id(),
                    record.version(),
                    format_timestamp(record.modified_at()),
                    attributes,
                    if record.is_deleted() { "  (deleted)" } else { "" }
                );
            }
        }
    }
    Ok(())
}

/// Deletes a record.
pub fn delete(
    ctx: &Context,
    collection: Collection,
    id: &str,
    expected: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = record_id(id)?;
    let version = ctx
        .local
        .store()
        .delete(collection, &id, expected.map(Version::new))?;
    println!("✓ Deleted {collection}/{id} (tombstone {version})");
    Ok(())
}

/// Renames a record.
pub fn rename(
    ctx: &Context,
    collection: Collection,
    from: &str,
    to: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let from = record_id(from)?;
    let to = record_id(to)?;
    let version = ctx
        .local
        .store()
        .rename(collection, &from, to.clone(), None)?;
    println!("✓ Renamed {collection}/{from} to {to} ({version})");
    Ok(())
}
