//! Import of the legacy desktop data files.
//!
//! The desktop tool kept `Flowers.json`, `Colors.json`, `Bouquets.json` and
//! one `orders/<DD_MM_YYYY>.json` per saved order in its working directory.
//! Import is idempotent: records that already exist are left alone.

use crate::error::{CoreError, CoreResult};
use crate::record::{Attributes, CatalogRecord, LineItem, OrderRecord, Record};
use crate::store::RecordStore;
use crate::types::{Collection, RecordId, Timestamp};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Attribute naming the legacy order file an order came from.
pub const SOURCE_FILE_ATTR: &str = "source_file";
/// Attribute holding the order date parsed from the legacy file name.
pub const ORDER_DATE_ATTR: &str = "order_date";

/// Counts from one import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    /// Flowers created.
    pub flowers: usize,
    /// Colors created.
    pub colors: usize,
    /// Bouquets created.
    pub bouquets: usize,
    /// Orders created.
    pub orders: usize,
    /// Entries that already existed.
    pub skipped: usize,
    /// Entries or files that could not be read.
    pub invalid: usize,
}

/// Reads a legacy working directory into a [`RecordStore`].
pub struct LegacyImporter<'a> {
    store: &'a RecordStore,
}

impl<'a> LegacyImporter<'a> {
    /// Creates an importer writing into `store`.
    pub fn new(store: &'a RecordStore) -> Self {
        Self { store }
    }

    /// Imports everything found under `dir`.
    pub fn import_dir(&self, dir: &Path) -> CoreResult<ImportReport> {
        let mut report = ImportReport::default();

        if let Some(flowers) = read_json(&dir.join("Flowers.json"))? {
            report.flowers = self.import_catalog(Collection::Flowers, flowers, &mut report)?;
        }
        if let Some(colors) = read_json(&dir.join("Colors.json"))? {
            report.colors = self.import_catalog(Collection::Colors, colors, &mut report)?;
        }
        if let Some(bouquets) = read_json(&dir.join("Bouquets.json"))? {
            report.bouquets = self.import_catalog(Collection::Bouquets, bouquets, &mut report)?;
        }

        let orders_dir = dir.join("orders");
        if orders_dir.is_dir() {
            let mut files: Vec<_> = fs::read_dir(&orders_dir)?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            files.sort();
            for path in files {
                if self.import_order(&path, &mut report)? {
                    report.orders += 1;
                }
            }
        }

        tracing::info!(?report, dir = %dir.display(), "legacy import finished");
        Ok(report)
    }

    /// Accepts a list of names or a map of name to attributes.
    fn import_catalog(
        &self,
        collection: Collection,
        data: Value,
        report: &mut ImportReport,
    ) -> CoreResult<usize> {
        let entries: Vec<(String, Attributes)> = match data {
            Value::Array(names) => names
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(name) => Some((name, Attributes::new())),
                    _ => {
                        report.invalid += 1;
                        None
                    }
                })
                .collect(),
            Value::Object(map) => map
                .into_iter()
                .map(|(name, value)| (name, attributes_of(value)))
                .collect(),
            _ => {
                tracing::warn!(%collection, "legacy file is neither a list nor a map");
                report.invalid += 1;
                return Ok(0);
            }
        };

        let mut created = 0;
        for (name, attributes) in entries {
            let Ok(id) = RecordId::new(name.trim()) else {
                report.invalid += 1;
                continue;
            };
            if self.store.get(collection, &id).is_ok() {
                report.skipped += 1;
                continue;
            }
            let mut record = CatalogRecord::new(id);
            record.attributes = attributes;
            self.store.put(collection, Record::Catalog(record), None)?;
            created += 1;
        }
        Ok(created)
    }

    fn import_order(&self, path: &Path, report: &mut ImportReport) -> CoreResult<bool> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let already = self.store.list(Collection::Orders).any(|r| {
            r.as_order()
                .and_then(|o| o.attributes.get(SOURCE_FILE_ATTR))
                .is_some_and(|v| v.as_str() == Some(file_name.as_str()))
        });
        if already {
            report.skipped += 1;
            return Ok(false);
        }

        let lines = match read_json(path)?.map(|v| parse_order_lines(&v)) {
            Some(Ok(lines)) => lines,
            Some(Err(e)) => {
                tracing::warn!(file = %file_name, error = %e, "skipping unreadable order");
                report.invalid += 1;
                return Ok(false);
            }
            None => return Ok(false),
        };

        let mut order = OrderRecord::draft(RecordId::generate(), Timestamp::default());
        order.line_items = lines;
        order
            .attributes
            .insert(SOURCE_FILE_ATTR.to_string(), Value::String(file_name.clone()));
        if let Some(date) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(parse_legacy_date)
        {
            order
                .attributes
                .insert(ORDER_DATE_ATTR.to_string(), Value::String(date));
        }

        self.store.put(Collection::Orders, Record::Order(order), None)?;
        Ok(true)
    }
}

fn read_json(path: &Path) -> CoreResult<Option<Value>> {
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "legacy file is not valid JSON");
                Ok(None)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn attributes_of(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => Attributes::new(),
        other => Attributes::from([("value".to_string(), other)]),
    }
}

/// `[[bouquet, quantity], ...]`, merging repeated bouquets.
fn parse_order_lines(value: &Value) -> CoreResult<Vec<LineItem>> {
    let items = value
        .as_array()
        .ok_or_else(|| CoreError::invalid_format("order is not a list"))?;
    let mut lines: Vec<LineItem> = Vec::new();
    for item in items {
        let (name, qty) = match item.as_array().map(Vec::as_slice) {
            Some([Value::String(name), qty]) => (name, qty),
            _ => return Err(CoreError::invalid_format("order line is not [name, quantity]")),
        };
        let quantity = qty
            .as_u64()
            .or_else(|| qty.as_str().and_then(|s| s.trim().parse().ok()))
            .and_then(|q| u32::try_from(q).ok())
            .filter(|q| *q > 0)
            .ok_or_else(|| CoreError::invalid_format(format!("bad quantity for {name}")))?;
        let catalog_id = RecordId::new(name.trim())?;
        match lines.iter_mut().find(|l| l.catalog_id == catalog_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => lines.push(LineItem {
                catalog_id,
                quantity,
                unit_price: 0,
            }),
        }
    }
    Ok(lines)
}

/// `DD_MM_YYYY` to `YYYY-MM-DD`.
fn parse_legacy_date(stem: &str) -> Option<String> {
    let mut parts = stem.split('_');
    let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let day: u8 = day.parse().ok().filter(|d| (1..=31).contains(d))?;
    let month: u8 = month.parse().ok().filter(|m| (1..=12).contains(m))?;
    let year: u16 = year.parse().ok().filter(|y| *y >= 1000)?;
    Some(format!("{year:04}-{month:02}-{day:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::OrderStatus;
    use serde_json::json;
    use tempfile::tempdir;

    fn write(path: &Path, value: Value) {
        fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[test]
    fn imports_all_legacy_files() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join("Flowers.json"),
            json!({"ורד": {"colors": ["אדום"], "sizes": ["גדול"]}, "tulip": {"colors": [], "sizes": []}}),
        );
        write(&dir.path().join("Colors.json"), json!(["אדום", "white"]));
        write(&dir.path().join("Bouquets.json"), json!({"spring": {"flowers": []}}));
        fs::create_dir(dir.path().join("orders")).unwrap();
        write(
            &dir.path().join("orders/14_02_2025.json"),
            json!([["spring", 2], ["spring", 1], ["winter", "4"]]),
        );
        write(&dir.path().join("orders/broken.json"), json!({"not": "a list"}));

        let store = RecordStore::open_in_memory().unwrap();
        let report = LegacyImporter::new(&store).import_dir(dir.path()).unwrap();
        assert_eq!(report.flowers, 2);
        assert_eq!(report.colors, 2);
        assert_eq!(report.bouquets, 1);
        assert_eq!(report.orders, 1);
        assert_eq!(report.invalid, 1);

        let rose = store
            .get(Collection::Flowers, &RecordId::new("ורד").unwrap())
            .unwrap();
        assert_eq!(rose.as_catalog().unwrap().attributes["colors"], json!(["אדום"]));

        let order = store.list(Collection::Orders).next().unwrap();
        let order = order.as_order().unwrap();
        assert_eq!(order.status, OrderStatus::Draft);
        assert_eq!(order.line_items.len(), 2);
        assert_eq!(order.line_items[0].quantity, 3);
        assert_eq!(order.attributes[ORDER_DATE_ATTR], json!("2025-02-14"));

        let again = LegacyImporter::new(&store).import_dir(dir.path()).unwrap();
        assert_eq!(again.flowers + again.colors + again.bouquets + again.orders, 0);
        assert_eq!(again.skipped, 6);
    }

    #[test]
    fn flower_list_form_is_accepted() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("Flowers.json"), json!(["rose", "lily", 7]));
        let store = RecordStore::open_in_memory().unwrap();
        let report = LegacyImporter::new(&store).import_dir(dir.path()).unwrap();
        assert_eq!(report.flowers, 2);
        assert_eq!(report.invalid, 1);
    }

    #[test]
    fn empty_directory_imports_nothing() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open_in_memory().unwrap();
        let report = LegacyImporter::new(&store).import_dir(dir.path()).unwrap();
        assert_eq!(report, ImportReport::default());
    }

    #[test]
    fn legacy_dates() {
        assert_eq!(parse_legacy_date("01_12_2024").as_deref(), Some("2024-12-01"));
        assert_eq!(parse_legacy_date("32_01_2024"), None);
        assert_eq!(parse_legacy_date("order"), None);
    }
}
