// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Records on both sides of the sync and the write type that moves
//! quantities between them.
//!
//! A stored [`InventoryRecord`] has three owners:
//!
//! | group         | written by                  |
//! |---------------|-----------------------------|
//! | identity      | sync engine, on creation    |
//! | authoritative | sync engine, every run      |
//! | enrichment    | humans / the API layer      |
//!
//! After creation the engine only ever writes an [`AuthoritativeUpdate`],
//! whose keys come from the closed [`AuthoritativeField`] enum. There is no
//! way to name an enrichment field in a sync write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field name to JSON value, as written into a document.
pub type FieldMap = serde_json::Map<String, Value>;

/// Enrichment fields a freshly created record is missing.
pub const ENRICHMENT_FIELDS: [&str; 3] = ["serial_number", "mrp", "hsn_code"];

pub const DEFAULT_CATEGORY: &str = "General";
pub const DEFAULT_WAREHOUSE: &str = "Main";

/// One row of the relational source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub key: String,
    pub name: String,
    pub quantity: f64,
    pub category: String,
    pub subcategory: String,
    pub warehouse: String,
    pub unit_code: String,
    pub unit_name: String,
    pub barcode: String,
    pub mrp: Option<f64>,
}

impl RawRecord {
    /// Record with just a key and a quantity, everything else empty.
    pub fn new(key: impl Into<String>, quantity: f64) -> Self {
        Self {
            key: key.into(),
            quantity,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Inventory document as held by the document store.
///
/// Every field has a serde default so documents written by older versions,
/// or trimmed by other writers, still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    // identity
    pub item_code: String,
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub barcode: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub warehouse: String,
    #[serde(default)]
    pub uom_code: String,
    #[serde(default)]
    pub uom_name: String,

    // authoritative
    #[serde(default)]
    pub stock_qty: f64,
    #[serde(default)]
    pub sql_server_qty: f64,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub qty_changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub qty_change_delta: Option<f64>,
    #[serde(default)]
    pub synced_from_sql: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    // enrichment
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub mrp: Option<f64>,
    #[serde(default)]
    pub hsn_code: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verified_by: Option<String>,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default = "default_verification_status")]
    pub verification_status: String,
    #[serde(default)]
    pub data_complete: bool,
    #[serde(default)]
    pub completion_percentage: f64,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub enrichment_history: Vec<Value>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_verification_status() -> String { "pending".to_string() }

fn or_default(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

impl InventoryRecord {
    /// First version of a record, seeded from the source row.
    ///
    /// Enrichment starts empty; `mrp` is left for editors even when the
    /// source carries one.
    pub fn from_source(raw: &RawRecord, now: DateTime<Utc>) -> Self {
        Self {
            item_code: raw.key.clone(),
            item_name: raw.name.clone(),
            barcode: raw.barcode.clone(),
            category: or_default(&raw.category, DEFAULT_CATEGORY),
            subcategory: raw.subcategory.clone(),
            warehouse: or_default(&raw.warehouse, DEFAULT_WAREHOUSE),
            uom_code: raw.unit_code.clone(),
            uom_name: raw.unit_name.clone(),

            stock_qty: raw.quantity,
            sql_server_qty: raw.quantity,
            last_synced: Some(now),
            last_checked: None,
            qty_changed_at: None,
            qty_change_delta: None,
            synced_from_sql: true,
            updated_at: Some(now),

            serial_number: None,
            mrp: None,
            hsn_code: None,
            location: None,
            condition: None,
            verified: false,
            verified_by: None,
            verified_at: None,
            verification_status: default_verification_status(),
            data_complete: false,
            completion_percentage: 0.0,
            missing_fields: ENRICHMENT_FIELDS.iter().map(|f| f.to_string()).collect(),
            enrichment_history: Vec::new(),

            created_at: Some(now),
        }
    }

    /// The record as a flat JSON object.
    pub fn to_fields(&self) -> Result<FieldMap, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "record serialized to {other} instead of an object"
            ))),
        }
    }
}

/// Fields the sync engine owns. Nothing else can appear in a sync write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuthoritativeField {
    StockQty,
    SqlServerQty,
    LastSynced,
    LastChecked,
    QtyChangedAt,
    QtyChangeDelta,
    SyncedFromSql,
    UpdatedAt,
}

impl AuthoritativeField {
    pub const ALL: [AuthoritativeField; 8] = [
        Self::StockQty,
        Self::SqlServerQty,
        Self::LastSynced,
        Self::LastChecked,
        Self::QtyChangedAt,
        Self::QtyChangeDelta,
        Self::SyncedFromSql,
        Self::UpdatedAt,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StockQty => "stock_qty",
            Self::SqlServerQty => "sql_server_qty",
            Self::LastSynced => "last_synced",
            Self::LastChecked => "last_checked",
            Self::QtyChangedAt => "qty_changed_at",
            Self::QtyChangeDelta => "qty_change_delta",
            Self::SyncedFromSql => "synced_from_sql",
            Self::UpdatedAt => "updated_at",
        }
    }
}

/// Which timestamp a write stamps: full runs stamp `last_synced`,
/// single-item checks stamp `last_checked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStamp {
    Synced,
    Checked,
}

impl SyncStamp {
    fn field(self) -> AuthoritativeField {
        match self {
            Self::Synced => AuthoritativeField::LastSynced,
            Self::Checked => AuthoritativeField::LastChecked,
        }
    }
}

/// A field-level merge restricted to authoritative fields.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthoritativeUpdate {
    fields: BTreeMap<AuthoritativeField, Value>,
}

impl AuthoritativeUpdate {
    /// Only the sync timestamp; used when the quantity is unchanged.
    pub fn touch(stamp: SyncStamp, now: DateTime<Utc>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(stamp.field(), timestamp(now));
        Self { fields }
    }

    /// The full quantity-change group.
    pub fn quantity_change(
        source_qty: f64,
        stored_qty: f64,
        stamp: SyncStamp,
        now: DateTime<Utc>,
    ) -> Self {
        let mut update = Self::touch(stamp, now);
        update.fields.insert(AuthoritativeField::StockQty, Value::from(source_qty));
        update.fields.insert(AuthoritativeField::SqlServerQty, Value::from(source_qty));
        update.fields.insert(AuthoritativeField::QtyChangedAt, timestamp(now));
        update.fields.insert(
            AuthoritativeField::QtyChangeDelta,
            Value::from(source_qty - stored_qty),
        );
        update.fields.insert(AuthoritativeField::UpdatedAt, timestamp(now));
        update
    }

    pub fn fields(&self) -> impl Iterator<Item = AuthoritativeField> + '_ {
        self.fields.keys().copied()
    }

    #[must_use]
    pub fn get(&self, field: AuthoritativeField) -> Option<&Value> {
        self.fields.get(&field)
    }

    #[must_use]
    pub fn into_field_map(self) -> FieldMap {
        self.fields
            .into_iter()
            .map(|(field, value)| (field.as_str().to_string(), value))
            .collect()
    }
}

fn timestamp(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339())
}
