// ==========================================
// 商品目录导入引擎 - 目标目录写入端口
// ==========================================
// 职责: 按标识 upsert 完整记录（含变体）、应用缺失记录处置、清理回收站
// 约束: update_on_sync = false 的字段在更新时保留已有值
// 约束: 每次写入把 owner_job_id 置为本次写入的任务（最后修改者）
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::{
    CatalogStatus, DispositionAction, FieldValue, ProductKind, StockStatus, VariationRecord,
    WriteOutcome,
};
use crate::engine::stages::{FinishedRecord, ResolvedAttribute};
use crate::repository::error::{CatalogError, CatalogResult, RepositoryError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// 目录中已存在的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub identifier: String,
    pub owner_job_id: String,
    pub kind: ProductKind,
    pub status: CatalogStatus,
    pub stock_status: StockStatus,
    pub content_hash: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub attributes: Vec<ResolvedAttribute>,
    pub variations: Vec<VariationRecord>,
    pub trashed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// CatalogWriter Trait - 目录写入端口
// ==========================================
pub trait CatalogWriter: Send + Sync {
    fn find(&self, identifier: &str) -> CatalogResult<Option<CatalogEntry>>;

    /// upsert; protected_fields 中的字段在更新时保留已有值
    fn write_record(
        &self,
        job_id: &str,
        record: &FinishedRecord,
        protected_fields: &BTreeSet<String>,
    ) -> CatalogResult<WriteOutcome>;

    fn apply_disposition(&self, identifier: &str, action: DispositionAction) -> CatalogResult<()>;
}

const ENTRY_COLUMNS: &str = "identifier, owner_job_id, kind, status, stock_status, content_hash, \
     fields_json, attributes_json, variations_json, trashed_at, updated_at";

fn kind_str(kind: ProductKind) -> &'static str {
    match kind {
        ProductKind::Simple => "SIMPLE",
        ProductKind::Variable => "VARIABLE",
    }
}

fn corrupt(identifier: &str, message: String) -> CatalogError {
    CatalogError::Repository(RepositoryError::CorruptState {
        entity: format!("catalog_record:{}", identifier),
        message,
    })
}

/// 记录的库存状态: 字段 stock_status 优先,其次按库存数量推导
fn derive_stock_status(fields: &BTreeMap<String, FieldValue>) -> StockStatus {
    if let Some(status) = fields
        .get("stock_status")
        .and_then(|v| StockStatus::parse(v.as_text().trim()))
    {
        return status;
    }
    match fields.get("stock_quantity").and_then(FieldValue::as_number) {
        Some(q) if q <= 0.0 => StockStatus::Outofstock,
        _ => StockStatus::Instock,
    }
}

// ==========================================
// SqliteCatalogRepository - 参考实现
// ==========================================
pub struct SqliteCatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogRepository {
    pub fn new(db_path: &str) -> CatalogResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> CatalogResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CatalogError::Repository(RepositoryError::LockError(e.to_string())))
    }

    fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<[Option<String>; 11]> {
        let mut out: [Option<String>; 11] = Default::default();
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = row.get(i)?;
        }
        Ok(out)
    }

    fn parse_entry(raw: [Option<String>; 11]) -> CatalogResult<CatalogEntry> {
        let [identifier, owner, kind, status, stock, hash, fields, attributes, variations, trashed_at, updated_at] =
            raw;
        let identifier = identifier.unwrap_or_default();
        let text = |v: Option<String>| v.unwrap_or_default();

        let kind = match text(kind).as_str() {
            "SIMPLE" => ProductKind::Simple,
            "VARIABLE" => ProductKind::Variable,
            other => return Err(corrupt(&identifier, format!("未知商品类型 {}", other))),
        };
        let status_text = text(status);
        let status = CatalogStatus::parse(&status_text)
            .ok_or_else(|| corrupt(&identifier, format!("未知状态 {}", status_text)))?;
        let stock_text = text(stock);
        let stock_status = StockStatus::parse(&stock_text)
            .ok_or_else(|| corrupt(&identifier, format!("未知库存状态 {}", stock_text)))?;
        let parse_ts = |v: &str| {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| corrupt(&identifier, e.to_string()))
        };
        let trashed_at = trashed_at.as_deref().map(parse_ts).transpose()?;
        let updated_at = parse_ts(&text(updated_at))?;

        Ok(CatalogEntry {
            owner_job_id: text(owner),
            kind,
            status,
            stock_status,
            content_hash: text(hash),
            fields: serde_json::from_str(&text(fields))?,
            attributes: serde_json::from_str(attributes.as_deref().unwrap_or("[]"))?,
            variations: serde_json::from_str(&text(variations))?,
            trashed_at,
            updated_at,
            identifier,
        })
    }

    fn find_in(conn: &Connection, identifier: &str) -> CatalogResult<Option<CatalogEntry>> {
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM catalog_record WHERE identifier = ?1",
                    ENTRY_COLUMNS
                ),
                [identifier],
                Self::read_entry,
            )
            .optional()?;
        raw.map(Self::parse_entry).transpose()
    }

    pub fn count(&self) -> CatalogResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM catalog_record", [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    /// 物理删除回收站中超过保留期的记录
    pub fn purge_trashed(&self, now: DateTime<Utc>, retention_days: i64) -> CatalogResult<usize> {
        let cutoff = now - ChronoDuration::days(retention_days.max(0));
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT identifier, trashed_at FROM catalog_record WHERE status = ?1 AND trashed_at IS NOT NULL",
        )?;
        let rows = stmt.query_map([CatalogStatus::Trash.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut expired = Vec::new();
        for row in rows {
            let (identifier, trashed_at) = row?;
            let is_expired = DateTime::parse_from_rfc3339(&trashed_at)
                .map(|dt| dt.with_timezone(&Utc) <= cutoff)
                .unwrap_or(false);
            if is_expired {
                expired.push(identifier);
            }
        }
        drop(stmt);

        let tx = conn.unchecked_transaction()?;
        for identifier in &expired {
            tx.execute("DELETE FROM catalog_record WHERE identifier = ?1", [identifier])?;
        }
        tx.commit()?;
        Ok(expired.len())
    }
}

impl CatalogWriter for SqliteCatalogRepository {
    fn find(&self, identifier: &str) -> CatalogResult<Option<CatalogEntry>> {
        let conn = self.get_conn()?;
        Self::find_in(&conn, identifier)
    }

    fn write_record(
        &self,
        job_id: &str,
        record: &FinishedRecord,
        protected_fields: &BTreeSet<String>,
    ) -> CatalogResult<WriteOutcome> {
        if record.identifier.trim().is_empty() {
            return Err(CatalogError::Rejected {
                identifier: record.identifier.clone(),
                reason: "标识为空".to_string(),
            });
        }

        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let existing = Self::find_in(&tx, &record.identifier)?;
        let now = Utc::now().to_rfc3339();

        let mut fields = record.fields.clone();
        if let Some(existing) = &existing {
            for key in protected_fields {
                match existing.fields.get(key) {
                    Some(old) => {
                        fields.insert(key.clone(), old.clone());
                    }
                    None => {
                        fields.remove(key);
                    }
                }
            }
        }

        tx.execute(
            r#"
            INSERT INTO catalog_record (
                identifier, owner_job_id, kind, status, stock_status, content_hash,
                fields_json, attributes_json, variations_json, trashed_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?10)
            ON CONFLICT(identifier) DO UPDATE SET
                owner_job_id = excluded.owner_job_id,
                kind = excluded.kind,
                status = excluded.status,
                stock_status = excluded.stock_status,
                content_hash = excluded.content_hash,
                fields_json = excluded.fields_json,
                attributes_json = excluded.attributes_json,
                variations_json = excluded.variations_json,
                trashed_at = NULL,
                updated_at = excluded.updated_at
            "#,
            params![
                record.identifier,
                job_id,
                kind_str(record.kind),
                CatalogStatus::Published.as_str(),
                derive_stock_status(&fields).as_str(),
                record.content_hash(),
                serde_json::to_string(&fields)?,
                serde_json::to_string(&record.attributes)?,
                serde_json::to_string(&record.variations)?,
                now,
            ],
        )?;
        tx.commit()?;

        Ok(if existing.is_some() {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Created
        })
    }

    fn apply_disposition(&self, identifier: &str, action: DispositionAction) -> CatalogResult<()> {
        let conn = self.get_conn()?;
        let now = Utc::now().to_rfc3339();
        // 处置后清空内容哈希: 记录重新出现在源中时不会被判为未变化而跳过
        let affected = match action {
            DispositionAction::Draft => conn.execute(
                "UPDATE catalog_record SET status = ?2, content_hash = '', updated_at = ?3 WHERE identifier = ?1",
                params![identifier, CatalogStatus::Draft.as_str(), now],
            )?,
            DispositionAction::MarkOutOfStock => conn.execute(
                "UPDATE catalog_record SET stock_status = ?2, content_hash = '', updated_at = ?3 WHERE identifier = ?1",
                params![identifier, StockStatus::Outofstock.as_str(), now],
            )?,
            DispositionAction::AllowBackorder => conn.execute(
                "UPDATE catalog_record SET stock_status = ?2, content_hash = '', updated_at = ?3 WHERE identifier = ?1",
                params![identifier, StockStatus::Onbackorder.as_str(), now],
            )?,
            // 已在回收站的记录保留原 trashed_at
            DispositionAction::Trash => conn.execute(
                r#"
                UPDATE catalog_record
                SET status = ?2, content_hash = '', trashed_at = COALESCE(trashed_at, ?3), updated_at = ?3
                WHERE identifier = ?1
                "#,
                params![identifier, CatalogStatus::Trash.as_str(), now],
            )?,
            DispositionAction::PermanentDelete => conn.execute(
                "DELETE FROM catalog_record WHERE identifier = ?1",
                [identifier],
            )?,
        };

        if affected == 0 {
            return Err(CatalogError::NotFound(identifier.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::configure_sqlite_connection;

    fn repo() -> SqliteCatalogRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        SqliteCatalogRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn record(identifier: &str, title: &str, price: f64) -> FinishedRecord {
        let mut fields = BTreeMap::new();
        fields.insert("sku".to_string(), FieldValue::Text(identifier.to_string()));
        fields.insert("title".to_string(), FieldValue::Text(title.to_string()));
        fields.insert("regular_price".to_string(), FieldValue::Number(price));
        FinishedRecord {
            record_index: 0,
            identifier: identifier.to_string(),
            kind: ProductKind::Simple,
            fields,
            attributes: vec![],
            variations: vec![],
            warnings: vec![],
        }
    }

    #[test]
    fn test_upsert_created_then_updated() {
        let repo = repo();
        let none = BTreeSet::new();
        assert_eq!(
            repo.write_record("job-a", &record("A1", "Shirt", 10.0), &none)
                .unwrap(),
            WriteOutcome::Created
        );
        assert_eq!(
            repo.write_record("job-b", &record("A1", "Shirt v2", 12.0), &none)
                .unwrap(),
            WriteOutcome::Updated
        );

        let entry = repo.find("A1").unwrap().unwrap();
        assert_eq!(entry.owner_job_id, "job-b");
        assert_eq!(entry.fields["title"], FieldValue::Text("Shirt v2".into()));
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_protected_fields_keep_existing_value() {
        let repo = repo();
        let none = BTreeSet::new();
        repo.write_record("job-a", &record("A1", "Hand written", 10.0), &none)
            .unwrap();

        let protected: BTreeSet<String> = ["title".to_string()].into_iter().collect();
        repo.write_record("job-a", &record("A1", "Feed title", 15.0), &protected)
            .unwrap();

        let entry = repo.find("A1").unwrap().unwrap();
        assert_eq!(entry.fields["title"], FieldValue::Text("Hand written".into()));
        assert_eq!(entry.fields["regular_price"], FieldValue::Number(15.0));
    }

    #[test]
    fn test_dispositions_and_purge() {
        let repo = repo();
        let none = BTreeSet::new();
        for id in ["A", "B", "C", "D"] {
            repo.write_record("job-a", &record(id, id, 1.0), &none).unwrap();
        }

        repo.apply_disposition("A", DispositionAction::Draft).unwrap();
        repo.apply_disposition("B", DispositionAction::MarkOutOfStock)
            .unwrap();
        repo.apply_disposition("C", DispositionAction::Trash).unwrap();
        repo.apply_disposition("D", DispositionAction::PermanentDelete)
            .unwrap();

        assert_eq!(repo.find("A").unwrap().unwrap().status, CatalogStatus::Draft);
        assert_eq!(
            repo.find("B").unwrap().unwrap().stock_status,
            StockStatus::Outofstock
        );
        let trashed = repo.find("C").unwrap().unwrap();
        assert_eq!(trashed.status, CatalogStatus::Trash);
        assert!(trashed.trashed_at.is_some());
        assert!(repo.find("D").unwrap().is_none());
        assert!(matches!(
            repo.apply_disposition("D", DispositionAction::Draft),
            Err(CatalogError::NotFound(_))
        ));

        // 保留期内不清理
        assert_eq!(repo.purge_trashed(Utc::now(), 30).unwrap(), 0);
        assert_eq!(
            repo.purge_trashed(Utc::now() + ChronoDuration::days(31), 30)
                .unwrap(),
            1
        );
        assert!(repo.find("C").unwrap().is_none());
    }

    #[test]
    fn test_rewrite_restores_published_status() {
        let repo = repo();
        let none = BTreeSet::new();
        repo.write_record("job-a", &record("A", "A", 1.0), &none).unwrap();
        repo.apply_disposition("A", DispositionAction::Trash).unwrap();
        repo.write_record("job-a", &record("A", "A", 1.0), &none).unwrap();

        let entry = repo.find("A").unwrap().unwrap();
        assert_eq!(entry.status, CatalogStatus::Published);
        assert!(entry.trashed_at.is_none());
    }

    #[test]
    fn test_disposition_clears_content_hash() {
        let repo = repo();
        let none = BTreeSet::new();
        let original = record("A", "A", 1.0);
        repo.write_record("job-a", &original, &none).unwrap();
        assert_eq!(
            repo.find("A").unwrap().unwrap().content_hash,
            original.content_hash()
        );

        repo.apply_disposition("A", DispositionAction::AllowBackorder)
            .unwrap();
        let entry = repo.find("A").unwrap().unwrap();
        assert_eq!(entry.stock_status, StockStatus::Onbackorder);
        assert!(entry.content_hash.is_empty());
    }
}
