// ==========================================
// 商品目录导入引擎 - 缺失记录对账
// ==========================================
// 职责: 上次产出集合 − 本轮可见集合 → 按策略处置
// 红线: 只处置最后修改者为本任务的记录,其他导入产出的记录不得触碰
// ==========================================

use crate::domain::{DispositionAction, ReconciliationPolicy};
use crate::repository::catalog_repo::CatalogWriter;
use crate::repository::error::{CatalogError, CatalogResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// 上次产出但本轮未出现的标识
pub fn missing_identifiers(produced: &BTreeSet<String>, seen: &BTreeSet<String>) -> Vec<String> {
    produced.difference(seen).cloned().collect()
}

// ==========================================
// ReconciliationReport - 对账结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub action: Option<DispositionAction>,
    /// 集合差（不论是否处置）
    pub missing: Vec<String>,
    pub applied: Vec<String>,
    /// 已被其他任务接管或已不存在,跳过
    pub skipped_foreign: Vec<String>,
    /// (identifier, error)
    pub failed: Vec<(String, String)>,
}

// ==========================================
// MissingRecordReconciler
// ==========================================
pub struct MissingRecordReconciler<'a> {
    catalog: &'a dyn CatalogWriter,
}

impl<'a> MissingRecordReconciler<'a> {
    pub fn new(catalog: &'a dyn CatalogWriter) -> Self {
        Self { catalog }
    }

    /// 当前最后修改者是否为本任务
    fn owned_by(&self, job_id: &str, identifier: &str) -> CatalogResult<bool> {
        Ok(self
            .catalog
            .find(identifier)?
            .map(|entry| entry.owner_job_id == job_id)
            .unwrap_or(false))
    }

    /// 执行对账
    ///
    /// # 参数
    /// - produced: 上次完成时持久化的产出集合
    /// - seen: 本轮准入记录的标识集合
    ///
    /// # 返回
    /// 单条处置失败不会中断对账,记入 report.failed
    pub fn reconcile(
        &self,
        job_id: &str,
        produced: &BTreeSet<String>,
        seen: &BTreeSet<String>,
        policy: &ReconciliationPolicy,
    ) -> ReconciliationReport {
        let missing = missing_identifiers(produced, seen);
        let mut report = ReconciliationReport {
            action: policy.missing,
            missing: missing.clone(),
            ..Default::default()
        };

        let Some(action) = policy.missing else {
            debug!(job_id = %job_id, missing = missing.len(), "未配置缺失记录处置,跳过");
            return report;
        };

        for identifier in missing {
            match self.owned_by(job_id, &identifier) {
                Ok(true) => {}
                Ok(false) => {
                    report.skipped_foreign.push(identifier);
                    continue;
                }
                Err(e) => {
                    report.failed.push((identifier, e.to_string()));
                    continue;
                }
            }

            match self.catalog.apply_disposition(&identifier, action) {
                Ok(()) => report.applied.push(identifier),
                // 查询后被并发删除
                Err(CatalogError::NotFound(_)) => report.skipped_foreign.push(identifier),
                Err(e) => {
                    warn!(job_id = %job_id, identifier = %identifier, error = %e, "缺失记录处置失败");
                    report.failed.push((identifier, e.to_string()));
                }
            }
        }

        info!(
            job_id = %job_id,
            action = %action,
            missing = report.missing.len(),
            applied = report.applied.len(),
            skipped_foreign = report.skipped_foreign.len(),
            failed = report.failed.len(),
            "缺失记录对账完成"
        );
        report
    }

    /// 不再满足过滤条件的已有记录转草稿
    ///
    /// # 返回
    /// - Ok(true): 已转草稿
    /// - Ok(false): 记录不存在或属于其他任务
    pub fn draft_non_matching(&self, job_id: &str, identifier: &str) -> CatalogResult<bool> {
        if !self.owned_by(job_id, identifier)? {
            return Ok(false);
        }
        self.catalog
            .apply_disposition(identifier, DispositionAction::Draft)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::domain::{CatalogStatus, FieldValue, ProductKind};
    use crate::engine::stages::FinishedRecord;
    use crate::repository::catalog_repo::SqliteCatalogRepository;
    use rusqlite::Connection;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn catalog() -> SqliteCatalogRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        SqliteCatalogRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn record(identifier: &str) -> FinishedRecord {
        let mut fields = BTreeMap::new();
        fields.insert("sku".to_string(), FieldValue::Text(identifier.to_string()));
        FinishedRecord {
            record_index: 0,
            identifier: identifier.to_string(),
            kind: ProductKind::Simple,
            fields,
            attributes: Vec::new(),
            variations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_is_set_difference() {
        let missing = missing_identifiers(&set(&["A", "B", "C"]), &set(&["B", "D"]));
        assert_eq!(missing, vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_foreign_records_are_untouched() {
        let catalog = catalog();
        let protected = BTreeSet::new();
        catalog.write_record("job-a", &record("A1"), &protected).unwrap();
        catalog.write_record("job-b", &record("B1"), &protected).unwrap();

        let reconciler = MissingRecordReconciler::new(&catalog);
        let policy = ReconciliationPolicy {
            missing: Some(DispositionAction::Draft),
        };
        // job-a 上次产出记录中混入了 B1（已被 job-b 接管）
        let report = reconciler.reconcile("job-a", &set(&["A1", "B1"]), &set(&[]), &policy);

        assert_eq!(report.applied, vec!["A1".to_string()]);
        assert_eq!(report.skipped_foreign, vec!["B1".to_string()]);
        assert_eq!(catalog.find("A1").unwrap().unwrap().status, CatalogStatus::Draft);
        assert_eq!(
            catalog.find("B1").unwrap().unwrap().status,
            CatalogStatus::Published
        );
    }

    #[test]
    fn test_no_policy_reports_without_acting() {
        let catalog = catalog();
        catalog
            .write_record("job-a", &record("A1"), &BTreeSet::new())
            .unwrap();

        let reconciler = MissingRecordReconciler::new(&catalog);
        let report = reconciler.reconcile(
            "job-a",
            &set(&["A1"]),
            &set(&[]),
            &ReconciliationPolicy::default(),
        );

        assert_eq!(report.missing, vec!["A1".to_string()]);
        assert!(report.applied.is_empty());
        assert_eq!(
            catalog.find("A1").unwrap().unwrap().status,
            CatalogStatus::Published
        );
    }

    #[test]
    fn test_permanent_delete_and_vanished_record() {
        let catalog = catalog();
        catalog
            .write_record("job-a", &record("A1"), &BTreeSet::new())
            .unwrap();

        let reconciler = MissingRecordReconciler::new(&catalog);
        let policy = ReconciliationPolicy {
            missing: Some(DispositionAction::PermanentDelete),
        };
        let report = reconciler.reconcile("job-a", &set(&["A1", "GONE"]), &set(&[]), &policy);

        assert_eq!(report.applied, vec!["A1".to_string()]);
        assert_eq!(report.skipped_foreign, vec!["GONE".to_string()]);
        assert!(catalog.find("A1").unwrap().is_none());
    }

    #[test]
    fn test_draft_non_matching_respects_owner() {
        let catalog = catalog();
        catalog
            .write_record("job-b", &record("B1"), &BTreeSet::new())
            .unwrap();
        let reconciler = MissingRecordReconciler::new(&catalog);

        assert!(!reconciler.draft_non_matching("job-a", "B1").unwrap());
        assert!(reconciler.draft_non_matching("job-b", "B1").unwrap());
        assert!(!reconciler.draft_non_matching("job-b", "MISSING").unwrap());
    }
}
