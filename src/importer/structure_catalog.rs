// ==========================================
// 商品目录导入引擎 - 结构目录
// ==========================================
// 职责: 可寻址字段路径列表 + 每路径出现次数 + 样本值
// 消费方: 映射配置界面（只读）
// ==========================================

use crate::domain::SourceRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSummary {
    pub path: String,
    /// 全部记录中的出现次数（重复节点逐次计数）
    pub occurrences: usize,
    /// 单条记录内的最大重复次数
    pub max_repeat: usize,
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructureCatalog {
    pub record_count: usize,
    /// 首次出现顺序
    paths: Vec<PathSummary>,
    #[serde(skip)]
    position: BTreeMap<String, usize>,
    #[serde(skip)]
    sample_limit: usize,
}

impl StructureCatalog {
    pub fn new(sample_limit: usize) -> Self {
        Self {
            sample_limit,
            ..Self::default()
        }
    }

    /// 合并一条记录的路径与样本值
    pub fn observe(&mut self, record: &SourceRecord) {
        self.record_count += 1;
        for path in record.paths() {
            let values = record.values(path);
            let idx = match self.position.get(path) {
                Some(idx) => *idx,
                None => {
                    self.paths.push(PathSummary {
                        path: path.to_string(),
                        ..PathSummary::default()
                    });
                    let idx = self.paths.len() - 1;
                    self.position.insert(path.to_string(), idx);
                    idx
                }
            };

            let summary = &mut self.paths[idx];
            summary.occurrences += values.len();
            summary.max_repeat = summary.max_repeat.max(values.len());
            for value in values {
                if summary.samples.len() >= self.sample_limit {
                    break;
                }
                let trimmed = value.trim();
                if !trimmed.is_empty() && !summary.samples.iter().any(|s| s == trimmed) {
                    summary.samples.push(trimmed.to_string());
                }
            }
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(|p| p.path.as_str())
    }

    pub fn summaries(&self) -> &[PathSummary] {
        &self.paths
    }

    pub fn contains(&self, path: &str) -> bool {
        self.position.contains_key(path)
    }

    pub fn samples(&self, path: &str) -> &[String] {
        self.position
            .get(path)
            .map(|idx| self.paths[*idx].samples.as_slice())
            .unwrap_or(&[])
    }

    /// 单条记录内出现多次的路径（可用于属性自动识别）
    pub fn repeating_paths(&self) -> impl Iterator<Item = &str> {
        self.paths
            .iter()
            .filter(|p| p.max_repeat > 1)
            .map(|p| p.path.as_str())
    }
}
