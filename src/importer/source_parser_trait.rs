// ==========================================
// 商品目录导入引擎 - 源解析器 Trait
// ==========================================
// 职责: 从指定偏移量读取一批源记录 + 暴露结构目录
// 约束: 可从任意偏移重新开始,不依赖上一次调用的内部状态
// ==========================================

use crate::domain::{SourceDescriptor, SourceRecord};
use crate::importer::error::ImportResult;
use crate::importer::structure_catalog::StructureCatalog;

// ==========================================
// SourceBatch - 一批源记录
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    /// 按源顺序排列的记录（index 为全局序号）
    pub records: Vec<SourceRecord>,
    /// 偏移量之后已无更多记录
    pub exhausted: bool,
}

impl SourceBatch {
    /// 本批实际读取的记录数（游标按此推进）
    pub fn read_count(&self) -> usize {
        self.records.len()
    }
}

// ==========================================
// SourceParser Trait
// ==========================================
pub trait SourceParser: Send + Sync {
    /// 读取 [offset, offset + limit) 范围内的记录
    ///
    /// # 参数
    /// - source: 源描述（路径、格式、容器元素）
    /// - offset: 已消费的记录数
    /// - limit: 本批最多读取数
    ///
    /// # 返回
    /// - Ok(SourceBatch): 读取结果,exhausted 表示已到末尾
    /// - Err: 文件不可读或格式错误
    fn read_batch(
        &self,
        source: &SourceDescriptor,
        offset: usize,
        limit: usize,
    ) -> ImportResult<SourceBatch>;

    /// 扫描源文件生成结构目录
    ///
    /// # 参数
    /// - sample_limit: 每个路径最多保留的样本值数
    fn structure_catalog(
        &self,
        source: &SourceDescriptor,
        sample_limit: usize,
    ) -> ImportResult<StructureCatalog>;
}
