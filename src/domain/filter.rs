// ==========================================
// 商品目录导入引擎 - 过滤规则
// ==========================================
// 说明: 有序列表构成一棵谓词树,严格按声明顺序左折叠
// ==========================================

use crate::domain::types::{Connective, FilterOperator};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// 源字段路径
    pub path: String,

    pub operator: FilterOperator,

    /// 比较值（empty / not_empty 忽略）
    #[serde(default)]
    pub value: String,

    /// 与下一条规则的连接词（下一条规则以此连接词并入之前的结果）
    #[serde(default)]
    pub connective: Connective,
}

impl FilterRule {
    pub fn new(path: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operator,
            value: value.into(),
            connective: Connective::And,
        }
    }

    pub fn then(mut self, connective: Connective) -> Self {
        self.connective = connective;
        self
    }
}
