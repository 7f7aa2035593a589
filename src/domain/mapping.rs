// ==========================================
// 商品目录导入引擎 - 字段映射配置
// ==========================================
// 职责: 目标字段 ← 源表达式 + 加工模式
// 约束: 每个任务每个目标字段一条映射; 批次开始读取后不可变
// 约束: 加工模式非 direct 时载荷必须非空（保存时校验）
// ==========================================

use crate::domain::types::{FieldFamily, HybridStage, TargetKind};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

// ==========================================
// FieldMapping - 字段映射
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// 目标字段 key（如 title / sku / regular_price）
    pub target: String,

    /// 源表达式
    pub source: SourceExpression,

    /// 目标值类型（决定 direct 模式下的类型转换）
    #[serde(default)]
    pub kind: TargetKind,

    /// 加工模式
    #[serde(default)]
    pub mode: ProcessingMode,

    /// 重复导入时是否允许覆盖已有记录上的该字段
    #[serde(default = "default_true")]
    pub update_on_sync: bool,
}

impl FieldMapping {
    /// 便捷构造: 模板映射 + direct 模式
    pub fn template(target: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: SourceExpression::Template {
                template: template.into(),
            },
            kind: TargetKind::Text,
            mode: ProcessingMode::Direct,
            update_on_sync: true,
        }
    }

    pub fn with_kind(mut self, kind: TargetKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn family(&self) -> FieldFamily {
        FieldFamily::of(&self.target)
    }
}

// ==========================================
// SourceExpression - 源表达式
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceExpression {
    /// 模板: 字面文本 + {path} / {path[n]} / {path*} 占位符
    Template { template: String },

    /// 固定值/下拉选定值,不做替换
    Fixed { value: String },

    /// 生成值: prefix + sha256(模板解析结果) 前 12 位
    Generate {
        #[serde(default)]
        prefix: String,
        seed: String,
    },
}

// ==========================================
// ProcessingMode - 加工模式
// ==========================================
// 说明: 模式按映射固定,不随记录变化
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Direct,

    /// 沙箱公式
    #[serde(rename = "php_formula")]
    Formula { formula: String },

    /// AI 加工
    #[serde(rename = "ai_processing")]
    Ai { ai: AiSpec },

    /// 公式 + AI 组合
    Hybrid {
        formula: String,
        ai: AiSpec,
        /// 先执行的阶段; 缺省时按字段族决定
        #[serde(default)]
        first: Option<HybridStage>,
    },
}

impl ProcessingMode {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingMode::Direct => "direct",
            ProcessingMode::Formula { .. } => "php_formula",
            ProcessingMode::Ai { .. } => "ai_processing",
            ProcessingMode::Hybrid { .. } => "hybrid",
        }
    }
}

// ==========================================
// AiSpec - AI 调用参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSpec {
    /// 提供方; 缺省使用引擎配置中的默认提供方
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub model: String,

    /// 提示词模板,{value} 替换为解析值
    pub prompt: String,
}

impl AiSpec {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            provider: None,
            model: String::new(),
            prompt: prompt.into(),
        }
    }

    /// 填充提示词
    pub fn render_prompt(&self, value: &str) -> String {
        if self.prompt.contains("{value}") {
            self.prompt.replace("{value}", value)
        } else {
            format!("{}\n\n{}", self.prompt, value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_deserialize_defaults() {
        let json = r#"{
            "target": "title",
            "source": {"type": "template", "template": "{name} - {brand}"}
        }"#;
        let mapping: FieldMapping = serde_json::from_str(json).unwrap();

        assert_eq!(mapping.mode, ProcessingMode::Direct);
        assert_eq!(mapping.kind, TargetKind::Text);
        assert!(mapping.update_on_sync);
    }

    #[test]
    fn test_mapping_deserialize_hybrid() {
        let json = r#"{
            "target": "description",
            "source": {"type": "template", "template": "{desc}"},
            "mode": {
                "mode": "hybrid",
                "formula": "trim(value)",
                "ai": {"provider": "openai", "model": "gpt", "prompt": "Rewrite: {value}"},
                "first": "FORMULA"
            }
        }"#;
        let mapping: FieldMapping = serde_json::from_str(json).unwrap();

        match mapping.mode {
            ProcessingMode::Hybrid { first, ai, .. } => {
                assert_eq!(first, Some(HybridStage::Formula));
                assert_eq!(ai.render_prompt("x"), "Rewrite: x");
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }
}
