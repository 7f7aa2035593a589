// ==========================================
// 商品目录导入引擎 - 字段加工流水线
// ==========================================
// 职责: 映射解析（AdmittedRecord → MappedRecord）
//       按加工模式逐字段加工（MappedRecord → ProcessedRecord）
// 模式: direct / php_formula / ai_processing / hybrid,按映射固定
// 红线: 字段级失败只回退该字段（使用解析值）并记录警告,不中止记录与批次
// ==========================================

use crate::config::EngineConfig;
use crate::domain::{FieldMapping, FieldValue, HybridStage, ProcessingMode, SourceRecord};
use crate::engine::ai::AiProcessor;
use crate::engine::error::ProcessingError;
use crate::engine::expression::MappingResolver;
use crate::engine::formula::{FormulaEngine, FormulaScope, Program};
use crate::engine::stages::{AdmittedRecord, MappedRecord, ProcessedRecord};
use crate::importer::ValueCoercer;
use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::warn;

/// 预编译的映射（公式只编译一次）
struct CompiledMapping {
    mapping: FieldMapping,
    program: Option<Result<Program, ProcessingError>>,
}

impl CompiledMapping {
    fn new(mapping: &FieldMapping, formula: &FormulaEngine) -> Self {
        let program = match &mapping.mode {
            ProcessingMode::Direct | ProcessingMode::Ai { .. } => None,
            ProcessingMode::Formula { formula: text }
            | ProcessingMode::Hybrid { formula: text, .. } => Some(formula.compile(text)),
        };
        Self {
            mapping: mapping.clone(),
            program,
        }
    }
}

// ==========================================
// ProcessingPipeline - 加工流水线
// ==========================================
pub struct ProcessingPipeline {
    mappings: Vec<CompiledMapping>,
    formula: FormulaEngine,
    coercer: ValueCoercer,
    ai: AiProcessor,
}

impl ProcessingPipeline {
    pub fn new(config: &EngineConfig, mappings: &[FieldMapping], ai: AiProcessor) -> Self {
        let formula = FormulaEngine::new(config.formula_max_length);
        let mappings = mappings
            .iter()
            .map(|m| CompiledMapping::new(m, &formula))
            .collect();
        Self {
            mappings,
            formula,
            coercer: ValueCoercer::new(config.attribute_separator.clone()),
            ai,
        }
    }

    pub fn coercer(&self) -> &ValueCoercer {
        &self.coercer
    }

    pub fn mapping(&self, target: &str) -> Option<&FieldMapping> {
        self.mappings
            .iter()
            .map(|c| &c.mapping)
            .find(|m| m.target == target)
    }

    /// 解析全部映射的原始值
    pub fn map<'a>(&self, admitted: AdmittedRecord<'a>) -> MappedRecord<'a> {
        let record = admitted.record();
        let raw = self
            .mappings
            .iter()
            .map(|c| {
                (
                    c.mapping.target.clone(),
                    MappingResolver::resolve(&c.mapping.source, record),
                )
            })
            .collect();
        MappedRecord { record, raw }
    }

    /// 逐字段加工
    ///
    /// 公式中可引用的兄弟字段取解析值（与字段加工顺序无关）
    pub async fn process<'a>(&self, mapped: MappedRecord<'a>) -> ProcessedRecord<'a> {
        // 字段之间无顺序依赖,并发加工（AI 调用可重叠）
        let results = join_all(self.mappings.iter().map(|compiled| {
            let raw = mapped
                .raw
                .get(&compiled.mapping.target)
                .cloned()
                .unwrap_or_default();
            self.process_field(compiled, raw, &mapped.raw, mapped.record)
        }))
        .await;

        let mut fields = BTreeMap::new();
        let mut warnings = Vec::new();
        for (compiled, (value, field_warnings)) in self.mappings.iter().zip(results) {
            fields.insert(compiled.mapping.target.clone(), value);
            warnings.extend(field_warnings);
        }

        ProcessedRecord {
            record: mapped.record,
            fields,
            warnings,
        }
    }

    /// 只解析并加工单个目标字段（被过滤记录求标识用）
    pub async fn process_single(&self, target: &str, record: &SourceRecord) -> Option<FieldValue> {
        let compiled = self.mappings.iter().find(|c| c.mapping.target == target)?;
        let raw_fields: BTreeMap<String, FieldValue> = self
            .mappings
            .iter()
            .map(|c| {
                (
                    c.mapping.target.clone(),
                    MappingResolver::resolve(&c.mapping.source, record),
                )
            })
            .collect();
        let raw = raw_fields.get(target).cloned().unwrap_or_default();
        let (value, _) = self.process_field(compiled, raw, &raw_fields, record).await;
        Some(value)
    }

    async fn process_field(
        &self,
        compiled: &CompiledMapping,
        raw: FieldValue,
        siblings: &BTreeMap<String, FieldValue>,
        record: &SourceRecord,
    ) -> (FieldValue, Vec<String>) {
        let mut warnings = Vec::new();
        let mapping = &compiled.mapping;
        let processed = match &mapping.mode {
            ProcessingMode::Direct => raw,
            ProcessingMode::Formula { .. } => {
                self.formula_stage(compiled, raw, siblings, record, &mut warnings)
            }
            ProcessingMode::Ai { ai } => match self.ai.process(ai, &raw.as_text()).await {
                Ok(text) => FieldValue::Text(text.trim().to_string()),
                Err(e) => self.fallback(mapping, "AI", raw, e, &mut warnings),
            },
            ProcessingMode::Hybrid { ai, first, .. } => {
                let first = first.unwrap_or_else(|| mapping.family().default_hybrid_first());
                let order = match first {
                    HybridStage::Formula => [HybridStage::Formula, HybridStage::Ai],
                    HybridStage::Ai => [HybridStage::Ai, HybridStage::Formula],
                };
                let mut value = raw;
                for stage in order {
                    // 各阶段独立回退: 失败时保留本阶段输入
                    value = match stage {
                        HybridStage::Formula => {
                            self.formula_stage(compiled, value, siblings, record, &mut warnings)
                        }
                        HybridStage::Ai => match self.ai.process(ai, &value.as_text()).await {
                            Ok(text) => FieldValue::Text(text.trim().to_string()),
                            Err(e) => self.fallback(mapping, "AI", value, e, &mut warnings),
                        },
                    };
                }
                value
            }
        };

        let value = self.coerce(mapping, processed, &mut warnings);
        (value, warnings)
    }

    fn formula_stage(
        &self,
        compiled: &CompiledMapping,
        input: FieldValue,
        siblings: &BTreeMap<String, FieldValue>,
        record: &SourceRecord,
        warnings: &mut Vec<String>,
    ) -> FieldValue {
        let program = match &compiled.program {
            Some(Ok(program)) => program,
            Some(Err(e)) => {
                return self.fallback(&compiled.mapping, "公式", input, e.clone(), warnings)
            }
            None => return input,
        };

        let scope = FormulaScope::new(input.clone(), siblings).with_record(record);
        match self.formula.execute(program, &scope) {
            Ok(value) => value,
            Err(e) => self.fallback(&compiled.mapping, "公式", input, e, warnings),
        }
    }

    fn fallback(
        &self,
        mapping: &FieldMapping,
        stage: &str,
        input: FieldValue,
        error: ProcessingError,
        warnings: &mut Vec<String>,
    ) -> FieldValue {
        warn!(field = %mapping.target, stage, error = %error, "字段加工失败,使用回退值");
        warnings.push(format!("字段 {} {}加工失败,已回退: {}", mapping.target, stage, error));
        input
    }

    fn coerce(
        &self,
        mapping: &FieldMapping,
        value: FieldValue,
        warnings: &mut Vec<String>,
    ) -> FieldValue {
        match self.coercer.coerce(value, mapping.kind) {
            Ok(v) => v,
            Err(e) => {
                warnings.push(format!("字段 {} 类型转换失败,置空: {}", mapping.target, e));
                FieldValue::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiSettings;
    use crate::domain::{AiSpec, TargetKind};
    use crate::engine::ai::{AiProvider, AiProviderRegistry, AiRequest, AiResponseCache};
    use crate::engine::filter::FilterEvaluator;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FailingProvider;

    #[async_trait]
    impl AiProvider for FailingProvider {
        fn name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _request: &AiRequest) -> anyhow::Result<String> {
            anyhow::bail!("service unavailable")
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl AiProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &AiRequest) -> anyhow::Result<String> {
            Ok(format!(" <{}> ", request.prompt))
        }
    }

    fn pipeline(mappings: Vec<FieldMapping>) -> ProcessingPipeline {
        let settings = AiSettings {
            default_provider: Some("echo".to_string()),
            timeout_ms: 100,
            max_retries: 1,
            backoff_base_ms: 1,
            backoff_max_ms: 1,
            ..AiSettings::default()
        };
        let registry = AiProviderRegistry::new()
            .with(Arc::new(EchoProvider))
            .with(Arc::new(FailingProvider));
        let ai = AiProcessor::new(registry, AiResponseCache::from_settings(&settings), settings);
        ProcessingPipeline::new(&EngineConfig::default(), &mappings, ai)
    }

    fn record() -> SourceRecord {
        SourceRecord::from_pairs(
            0,
            [("name", "  blue shirt "), ("price", "19,90"), ("active", "yes")],
        )
    }

    async fn run(p: &ProcessingPipeline, record: &SourceRecord) -> (BTreeMap<String, FieldValue>, Vec<String>) {
        let admitted = FilterEvaluator::new(&[]).admit(record).unwrap();
        let processed = p.process(p.map(admitted)).await;
        (processed.fields().clone(), processed.warnings().to_vec())
    }

    #[tokio::test]
    async fn test_direct_mode_coerces_target_kind() {
        let p = pipeline(vec![
            FieldMapping::template("regular_price", "{price}").with_kind(TargetKind::Number),
            FieldMapping::template("enabled", "{active}").with_kind(TargetKind::Boolean),
        ]);
        let (fields, warnings) = run(&p, &record()).await;

        assert_eq!(fields["regular_price"], FieldValue::Number(19.9));
        assert_eq!(fields["enabled"], FieldValue::Bool(true));
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_formula_mode_and_sandbox_fallback() {
        let p = pipeline(vec![
            FieldMapping::template("title", "{name}").with_mode(ProcessingMode::Formula {
                formula: "ucwords(trim(value))".to_string(),
            }),
            FieldMapping::template("name_copy", "{name}").with_mode(ProcessingMode::Formula {
                formula: "system(value)".to_string(),
            }),
        ]);
        let (fields, warnings) = run(&p, &record()).await;

        assert_eq!(fields["title"], FieldValue::Text("Blue Shirt".into()));
        // 回退为解析值（经文本清洗）
        assert_eq!(fields["name_copy"], FieldValue::Text("blue shirt".into()));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("name_copy"));
    }

    #[tokio::test]
    async fn test_ai_failure_falls_back_to_resolved_value() {
        let mut spec = AiSpec::new("Rewrite {value}");
        spec.provider = Some("down".to_string());
        let p = pipeline(vec![
            FieldMapping::template("description", "{name}").with_mode(ProcessingMode::Ai { ai: spec }),
        ]);
        let (fields, warnings) = run(&p, &record()).await;

        assert_eq!(fields["description"], FieldValue::Text("blue shirt".into()));
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_hybrid_order_follows_declared_first_stage() {
        let formula_first = ProcessingMode::Hybrid {
            formula: "upper(trim(value))".to_string(),
            ai: AiSpec::new("{value}"),
            first: Some(HybridStage::Formula),
        };
        let ai_first = ProcessingMode::Hybrid {
            formula: "upper(trim(value))".to_string(),
            ai: AiSpec::new("{value}"),
            first: Some(HybridStage::Ai),
        };
        let p = pipeline(vec![
            FieldMapping::template("title", "{name}").with_mode(formula_first),
            FieldMapping::template("excerpt", "{name}").with_mode(ai_first),
        ]);
        let (fields, _) = run(&p, &record()).await;

        // 公式 → AI: 回显包裹在大写结果外
        assert_eq!(fields["title"], FieldValue::Text("<BLUE SHIRT>".into()));
        // AI → 公式: 包裹符号也被大写,首尾空白被公式去除
        assert_eq!(fields["excerpt"], FieldValue::Text("<  BLUE SHIRT >".into()));
    }

    #[tokio::test]
    async fn test_formula_reads_sibling_fields() {
        let p = pipeline(vec![
            FieldMapping::template("brand", "Acme"),
            FieldMapping::template("title", "{name}").with_mode(ProcessingMode::Formula {
                formula: "brand & ' ' & trim(value)".to_string(),
            }),
        ]);
        let (fields, _) = run(&p, &record()).await;
        assert_eq!(fields["title"], FieldValue::Text("Acme blue shirt".into()));
    }

    #[tokio::test]
    async fn test_process_single_target() {
        let p = pipeline(vec![FieldMapping::template("sku", "S-{active}")]);
        let value = p.process_single("sku", &record()).await;
        assert_eq!(value, Some(FieldValue::Text("S-yes".into())));
        assert_eq!(p.process_single("missing", &record()).await, None);
    }
}
