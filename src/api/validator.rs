// ==========================================
// 商品目录导入引擎 - 配置保存校验器
// ==========================================
// 职责: 映射/定价/属性配置在保存时校验,违规时整体拒绝
// 说明: 运行期的字段级问题（公式执行失败、非法正则）降级为回退 + 警告,不在此拦截
// ==========================================

use crate::api::error::{ApiError, ApiResult, ValidationViolation};
use crate::config::EngineConfig;
use crate::domain::{
    AttributeSource, FieldMapping, JobConfiguration, PricingOutputs, ProcessingMode, RoundingMode,
};
use crate::engine::formula::FormulaEngine;
use std::collections::BTreeSet;

// ==========================================
// ConfigurationValidator - 配置校验器
// ==========================================
pub struct ConfigurationValidator {
    formula: FormulaEngine,
}

impl ConfigurationValidator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            formula: FormulaEngine::new(config.formula_max_length),
        }
    }

    /// 校验通过返回 Ok,否则返回全部违规
    pub fn check(&self, configuration: &JobConfiguration) -> ApiResult<()> {
        let violations = self.validate(configuration);
        if violations.is_empty() {
            return Ok(());
        }
        Err(ApiError::ConfigurationError {
            reason: violations
                .iter()
                .map(|v| format!("[{}] {}: {}", v.violation_type, v.location, v.reason))
                .collect::<Vec<_>>()
                .join("; "),
            violations,
        })
    }

    /// 收集全部违规（不在第一条处停止）
    pub fn validate(&self, configuration: &JobConfiguration) -> Vec<ValidationViolation> {
        let mut violations = Vec::new();

        let identifier = configuration.identifier_field.trim();
        if identifier.is_empty() {
            violations.push(ValidationViolation::new("IDENTIFIER", "-", "标识字段为空"));
        } else if configuration.mapping(identifier).is_none() {
            violations.push(ValidationViolation::new(
                "IDENTIFIER",
                identifier,
                "标识字段没有映射",
            ));
        }

        let mut targets = BTreeSet::new();
        for mapping in &configuration.field_mappings {
            if mapping.target.trim().is_empty() {
                violations.push(ValidationViolation::new("MAPPING", "-", "目标字段为空"));
            } else if !targets.insert(mapping.target.as_str()) {
                violations.push(ValidationViolation::new(
                    "MAPPING",
                    &mapping.target,
                    "同一目标字段存在多个映射",
                ));
            }
            self.validate_mode(mapping, &mut violations);
        }

        let mut rule_ids = BTreeSet::new();
        for rule in &configuration.pricing.rules {
            if rule.id.trim().is_empty() {
                violations.push(ValidationViolation::new("PRICING", "-", "定价规则 id 为空"));
            } else if !rule_ids.insert(rule.id.as_str()) {
                violations.push(ValidationViolation::new("PRICING", &rule.id, "定价规则 id 重复"));
            }
            validate_outputs(&rule.id, &rule.outputs, &mut violations);
        }
        validate_outputs("default", &configuration.pricing.default_rule, &mut violations);

        for attribute in &configuration.attributes {
            let location = attribute.name.as_str();
            if attribute.name.trim().is_empty() {
                violations.push(ValidationViolation::new("ATTRIBUTE", "-", "属性名为空"));
            }
            if !attribute.overrides.is_empty() && !attribute.used_for_variations {
                violations.push(ValidationViolation::new(
                    "ATTRIBUTE",
                    location,
                    "只有变体属性可以配置变体覆写",
                ));
            }
            if attribute.separator.as_deref() == Some("") {
                violations.push(ValidationViolation::new("ATTRIBUTE", location, "取值分隔符为空"));
            }
            match &attribute.source {
                AttributeSource::Explicit { expression } if expression.trim().is_empty() => {
                    violations.push(ValidationViolation::new("ATTRIBUTE", location, "取值表达式为空"));
                }
                AttributeSource::AutoDetect {
                    name_path,
                    value_path,
                } if name_path.trim().is_empty() || value_path.trim().is_empty() => {
                    violations.push(ValidationViolation::new(
                        "ATTRIBUTE",
                        location,
                        "自动识别属性缺少名称路径或取值路径",
                    ));
                }
                _ => {}
            }
        }

        violations
    }

    fn validate_mode(&self, mapping: &FieldMapping, violations: &mut Vec<ValidationViolation>) {
        let target = mapping.target.as_str();
        match &mapping.mode {
            ProcessingMode::Direct => {}
            ProcessingMode::Formula { formula } => {
                if let Err(e) = self.formula.validate(formula) {
                    violations.push(ValidationViolation::new("FORMULA", target, e.to_string()));
                }
            }
            ProcessingMode::Ai { ai } => {
                if ai.prompt.trim().is_empty() {
                    violations.push(ValidationViolation::new("AI", target, "AI 提示词为空"));
                }
            }
            ProcessingMode::Hybrid { formula, ai, .. } => {
                if let Err(e) = self.formula.validate(formula) {
                    violations.push(ValidationViolation::new(
                        "FORMULA",
                        target,
                        format!("混合模式公式阶段: {}", e),
                    ));
                }
                if ai.prompt.trim().is_empty() {
                    violations.push(ValidationViolation::new(
                        "AI",
                        target,
                        "混合模式 AI 阶段提示词为空",
                    ));
                }
            }
        }
    }
}

fn validate_outputs(
    rule_id: &str,
    outputs: &PricingOutputs,
    violations: &mut Vec<ValidationViolation>,
) {
    if !outputs.markup_percent.is_finite() || !outputs.fixed_amount.is_finite() {
        violations.push(ValidationViolation::new("PRICING", rule_id, "加价参数不是有效数值"));
    }
    if let (Some(min), Some(max)) = (outputs.min_price, outputs.max_price) {
        if min > max {
            violations.push(ValidationViolation::new(
                "PRICING",
                rule_id,
                format!("价格下限 {} 大于上限 {}", min, max),
            ));
        }
    }
    match outputs.rounding {
        RoundingMode::None => {}
        RoundingMode::Increment { step } => {
            if !(step > 0.0) {
                violations.push(ValidationViolation::new("PRICING", rule_id, "取整步长必须大于 0"));
            }
        }
        RoundingMode::Charm { ending, step } => {
            if !(0.0..1.0).contains(&ending) {
                violations.push(ValidationViolation::new(
                    "PRICING",
                    rule_id,
                    format!("尾数 {} 必须在 [0, 1) 内", ending),
                ));
            }
            if !(step > 0.0) {
                violations.push(ValidationViolation::new("PRICING", rule_id, "尾数步长必须大于 0"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AiSpec, AttributeDefinition, PricingRule, VariationOverride};
    use std::collections::BTreeMap;

    fn base() -> JobConfiguration {
        let mut config = JobConfiguration::default();
        config
            .field_mappings
            .push(FieldMapping::template("sku", "{code}"));
        config
    }

    fn validator() -> ConfigurationValidator {
        ConfigurationValidator::new(&EngineConfig::default())
    }

    #[test]
    fn test_valid_configuration_passes() {
        assert!(validator().check(&base()).is_ok());
    }

    #[test]
    fn test_identifier_must_be_mapped() {
        let violations = validator().validate(&JobConfiguration::default());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_type, "IDENTIFIER");
    }

    #[test]
    fn test_formula_length_and_hybrid_payload() {
        let config = EngineConfig {
            formula_max_length: 10,
            ..EngineConfig::default()
        };
        let mut job = base();
        job.field_mappings.push(
            FieldMapping::template("title", "{name}").with_mode(ProcessingMode::Formula {
                formula: "upper(value) & \" - long suffix\"".to_string(),
            }),
        );
        job.field_mappings.push(
            FieldMapping::template("description", "{desc}").with_mode(ProcessingMode::Hybrid {
                formula: "value".to_string(),
                ai: AiSpec::new("  "),
                first: None,
            }),
        );

        let violations = ConfigurationValidator::new(&config).validate(&job);
        let types: Vec<_> = violations.iter().map(|v| v.violation_type.as_str()).collect();
        assert_eq!(types, vec!["FORMULA", "AI"]);
        assert!(matches!(
            ConfigurationValidator::new(&config).check(&job),
            Err(ApiError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_pricing_bounds() {
        let mut job = base();
        job.pricing.rules.push(PricingRule {
            id: "r1".to_string(),
            enabled: true,
            logic: Default::default(),
            conditions: Vec::new(),
            outputs: PricingOutputs {
                min_price: Some(50.0),
                max_price: Some(10.0),
                rounding: RoundingMode::Charm {
                    ending: 1.5,
                    step: 1.0,
                },
                ..Default::default()
            },
        });
        job.pricing.default_rule.rounding = RoundingMode::Increment { step: 0.0 };

        let violations = validator().validate(&job);
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().all(|v| v.violation_type == "PRICING"));
        assert_eq!(violations[2].location, "default");
    }

    #[test]
    fn test_overrides_only_on_variation_attributes() {
        let mut job = base();
        job.attributes.push(AttributeDefinition {
            name: "Material".to_string(),
            source: AttributeSource::Explicit {
                expression: "{material}".to_string(),
            },
            used_for_variations: false,
            visible: true,
            separator: None,
            overrides: vec![VariationOverride::SkuSuffix {
                values: BTreeMap::new(),
            }],
        });

        let violations = validator().validate(&job);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].location, "Material");
    }
}
