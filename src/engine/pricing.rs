// ==========================================
// 商品目录导入引擎 - 定价规则引擎
// ==========================================
// 规则: 按声明顺序评估启用规则,首条命中生效; 无命中时默认规则无条件生效
// 计算: base × (1 + markup%/100) + fixed → 取整 → 钳制 [min, max]
// 红线: 计算顺序固定,不可调整（价格可复现）
// ==========================================

use crate::domain::{
    Connective, FieldFamily, FieldValue, FilterOperator, PricingCondition, PricingOutputs,
    PricingRule, PricingRuleSet, RoundingMode, SourceRecord,
};
use crate::engine::filter::{apply_operator, compile_user_regex};
use crate::engine::stages::{PricedRecord, ProcessedRecord};
use crate::importer::ValueCoercer;
use regex::Regex;
use std::collections::BTreeMap;

/// 价格上下文中读取的目标字段键
pub mod context_keys {
    pub const CATEGORIES: &[&str] = &["categories", "category"];
    pub const BRAND: &str = "brand";
    pub const SUPPLIER: &str = "supplier";
}

// ==========================================
// PricingContext - 记录上下文
// ==========================================
#[derive(Debug, Clone)]
pub struct PricingContext<'a> {
    pub base_price: f64,
    pub categories: Vec<String>,
    pub brand: Option<String>,
    pub supplier: Option<String>,
    pub sku: Option<String>,
    pub record: &'a SourceRecord,
}

impl<'a> PricingContext<'a> {
    /// 从已解析的目标字段构造上下文
    pub fn from_fields(
        base_price: f64,
        fields: &BTreeMap<String, FieldValue>,
        sku: Option<String>,
        record: &'a SourceRecord,
    ) -> Self {
        let text = |key: &str| {
            fields
                .get(key)
                .map(FieldValue::as_text)
                .filter(|s| !s.trim().is_empty())
        };
        let categories = context_keys::CATEGORIES
            .iter()
            .filter_map(|key| fields.get(*key))
            .flat_map(|v| match v {
                FieldValue::Text(s) => s.split(',').map(|c| c.trim().to_string()).collect(),
                other => other.as_list(),
            })
            .filter(|c| !c.is_empty())
            .collect();

        Self {
            base_price,
            categories,
            brand: text(context_keys::BRAND),
            supplier: text(context_keys::SUPPLIER),
            sku,
            record,
        }
    }
}

/// 定价结果
#[derive(Debug, Clone, PartialEq)]
pub struct PricingDecision {
    /// 命中的规则 id; None 表示默认规则
    pub rule_id: Option<String>,
    pub price: f64,
}

// ==========================================
// 价格计算（纯函数）
// ==========================================

/// 金额归一到分
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 取整
///
/// - Increment: 四舍五入到 step 的整数倍
/// - Charm: floor(p/step)*step + ending,大于 p 时再减一个 step
pub fn apply_rounding(price: f64, rounding: RoundingMode) -> f64 {
    match rounding {
        RoundingMode::None => price,
        RoundingMode::Increment { step } => {
            if step <= 0.0 {
                return price;
            }
            round_money((price / step).round() * step)
        }
        RoundingMode::Charm { ending, step } => {
            let step = if step > 0.0 { step } else { 1.0 };
            let mut candidate = (price / step).floor() * step + ending;
            // 容忍浮点误差
            if candidate > price + 1e-9 {
                candidate -= step;
            }
            round_money(candidate.max(0.0))
        }
    }
}

/// 按固定顺序应用定价输出: 加价 → 固定加额 → 取整 → 钳制
pub fn apply_outputs(base: f64, outputs: &PricingOutputs) -> f64 {
    let priced = base * (1.0 + outputs.markup_percent / 100.0) + outputs.fixed_amount;
    let rounded = apply_rounding(priced, outputs.rounding);

    let mut clamped = rounded;
    if let Some(min) = outputs.min_price {
        clamped = clamped.max(min);
    }
    if let Some(max) = outputs.max_price {
        clamped = clamped.min(max);
    }
    round_money(clamped)
}

/// SKU 通配符 → 正则（* 任意串,? 单字符,不区分大小写）
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("(?i)^");
    for c in pattern.trim().chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

struct CompiledRule {
    rule: PricingRule,
    /// 与 conditions 一一对应的预编译正则
    regexes: Vec<Option<Regex>>,
}

// ==========================================
// PricingEngine - 定价规则引擎
// ==========================================
pub struct PricingEngine {
    rules: Vec<CompiledRule>,
    default_rule: PricingOutputs,
    warnings: Vec<String>,
}

impl PricingEngine {
    pub fn new(rule_set: &PricingRuleSet) -> Self {
        let mut warnings = Vec::new();
        let rules = rule_set
            .rules
            .iter()
            .map(|rule| {
                let regexes = rule
                    .conditions
                    .iter()
                    .map(|condition| match condition {
                        PricingCondition::Field { path, value, .. }
                            if condition_uses_regex(condition) =>
                        {
                            match compile_user_regex(value) {
                                Ok(re) => Some(re),
                                Err(e) => {
                                    warnings.push(format!(
                                        "定价规则 {} 正则无效 (field={}): {}",
                                        rule.id, path, e
                                    ));
                                    None
                                }
                            }
                        }
                        PricingCondition::SkuPattern { pattern } => glob_to_regex(pattern),
                        _ => None,
                    })
                    .collect();
                CompiledRule {
                    rule: rule.clone(),
                    regexes,
                }
            })
            .collect();

        Self {
            rules,
            default_rule: rule_set.default_rule.clone(),
            warnings,
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn condition_matches(
        condition: &PricingCondition,
        regex: Option<&Regex>,
        ctx: &PricingContext<'_>,
    ) -> bool {
        match condition {
            PricingCondition::PriceRange { min, max } => {
                min.map(|m| ctx.base_price >= m).unwrap_or(true)
                    && max.map(|m| ctx.base_price <= m).unwrap_or(true)
            }
            PricingCondition::Category { values } => ctx
                .categories
                .iter()
                .any(|c| values.iter().any(|v| eq_ignore_case(c, v))),
            PricingCondition::Brand { values } => ctx
                .brand
                .as_deref()
                .map(|b| values.iter().any(|v| eq_ignore_case(b, v)))
                .unwrap_or(false),
            PricingCondition::Supplier { values } => ctx
                .supplier
                .as_deref()
                .map(|s| values.iter().any(|v| eq_ignore_case(s, v)))
                .unwrap_or(false),
            PricingCondition::Field {
                path,
                operator,
                value,
            } => apply_operator(*operator, ctx.record.flat(path), value, regex),
            PricingCondition::SkuPattern { .. } => match (regex, ctx.sku.as_deref()) {
                (Some(re), Some(sku)) => re.is_match(sku),
                _ => false,
            },
        }
    }

    fn rule_matches(compiled: &CompiledRule, ctx: &PricingContext<'_>) -> bool {
        let mut results = compiled
            .rule
            .conditions
            .iter()
            .zip(compiled.regexes.iter())
            .map(|(condition, regex)| Self::condition_matches(condition, regex.as_ref(), ctx));

        if compiled.rule.conditions.is_empty() {
            return true;
        }
        match compiled.rule.logic {
            Connective::And => results.all(|r| r),
            Connective::Or => results.any(|r| r),
        }
    }

    /// 首条命中规则; None 表示走默认规则
    pub fn select_rule(&self, ctx: &PricingContext<'_>) -> Option<&PricingRule> {
        self.rules
            .iter()
            .filter(|c| c.rule.enabled)
            .find(|c| Self::rule_matches(c, ctx))
            .map(|c| &c.rule)
    }

    /// 定价阶段: 价格族字段（regular_price / sale_price / price）逐个计算
    ///
    /// 空值保持为空; 无法解析为数值时保留原值并记录警告
    pub fn apply<'a>(
        &self,
        processed: ProcessedRecord<'a>,
        identifier_field: &str,
        coercer: &ValueCoercer,
    ) -> PricedRecord<'a> {
        let ProcessedRecord {
            record,
            mut fields,
            mut warnings,
        } = processed;
        let sku = fields
            .get(identifier_field)
            .map(FieldValue::as_text)
            .filter(|s| !s.trim().is_empty());

        let price_keys: Vec<String> = fields
            .keys()
            .filter(|k| FieldFamily::of(k) == FieldFamily::Price)
            .cloned()
            .collect();

        let mut applied_rules = BTreeMap::new();
        for key in price_keys {
            let value = match fields.get(&key) {
                Some(v) if !v.is_empty() => v.clone(),
                _ => continue,
            };
            let base = match value {
                FieldValue::Number(n) => Some(n),
                ref other => coercer.parse_number(&other.as_text()),
            };
            let Some(base) = base else {
                warnings.push(format!("价格字段 {} 无法解析为数值: {}", key, value.as_text()));
                continue;
            };

            let ctx = PricingContext::from_fields(base, &fields, sku.clone(), record);
            let decision = self.price(&ctx);
            fields.insert(key.clone(), FieldValue::Number(decision.price));
            applied_rules.insert(key, decision.rule_id);
        }

        PricedRecord {
            record,
            fields,
            applied_rules,
            warnings,
        }
    }

    pub fn price(&self, ctx: &PricingContext<'_>) -> PricingDecision {
        match self.select_rule(ctx) {
            Some(rule) => PricingDecision {
                rule_id: Some(rule.id.clone()),
                price: apply_outputs(ctx.base_price, &rule.outputs),
            },
            None => PricingDecision {
                rule_id: None,
                price: apply_outputs(ctx.base_price, &self.default_rule),
            },
        }
    }
}

fn condition_uses_regex(condition: &PricingCondition) -> bool {
    matches!(
        condition,
        PricingCondition::Field {
            operator: FilterOperator::RegexMatch | FilterOperator::RegexNotMatch,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(markup: f64, fixed: f64) -> PricingOutputs {
        PricingOutputs {
            markup_percent: markup,
            fixed_amount: fixed,
            ..PricingOutputs::default()
        }
    }

    fn ctx(base: f64, record: &SourceRecord) -> PricingContext<'_> {
        PricingContext {
            base_price: base,
            categories: vec!["Shirts".to_string()],
            brand: Some("Acme".to_string()),
            supplier: None,
            sku: Some("ACM-100".to_string()),
            record,
        }
    }

    #[test]
    fn test_markup_fixed_charm_clamp_order() {
        let out = PricingOutputs {
            markup_percent: 20.0,
            fixed_amount: 5.0,
            rounding: RoundingMode::Charm {
                ending: 0.99,
                step: 1.0,
            },
            min_price: Some(0.0),
            max_price: Some(200.0),
        };
        let price = apply_outputs(100.0, &out);
        assert!((price - 124.99).abs() < 1e-9, "got {}", price);
    }

    #[test]
    fn test_clamp_applies_after_rounding() {
        let out = PricingOutputs {
            markup_percent: 0.0,
            fixed_amount: 0.0,
            rounding: RoundingMode::Increment { step: 10.0 },
            min_price: None,
            max_price: Some(99.5),
        };
        // 96 → 取整 100 → 钳制 99.5
        assert!((apply_outputs(96.0, &out) - 99.5).abs() < 1e-9);
    }

    #[test]
    fn test_rounding_modes() {
        assert!((apply_rounding(12.34, RoundingMode::Increment { step: 0.1 }) - 12.3).abs() < 1e-9);
        assert!((apply_rounding(12.36, RoundingMode::Increment { step: 0.5 }) - 12.5).abs() < 1e-9);
        assert!(
            (apply_rounding(19.99, RoundingMode::Charm { ending: 0.99, step: 1.0 }) - 19.99).abs()
                < 1e-9
        );
        assert!(
            (apply_rounding(20.3, RoundingMode::Charm { ending: 0.95, step: 1.0 }) - 19.95).abs()
                < 1e-9
        );
        assert_eq!(apply_rounding(7.123, RoundingMode::None), 7.123);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rule_set = PricingRuleSet {
            rules: vec![
                PricingRule {
                    id: "brand".into(),
                    enabled: true,
                    logic: Connective::And,
                    conditions: vec![PricingCondition::Brand {
                        values: vec!["acme".into()],
                    }],
                    outputs: outputs(10.0, 0.0),
                },
                PricingRule {
                    id: "category".into(),
                    enabled: true,
                    logic: Connective::And,
                    conditions: vec![PricingCondition::Category {
                        values: vec!["shirts".into()],
                    }],
                    outputs: outputs(50.0, 0.0),
                },
            ],
            default_rule: outputs(0.0, 0.0),
        };
        let engine = PricingEngine::new(&rule_set);
        let record = SourceRecord::default();

        let decision = engine.price(&ctx(100.0, &record));
        assert_eq!(decision.rule_id.as_deref(), Some("brand"));
        assert!((decision.price - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_rules_and_default_fallback() {
        let rule_set = PricingRuleSet {
            rules: vec![PricingRule {
                id: "off".into(),
                enabled: false,
                logic: Connective::And,
                conditions: vec![],
                outputs: outputs(90.0, 0.0),
            }],
            default_rule: outputs(0.0, 1.0),
        };
        let engine = PricingEngine::new(&rule_set);
        let record = SourceRecord::default();

        let decision = engine.price(&ctx(10.0, &record));
        assert_eq!(decision.rule_id, None);
        assert!((decision.price - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_condition_types() {
        let record = SourceRecord::from_pairs(0, [("origin", "EU")]);
        let rule = |conditions: Vec<PricingCondition>, logic: Connective| PricingRuleSet {
            rules: vec![PricingRule {
                id: "r".into(),
                enabled: true,
                logic,
                conditions,
                outputs: outputs(0.0, 1.0),
            }],
            default_rule: PricingOutputs::default(),
        };
        let matched = |set: PricingRuleSet| {
            PricingEngine::new(&set)
                .price(&ctx(100.0, &record))
                .rule_id
                .is_some()
        };

        assert!(matched(rule(
            vec![PricingCondition::PriceRange {
                min: Some(50.0),
                max: Some(100.0)
            }],
            Connective::And
        )));
        assert!(matched(rule(
            vec![PricingCondition::SkuPattern {
                pattern: "acm-*".into()
            }],
            Connective::And
        )));
        assert!(matched(rule(
            vec![PricingCondition::Field {
                path: "origin".into(),
                operator: FilterOperator::Equals,
                value: "EU".into()
            }],
            Connective::And
        )));
        assert!(!matched(rule(
            vec![
                PricingCondition::Supplier {
                    values: vec!["X".into()]
                },
                PricingCondition::Brand {
                    values: vec!["Acme".into()]
                }
            ],
            Connective::And
        )));
        assert!(matched(rule(
            vec![
                PricingCondition::Supplier {
                    values: vec!["X".into()]
                },
                PricingCondition::Brand {
                    values: vec!["Acme".into()]
                }
            ],
            Connective::Or
        )));
    }

    #[test]
    fn test_context_from_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("categories".to_string(), FieldValue::Text("Shirts, Sale".into()));
        fields.insert("brand".to_string(), FieldValue::Text("Acme".into()));
        let record = SourceRecord::default();

        let ctx = PricingContext::from_fields(10.0, &fields, None, &record);
        assert_eq!(ctx.categories, vec!["Shirts".to_string(), "Sale".to_string()]);
        assert_eq!(ctx.brand.as_deref(), Some("Acme"));
        assert_eq!(ctx.supplier, None);
    }
}
