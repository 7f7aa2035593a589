// ==========================================
// 商品目录导入引擎 - 过滤谓词求值器
// ==========================================
// 职责: 判定单条源记录是否准入
// 规则: 严格按声明顺序左折叠,第 i 条与累计结果的连接符取自第 i-1 条
//       不做短路、不做重新分组（AND/OR 混用时不满足结合律）
// 红线: 不向外抛错; 非法正则视为不匹配并报告一次警告
// ==========================================

use crate::domain::{Connective, FilterOperator, FilterRule, SourceRecord};
use crate::engine::stages::AdmittedRecord;
use regex::Regex;
use std::cmp::Ordering;

/// 编译用户正则,兼容 /pattern/flags 写法（支持 i / m / s / x）
pub fn compile_user_regex(pattern: &str) -> Result<Regex, regex::Error> {
    if pattern.len() >= 2 && pattern.starts_with('/') {
        if let Some(end) = pattern.rfind('/') {
            let flags = &pattern[end + 1..];
            if end > 0 && flags.chars().all(|c| matches!(c, 'i' | 'm' | 's' | 'x' | 'u')) {
                let body = &pattern[1..end];
                let inline: String = flags.chars().filter(|c| *c != 'u').collect();
                return if inline.is_empty() {
                    Regex::new(body)
                } else {
                    Regex::new(&format!("(?{}){}", inline, body))
                };
            }
        }
    }
    Regex::new(pattern)
}

fn parse_numeric(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// 比较两值: 双方均可解析为数值时按数值,否则按字典序
pub fn compare_values(actual: &str, expected: &str) -> Ordering {
    match (parse_numeric(actual), parse_numeric(expected)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => actual.cmp(expected),
    }
}

/// 单个运算符判定
///
/// `regex` 为预编译结果: None 表示非正则运算符或正则非法
pub fn apply_operator(
    operator: FilterOperator,
    actual: &str,
    expected: &str,
    regex: Option<&Regex>,
) -> bool {
    match operator {
        FilterOperator::Equals => compare_values(actual, expected) == Ordering::Equal,
        FilterOperator::NotEquals => compare_values(actual, expected) != Ordering::Equal,
        FilterOperator::Greater => compare_values(actual, expected) == Ordering::Greater,
        FilterOperator::Less => compare_values(actual, expected) == Ordering::Less,
        FilterOperator::GreaterOrEqual => compare_values(actual, expected) != Ordering::Less,
        FilterOperator::LessOrEqual => compare_values(actual, expected) != Ordering::Greater,
        FilterOperator::Contains => actual.contains(expected),
        FilterOperator::NotContains => !actual.contains(expected),
        FilterOperator::Empty => actual.trim().is_empty(),
        FilterOperator::NotEmpty => !actual.trim().is_empty(),
        FilterOperator::RegexMatch => regex.map(|re| re.is_match(actual)).unwrap_or(false),
        FilterOperator::RegexNotMatch => !regex.map(|re| re.is_match(actual)).unwrap_or(false),
    }
}

fn is_regex_operator(operator: FilterOperator) -> bool {
    matches!(
        operator,
        FilterOperator::RegexMatch | FilterOperator::RegexNotMatch
    )
}

/// 非法正则警告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterWarning {
    /// 去重键（每轮执行只报告一次）
    pub key: String,
    pub message: String,
}

struct CompiledRule {
    rule: FilterRule,
    regex: Option<Regex>,
}

// ==========================================
// FilterEvaluator - 过滤谓词求值器
// ==========================================
pub struct FilterEvaluator {
    rules: Vec<CompiledRule>,
    warnings: Vec<FilterWarning>,
}

impl FilterEvaluator {
    /// 预编译正则; 非法正则记录为警告
    pub fn new(rules: &[FilterRule]) -> Self {
        let mut warnings = Vec::new();
        let compiled = rules
            .iter()
            .map(|rule| {
                let regex = if is_regex_operator(rule.operator) {
                    match compile_user_regex(&rule.value) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warnings.push(FilterWarning {
                                key: format!("filter_regex:{}:{}", rule.path, rule.value),
                                message: format!(
                                    "过滤规则正则无效 (field={}, pattern={}): {}",
                                    rule.path, rule.value, e
                                ),
                            });
                            None
                        }
                    }
                } else {
                    None
                };
                CompiledRule {
                    rule: rule.clone(),
                    regex,
                }
            })
            .collect();

        Self {
            rules: compiled,
            warnings,
        }
    }

    pub fn warnings(&self) -> &[FilterWarning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn evaluate_rule(&self, compiled: &CompiledRule, record: &SourceRecord) -> bool {
        let actual = record.flat(&compiled.rule.path);
        apply_operator(
            compiled.rule.operator,
            actual,
            &compiled.rule.value,
            compiled.regex.as_ref(),
        )
    }

    /// 记录是否准入（无规则时全部准入）
    pub fn admits(&self, record: &SourceRecord) -> bool {
        let mut iter = self.rules.iter();
        let first = match iter.next() {
            Some(first) => first,
            None => return true,
        };

        let mut acc = self.evaluate_rule(first, record);
        let mut connective = first.rule.connective;
        for compiled in iter {
            // 每条规则都求值（非短路）
            let result = self.evaluate_rule(compiled, record);
            acc = match connective {
                Connective::And => acc & result,
                Connective::Or => acc | result,
            };
            connective = compiled.rule.connective;
        }
        acc
    }

    /// 准入则进入映射阶段
    pub fn admit<'a>(&self, record: &'a SourceRecord) -> Option<AdmittedRecord<'a>> {
        self.admits(record).then(|| AdmittedRecord::new(record))
    }
}
