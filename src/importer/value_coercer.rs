// ==========================================
// 商品目录导入引擎 - 值清洗与目标类型转换
// ==========================================
// 职责: TRIM / NULL 标准化 / 布尔解析 / 区域容错数值解析 / 列表拆分
// ==========================================

use crate::domain::{FieldValue, TargetKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoercionError {
    #[error("无法解析为数值: {0:?}")]
    NotANumber(String),

    #[error("无法解析为布尔值: {0:?}")]
    NotABoolean(String),
}

#[derive(Debug, Clone)]
pub struct ValueCoercer {
    list_separator: String,
}

impl Default for ValueCoercer {
    fn default() -> Self {
        Self::new("|")
    }
}

impl ValueCoercer {
    pub fn new(list_separator: impl Into<String>) -> Self {
        let separator = list_separator.into();
        Self {
            list_separator: if separator.is_empty() {
                "|".to_string()
            } else {
                separator
            },
        }
    }

    pub fn clean_text(&self, value: &str) -> String {
        value.trim().to_string()
    }

    pub fn normalize_null(&self, value: Option<String>) -> Option<String> {
        value.and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    /// 布尔解析: yes/no/true/false/1/0/on/off/y/n（不区分大小写）
    pub fn parse_bool(&self, value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "1" | "y" | "yes" | "true" | "on" => Some(true),
            "0" | "n" | "no" | "false" | "off" => Some(false),
            _ => None,
        }
    }

    /// 区域容错数值解析
    ///
    /// 规则:
    /// - 去除货币符号与空白
    /// - 同时出现 . 和 , 时,靠后者为小数点
    /// - 仅出现 , 时: 单个且其后不是 3 位数字 ⇒ 小数点,否则为千分位
    /// - 仅出现多个 . ⇒ 千分位
    pub fn parse_number(&self, value: &str) -> Option<f64> {
        let cleaned: String = value
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
            .collect();
        if !cleaned.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }

        let last_dot = cleaned.rfind('.');
        let last_comma = cleaned.rfind(',');
        let normalized = match (last_dot, last_comma) {
            (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
            (Some(_), Some(_)) => cleaned.replace(',', ""),
            (None, Some(comma)) => {
                let commas = cleaned.matches(',').count();
                let decimals = cleaned.len() - comma - 1;
                if commas == 1 && decimals != 3 {
                    cleaned.replace(',', ".")
                } else {
                    cleaned.replace(',', "")
                }
            }
            (Some(_), None) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
            _ => cleaned,
        };

        normalized.parse::<f64>().ok().filter(|n| n.is_finite())
    }

    pub fn split_list(&self, value: &str) -> Vec<String> {
        value
            .split(self.list_separator.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// 按目标类型转换; Null 原样返回
    pub fn coerce(&self, value: FieldValue, kind: TargetKind) -> Result<FieldValue, CoercionError> {
        if matches!(value, FieldValue::Null) {
            return Ok(FieldValue::Null);
        }

        match kind {
            TargetKind::Text => Ok(match value {
                FieldValue::Text(s) => FieldValue::Text(self.clean_text(&s)),
                other => FieldValue::Text(other.as_text()),
            }),
            TargetKind::Number => match value {
                FieldValue::Number(n) => Ok(FieldValue::Number(n)),
                FieldValue::Bool(b) => Ok(FieldValue::Number(if b { 1.0 } else { 0.0 })),
                other => {
                    let text = other.as_text();
                    if text.trim().is_empty() {
                        return Ok(FieldValue::Null);
                    }
                    self.parse_number(&text)
                        .map(FieldValue::Number)
                        .ok_or(CoercionError::NotANumber(text))
                }
            },
            TargetKind::Boolean => match value {
                FieldValue::Bool(b) => Ok(FieldValue::Bool(b)),
                FieldValue::Number(n) => Ok(FieldValue::Bool(n != 0.0)),
                other => {
                    let text = other.as_text();
                    if text.trim().is_empty() {
                        return Ok(FieldValue::Null);
                    }
                    self.parse_bool(&text)
                        .map(FieldValue::Bool)
                        .ok_or(CoercionError::NotABoolean(text))
                }
            },
            TargetKind::List => Ok(match value {
                FieldValue::List(items) => FieldValue::List(
                    items
                        .into_iter()
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                ),
                FieldValue::Text(s) => FieldValue::List(self.split_list(&s)),
                other => FieldValue::List(vec![other.as_text()]),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_null() {
        let coercer = ValueCoercer::default();
        assert_eq!(coercer.normalize_null(Some("  ".to_string())), None);
        assert_eq!(coercer.normalize_null(Some(" a ".to_string())), Some("a".to_string()));
        assert_eq!(coercer.normalize_null(None), None);
    }

    #[test]
    fn test_parse_bool_variants() {
        let coercer = ValueCoercer::default();
        for v in ["yes", "TRUE", "1", "on", "Y"] {
            assert_eq!(coercer.parse_bool(v), Some(true), "{}", v);
        }
        for v in ["no", "False", "0", "off", "n"] {
            assert_eq!(coercer.parse_bool(v), Some(false), "{}", v);
        }
        assert_eq!(coercer.parse_bool("maybe"), None);
    }

    #[test]
    fn test_parse_number_locales() {
        let coercer = ValueCoercer::default();
        assert_eq!(coercer.parse_number("1.234,56"), Some(1234.56));
        assert_eq!(coercer.parse_number("1,234.56"), Some(1234.56));
        assert_eq!(coercer.parse_number("€ 19,90"), Some(19.9));
        assert_eq!(coercer.parse_number("$1,234"), Some(1234.0));
        assert_eq!(coercer.parse_number("1.234.567"), Some(1234567.0));
        assert_eq!(coercer.parse_number("-5.5"), Some(-5.5));
        assert_eq!(coercer.parse_number("n/a"), None);
    }

    #[test]
    fn test_coerce_by_kind() {
        let coercer = ValueCoercer::new("|");
        assert_eq!(
            coercer.coerce(FieldValue::Text("yes".into()), TargetKind::Boolean),
            Ok(FieldValue::Bool(true))
        );
        assert_eq!(
            coercer.coerce(FieldValue::Text("a | b ||c".into()), TargetKind::List),
            Ok(FieldValue::List(vec!["a".into(), "b".into(), "c".into()]))
        );
        assert_eq!(
            coercer.coerce(FieldValue::List(vec!["x".into(), "y".into()]), TargetKind::Text),
            Ok(FieldValue::Text("x,y".into()))
        );
        assert!(coercer
            .coerce(FieldValue::Text("abc".into()), TargetKind::Number)
            .is_err());
        assert_eq!(
            coercer.coerce(FieldValue::Text(" ".into()), TargetKind::Number),
            Ok(FieldValue::Null)
        );
    }
}
