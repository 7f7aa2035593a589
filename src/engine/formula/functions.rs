// ==========================================
// 公式语言 - 白名单函数表
// ==========================================
// 红线: 全部为纯函数; 表外名称一律视为沙箱违规
// ==========================================

use super::interpreter::{to_number, truthy};
use crate::domain::record::format_number;
use crate::domain::FieldValue;
use crate::engine::error::{ProcessingError, ProcessingResult};
use crate::engine::filter::compile_user_regex;
use regex::Regex;

/// number_format / round 的小数位上限
pub const MAX_DECIMALS: usize = 20;

/// 白名单函数名（含 PHP 风格别名）
pub const ALLOWED_FUNCTIONS: &[&str] = &[
    // 字符串
    "upper", "strtoupper", "lower", "strtolower", "trim", "ltrim", "rtrim", "len", "strlen",
    "substr", "replace", "str_replace", "contains", "starts_with", "ends_with", "ucfirst",
    "ucwords", "concat", "pad_left", "pad_right", "truncate", "strip_tags", "slug",
    // 数值
    "round", "floor", "ceil", "abs", "min", "max", "number_format", "num", "str", "int",
    // 列表
    "split", "explode", "join", "implode", "count", "first", "last", "unique", "in_list",
    // 正则
    "regex_replace", "preg_replace", "regex_match", "preg_match", "regex_extract",
    // 其他
    "default", "coalesce", "is_empty", "field",
];

pub fn is_allowed(name: &str) -> bool {
    ALLOWED_FUNCTIONS.contains(&name)
}

fn arg(args: &[FieldValue], idx: usize) -> FieldValue {
    args.get(idx).cloned().unwrap_or_default()
}

fn text(args: &[FieldValue], idx: usize) -> String {
    arg(args, idx).as_text()
}

fn number(args: &[FieldValue], idx: usize) -> ProcessingResult<f64> {
    to_number(&arg(args, idx))
}

fn opt_number(args: &[FieldValue], idx: usize) -> ProcessingResult<Option<f64>> {
    match args.get(idx) {
        None | Some(FieldValue::Null) => Ok(None),
        Some(v) => to_number(v).map(Some),
    }
}

fn require(name: &str, args: &[FieldValue], min: usize) -> ProcessingResult<()> {
    if args.len() < min {
        return Err(ProcessingError::FormulaRuntimeError(format!(
            "{} 需要至少 {} 个参数,实际 {}",
            name,
            min,
            args.len()
        )));
    }
    Ok(())
}

fn compile_regex(pattern: &str) -> ProcessingResult<Regex> {
    compile_user_regex(pattern)
        .map_err(|e| ProcessingError::FormulaRuntimeError(format!("正则无效 {}: {}", pattern, e)))
}

fn round_to(n: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (n * factor).round() / factor
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn group_thousands(integer: &str, separator: &str) -> String {
    let digits: Vec<char> = integer.chars().collect();
    let mut out = String::new();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push_str(separator);
        }
        out.push(*c);
    }
    out
}

fn number_format(n: f64, decimals: usize, dec_point: &str, thousands: &str) -> String {
    let formatted = format!("{:.*}", decimals, n.abs());
    let (integer, fraction) = match formatted.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (formatted.clone(), None),
    };
    let mut out = String::new();
    if n < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    out.push_str(&group_thousands(&integer, thousands));
    if let Some(f) = fraction {
        out.push_str(dec_point);
        out.push_str(&f);
    }
    out
}

fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn slug(input: &str) -> String {
    let mut out = String::new();
    let mut dash = false;
    for c in input.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

/// 调用白名单函数
///
/// `output_limit`: 填充类函数的输出宽度上限（取公式长度上限）
pub(crate) fn call_function(
    name: &str,
    args: Vec<FieldValue>,
    output_limit: usize,
) -> ProcessingResult<FieldValue> {
    let args = args.as_slice();
    let value = match name {
        // ===== 字符串 =====
        "upper" | "strtoupper" => FieldValue::Text(text(args, 0).to_uppercase()),
        "lower" | "strtolower" => FieldValue::Text(text(args, 0).to_lowercase()),
        "trim" => FieldValue::Text(text(args, 0).trim().to_string()),
        "ltrim" => FieldValue::Text(text(args, 0).trim_start().to_string()),
        "rtrim" => FieldValue::Text(text(args, 0).trim_end().to_string()),
        "len" | "strlen" => FieldValue::Number(text(args, 0).chars().count() as f64),
        "substr" => {
            require(name, args, 2)?;
            let chars: Vec<char> = text(args, 0).chars().collect();
            let start = number(args, 1)?;
            // 浮点转 usize 为饱和转换,边界运算一律用 saturating_*
            let start = if start < 0.0 {
                chars.len().saturating_sub((-start) as usize)
            } else {
                (start as usize).min(chars.len())
            };
            let end = match opt_number(args, 2)? {
                Some(len) if len < 0.0 => chars.len().saturating_sub((-len) as usize),
                Some(len) => start.saturating_add(len as usize),
                None => chars.len(),
            }
            .min(chars.len())
            .max(start);
            FieldValue::Text(chars[start..end].iter().collect())
        }
        "replace" => {
            require(name, args, 3)?;
            FieldValue::Text(text(args, 0).replace(&text(args, 1), &text(args, 2)))
        }
        // PHP 参数顺序: (search, replace, subject)
        "str_replace" => {
            require(name, args, 3)?;
            FieldValue::Text(text(args, 2).replace(&text(args, 0), &text(args, 1)))
        }
        "contains" => FieldValue::Bool(text(args, 0).contains(&text(args, 1))),
        "starts_with" => FieldValue::Bool(text(args, 0).starts_with(&text(args, 1))),
        "ends_with" => FieldValue::Bool(text(args, 0).ends_with(&text(args, 1))),
        "ucfirst" => FieldValue::Text(capitalize(&text(args, 0))),
        "ucwords" => FieldValue::Text(
            text(args, 0)
                .split(' ')
                .map(capitalize)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        "concat" => FieldValue::Text(args.iter().map(FieldValue::as_text).collect()),
        "pad_left" | "pad_right" => {
            require(name, args, 2)?;
            let s = text(args, 0);
            let width = (number(args, 1)?.max(0.0) as usize).min(output_limit);
            let fill = text(args, 2).chars().next().unwrap_or(' ');
            let missing = width.saturating_sub(s.chars().count());
            let padding: String = std::iter::repeat(fill).take(missing).collect();
            FieldValue::Text(if name == "pad_left" {
                padding + &s
            } else {
                s + &padding
            })
        }
        "truncate" => {
            require(name, args, 2)?;
            let s = text(args, 0);
            let limit = number(args, 1)?.max(0.0) as usize;
            let suffix = if args.len() > 2 { text(args, 2) } else { String::new() };
            if s.chars().count() <= limit {
                FieldValue::Text(s)
            } else {
                FieldValue::Text(s.chars().take(limit).collect::<String>() + &suffix)
            }
        }
        "strip_tags" => FieldValue::Text(strip_tags(&text(args, 0))),
        "slug" => FieldValue::Text(slug(&text(args, 0))),

        // ===== 数值 =====
        "round" => {
            let decimals = opt_number(args, 1)?
                .unwrap_or(0.0)
                .clamp(-(MAX_DECIMALS as f64), MAX_DECIMALS as f64) as i32;
            FieldValue::Number(round_to(number(args, 0)?, decimals))
        }
        "floor" => FieldValue::Number(number(args, 0)?.floor()),
        "ceil" => FieldValue::Number(number(args, 0)?.ceil()),
        "abs" => FieldValue::Number(number(args, 0)?.abs()),
        "int" => FieldValue::Number(number(args, 0)?.trunc()),
        "min" | "max" => {
            require(name, args, 1)?;
            let mut values = Vec::new();
            for v in args {
                match v {
                    FieldValue::List(items) => {
                        for item in items {
                            values.push(to_number(&FieldValue::Text(item.clone()))?);
                        }
                    }
                    other => values.push(to_number(other)?),
                }
            }
            let folded = values.into_iter().reduce(|a, b| {
                if name == "min" {
                    a.min(b)
                } else {
                    a.max(b)
                }
            });
            folded.map(FieldValue::Number).unwrap_or_default()
        }
        "number_format" => {
            let decimals = (opt_number(args, 1)?.unwrap_or(0.0).max(0.0) as usize).min(MAX_DECIMALS);
            let dec_point = if args.len() > 2 { text(args, 2) } else { ".".to_string() };
            let thousands = if args.len() > 3 { text(args, 3) } else { ",".to_string() };
            FieldValue::Text(number_format(number(args, 0)?, decimals, &dec_point, &thousands))
        }
        "num" => FieldValue::Number(number(args, 0)?),
        "str" => FieldValue::Text(text(args, 0)),

        // ===== 列表 =====
        "split" => {
            let separator = if args.len() > 1 { text(args, 1) } else { ",".to_string() };
            FieldValue::List(split_list(&text(args, 0), &separator))
        }
        // PHP 参数顺序: (separator, string)
        "explode" => {
            require(name, args, 2)?;
            FieldValue::List(split_list(&text(args, 1), &text(args, 0)))
        }
        "join" => {
            let separator = if args.len() > 1 { text(args, 1) } else { ",".to_string() };
            FieldValue::Text(arg(args, 0).as_list().join(&separator))
        }
        // PHP 参数顺序: (separator, list)
        "implode" => {
            require(name, args, 2)?;
            FieldValue::Text(arg(args, 1).as_list().join(&text(args, 0)))
        }
        "count" => FieldValue::Number(arg(args, 0).as_list().len() as f64),
        "first" => arg(args, 0)
            .as_list()
            .into_iter()
            .next()
            .map(FieldValue::Text)
            .unwrap_or_default(),
        "last" => arg(args, 0)
            .as_list()
            .pop()
            .map(FieldValue::Text)
            .unwrap_or_default(),
        "unique" => {
            let mut seen = Vec::new();
            for item in arg(args, 0).as_list() {
                if !seen.contains(&item) {
                    seen.push(item);
                }
            }
            FieldValue::List(seen)
        }
        "in_list" => {
            let needle = text(args, 1);
            FieldValue::Bool(arg(args, 0).as_list().iter().any(|item| *item == needle))
        }

        // ===== 正则 =====
        "regex_replace" | "preg_replace" => {
            require(name, args, 3)?;
            // preg_replace 参数顺序: (pattern, replacement, subject)
            let (subject, pattern, replacement) = if name == "preg_replace" {
                (text(args, 2), text(args, 0), text(args, 1))
            } else {
                (text(args, 0), text(args, 1), text(args, 2))
            };
            let re = compile_regex(&pattern)?;
            FieldValue::Text(re.replace_all(&subject, replacement.as_str()).to_string())
        }
        "regex_match" | "preg_match" => {
            require(name, args, 2)?;
            let (subject, pattern) = if name == "preg_match" {
                (text(args, 1), text(args, 0))
            } else {
                (text(args, 0), text(args, 1))
            };
            FieldValue::Bool(compile_regex(&pattern)?.is_match(&subject))
        }
        "regex_extract" => {
            require(name, args, 2)?;
            let re = compile_regex(&text(args, 1))?;
            let group = opt_number(args, 2)?.unwrap_or(0.0).max(0.0) as usize;
            let subject = text(args, 0);
            re.captures(&subject)
                .and_then(|caps| caps.get(group))
                .map(|m| FieldValue::Text(m.as_str().to_string()))
                .unwrap_or_default()
        }

        // ===== 其他 =====
        "default" => {
            let v = arg(args, 0);
            if v.is_empty() {
                arg(args, 1)
            } else {
                v
            }
        }
        "coalesce" => args
            .iter()
            .find(|v| !v.is_empty())
            .cloned()
            .unwrap_or_default(),
        "is_empty" => FieldValue::Bool(!truthy(&arg(args, 0)) || arg(args, 0).is_empty()),

        _ => {
            return Err(ProcessingError::FormulaSandboxViolation {
                function: name.to_string(),
            })
        }
    };

    if let FieldValue::Number(n) = value {
        if !n.is_finite() {
            return Err(ProcessingError::FormulaRuntimeError(format!(
                "{} 返回非有限数值 {}",
                name,
                format_number(n)
            )));
        }
    }
    Ok(value)
}

fn split_list(input: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return vec![input.to_string()];
    }
    input
        .split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
