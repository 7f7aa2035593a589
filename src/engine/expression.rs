// ==========================================
// 商品目录导入引擎 - 映射表达式解析器
// ==========================================
// 职责: 源表达式 + 源记录 → 原始值
// 占位符:
// - {path}     第一次出现的值
// - {path[n]}  第 n 次出现（1 起）
// - {path*}    全部出现,逗号连接
// 红线: 纯函数,不调用加工流水线
// ==========================================

use crate::domain::{FieldValue, SourceExpression, SourceRecord};
use sha2::{Digest, Sha256};

/// Generate 表达式取哈希的十六进制位数
const GENERATED_HASH_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Path(String),
    Positional(String, usize),
    All(String),
}

impl Placeholder {
    pub fn path(&self) -> &str {
        match self {
            Placeholder::Path(p) | Placeholder::Positional(p, _) | Placeholder::All(p) => p,
        }
    }

    fn parse(inner: &str) -> Option<Self> {
        let inner = inner.trim();
        if inner.is_empty() {
            return None;
        }
        if let Some(path) = inner.strip_suffix('*') {
            return Some(Placeholder::All(path.trim().to_string()));
        }
        if let Some(body) = inner.strip_suffix(']') {
            if let Some((path, n)) = body.rsplit_once('[') {
                if let Ok(n) = n.trim().parse::<usize>() {
                    return Some(Placeholder::Positional(path.trim().to_string(), n));
                }
            }
        }
        Some(Placeholder::Path(inner.to_string()))
    }

    /// 在模板中替换时的文本
    fn render(&self, record: &SourceRecord) -> String {
        match self {
            Placeholder::Path(path) => record.flat(path).to_string(),
            Placeholder::Positional(path, n) => n
                .checked_sub(1)
                .and_then(|i| record.values(path).get(i))
                .cloned()
                .unwrap_or_default(),
            Placeholder::All(path) => record.values(path).join(","),
        }
    }

    /// 作为整个表达式时的原生值
    ///
    /// 规则: 裸 `{path}` 保留全部出现值（多值为 List）; 嵌在模板文本中时取第一次出现
    fn native(&self, record: &SourceRecord) -> FieldValue {
        match self {
            Placeholder::Path(path) => match record.values(path) {
                [] => FieldValue::Null,
                [single] => FieldValue::Text(single.clone()),
                many => FieldValue::List(many.to_vec()),
            },
            Placeholder::Positional(..) => {
                let text = self.render(record);
                if text.is_empty() && !record.contains(self.path()) {
                    FieldValue::Null
                } else {
                    FieldValue::Text(text)
                }
            }
            Placeholder::All(path) => FieldValue::List(record.values(path).to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

fn segments(template: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        literal.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => match Placeholder::parse(&after[..close]) {
                Some(placeholder) => {
                    if !literal.is_empty() {
                        out.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    out.push(Segment::Placeholder(placeholder));
                    rest = &after[close + 1..];
                }
                None => {
                    literal.push_str("{}");
                    rest = &after[close + 1..];
                }
            },
            None => {
                // 未闭合的花括号按字面处理
                literal.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        out.push(Segment::Literal(literal));
    }
    out
}

// ==========================================
// MappingResolver - 映射表达式解析器
// ==========================================
pub struct MappingResolver;

impl MappingResolver {
    /// 模板中引用的全部占位符
    pub fn placeholders(template: &str) -> Vec<Placeholder> {
        segments(template)
            .into_iter()
            .filter_map(|s| match s {
                Segment::Placeholder(p) => Some(p),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// 模板替换为字符串（未解析的占位符替换为空）
    pub fn render(template: &str, record: &SourceRecord) -> String {
        segments(template)
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Placeholder(p) => p.render(record),
            })
            .collect()
    }

    /// 解析模板: 单一裸占位符返回原生值,否则返回替换后的字符串
    pub fn resolve_template(template: &str, record: &SourceRecord) -> FieldValue {
        let parts = segments(template.trim());
        if let [Segment::Placeholder(p)] = parts.as_slice() {
            return p.native(record);
        }
        FieldValue::Text(Self::render(template, record))
    }

    /// 解析源表达式
    pub fn resolve(expression: &SourceExpression, record: &SourceRecord) -> FieldValue {
        match expression {
            SourceExpression::Template { template } => Self::resolve_template(template, record),
            SourceExpression::Fixed { value } => FieldValue::Text(value.clone()),
            SourceExpression::Generate { prefix, seed } => {
                let seed = Self::render(seed, record);
                if seed.trim().is_empty() {
                    return FieldValue::Null;
                }
                FieldValue::Text(format!("{}{}", prefix, generated_suffix(seed.trim())))
            }
        }
    }
}

fn generated_suffix(seed: &str) -> String {
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    digest[..GENERATED_HASH_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SourceRecord {
        SourceRecord::from_pairs(
            0,
            [
                ("name", "Shirt"),
                ("brand", "Acme"),
                ("images/image", "1.jpg"),
                ("images/image", "2.jpg"),
                ("images/image", "3.jpg"),
            ],
        )
    }

    #[test]
    fn test_template_substitution() {
        let r = record();
        assert_eq!(
            MappingResolver::resolve_template("{name} by {brand}!", &r),
            FieldValue::Text("Shirt by Acme!".into())
        );
        assert_eq!(
            MappingResolver::resolve_template("x{missing}y", &r),
            FieldValue::Text("xy".into())
        );
        assert_eq!(
            MappingResolver::resolve_template("{images/image[2]} / {images/image[9]}", &r),
            FieldValue::Text("2.jpg / ".into())
        );
        assert_eq!(
            MappingResolver::resolve_template("all: {images/image*}", &r),
            FieldValue::Text("all: 1.jpg,2.jpg,3.jpg".into())
        );
    }

    #[test]
    fn test_bare_placeholder_returns_native_value() {
        let r = record();
        assert_eq!(
            MappingResolver::resolve_template("{name}", &r),
            FieldValue::Text("Shirt".into())
        );
        assert_eq!(
            MappingResolver::resolve_template(" {images/image*} ", &r),
            FieldValue::List(vec!["1.jpg".into(), "2.jpg".into(), "3.jpg".into()])
        );
        assert_eq!(MappingResolver::resolve_template("{missing}", &r), FieldValue::Null);
        // 多值路径: 单独出现时为列表,嵌入文本时取第一次出现
        assert_eq!(
            MappingResolver::resolve_template("{images/image}", &r),
            FieldValue::List(vec!["1.jpg".into(), "2.jpg".into(), "3.jpg".into()])
        );
        assert_eq!(
            MappingResolver::resolve_template("img: {images/image}", &r),
            FieldValue::Text("img: 1.jpg".into())
        );
        assert_eq!(
            MappingResolver::resolve_template("{images/image[1]}", &r),
            FieldValue::Text("1.jpg".into())
        );
    }

    #[test]
    fn test_unbalanced_braces_are_literal() {
        let r = record();
        assert_eq!(
            MappingResolver::resolve_template("{name} {oops", &r),
            FieldValue::Text("Shirt {oops".into())
        );
        assert_eq!(
            MappingResolver::resolve_template("{}", &r),
            FieldValue::Text("{}".into())
        );
    }

    #[test]
    fn test_fixed_and_generate() {
        let r = record();
        assert_eq!(
            MappingResolver::resolve(&SourceExpression::Fixed { value: "{name}".into() }, &r),
            FieldValue::Text("{name}".into())
        );

        let generate = SourceExpression::Generate {
            prefix: "GEN-".into(),
            seed: "{brand}-{name}".into(),
        };
        let first = MappingResolver::resolve(&generate, &r).as_text();
        let second = MappingResolver::resolve(&generate, &r).as_text();
        assert_eq!(first, second);
        assert!(first.starts_with("GEN-"));
        assert_eq!(first.len(), 4 + GENERATED_HASH_LEN);

        let empty_seed = SourceExpression::Generate {
            prefix: "GEN-".into(),
            seed: "{missing}".into(),
        };
        assert_eq!(MappingResolver::resolve(&empty_seed, &r), FieldValue::Null);
    }

    #[test]
    fn test_placeholders_listing() {
        let ps = MappingResolver::placeholders("{a} {b[2]} {c*}");
        assert_eq!(
            ps,
            vec![
                Placeholder::Path("a".into()),
                Placeholder::Positional("b".into(), 2),
                Placeholder::All("c".into())
            ]
        );
    }
}
