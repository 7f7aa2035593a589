// ==========================================
// 商品目录导入引擎 - 变体矩阵构建器
// ==========================================
// 职责: PricedRecord → FinishedRecord
// 算法: 变体属性值列表按声明顺序做笛卡尔积,每个组合一条变体记录
// 字段优先级: 显式覆写 → 继承父记录（继承开关开启时）→ 字段类型默认值
// SKU: 显式映射 → 父 SKU + 后缀 → 父 SKU + 序号,保证同一父记录下唯一
// 退化: 没有任何属性组合时不升级为可变商品,按简单商品输出
// ==========================================

use crate::domain::{
    Adjustment, AttributeDefinition, AttributeSource, FieldValue, ProductKind, SourceRecord,
    StockChange, StockStatus, VariationInheritance, VariationOverride, VariationRecord,
};
use crate::engine::expression::MappingResolver;
use crate::engine::pricing::round_money;
use crate::engine::stages::{FinishedRecord, PricedRecord, ResolvedAttribute};
use crate::importer::ValueCoercer;
use std::collections::{BTreeMap, HashSet};

/// 父记录上与变体相关的字段键
pub mod parent_keys {
    pub const REGULAR_PRICE: &str = "regular_price";
    pub const SALE_PRICE: &str = "sale_price";
    pub const STOCK_QUANTITY: &str = "stock_quantity";
    pub const WEIGHT: &str = "weight";
    pub const LENGTH: &str = "length";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const DESCRIPTION: &str = "description";
}

/// 组合构建失败（标识缺失）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingIdentifier {
    pub field: String,
}

impl std::fmt::Display for MissingIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "标识字段 {} 为空,无法写入目录", self.field)
    }
}

/// 父记录视图
struct Parent<'a> {
    sku: &'a str,
    record: &'a SourceRecord,
    fields: &'a BTreeMap<String, FieldValue>,
    coercer: &'a ValueCoercer,
}

impl<'a> Parent<'a> {
    fn number(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            FieldValue::Null => None,
            FieldValue::Number(n) => Some(*n),
            other => self.coercer.parse_number(&other.as_text()),
        }
    }

    fn text(&self, key: &str) -> Option<String> {
        self.fields
            .get(key)
            .map(FieldValue::as_text)
            .filter(|s| !s.trim().is_empty())
    }

    /// 渲染覆写模板: 先替换 {@属性名},再按源路径解析
    fn render(&self, template: &str, combination: &[(String, String)]) -> String {
        let mut text = template.to_string();
        for (name, value) in combination {
            text = text.replace(&format!("{{@{}}}", name), value);
        }
        MappingResolver::render(&text, self.record).trim().to_string()
    }
}

// ==========================================
// VariationBuilder - 变体矩阵构建器
// ==========================================
pub struct VariationBuilder {
    attributes: Vec<AttributeDefinition>,
    inheritance: VariationInheritance,
    default_separator: String,
}

impl VariationBuilder {
    pub fn new(
        attributes: &[AttributeDefinition],
        inheritance: VariationInheritance,
        default_separator: impl Into<String>,
    ) -> Self {
        Self {
            attributes: attributes.to_vec(),
            inheritance,
            default_separator: default_separator.into(),
        }
    }

    /// 解析单个属性的有序去重取值列表
    pub fn resolve_values(&self, attribute: &AttributeDefinition, record: &SourceRecord) -> Vec<String> {
        let separator = attribute
            .separator
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_separator.as_str());
        let split = |text: &str| -> Vec<String> {
            text.split(separator)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let raw: Vec<String> = match &attribute.source {
            AttributeSource::Explicit { expression } => {
                match MappingResolver::resolve_template(expression, record) {
                    FieldValue::List(items) => items.iter().flat_map(|i| split(i)).collect(),
                    other => split(&other.as_text()),
                }
            }
            AttributeSource::AutoDetect {
                name_path,
                value_path,
            } => {
                // 重复容器中按位置配对
                let names = record.values(name_path);
                let values = record.values(value_path);
                names
                    .iter()
                    .zip(values.iter())
                    .filter(|(name, _)| name.trim().eq_ignore_ascii_case(attribute.name.trim()))
                    .flat_map(|(_, value)| split(value))
                    .collect()
            }
        };

        let mut seen = HashSet::new();
        raw.into_iter().filter(|v| seen.insert(v.clone())).collect()
    }

    /// 笛卡尔积（按属性声明顺序,后面的属性变化最快）
    pub fn combinations(value_lists: &[(String, Vec<String>)]) -> Vec<Vec<(String, String)>> {
        if value_lists.is_empty() {
            return Vec::new();
        }
        value_lists
            .iter()
            .fold(vec![Vec::new()], |acc, (name, values)| {
                acc.iter()
                    .flat_map(|prefix| {
                        values.iter().map(move |value| {
                            let mut combination = prefix.clone();
                            combination.push((name.clone(), value.clone()));
                            combination
                        })
                    })
                    .collect()
            })
    }

    /// 变体阶段: 组装可写入目录的记录
    pub fn finish(
        &self,
        priced: PricedRecord<'_>,
        identifier_field: &str,
        coercer: &ValueCoercer,
    ) -> Result<FinishedRecord, MissingIdentifier> {
        let PricedRecord {
            record,
            fields,
            warnings,
            ..
        } = priced;

        let identifier = fields
            .get(identifier_field)
            .map(FieldValue::as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MissingIdentifier {
                field: identifier_field.to_string(),
            })?;

        let attributes: Vec<ResolvedAttribute> = self
            .attributes
            .iter()
            .map(|def| ResolvedAttribute {
                name: def.name.clone(),
                values: self.resolve_values(def, record),
                visible: def.visible,
                used_for_variations: def.used_for_variations,
            })
            .collect();

        // 无取值的变体属性不参与组合
        let value_lists: Vec<(String, Vec<String>)> = attributes
            .iter()
            .filter(|a| a.used_for_variations && !a.values.is_empty())
            .map(|a| (a.name.clone(), a.values.clone()))
            .collect();
        let combinations = Self::combinations(&value_lists);

        let parent = Parent {
            sku: &identifier,
            record,
            fields: &fields,
            coercer,
        };
        let variations = self.build_variations(&parent, &combinations);
        let kind = if variations.is_empty() {
            ProductKind::Simple
        } else {
            ProductKind::Variable
        };

        Ok(FinishedRecord {
            record_index: record.index,
            identifier,
            kind,
            fields,
            attributes,
            variations,
            warnings,
        })
    }

    fn overrides(&self) -> impl Iterator<Item = (&AttributeDefinition, &VariationOverride)> {
        self.attributes
            .iter()
            .filter(|a| a.used_for_variations)
            .flat_map(|a| a.overrides.iter().map(move |o| (a, o)))
    }

    fn build_variations(
        &self,
        parent: &Parent<'_>,
        combinations: &[Vec<(String, String)>],
    ) -> Vec<VariationRecord> {
        let mut used_skus: HashSet<String> = HashSet::new();
        used_skus.insert(parent.sku.to_string());

        combinations
            .iter()
            .enumerate()
            .map(|(index, combination)| {
                let mut variation = self.build_one(parent, combination);
                variation.sku = unique_sku(parent.sku, &variation.sku, index, &mut used_skus);
                variation
            })
            .collect()
    }

    fn build_one(&self, parent: &Parent<'_>, combination: &[(String, String)]) -> VariationRecord {
        let value_of = |attribute: &AttributeDefinition| {
            combination
                .iter()
                .find(|(name, _)| name == &attribute.name)
                .map(|(_, v)| v.as_str())
        };
        let inherit = &self.inheritance;

        // 继承层 / 默认层
        let mut regular_price = parent
            .number(parent_keys::REGULAR_PRICE)
            .filter(|_| inherit.regular_price);
        let mut sale_price = parent
            .number(parent_keys::SALE_PRICE)
            .filter(|_| inherit.sale_price);
        let mut stock_quantity = parent
            .number(parent_keys::STOCK_QUANTITY)
            .map(|n| n as i64)
            .filter(|_| inherit.stock_quantity);
        let mut weight = parent.number(parent_keys::WEIGHT).filter(|_| inherit.weight);
        let mut length = parent.number(parent_keys::LENGTH).filter(|_| inherit.dimensions);
        let mut width = parent.number(parent_keys::WIDTH).filter(|_| inherit.dimensions);
        let mut height = parent.number(parent_keys::HEIGHT).filter(|_| inherit.dimensions);
        let mut description = parent
            .text(parent_keys::DESCRIPTION)
            .filter(|_| inherit.description);
        let mut stock_status = StockStatus::default();
        let mut enabled = true;
        let mut virtual_product = false;
        let mut downloadable = false;

        // 显式覆写层
        let mut sku_mapping: Option<String> = None;
        let mut suffixes: Vec<String> = Vec::new();
        let mut price_adjusted: Option<(Option<f64>, Option<f64>)> = None;

        for (attribute, override_spec) in self.overrides() {
            let value = value_of(attribute);
            match override_spec {
                VariationOverride::PriceAdjustment { values } => {
                    if let Some(adj) = value.and_then(|v| values.get(v)) {
                        // 相对父价格,多个属性依次叠加
                        let (regular, sale) = price_adjusted.unwrap_or((
                            parent.number(parent_keys::REGULAR_PRICE),
                            parent.number(parent_keys::SALE_PRICE),
                        ));
                        let regular = match regular {
                            Some(p) => Some(adj.apply(p)),
                            None => matches!(adj, Adjustment::Absolute { .. })
                                .then(|| adj.apply(0.0)),
                        };
                        let sale = sale.map(|p| adj.apply(p));
                        price_adjusted = Some((regular, sale));
                    }
                }
                VariationOverride::StockAdjustment { values } => {
                    if let Some(change) = value.and_then(|v| values.get(v)) {
                        let base = parent.number(parent_keys::STOCK_QUANTITY).unwrap_or(0.0) as i64;
                        stock_quantity = Some(match change {
                            StockChange::Set { quantity } => *quantity,
                            StockChange::Delta { amount } => base + amount,
                        });
                    }
                }
                VariationOverride::SkuSuffix { values } => {
                    if let Some(suffix) = value.and_then(|v| values.get(v)) {
                        if !suffix.trim().is_empty() {
                            suffixes.push(suffix.trim().to_string());
                        }
                    }
                }
                VariationOverride::SkuMapping { expression } => {
                    let sku = parent.render(expression, combination);
                    if !sku.is_empty() {
                        sku_mapping = Some(sku);
                    }
                }
                VariationOverride::Dimensions {
                    weight: w,
                    length: l,
                    width: wd,
                    height: h,
                } => {
                    let resolve = |expr: &Option<String>| {
                        expr.as_deref()
                            .map(|e| parent.render(e, combination))
                            .and_then(|t| parent.coercer.parse_number(&t))
                    };
                    if let Some(v) = resolve(w) {
                        weight = Some(v);
                    }
                    if let Some(v) = resolve(l) {
                        length = Some(v);
                    }
                    if let Some(v) = resolve(wd) {
                        width = Some(v);
                    }
                    if let Some(v) = resolve(h) {
                        height = Some(v);
                    }
                }
                VariationOverride::Status {
                    enabled: e,
                    stock_status: s,
                    virtual_product: v,
                    downloadable: d,
                } => {
                    enabled = e.unwrap_or(enabled);
                    stock_status = s.unwrap_or(stock_status);
                    virtual_product = v.unwrap_or(virtual_product);
                    downloadable = d.unwrap_or(downloadable);
                }
                VariationOverride::Description { expression } => {
                    let text = parent.render(expression, combination);
                    if !text.is_empty() {
                        description = Some(text);
                    }
                }
            }
        }

        if let Some((regular, sale)) = price_adjusted {
            regular_price = regular.map(round_money);
            sale_price = sale.map(round_money);
        }

        let sku = sku_mapping.unwrap_or_else(|| {
            if suffixes.is_empty() {
                String::new()
            } else {
                format!("{}-{}", parent.sku, suffixes.join("-"))
            }
        });

        VariationRecord {
            parent_id: parent.sku.to_string(),
            attributes: combination.to_vec(),
            sku,
            regular_price,
            sale_price,
            stock_quantity,
            stock_status,
            weight,
            length,
            width,
            height,
            description,
            enabled,
            virtual_product,
            downloadable,
        }
    }
}

/// 保证 SKU 在父记录的变体集合内唯一; 空或重复时退回 父 SKU + 序号
fn unique_sku(parent: &str, candidate: &str, index: usize, used: &mut HashSet<String>) -> String {
    if !candidate.is_empty() && used.insert(candidate.to_string()) {
        return candidate.to_string();
    }
    let mut n = index + 1;
    loop {
        let fallback = format!("{}-{}", parent, n);
        if used.insert(fallback.clone()) {
            return fallback;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_color() -> Vec<AttributeDefinition> {
        vec![
            AttributeDefinition {
                name: "Size".into(),
                source: AttributeSource::Explicit {
                    expression: "{sizes}".into(),
                },
                used_for_variations: true,
                visible: true,
                separator: None,
                overrides: vec![],
            },
            AttributeDefinition {
                name: "Color".into(),
                source: AttributeSource::AutoDetect {
                    name_path: "param/@name".into(),
                    value_path: "param".into(),
                },
                used_for_variations: true,
                visible: true,
                separator: None,
                overrides: vec![],
            },
        ]
    }

    fn source() -> SourceRecord {
        SourceRecord::from_pairs(
            0,
            [
                ("sizes", "S|M|L"),
                ("param/@name", "Color"),
                ("param", "Red"),
                ("param/@name", "Material"),
                ("param", "Cotton"),
                ("param/@name", "color"),
                ("param", "Blue"),
            ],
        )
    }

    fn parent_fields() -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("sku".to_string(), FieldValue::Text("TS".into()));
        fields.insert("regular_price".to_string(), FieldValue::Number(20.0));
        fields.insert("weight".to_string(), FieldValue::Text("0.4".into()));
        fields
    }

    fn finish(builder: &VariationBuilder, record: &SourceRecord) -> FinishedRecord {
        let priced = PricedRecord {
            record,
            fields: parent_fields(),
            applied_rules: BTreeMap::new(),
            warnings: vec![],
        };
        builder
            .finish(priced, "sku", &ValueCoercer::default())
            .unwrap()
    }

    #[test]
    fn test_cartesian_order_and_inherited_weight() {
        let builder = VariationBuilder::new(&size_color(), VariationInheritance::default(), "|");
        let record = source();
        let finished = finish(&builder, &record);

        assert_eq!(finished.kind, ProductKind::Variable);
        let combos: Vec<Vec<&str>> = finished
            .variations
            .iter()
            .map(|v| v.attributes.iter().map(|(_, value)| value.as_str()).collect())
            .collect();
        assert_eq!(
            combos,
            vec![
                vec!["S", "Red"],
                vec!["S", "Blue"],
                vec!["M", "Red"],
                vec!["M", "Blue"],
                vec!["L", "Red"],
                vec!["L", "Blue"],
            ]
        );
        assert!(finished.variations.iter().all(|v| v.weight == Some(0.4)));
        assert!(finished.variations.iter().all(|v| v.regular_price == Some(20.0)));
        // 无后缀/映射时使用序号
        assert_eq!(finished.variations[0].sku, "TS-1");
        assert_eq!(finished.variations[5].sku, "TS-6");
    }

    #[test]
    fn test_zero_combinations_yield_simple_product() {
        let builder = VariationBuilder::new(&size_color(), VariationInheritance::default(), "|");
        let record = SourceRecord::from_pairs(0, [("title", "Mug")]);
        let finished = finish(&builder, &record);

        assert_eq!(finished.kind, ProductKind::Simple);
        assert!(finished.variations.is_empty());
        assert_eq!(finished.identifier, "TS");
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut attributes = size_color();
        attributes[0].overrides = vec![
            VariationOverride::SkuSuffix {
                values: [("S".to_string(), "SM".to_string()), ("M".to_string(), "MD".to_string())]
                    .into_iter()
                    .collect(),
            },
            VariationOverride::PriceAdjustment {
                values: [("L".to_string(), Adjustment::Fixed { value: 5.0 })]
                    .into_iter()
                    .collect(),
            },
            VariationOverride::Dimensions {
                weight: Some("0.9".into()),
                length: None,
                width: None,
                height: None,
            },
        ];
        attributes[1].overrides = vec![VariationOverride::SkuSuffix {
            values: [("Red".to_string(), "R".to_string())].into_iter().collect(),
        }];
        let builder = VariationBuilder::new(&attributes, VariationInheritance::default(), "|");
        let record = source();
        let finished = finish(&builder, &record);

        let skus: Vec<&str> = finished.variations.iter().map(|v| v.sku.as_str()).collect();
        assert_eq!(skus, vec!["TS-SM-R", "TS-SM", "TS-MD-R", "TS-MD", "TS-R", "TS-6"]);
        assert_eq!(finished.variations[4].regular_price, Some(25.0));
        assert_eq!(finished.variations[0].regular_price, Some(20.0));
        assert!(finished.variations.iter().all(|v| v.weight == Some(0.9)));
    }

    #[test]
    fn test_inheritance_disabled_uses_defaults() {
        let inheritance = VariationInheritance {
            weight: false,
            regular_price: false,
            ..VariationInheritance::default()
        };
        let builder = VariationBuilder::new(&size_color(), inheritance, "|");
        let record = source();
        let finished = finish(&builder, &record);

        assert!(finished.variations.iter().all(|v| v.weight.is_none()));
        assert!(finished.variations.iter().all(|v| v.regular_price.is_none()));
        assert!(finished
            .variations
            .iter()
            .all(|v| v.stock_status == StockStatus::Instock));
    }

    #[test]
    fn test_sku_mapping_with_attribute_placeholder() {
        let mut attributes = size_color();
        attributes[0].overrides = vec![VariationOverride::SkuMapping {
            expression: "{sizes}".into(),
        }];
        let builder = VariationBuilder::new(&attributes, VariationInheritance::default(), "|");
        let record = source();
        let finished = finish(&builder, &record);

        // 映射结果重复,第二个起退回序号
        assert_eq!(finished.variations[0].sku, "S|M|L");
        assert_eq!(finished.variations[1].sku, "TS-2");

        let mut attributes = size_color();
        attributes[0].overrides = vec![VariationOverride::SkuMapping {
            expression: "X-{@Size}-{@Color}".into(),
        }];
        let builder = VariationBuilder::new(&attributes, VariationInheritance::default(), "|");
        let finished = finish(&builder, &record);
        assert_eq!(finished.variations[1].sku, "X-S-Blue");
    }

    #[test]
    fn test_combinations_empty_input() {
        assert!(VariationBuilder::combinations(&[]).is_empty());
    }
}
