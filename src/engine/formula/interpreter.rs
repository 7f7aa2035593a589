// ==========================================
// 公式语言 - 解释执行
// ==========================================
// 红线: 只能调用白名单函数,无 I/O、无循环、无外部运行时
// ==========================================

use super::functions::call_function;
use super::parser::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use crate::domain::record::format_number;
use crate::domain::{FieldValue, SourceRecord};
use crate::engine::error::{ProcessingError, ProcessingResult};
use std::collections::BTreeMap;

/// 公式执行作用域
///
/// - `value`: 当前字段的解析值
/// - `fields`: 同一记录中已解析的兄弟字段（按目标字段键）
/// - `record`: 原始源记录,供 field("path") 读取
pub struct FormulaScope<'a> {
    pub value: FieldValue,
    pub fields: &'a BTreeMap<String, FieldValue>,
    pub record: Option<&'a SourceRecord>,
}

impl<'a> FormulaScope<'a> {
    pub fn new(value: FieldValue, fields: &'a BTreeMap<String, FieldValue>) -> Self {
        Self {
            value,
            fields,
            record: None,
        }
    }

    pub fn with_record(mut self, record: &'a SourceRecord) -> Self {
        self.record = Some(record);
        self
    }
}

enum Flow {
    Next,
    Return(FieldValue),
}

pub(crate) struct Interpreter<'s, 'a> {
    scope: &'s FormulaScope<'a>,
    locals: BTreeMap<String, FieldValue>,
    last: Option<FieldValue>,
    output_limit: usize,
}

impl<'s, 'a> Interpreter<'s, 'a> {
    pub(crate) fn new(scope: &'s FormulaScope<'a>, output_limit: usize) -> Self {
        Self {
            scope,
            locals: BTreeMap::new(),
            last: None,
            output_limit,
        }
    }

    /// 执行程序: 返回 return 的值,否则最后一个表达式语句的值,否则原值
    pub(crate) fn run(mut self, program: &Program) -> ProcessingResult<FieldValue> {
        if let Flow::Return(value) = self.block(&program.statements)? {
            return Ok(value);
        }
        Ok(self.last.take().unwrap_or_else(|| self.scope.value.clone()))
    }

    fn block(&mut self, statements: &[Stmt]) -> ProcessingResult<Flow> {
        for stmt in statements {
            match stmt {
                Stmt::Let { name, value } => {
                    let v = self.eval(value)?;
                    self.locals.insert(name.clone(), v);
                }
                Stmt::If {
                    condition,
                    then,
                    otherwise,
                } => {
                    let branch = if truthy(&self.eval(condition)?) {
                        then
                    } else {
                        otherwise
                    };
                    if let Flow::Return(v) = self.block(branch)? {
                        return Ok(Flow::Return(v));
                    }
                }
                Stmt::Return(expr) => return Ok(Flow::Return(self.eval(expr)?)),
                Stmt::Expr(expr) => {
                    let v = self.eval(expr)?;
                    self.last = Some(v);
                }
            }
        }
        Ok(Flow::Next)
    }

    fn lookup(&self, name: &str) -> FieldValue {
        if let Some(v) = self.locals.get(name) {
            return v.clone();
        }
        if name == "value" {
            return self.scope.value.clone();
        }
        self.scope.fields.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn source_field(&self, path: &str) -> FieldValue {
        match self.scope.record {
            None => FieldValue::Null,
            Some(record) => match record.values(path) {
                [] => FieldValue::Null,
                [single] => FieldValue::Text(single.clone()),
                many => FieldValue::List(many.to_vec()),
            },
        }
    }

    fn eval(&mut self, expr: &Expr) -> ProcessingResult<FieldValue> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Variable(name) => Ok(self.lookup(name)),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?.as_text());
                }
                Ok(FieldValue::List(out))
            }
            Expr::Call {
                name,
                args,
                position: _,
            } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                if name == "field" {
                    let path = values.first().map(FieldValue::as_text).unwrap_or_default();
                    return Ok(self.source_field(&path));
                }
                call_function(name, values, self.output_limit)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = to_number(&self.eval(index)?)?;
                Ok(index_value(&target, index))
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(FieldValue::Bool(!truthy(&v))),
                    UnaryOp::Neg => Ok(FieldValue::Number(-to_number(&v)?)),
                }
            }
            Expr::Binary { op, left, right } => {
                // 逻辑运算短路
                match op {
                    BinaryOp::And => {
                        let l = self.eval(left)?;
                        if !truthy(&l) {
                            return Ok(FieldValue::Bool(false));
                        }
                        return Ok(FieldValue::Bool(truthy(&self.eval(right)?)));
                    }
                    BinaryOp::Or => {
                        let l = self.eval(left)?;
                        if truthy(&l) {
                            return Ok(FieldValue::Bool(true));
                        }
                        return Ok(FieldValue::Bool(truthy(&self.eval(right)?)));
                    }
                    _ => {}
                }
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, &l, &r)
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(condition)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }
}

pub(crate) fn truthy(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => false,
        FieldValue::Bool(b) => *b,
        FieldValue::Number(n) => *n != 0.0,
        FieldValue::Text(s) => !s.is_empty() && s != "0",
        FieldValue::List(items) => !items.is_empty(),
    }
}

pub(crate) fn to_number(value: &FieldValue) -> ProcessingResult<f64> {
    match value {
        FieldValue::Null => Ok(0.0),
        FieldValue::Text(s) if s.trim().is_empty() => Ok(0.0),
        other => other.as_number().ok_or_else(|| {
            ProcessingError::FormulaRuntimeError(format!("非数值操作数: {:?}", other.as_text()))
        }),
    }
}

fn numeric_pair(l: &FieldValue, r: &FieldValue) -> Option<(f64, f64)> {
    let numeric = |v: &FieldValue| match v {
        FieldValue::Number(n) => Some(*n),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Some((numeric(l)?, numeric(r)?))
}

fn index_value(target: &FieldValue, index: f64) -> FieldValue {
    if index < 0.0 || index.fract() != 0.0 {
        return FieldValue::Null;
    }
    let i = index as usize;
    match target {
        FieldValue::List(items) => items
            .get(i)
            .map(|s| FieldValue::Text(s.clone()))
            .unwrap_or_default(),
        FieldValue::Text(s) => s
            .chars()
            .nth(i)
            .map(|c| FieldValue::Text(c.to_string()))
            .unwrap_or_default(),
        _ => FieldValue::Null,
    }
}

fn binary(op: BinaryOp, l: &FieldValue, r: &FieldValue) -> ProcessingResult<FieldValue> {
    let result = match op {
        BinaryOp::Concat => FieldValue::Text(format!("{}{}", l.as_text(), r.as_text())),
        BinaryOp::Add => FieldValue::Number(to_number(l)? + to_number(r)?),
        BinaryOp::Sub => FieldValue::Number(to_number(l)? - to_number(r)?),
        BinaryOp::Mul => FieldValue::Number(to_number(l)? * to_number(r)?),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = to_number(r)?;
            if divisor == 0.0 {
                return Err(ProcessingError::FormulaRuntimeError("除数为零".to_string()));
            }
            let dividend = to_number(l)?;
            FieldValue::Number(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            })
        }
        BinaryOp::Eq | BinaryOp::NotEq => {
            let equal = match numeric_pair(l, r) {
                Some((a, b)) => a == b,
                None => match (l, r) {
                    (FieldValue::Bool(a), other) | (other, FieldValue::Bool(a)) => {
                        *a == truthy(other)
                    }
                    _ => l.as_text() == r.as_text(),
                },
            };
            FieldValue::Bool(if op == BinaryOp::Eq { equal } else { !equal })
        }
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match numeric_pair(l, r) {
                Some((a, b)) => a.partial_cmp(&b),
                None => Some(l.as_text().cmp(&r.as_text())),
            };
            let holds = match ordering {
                None => false,
                Some(ord) => match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::LtEq => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                },
            };
            FieldValue::Bool(holds)
        }
        BinaryOp::And | BinaryOp::Or => {
            return Err(ProcessingError::FormulaRuntimeError(
                "逻辑运算必须短路求值".to_string(),
            ))
        }
    };

    if let FieldValue::Number(n) = result {
        if !n.is_finite() {
            return Err(ProcessingError::FormulaRuntimeError(format!(
                "数值溢出: {}",
                format_number(n)
            )));
        }
    }
    Ok(result)
}
