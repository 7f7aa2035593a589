// ==========================================
// 商品目录导入引擎 - 沙箱公式引擎
// ==========================================
// 职责: 解析并执行受限公式语言
// 输入: 公式文本 + 作用域（value / 兄弟字段 / 源记录）
// 输出: 字段值
// 红线: 解释器执行,只允许白名单纯函数,不调用任何外部语言运行时
// ==========================================

mod functions;
mod interpreter;
mod lexer;
mod parser;

#[cfg(test)]
mod tests;

pub use functions::{is_allowed, ALLOWED_FUNCTIONS};
pub use interpreter::FormulaScope;
pub use parser::Program;

use crate::domain::FieldValue;
use crate::engine::error::{ProcessingError, ProcessingResult};
use interpreter::Interpreter;

// ==========================================
// FormulaEngine - 公式引擎
// ==========================================
#[derive(Debug, Clone)]
pub struct FormulaEngine {
    max_length: usize,
}

impl FormulaEngine {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// 保存时校验: 非空、长度上限、语法
    pub fn validate(&self, formula: &str) -> ProcessingResult<()> {
        if formula.trim().is_empty() {
            return Err(ProcessingError::ConfigurationError(
                "公式内容为空".to_string(),
            ));
        }
        let length = formula.chars().count();
        if length > self.max_length {
            return Err(ProcessingError::ConfigurationError(format!(
                "公式长度 {} 超过上限 {}",
                length, self.max_length
            )));
        }
        self.compile(formula).map(|_| ())
    }

    pub fn compile(&self, formula: &str) -> ProcessingResult<Program> {
        parser::parse(formula)
    }

    pub fn execute(&self, program: &Program, scope: &FormulaScope<'_>) -> ProcessingResult<FieldValue> {
        Interpreter::new(scope, self.max_length).run(program)
    }

    /// 编译并执行
    pub fn evaluate(&self, formula: &str, scope: &FormulaScope<'_>) -> ProcessingResult<FieldValue> {
        let program = self.compile(formula)?;
        self.execute(&program, scope)
    }
}
