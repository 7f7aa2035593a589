// ==========================================
// 商品目录导入引擎 - 源数据导入层
// ==========================================
// 职责: 源文件解析（CSV/XML）、结构目录、值清洗与类型转换
// 红线: 只读源文件,不做映射与业务处理
// ==========================================

pub mod error;
pub mod file_parser;
pub mod source_parser_trait;
pub mod structure_catalog;
pub mod value_coercer;

// 重导出
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvSourceParser, UniversalSourceParser, XmlSourceParser};
pub use source_parser_trait::{SourceBatch, SourceParser};
pub use structure_catalog::{PathSummary, StructureCatalog};
pub use value_coercer::{CoercionError, ValueCoercer};
