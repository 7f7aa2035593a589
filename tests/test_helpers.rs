// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、源文件写入、任务配置构造、模拟 AI 提供方
// ==========================================

#![allow(dead_code)]

use async_trait::async_trait;
use catalog_import_engine::api::{CreateJobRequest, ImportJobApi};
use catalog_import_engine::config::{AiSettings, EngineConfig};
use catalog_import_engine::domain::{
    BehaviorFlags, FieldMapping, JobConfiguration, ScheduleDescriptor, SourceDescriptor,
    SourceFormat, TargetKind,
};
use catalog_import_engine::engine::{AiProvider, AiProviderRegistry, AiRequest};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

/// 创建临时测试数据库（schema 由 API 初始化）
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时路径不是有效 UTF-8")?
        .to_string();
    Ok((temp_file, db_path))
}

/// 测试用引擎配置: AI 不重试、退避极短
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        ai: AiSettings {
            timeout_ms: 2_000,
            max_retries: 1,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            ..AiSettings::default()
        },
        ..EngineConfig::default()
    }
}

/// 打开导入 API（同一数据库路径可多次打开,模拟进程重启）
pub fn open_api(db_path: &str, providers: AiProviderRegistry) -> ImportJobApi {
    open_api_with(db_path, test_engine_config(), providers)
}

pub fn open_api_with(
    db_path: &str,
    config: EngineConfig,
    providers: AiProviderRegistry,
) -> ImportJobApi {
    let conn = catalog_import_engine::db::open_sqlite_connection(db_path)
        .expect("无法打开测试数据库");
    ImportJobApi::from_connection(
        Arc::new(std::sync::Mutex::new(conn)),
        config,
        providers,
    )
    .expect("无法初始化导入 API")
}

/// 写入 CSV 源文件
pub fn write_csv(dir: &Path, name: &str, header: &str, rows: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut content = String::from(header);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    std::fs::write(&path, content).expect("写入 CSV 失败");
    path
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("写入源文件失败");
    path
}

pub fn temp_dir() -> TempDir {
    TempDir::new().expect("无法创建临时目录")
}

pub fn csv_source(path: &Path) -> SourceDescriptor {
    SourceDescriptor {
        file_path: path.to_string_lossy().to_string(),
        format: SourceFormat::Csv,
        container: None,
        delimiter: None,
    }
}

pub fn xml_source(path: &Path, container: &str) -> SourceDescriptor {
    SourceDescriptor {
        file_path: path.to_string_lossy().to_string(),
        format: SourceFormat::Xml,
        container: Some(container.to_string()),
        delimiter: None,
    }
}

/// 标准商品映射: sku / title / regular_price / weight
pub fn product_configuration() -> JobConfiguration {
    JobConfiguration {
        field_mappings: vec![
            FieldMapping::template("sku", "{sku}"),
            FieldMapping::template("title", "{name}"),
            FieldMapping::template("regular_price", "{price}").with_kind(TargetKind::Number),
            FieldMapping::template("weight", "{weight}").with_kind(TargetKind::Number),
        ],
        ..JobConfiguration::default()
    }
}

pub fn job_request(
    name: &str,
    source: SourceDescriptor,
    configuration: JobConfiguration,
    batch_size: usize,
) -> CreateJobRequest {
    CreateJobRequest {
        name: name.to_string(),
        source,
        flags: BehaviorFlags::default(),
        batch_size: Some(batch_size),
        schedule: ScheduleDescriptor::Manual,
        configuration,
    }
}

pub const PRODUCT_HEADER: &str = "sku,name,price,weight,stock";

/// 五条商品记录
pub fn product_rows() -> Vec<&'static str> {
    vec![
        "P-1,Alpha Shirt,10.00,0.2,5",
        "P-2,Beta Shirt,20.00,0.3,0",
        "P-3,Gamma Shirt,30.00,0.4,7",
        "P-4,Delta Shirt,40.00,0.5,2",
        "P-5,Epsilon Shirt,50.00,0.6,9",
    ]
}

// ==========================================
// 模拟 AI 提供方
// ==========================================

/// 永远失败,并记录调用次数
pub struct FailingProvider {
    pub calls: AtomicU32,
}

impl FailingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: &AiRequest) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("provider unavailable")
    }
}

/// 返回提示词最后一行的大写形式
pub struct UppercaseProvider;

#[async_trait]
impl AiProvider for UppercaseProvider {
    fn name(&self) -> &str {
        "upper"
    }

    async fn complete(&self, request: &AiRequest) -> anyhow::Result<String> {
        let last = request.prompt.lines().last().unwrap_or_default();
        Ok(last.to_uppercase())
    }
}
